//! 대화 연동 모듈
//!
//! 대화마다 검색 체인을 하나씩 지연 생성하여 캐시하고,
//! 채팅 직전에 검색 결과를 프롬프트 변수 `knowledge`에 넣습니다.
//!
//! - 히스토리 초기화: 캐시 항목 제거 + 벡터 스토어 핸들 해제
//! - 대화 종료: 캐시 항목 제거
//! - 무효화 도중 만들어진 체인은 호출자에게만 돌려주고 캐시하지 않음

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;

use crate::chain::{build_chain, ChainOptions, SearchChain};
use crate::config::KnowledgeSettings;
use crate::error::KnowledgeError;
use crate::knowledge::{Chunk, KnowledgeSelection, KnowledgeService};
use crate::llm::{ChatMessage, ChatModel, ChatModelFactory, ModelRef};
use crate::retriever::{MultiScoreThresholdRetriever, RetrieverOptions};

/// 검색 결과가 들어갈 프롬프트 변수 키
pub const KNOWLEDGE_PROMPT_KEY: &str = "knowledge";

/// 프롬프트 변수
pub type PromptVariables = HashMap<String, serde_json::Value>;

// ============================================================================
// ConversationContext
// ============================================================================

/// 대화 정보
#[derive(Debug, Clone, Default)]
pub struct ConversationContext {
    pub conversation_id: String,
    /// 프리셋의 지식베이스 선택 (없으면 기본 지식베이스)
    pub selection: Option<KnowledgeSelection>,
    /// 플러그인(도구 호출) 모드 대화는 지식 검색을 하지 않음
    pub plugin_mode: bool,
}

impl ConversationContext {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            ..Default::default()
        }
    }

    pub fn with_selection(mut self, selection: KnowledgeSelection) -> Self {
        self.selection = Some(selection);
        self
    }
}

// ============================================================================
// KnowledgeChat
// ============================================================================

/// 대화별 검색 체인 관리자
pub struct KnowledgeChat {
    service: Arc<KnowledgeService>,
    models: Arc<dyn ChatModelFactory>,
    chains: Mutex<HashMap<String, Arc<SearchChain>>>,
    generation: AtomicU64,
}

impl KnowledgeChat {
    pub fn new(service: Arc<KnowledgeService>, models: Arc<dyn ChatModelFactory>) -> Self {
        Self {
            service,
            models,
            chains: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn service(&self) -> &Arc<KnowledgeService> {
        &self.service
    }

    /// 캐시된 대화 수
    pub async fn cached_conversations(&self) -> usize {
        self.chains.lock().await.len()
    }

    /// 대화의 검색 체인 (없으면 생성)
    ///
    /// 선택된 지식베이스가 없으면 `None`이며 캐시하지 않으므로
    /// 이후 수집된 지식베이스는 다음 턴에 반영됩니다.
    pub async fn chain_for(&self, ctx: &ConversationContext) -> Result<Option<Arc<SearchChain>>> {
        if let Some(chain) = self.chains.lock().await.get(&ctx.conversation_id) {
            return Ok(Some(chain.clone()));
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let Some(chain) = self.create_chain(ctx).await? else {
            return Ok(None);
        };
        let chain = Arc::new(chain);

        let mut chains = self.chains.lock().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(
                "Cache invalidated while building chain for {}, not caching",
                ctx.conversation_id
            );
            return Ok(Some(chain));
        }

        // 동시에 만든 체인이 있으면 먼저 들어간 쪽을 사용
        let cached = chains
            .entry(ctx.conversation_id.clone())
            .or_insert(chain)
            .clone();
        Ok(Some(cached))
    }

    /// 검색 체인 생성
    async fn create_chain(&self, ctx: &ConversationContext) -> Result<Option<SearchChain>> {
        let stores = self.service.resolve_stores(ctx.selection.as_ref()).await?;
        if stores.is_empty() {
            return Ok(None);
        }

        let settings = self.service.settings().await;
        let profile = self.service.active_profile().await;

        let retriever = MultiScoreThresholdRetriever::from_vector_stores(
            stores,
            RetrieverOptions {
                min_similarity_score: profile.min_similarity_score,
                max_k: settings.top_k,
            },
        );

        let model = if profile.mode.requires_model() {
            let raw = profile
                .model
                .clone()
                .or_else(|| settings.model.clone())
                .ok_or_else(|| {
                    KnowledgeError::config(format!(
                        "model is not set (required by '{}' mode)",
                        profile.mode
                    ))
                })?;
            Some(self.create_model(&raw).await?)
        } else {
            None
        };

        let chain = build_chain(
            ChainOptions {
                mode: profile.mode,
                regenerate_before_compression: settings.regenerate_before_compression,
            },
            retriever,
            model,
        )?;

        tracing::debug!(
            "Created {} chain for conversation {} over {:?}",
            chain.mode(),
            ctx.conversation_id,
            chain.retriever().store_ids()
        );
        Ok(Some(chain))
    }

    async fn create_model(&self, raw: &str) -> Result<Arc<dyn ChatModel>> {
        let model_ref = ModelRef::parse(raw)?;
        self.models
            .create_chat_model(&model_ref)
            .await
            .with_context(|| format!("Failed to create chat model {}", model_ref))
    }

    /// 대화 기준 지식 검색
    ///
    /// 선택된 지식베이스가 없으면 빈 결과입니다.
    pub async fn search(
        &self,
        ctx: &ConversationContext,
        query: &str,
        history: &[ChatMessage],
    ) -> Result<Vec<Chunk>> {
        match self.chain_for(ctx).await? {
            Some(chain) => Ok(chain.run(query, history).await),
            None => Ok(vec![]),
        }
    }

    /// 채팅 직전 훅
    ///
    /// 검색 결과를 `KNOWLEDGE_PROMPT_KEY`에 JSON 배열로 넣습니다.
    /// 플러그인 모드이거나 지식베이스가 선택되지 않으면 아무것도 넣지 않습니다.
    pub async fn before_chat(
        &self,
        ctx: &ConversationContext,
        message: &str,
        history: &[ChatMessage],
        variables: &mut PromptVariables,
    ) -> Result<()> {
        if ctx.plugin_mode {
            return Ok(());
        }

        let Some(chain) = self.chain_for(ctx).await? else {
            return Ok(());
        };

        let documents = chain.run(message, history).await;
        tracing::debug!(
            "Documents: {}",
            documents
                .iter()
                .map(|d| d.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n")
        );

        let value = serde_json::to_value(&documents).context("Failed to serialize documents")?;
        variables.insert(KNOWLEDGE_PROMPT_KEY.to_string(), value);
        Ok(())
    }

    // ========================================================================
    // Lifecycle Events
    // ========================================================================

    /// 히스토리 초기화 이벤트 (`None`이면 전체)
    pub async fn on_history_cleared(&self, conversation_id: Option<&str>) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        {
            let mut chains = self.chains.lock().await;
            match conversation_id {
                Some(id) => {
                    chains.remove(id);
                }
                None => chains.clear(),
            }
        }
        self.service.clear_vector_stores().await;
        tracing::debug!("History cleared: {:?}", conversation_id);
    }

    /// 대화 종료 이벤트
    pub async fn on_conversation_disposed(&self, conversation_id: &str) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.chains.lock().await.remove(conversation_id);
    }

    /// 설정 교체 (기존 체인은 모두 폐기)
    pub async fn update_settings(&self, settings: KnowledgeSettings) -> Result<()> {
        self.service.update_settings(settings).await?;
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.chains.lock().await.clear();
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
