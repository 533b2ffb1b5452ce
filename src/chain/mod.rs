//! 검색 체인 모듈
//!
//! 세 가지 모드가 같은 파이프라인을 공유합니다.
//! 쿼리 변환(선택) → 다중 스토어 검색 → 문서 압축(선택)
//!
//! - default: 변환/압축 없음
//! - regenerate: 대화 히스토리로 독립 질문을 재작성한 뒤 검색
//! - contextual-compression: 검색 결과를 청크별로 LLM에 보내 관련 부분만 남김
//!
//! 모델 실패는 한 단계 단순한 동작으로 대체됩니다 (원본 쿼리, 원본 청크).

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};

use crate::error::{KnowledgeError, KnowledgeResult};
use crate::knowledge::{Chunk, ScoredChunk};
use crate::llm::{format_history, ChatMessage, ChatModel};
use crate::retriever::MultiScoreThresholdRetriever;

/// 압축 단계에서 관련 내용이 없을 때 모델이 돌려주는 표식
pub const NO_OUTPUT: &str = "NO_OUTPUT";

/// 독립 질문 재작성 프롬프트
fn regenerate_prompt(chat_history: &str, question: &str) -> String {
    format!(
        "Given the following conversation and a follow up question, rephrase the follow up \
         question to be a standalone question that can be used to search a knowledge base. \
         Reply with the standalone question only.\n\n\
         Chat History:\n{chat_history}\n\n\
         Follow Up Input: {question}\n\
         Standalone question:"
    )
}

/// 관련 부분 추출 프롬프트
fn extract_prompt(question: &str, context: &str) -> String {
    format!(
        "Given the following question and context, extract any part of the context *AS IS* \
         that is relevant to answer the question. If none of the context is relevant return \
         {NO_OUTPUT}.\n\n\
         Remember, *DO NOT* edit the extracted parts of the context.\n\n\
         > Question: {question}\n\
         > Context:\n\
         >>>\n{context}\n>>>\n\
         Extracted relevant parts:"
    )
}

// ============================================================================
// ChainMode
// ============================================================================

/// 검색 체인 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChainMode {
    #[default]
    Default,
    Regenerate,
    ContextualCompression,
}

impl ChainMode {
    pub const ALL: [ChainMode; 3] = [
        ChainMode::Default,
        ChainMode::Regenerate,
        ChainMode::ContextualCompression,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ChainMode::Default => "default",
            ChainMode::Regenerate => "regenerate",
            ChainMode::ContextualCompression => "contextual-compression",
        }
    }

    /// 언어 모델이 필요한 모드인지
    pub fn requires_model(&self) -> bool {
        !matches!(self, ChainMode::Default)
    }
}

impl fmt::Display for ChainMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainMode {
    type Err = KnowledgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        Self::ALL
            .into_iter()
            .find(|mode| mode.as_str() == normalized)
            .ok_or_else(|| {
                KnowledgeError::config(format!(
                    "unknown chain mode '{}' (available: default, regenerate, contextual-compression)",
                    s
                ))
            })
    }
}

// ============================================================================
// Pipeline Steps
// ============================================================================

/// 검색 전 쿼리 변환 단계
#[async_trait]
pub trait QueryTransform: Send + Sync {
    async fn transform(&self, query: &str, history: &[ChatMessage]) -> Result<String>;
}

/// 검색 후 문서 압축 단계
#[async_trait]
pub trait DocumentCompressor: Send + Sync {
    async fn compress(&self, chunks: &[Chunk], query: &str) -> Result<Vec<Chunk>>;
}

/// 히스토리 기반 독립 질문 재작성
pub struct QueryRegenerator {
    model: Arc<dyn ChatModel>,
}

impl QueryRegenerator {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl QueryTransform for QueryRegenerator {
    async fn transform(&self, query: &str, history: &[ChatMessage]) -> Result<String> {
        // 히스토리가 없으면 재작성할 맥락도 없음
        if history.is_empty() {
            return Ok(query.to_string());
        }

        let prompt = regenerate_prompt(&format_history(history), query);

        let reply = self
            .model
            .generate(&prompt)
            .await
            .map_err(|e| KnowledgeError::Model(format!("{:#}", e)))?;

        let rewritten = reply.trim();
        if rewritten.is_empty() {
            return Err(KnowledgeError::Model("empty standalone question".to_string()).into());
        }

        tracing::debug!("Regenerated query: '{}' -> '{}'", query, rewritten);
        Ok(rewritten.to_string())
    }
}

/// 청크별 관련 부분 추출기
///
/// 청크마다 모델을 한 번씩 동시 호출합니다.
/// `NO_OUTPUT`이나 빈 응답은 청크를 버리고, 남은 청크는 원래 메타데이터를 유지합니다.
pub struct LlmChainExtractor {
    model: Arc<dyn ChatModel>,
}

impl LlmChainExtractor {
    pub fn new(model: Arc<dyn ChatModel>) -> Self {
        Self { model }
    }
}

#[async_trait]
impl DocumentCompressor for LlmChainExtractor {
    async fn compress(&self, chunks: &[Chunk], query: &str) -> Result<Vec<Chunk>> {
        let calls = chunks.iter().map(|chunk| {
            let prompt = extract_prompt(query, &chunk.content);
            let model = self.model.clone();
            async move { model.generate(&prompt).await }
        });

        let replies = join_all(calls).await;

        let mut compressed = Vec::with_capacity(chunks.len());
        for (chunk, reply) in chunks.iter().zip(replies) {
            let reply = reply.map_err(|e| KnowledgeError::Model(format!("{:#}", e)))?;
            let extracted = reply.trim();
            if extracted.is_empty() || extracted == NO_OUTPUT {
                continue;
            }
            compressed.push(Chunk {
                content: extracted.to_string(),
                metadata: chunk.metadata.clone(),
            });
        }

        tracing::debug!("Compressed {} chunks to {}", chunks.len(), compressed.len());
        Ok(compressed)
    }
}

// ============================================================================
// SearchChain
// ============================================================================

/// 검색 체인
///
/// 생성 시점에 모드가 고정되며, `run`은 호출자에게 실패를 돌려주지 않습니다.
pub struct SearchChain {
    mode: ChainMode,
    retriever: MultiScoreThresholdRetriever,
    transform: Option<Arc<dyn QueryTransform>>,
    compressor: Option<Arc<dyn DocumentCompressor>>,
}

impl SearchChain {
    /// 변환/압축 없는 체인
    pub fn new(retriever: MultiScoreThresholdRetriever) -> Self {
        Self {
            mode: ChainMode::Default,
            retriever,
            transform: None,
            compressor: None,
        }
    }

    pub fn with_mode(mut self, mode: ChainMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_transform(mut self, transform: Arc<dyn QueryTransform>) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_compressor(mut self, compressor: Arc<dyn DocumentCompressor>) -> Self {
        self.compressor = Some(compressor);
        self
    }

    pub fn mode(&self) -> ChainMode {
        self.mode
    }

    pub fn retriever(&self) -> &MultiScoreThresholdRetriever {
        &self.retriever
    }

    /// 쿼리 실행
    ///
    /// 반환 청크의 메타데이터에는 `score`, `source_store`가 추가됩니다.
    pub async fn run(&self, query: &str, history: &[ChatMessage]) -> Vec<Chunk> {
        let search_query = match &self.transform {
            Some(transform) => match transform.transform(query, history).await {
                Ok(rewritten) => rewritten,
                Err(e) => {
                    tracing::warn!("Query rewrite failed, using raw query: {:#}", e);
                    query.to_string()
                }
            },
            None => query.to_string(),
        };

        let chunks: Vec<Chunk> = self
            .retriever
            .retrieve(&search_query)
            .await
            .into_iter()
            .map(ScoredChunk::into_chunk)
            .collect();

        match &self.compressor {
            Some(compressor) if !chunks.is_empty() => {
                match compressor.compress(&chunks, &search_query).await {
                    Ok(compressed) => compressed,
                    Err(e) => {
                        tracing::warn!("Compression failed, using raw chunks: {:#}", e);
                        chunks
                    }
                }
            }
            _ => chunks,
        }
    }
}

/// 체인 생성 옵션
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChainOptions {
    pub mode: ChainMode,
    /// contextual-compression 전에 쿼리 재생성
    pub regenerate_before_compression: bool,
}

/// 모드에 맞는 체인 생성
///
/// default 외 모드는 모델이 없으면 `Configuration` 에러입니다.
pub fn build_chain(
    options: ChainOptions,
    retriever: MultiScoreThresholdRetriever,
    model: Option<Arc<dyn ChatModel>>,
) -> KnowledgeResult<SearchChain> {
    let chain = SearchChain::new(retriever).with_mode(options.mode);
    if !options.mode.requires_model() {
        return Ok(chain);
    }

    let model = model.ok_or_else(|| {
        KnowledgeError::config(format!("model is not set (required by '{}' mode)", options.mode))
    })?;

    let chain = match options.mode {
        ChainMode::Default => chain,
        ChainMode::Regenerate => chain.with_transform(Arc::new(QueryRegenerator::new(model))),
        ChainMode::ContextualCompression => {
            let chain = chain.with_compressor(Arc::new(LlmChainExtractor::new(model.clone())));
            if options.regenerate_before_compression {
                chain.with_transform(Arc::new(QueryRegenerator::new(model)))
            } else {
                chain
            }
        }
    };

    tracing::debug!("Built {} search chain", options.mode);
    Ok(chain)
}

// ============================================================================
// Tests
// ============================================================================
