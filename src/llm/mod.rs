//! 언어 모델 모듈
//!
//! 쿼리 재생성/컨텍스트 압축 체인이 호출하는 채팅 모델 추상화입니다.
//! 모델은 `platform/model` 형식의 참조(`ModelRef`)로 지정합니다.

use std::fmt;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{KnowledgeError, KnowledgeResult};
use crate::gemini::GeminiClient;

// ============================================================================
// Conversation Types
// ============================================================================

/// 대화 메시지 역할
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Human,
    Ai,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "System"),
            Role::Human => write!(f, "Human"),
            Role::Ai => write!(f, "Assistant"),
        }
    }
}

/// 대화 히스토리 메시지
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn human(content: impl Into<String>) -> Self {
        Self {
            role: Role::Human,
            content: content.into(),
        }
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self {
            role: Role::Ai,
            content: content.into(),
        }
    }
}

/// 히스토리를 `Role: content` 줄 목록으로 직렬화
pub fn format_history(history: &[ChatMessage]) -> String {
    history
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// ChatModel Trait
// ============================================================================

/// 채팅 모델 트레이트
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// 프롬프트에 대한 텍스트 응답 생성
    async fn generate(&self, prompt: &str) -> Result<String>;

    /// 모델 이름
    fn name(&self) -> &str;
}

// ============================================================================
// Model Reference
// ============================================================================

/// `platform/model` 형식의 모델 참조
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRef {
    pub platform: String,
    pub model: String,
}

impl ModelRef {
    /// 참조 문자열 파싱 (예: `gemini/gemini-2.0-flash`)
    pub fn parse(raw: &str) -> KnowledgeResult<Self> {
        let raw = raw.trim();
        match raw.split_once('/') {
            Some((platform, model)) if !platform.is_empty() && !model.is_empty() => Ok(Self {
                platform: platform.to_string(),
                model: model.to_string(),
            }),
            _ => Err(KnowledgeError::config(format!(
                "invalid model reference '{}': expected 'platform/model'",
                raw
            ))),
        }
    }
}

impl fmt::Display for ModelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.platform, self.model)
    }
}

/// 모델 참조 → 채팅 모델 생성
#[async_trait]
pub trait ChatModelFactory: Send + Sync {
    async fn create_chat_model(&self, model: &ModelRef) -> Result<Arc<dyn ChatModel>>;
}

// ============================================================================
// Gemini Chat Model
// ============================================================================

/// Gemini `generateContent` 기반 채팅 모델
///
/// source: https://ai.google.dev/api/generate-content
#[derive(Debug, Clone)]
pub struct GeminiChatModel {
    client: GeminiClient,
    model: String,
}

impl GeminiChatModel {
    pub fn new(client: GeminiClient, model: impl Into<String>) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<GenerateContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize, Deserialize)]
struct GenerateContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    #[serde(default)]
    parts: Vec<GeneratePart>,
}

#[derive(Debug, Serialize, Deserialize)]
struct GeneratePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<GenerateContent>,
}

#[async_trait]
impl ChatModel for GeminiChatModel {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            contents: vec![GenerateContent {
                role: Some("user".to_string()),
                parts: vec![GeneratePart {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig { temperature: 0.0 },
        };

        let response: GenerateResponse = self
            .client
            .call(&self.model, "generateContent", &request)
            .await
            .with_context(|| format!("Gemini generateContent failed ({})", self.model))?;

        let text: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        if text.is_empty() {
            return Err(KnowledgeError::Model(format!("{} returned no candidates", self.model)).into());
        }

        Ok(text)
    }

    fn name(&self) -> &str {
        &self.model
    }
}

/// Gemini 플랫폼 전용 팩토리
#[derive(Debug, Clone)]
pub struct GeminiModelFactory {
    client: GeminiClient,
}

impl GeminiModelFactory {
    pub fn new(client: GeminiClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ChatModelFactory for GeminiModelFactory {
    async fn create_chat_model(&self, model: &ModelRef) -> Result<Arc<dyn ChatModel>> {
        if model.platform != "gemini" {
            return Err(KnowledgeError::config(format!(
                "unsupported model platform '{}' (available: gemini)",
                model.platform
            ))
            .into());
        }

        Ok(Arc::new(GeminiChatModel::new(
            self.client.clone(),
            model.model.clone(),
        )))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model_ref() {
        let m = ModelRef::parse("gemini/gemini-2.0-flash").unwrap();
        assert_eq!(m.platform, "gemini");
        assert_eq!(m.model, "gemini-2.0-flash");
        assert_eq!(m.to_string(), "gemini/gemini-2.0-flash");
    }

    #[test]
    fn test_parse_model_ref_keeps_nested_path() {
        let m = ModelRef::parse("openai/org/model").unwrap();
        assert_eq!(m.platform, "openai");
        assert_eq!(m.model, "org/model");
    }

    #[test]
    fn test_parse_model_ref_invalid() {
        for raw in ["", "gemini", "/model", "gemini/"] {
            assert!(matches!(
                ModelRef::parse(raw),
                Err(KnowledgeError::Configuration(_))
            ));
        }
    }

    #[test]
    fn test_format_history() {
        let history = vec![ChatMessage::human("What is Rust?"), ChatMessage::ai("A language.")];
        assert_eq!(
            format_history(&history),
            "Human: What is Rust?\nAssistant: A language."
        );
    }

    #[tokio::test]
    async fn test_factory_rejects_unknown_platform() {
        let factory = GeminiModelFactory::new(GeminiClient::new("k".to_string()).unwrap());
        let model = ModelRef::parse("openai/gpt-4o").unwrap();
        let err = factory.create_chat_model(&model).await.err().unwrap();
        assert!(matches!(
            err.downcast_ref::<KnowledgeError>(),
            Some(KnowledgeError::Configuration(_))
        ));
    }

    #[test]
    fn test_generate_response_parsing() {
        let body = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"a"},{"text":"b"}]}}]}"#;
        let parsed: GenerateResponse = serde_json::from_str(body).unwrap();
        let text: String = parsed.candidates[0]
            .content
            .as_ref()
            .map(|c| c.parts.iter().map(|p| p.text.as_str()).collect())
            .unwrap_or_default();
        assert_eq!(text, "ab");
    }
}
