//! 문서/청크 타입
//!
//! 로더가 만든 원본 문서(`RawDocument`)와 검색 단위인 청크(`Chunk`)를 정의합니다.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 메타데이터 (문자열 키 → 스칼라 값)
pub type Metadata = BTreeMap<String, Value>;

/// 로더가 생성한 원본 문서
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDocument {
    /// 문서 본문
    pub content: String,
    /// 메타데이터 (source, page 등)
    #[serde(default)]
    pub metadata: Metadata,
}

impl RawDocument {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    /// 메타데이터 항목 추가 (빌더)
    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// 청크 - 임베딩/검색 단위
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// 청크 텍스트
    pub content: String,
    /// 원본 문서에서 상속된 메타데이터 + chunk_index, offset
    #[serde(default)]
    pub metadata: Metadata,
}

impl Chunk {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// `source` 메타데이터 (있으면)
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(Value::as_str)
    }
}

/// 검색 결과 청크 (retriever만 생성, 저장되지 않음)
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// 유사도 스코어 (0.0 ~ 1.0)
    pub score: f32,
    /// 결과를 반환한 벡터 스토어 ID
    pub source_store_id: String,
}

impl ScoredChunk {
    /// 스코어와 스토어 ID를 메타데이터에 기록한 청크로 변환
    pub fn into_chunk(self) -> Chunk {
        let mut chunk = self.chunk;
        chunk
            .metadata
            .insert("score".to_string(), Value::from(f64::from(self.score)));
        chunk
            .metadata
            .insert("source_store".to_string(), Value::from(self.source_store_id));
        chunk
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_chunk_keeps_metadata() {
        let scored = ScoredChunk {
            chunk: Chunk::new("hello").with_metadata("source", "a.txt"),
            score: 0.75,
            source_store_id: "kb-1".to_string(),
        };

        let chunk = scored.into_chunk();
        assert_eq!(chunk.content, "hello");
        assert_eq!(chunk.source(), Some("a.txt"));
        assert_eq!(chunk.metadata["source_store"], "kb-1");
        assert_eq!(chunk.metadata["score"].as_f64(), Some(0.75));
    }

    #[test]
    fn test_chunk_serializes_as_content_and_metadata() {
        let chunk = Chunk::new("text").with_metadata("page", 3);
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["content"], "text");
        assert_eq!(json["metadata"]["page"], 3);
    }
}
