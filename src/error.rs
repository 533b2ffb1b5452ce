//! 에러 타입
//!
//! 도메인 에러는 `KnowledgeError`로 표현하고,
//! I/O 경계(CLI, 저장소 등)에서는 `anyhow::Result`로 감싸서 전파합니다.
//! 호출자는 `downcast_ref::<KnowledgeError>()`로 원래 종류를 확인할 수 있습니다.

use std::path::PathBuf;

use thiserror::Error;

/// 지식베이스 도메인 에러
#[derive(Debug, Error)]
pub enum KnowledgeError {
    /// 잘못된 설정 (청크 크기/오버랩, 모델 참조, 선택 패턴 등)
    #[error("configuration error: {0}")]
    Configuration(String),

    /// 등록된 로더 중 경로를 지원하는 것이 없음
    #[error("unsupported document format: {}", .0.display())]
    UnsupportedFormat(PathBuf),

    /// 개별 벡터 스토어 검색 실패 (검색 전체를 중단하지 않음)
    #[error("vector store '{store}' query failed: {message}")]
    StoreQuery { store: String, message: String },

    /// 언어 모델 호출 실패
    #[error("model error: {0}")]
    Model(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl KnowledgeError {
    /// 설정 에러 생성 헬퍼
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }
}

pub type KnowledgeResult<T> = Result<T, KnowledgeError>;

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_display() {
        let e = KnowledgeError::config("chunk_overlap must be smaller than chunk_size");
        assert!(e.to_string().contains("configuration error"));
        assert!(e.to_string().contains("chunk_overlap"));
    }

    #[test]
    fn test_unsupported_format_display() {
        let e = KnowledgeError::UnsupportedFormat(PathBuf::from("/tmp/archive.zip"));
        assert!(e.to_string().contains("archive.zip"));
    }

    #[test]
    fn test_downcast_through_anyhow() {
        let err: anyhow::Error = KnowledgeError::Model("timeout".into()).into();
        let err = err.context("regenerate failed");
        assert!(matches!(
            err.downcast_ref::<KnowledgeError>(),
            Some(KnowledgeError::Model(_))
        ));
    }

    #[test]
    fn test_io_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let e: KnowledgeError = io.into();
        assert!(e.to_string().contains("io error"));
    }
}
