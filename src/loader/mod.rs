//! 문서 로더 모듈
//!
//! 파일 경로 → 원본 문서(`RawDocument`) 변환을 담당하는 로더들과
//! 등록 순서대로 로더를 고르는 `LoaderRegistry`를 제공합니다.
//! - 텍스트 파일: 직접 읽기
//! - HTML 파일: scraper로 본문 추출
//! - PDF 파일: pdf-extract로 페이지별 추출

pub mod html;
pub mod pdf;
pub mod text;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::{KnowledgeError, KnowledgeResult};
use crate::knowledge::RawDocument;

pub use html::HtmlLoader;
pub use pdf::PdfLoader;
pub use text::TextLoader;

// ============================================================================
// DocumentLoader Trait
// ============================================================================

/// 로드 옵션
///
/// 소스 단계에서 청킹하는 편이 싼 로더를 위해 그대로 전달됩니다.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderFields {
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
}

/// 문서 로더 트레이트
#[async_trait]
pub trait DocumentLoader: Send + Sync {
    /// 로더 이름
    fn name(&self) -> &'static str;

    /// 경로 지원 여부
    fn supports(&self, path: &Path) -> bool;

    /// 문서 로드
    async fn load(&self, path: &Path, fields: &LoaderFields) -> Result<Vec<RawDocument>>;
}

/// 확장자(소문자) 추출
pub(crate) fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_lowercase)
}

// ============================================================================
// LoaderRegistry
// ============================================================================

/// 로더 레지스트리
///
/// 등록 순서대로 `supports`를 확인하여 첫 번째로 일치하는 로더를 사용합니다.
#[derive(Clone, Default)]
pub struct LoaderRegistry {
    loaders: Vec<Arc<dyn DocumentLoader>>,
}

impl LoaderRegistry {
    /// 빈 레지스트리
    pub fn new() -> Self {
        Self::default()
    }

    /// 기본 로더 등록 (text → html → pdf)
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(TextLoader));
        registry.register(Arc::new(HtmlLoader));
        registry.register(Arc::new(PdfLoader));
        registry
    }

    /// 로더 추가 (마지막 순위)
    pub fn register(&mut self, loader: Arc<dyn DocumentLoader>) {
        tracing::debug!("Registered document loader: {}", loader.name());
        self.loaders.push(loader);
    }

    /// 등록된 로더 이름 목록
    pub fn loader_names(&self) -> Vec<&'static str> {
        self.loaders.iter().map(|l| l.name()).collect()
    }

    /// 경로를 지원하는 로더가 있는지
    pub fn supports(&self, path: &Path) -> bool {
        self.loaders.iter().any(|l| l.supports(path))
    }

    /// 경로에 맞는 로더 선택
    pub fn resolve(&self, path: &Path) -> KnowledgeResult<Arc<dyn DocumentLoader>> {
        self.loaders
            .iter()
            .find(|l| l.supports(path))
            .cloned()
            .ok_or_else(|| KnowledgeError::UnsupportedFormat(path.to_path_buf()))
    }

    /// 선택된 로더로 문서 로드
    pub async fn load(&self, path: &Path, fields: &LoaderFields) -> Result<Vec<RawDocument>> {
        let loader = self.resolve(path)?;
        tracing::debug!("Loading {:?} with {}", path, loader.name());
        loader.load(path, fields).await
    }
}

// ============================================================================
// Tests
// ============================================================================
