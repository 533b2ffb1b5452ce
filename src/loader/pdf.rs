//! PDF 로더
//!
//! pdf-extract 크레이트로 텍스트를 추출하여 페이지별 문서를 만듭니다.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;

use crate::knowledge::RawDocument;

use super::{extension_of, DocumentLoader, LoaderFields};

/// PDF 로더 (페이지 번호는 1부터)
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfLoader;

#[async_trait]
impl DocumentLoader for PdfLoader {
    fn name(&self) -> &'static str {
        "pdf"
    }

    fn supports(&self, path: &Path) -> bool {
        extension_of(path).as_deref() == Some("pdf")
    }

    async fn load(&self, path: &Path, _fields: &LoaderFields) -> Result<Vec<RawDocument>> {
        // CPU 바운드이므로 spawn_blocking
        let owned: PathBuf = path.to_path_buf();
        let pages = tokio::task::spawn_blocking(move || extract_pages(&owned))
            .await
            .context("PDF extraction task failed")??;

        let total_pages = pages.len();
        let source = path.display().to_string();

        Ok(pages
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                RawDocument::new(text)
                    .with_metadata("source", source.clone())
                    .with_metadata("page", i + 1)
                    .with_metadata("total_pages", total_pages)
            })
            .collect())
    }
}

/// PDF 파일에서 페이지별 텍스트 추출
fn extract_pages(path: &Path) -> Result<Vec<String>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read PDF: {:?}", path))?;

    let text = pdf_extract::extract_text_from_mem(&bytes)
        .with_context(|| format!("Failed to extract text from PDF: {:?}", path))?;

    if text.trim().is_empty() {
        tracing::warn!(
            "No text extracted from PDF: {:?}. It might be a scanned document.",
            path
        );
        return Ok(vec![]);
    }

    Ok(split_pdf_pages(&text))
}

/// PDF 텍스트를 페이지별로 분리
///
/// 폼피드(`\x0c`) → `--- Page N ---` 형태 구분자 순으로 시도하고,
/// 둘 다 실패하면 전체를 한 페이지로 취급합니다.
fn split_pdf_pages(text: &str) -> Vec<String> {
    let pages: Vec<String> = text
        .split('\x0c')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if pages.len() > 1 {
        return pages;
    }

    if let Ok(page_pattern) =
        Regex::new(r"(?m)^[\s]*[-=]+[\s]*(?:Page[\s]*)?(\d+)[\s]*[-=]+[\s]*$")
    {
        let pages: Vec<String> = page_pattern
            .split(text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if pages.len() > 1 {
            return pages;
        }
    }

    vec![text.trim().to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supports_pdf_only() {
        assert!(PdfLoader.supports(Path::new("paper.PDF")));
        assert!(!PdfLoader.supports(Path::new("paper.txt")));
    }

    #[test]
    fn test_split_pdf_pages_with_formfeed() {
        let pages = split_pdf_pages("Page 1 content\x0cPage 2 content\x0cPage 3 content");
        assert_eq!(pages.len(), 3);
        assert_eq!(pages[0], "Page 1 content");
        assert_eq!(pages[1], "Page 2 content");
    }

    #[test]
    fn test_split_pdf_pages_with_markers() {
        let pages = split_pdf_pages("intro\n--- Page 2 ---\nsecond\n--- Page 3 ---\nthird");
        assert_eq!(pages, vec!["intro", "second", "third"]);
    }

    #[test]
    fn test_split_pdf_pages_no_separator() {
        let pages = split_pdf_pages("Just some text without page breaks");
        assert_eq!(pages, vec!["Just some text without page breaks"]);
    }

    #[tokio::test]
    async fn test_load_invalid_pdf_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"not a pdf").unwrap();

        let result = PdfLoader.load(&path, &LoaderFields::default()).await;
        assert!(result.is_err());
    }
}
