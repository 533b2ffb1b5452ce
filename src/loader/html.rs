//! HTML 파일 로더
//!
//! 로컬 HTML 파일에서 제목과 본문 텍스트를 추출합니다.
//! 본문 우선순위: article > main > [role=main] > .content > #content > body

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::knowledge::RawDocument;

use super::{extension_of, DocumentLoader, LoaderFields};

/// 본문 후보 셀렉터 (우선순위 순)
const CONTENT_SELECTORS: [&str; 6] = [
    "article",
    "main",
    "[role=main]",
    ".content",
    "#content",
    "body",
];

/// 본문으로 인정할 최소 길이
const MIN_CONTENT_LEN: usize = 100;

/// HTML 로더
#[derive(Debug, Clone, Copy, Default)]
pub struct HtmlLoader;

#[async_trait]
impl DocumentLoader for HtmlLoader {
    fn name(&self) -> &'static str {
        "html"
    }

    fn supports(&self, path: &Path) -> bool {
        matches!(extension_of(path).as_deref(), Some("html" | "htm"))
    }

    async fn load(&self, path: &Path, _fields: &LoaderFields) -> Result<Vec<RawDocument>> {
        let html = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read HTML file: {:?}", path))?;

        let (title, content) = parse_html(&html);
        if content.is_empty() {
            tracing::warn!("No text extracted from HTML: {:?}", path);
        }

        let mut doc = RawDocument::new(content).with_metadata("source", path.display().to_string());
        if let Some(title) = title {
            doc = doc.with_metadata("title", title);
        }

        Ok(vec![doc])
    }
}

/// HTML 문자열 → (제목, 본문)
pub fn parse_html(html: &str) -> (Option<String>, String) {
    let document = Html::parse_document(html);
    (extract_title(&document), extract_content(&document))
}

/// 제목 추출 (<title> → <h1>)
fn extract_title(document: &Html) -> Option<String> {
    ["title", "h1"].iter().find_map(|selector_str| {
        let selector = Selector::parse(selector_str).ok()?;
        let element = document.select(&selector).next()?;
        let title = element.text().collect::<String>().trim().to_string();
        (!title.is_empty()).then_some(title)
    })
}

/// 본문 추출
fn extract_content(document: &Html) -> String {
    let mut fallback = String::new();

    for selector_str in CONTENT_SELECTORS {
        let Ok(selector) = Selector::parse(selector_str) else {
            continue;
        };
        if let Some(element) = document.select(&selector).next() {
            let text = element_text(&element);
            if text.len() > MIN_CONTENT_LEN {
                return text;
            }
            if fallback.is_empty() {
                fallback = text;
            }
        }
    }

    fallback
}

/// 요소 텍스트 (연속 공백 정리)
fn element_text(element: &ElementRef) -> String {
    let joined = element
        .text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    match Regex::new(r"\s+") {
        Ok(re) => re.replace_all(&joined, " ").trim().to_string(),
        Err(_) => joined.split_whitespace().collect::<Vec<_>>().join(" "),
    }
}
