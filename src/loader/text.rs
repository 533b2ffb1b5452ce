//! 텍스트 파일 로더

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::knowledge::RawDocument;

use super::{extension_of, DocumentLoader, LoaderFields};

/// 지원 확장자
const TEXT_EXTENSIONS: [&str; 7] = ["txt", "text", "md", "markdown", "csv", "json", "log"];

/// 텍스트 파일을 그대로 하나의 문서로 읽는 로더
#[derive(Debug, Clone, Copy, Default)]
pub struct TextLoader;

#[async_trait]
impl DocumentLoader for TextLoader {
    fn name(&self) -> &'static str {
        "text"
    }

    fn supports(&self, path: &Path) -> bool {
        extension_of(path)
            .map(|ext| TEXT_EXTENSIONS.contains(&ext.as_str()))
            .unwrap_or(false)
    }

    async fn load(&self, path: &Path, _fields: &LoaderFields) -> Result<Vec<RawDocument>> {
        let text = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read text file: {:?}", path))?;

        Ok(vec![
            RawDocument::new(text).with_metadata("source", path.display().to_string())
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_supports_extensions() {
        let loader = TextLoader;
        assert!(loader.supports(Path::new("a.txt")));
        assert!(loader.supports(Path::new("a.TEXT")));
        assert!(loader.supports(Path::new("dir/readme.md")));
        assert!(!loader.supports(Path::new("a.pdf")));
        assert!(!loader.supports(Path::new("Makefile")));
    }

    #[tokio::test]
    async fn test_load_sets_source() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("note.txt");
        std::fs::write(&path, "hello knowledge").unwrap();

        let docs = TextLoader.load(&path, &LoaderFields::default()).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].content, "hello knowledge");
        assert_eq!(
            docs[0].metadata["source"].as_str(),
            Some(path.display().to_string().as_str())
        );
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let result = TextLoader
            .load(Path::new("/nonexistent/file.txt"), &LoaderFields::default())
            .await;
        assert!(result.is_err());
    }
}
