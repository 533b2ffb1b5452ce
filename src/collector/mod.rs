//! 파일 수집 모듈
//!
//! 로컬 파일 및 폴더에서 지식베이스에 넣을 파일을 수집합니다.
//! .gitignore 패턴을 존중하고, 등록된 로더가 지원하는 파일만 수집합니다.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::{Context, Result};
use ignore::WalkBuilder;

use crate::loader::LoaderRegistry;

// ============================================================================
// Collected File
// ============================================================================

/// 수집된 파일 정보
#[derive(Debug, Clone)]
pub struct CollectedFile {
    /// 파일 절대 경로
    pub path: PathBuf,
    /// 이 파일을 읽을 로더 이름
    pub loader: &'static str,
    /// 파일 크기 (바이트)
    pub size: u64,
    /// 수정 시간
    pub modified_at: Option<SystemTime>,
}

impl CollectedFile {
    /// 파일에서 CollectedFile 생성 (지원 로더가 없으면 None)
    fn from_path(path: PathBuf, loaders: &LoaderRegistry) -> Result<Option<Self>> {
        let loader = match loaders.resolve(&path) {
            Ok(loader) => loader.name(),
            Err(_) => return Ok(None),
        };

        let metadata = std::fs::metadata(&path)
            .with_context(|| format!("Failed to read metadata: {:?}", path))?;

        if !metadata.is_file() {
            return Ok(None);
        }

        Ok(Some(Self {
            path,
            loader,
            size: metadata.len(),
            modified_at: metadata.modified().ok(),
        }))
    }
}

// ============================================================================
// File Collector
// ============================================================================

/// 파일 수집기 설정
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// .gitignore 패턴 존중 여부
    pub respect_gitignore: bool,
    /// 숨김 파일 포함 여부
    pub include_hidden: bool,
    /// 최대 파일 크기 (바이트, 0이면 제한 없음)
    pub max_file_size: u64,
    /// 특정 확장자만 수집 (비어있으면 로더가 지원하는 전체)
    pub extensions: Vec<String>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            respect_gitignore: true,
            include_hidden: false,
            max_file_size: 10 * 1024 * 1024, // 10MB
            extensions: vec![],
        }
    }
}

/// 파일 수집기
pub struct FileCollector {
    config: CollectorConfig,
    loaders: LoaderRegistry,
}

impl FileCollector {
    pub fn new(config: CollectorConfig, loaders: LoaderRegistry) -> Self {
        Self { config, loaders }
    }

    /// 기본 설정으로 수집기 생성
    pub fn with_defaults(loaders: LoaderRegistry) -> Self {
        Self::new(CollectorConfig::default(), loaders)
    }

    /// 파일이면 단일 수집, 폴더면 재귀 수집
    pub fn collect(&self, path: &Path) -> Result<Vec<CollectedFile>> {
        if path.is_dir() {
            self.collect_directory(path)
        } else {
            Ok(self.collect_file(path)?.into_iter().collect())
        }
    }

    /// 단일 파일 수집
    pub fn collect_file(&self, path: &Path) -> Result<Option<CollectedFile>> {
        let abs_path = absolute(path)?;

        if !abs_path.exists() {
            anyhow::bail!("File not found: {:?}", abs_path);
        }

        if !abs_path.is_file() {
            anyhow::bail!("Not a file: {:?}", abs_path);
        }

        let file = CollectedFile::from_path(abs_path, &self.loaders)?;
        Ok(file.filter(|f| self.should_include(f)))
    }

    /// 폴더 재귀 수집
    pub fn collect_directory(&self, path: &Path) -> Result<Vec<CollectedFile>> {
        let abs_path = absolute(path)?;

        if !abs_path.exists() {
            anyhow::bail!("Directory not found: {:?}", abs_path);
        }

        if !abs_path.is_dir() {
            anyhow::bail!("Not a directory: {:?}", abs_path);
        }

        let mut files = Vec::new();

        // ignore 크레이트로 .gitignore 지원
        let walker = WalkBuilder::new(&abs_path)
            .hidden(!self.config.include_hidden)
            .git_ignore(self.config.respect_gitignore)
            .git_global(self.config.respect_gitignore)
            .git_exclude(self.config.respect_gitignore)
            .build();

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!("Failed to read entry: {}", e);
                    continue;
                }
            };

            if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
                continue;
            }

            match CollectedFile::from_path(entry.path().to_path_buf(), &self.loaders) {
                Ok(Some(file)) if self.should_include(&file) => files.push(file),
                Ok(_) => {}
                Err(e) => tracing::warn!("Failed to collect file: {}", e),
            }
        }

        // 워커 순서는 플랫폼마다 다르므로 경로순으로 고정
        files.sort_by(|a, b| a.path.cmp(&b.path));

        tracing::info!("Collected {} files from {:?}", files.len(), abs_path);
        Ok(files)
    }

    /// 파일이 필터 조건을 만족하는지 확인
    fn should_include(&self, file: &CollectedFile) -> bool {
        if self.config.max_file_size > 0 && file.size > self.config.max_file_size {
            tracing::debug!("Skipping large file: {:?} ({} bytes)", file.path, file.size);
            return false;
        }

        if self.config.extensions.is_empty() {
            return true;
        }

        file.path
            .extension()
            .and_then(|e| e.to_str())
            .map(|ext| {
                self.config
                    .extensions
                    .iter()
                    .any(|e| e.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

// ============================================================================
// Statistics
// ============================================================================

/// 수집 통계
#[derive(Debug, Default)]
pub struct CollectionStats {
    pub total_files: usize,
    pub total_size: u64,
    /// 로더 이름별 파일 수
    pub by_loader: BTreeMap<&'static str, usize>,
}

impl CollectionStats {
    /// 수집된 파일 목록에서 통계 계산
    pub fn from_files(files: &[CollectedFile]) -> Self {
        let mut stats = Self::default();

        for file in files {
            stats.total_files += 1;
            stats.total_size += file.size;
            *stats.by_loader.entry(file.loader).or_default() += 1;
        }

        stats
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // 숨김 디렉토리(.tmpXXXX)를 피하기 위해 prefix 지정
    fn temp_dir() -> TempDir {
        tempfile::Builder::new().prefix("collect").tempdir().unwrap()
    }

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_collector_config_default() {
        let config = CollectorConfig::default();
        assert!(config.respect_gitignore);
        assert!(!config.include_hidden);
        assert_eq!(config.max_file_size, 10 * 1024 * 1024);
    }

    #[test]
    fn test_collect_directory_keeps_supported_files() {
        let dir = temp_dir();
        write(dir.path(), "guide.md", "# Guide");
        write(dir.path(), "nested/page.html", "<html><body>hi</body></html>");
        write(dir.path(), "archive.zip", "binary");

        let collector = FileCollector::with_defaults(LoaderRegistry::with_defaults());
        let files = collector.collect_directory(dir.path()).unwrap();

        let loaders: Vec<_> = files.iter().map(|f| f.loader).collect();
        assert_eq!(files.len(), 2);
        assert!(loaders.contains(&"text"));
        assert!(loaders.contains(&"html"));

        let stats = CollectionStats::from_files(&files);
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.by_loader.get("text"), Some(&1));
    }

    #[test]
    fn test_collect_file_unsupported_is_none() {
        let dir = temp_dir();
        let path = write(dir.path(), "archive.zip", "binary");

        let collector = FileCollector::with_defaults(LoaderRegistry::with_defaults());
        assert!(collector.collect_file(&path).unwrap().is_none());
        assert!(collector.collect_file(&dir.path().join("missing.md")).is_err());
    }

    #[test]
    fn test_extension_filter() {
        let dir = temp_dir();
        write(dir.path(), "a.md", "a");
        write(dir.path(), "b.txt", "b");

        let config = CollectorConfig {
            extensions: vec!["MD".to_string()],
            ..Default::default()
        };
        let collector = FileCollector::new(config, LoaderRegistry::with_defaults());
        let files = collector.collect(dir.path()).unwrap();

        assert_eq!(files.len(), 1);
        assert!(files[0].path.ends_with("a.md"));
    }
}
