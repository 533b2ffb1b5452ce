//! 설정 모듈
//!
//! - `KnowledgeSettings`: `<data_dir>/config.toml` + 환경변수 오버라이드
//! - `KnowledgeConfig`: `<data_dir>/configs/*.toml`에 저장된 이름 있는 프로파일
//! - `KnowledgeConfigService`: 프로파일 로드 및 활성 프로파일 선택

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::chain::ChainMode;
use crate::error::{KnowledgeError, KnowledgeResult};
use crate::knowledge::ChunkConfig;

/// 지원하는 벡터 스토어 종류
pub const VECTOR_STORAGES: [&str; 2] = ["lancedb", "memory"];

const CHUNK_SIZE_RANGE: (usize, usize) = (10, 2000);
const CHUNK_OVERLAP_MAX: usize = 200;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.palank-knowledge/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".palank-knowledge")
}

// ============================================================================
// KnowledgeSettings
// ============================================================================

/// 전역 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KnowledgeSettings {
    /// 데이터 디렉토리 (없으면 `get_data_dir()`)
    pub data_dir: Option<PathBuf>,
    /// 기본 프로파일 이름
    pub default_config: String,
    /// 대화에 지식베이스 선택이 없을 때 사용할 지식베이스
    pub default_knowledge: String,
    /// 기본 벡터 스토어 종류
    pub vector_store: String,
    /// 청크 크기 (10 ~ 2000)
    pub chunk_size: usize,
    /// 청크 오버랩 (0 ~ 200)
    pub chunk_overlap: usize,
    /// 최소 유사도 (0.0 ~ 1.0)
    pub min_similarity_score: f32,
    /// 검색 체인 모드
    pub mode: ChainMode,
    /// 병합 후 최대 결과 수
    pub top_k: usize,
    /// `platform/model` (default 외 모드에서 필수)
    pub model: Option<String>,
    /// contextual-compression 전에 쿼리 재생성 여부
    pub regenerate_before_compression: bool,
}

impl Default for KnowledgeSettings {
    fn default() -> Self {
        Self {
            data_dir: None,
            default_config: "default".to_string(),
            default_knowledge: "default".to_string(),
            vector_store: "lancedb".to_string(),
            chunk_size: 500,
            chunk_overlap: 0,
            min_similarity_score: 0.5,
            mode: ChainMode::Default,
            top_k: 8,
            model: None,
            regenerate_before_compression: false,
        }
    }
}

impl KnowledgeSettings {
    /// 설정 파일 로드
    ///
    /// 파일이 없으면 기본값을 사용하고, 환경변수 오버라이드 후 검증합니다.
    pub fn load(path: &Path) -> KnowledgeResult<Self> {
        let mut settings = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            toml::from_str::<Self>(&raw)?
        } else {
            tracing::debug!("No config file at {:?}, using defaults", path);
            Self::default()
        };

        settings.apply_overrides(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// 기본 위치에서 로드 (`<data_dir>/config.toml`)
    pub fn load_default() -> KnowledgeResult<Self> {
        Self::load(&get_data_dir().join("config.toml"))
    }

    /// 환경변수 오버라이드
    ///
    /// `PALANK_KNOWLEDGE_MODE`, `PALANK_KNOWLEDGE_MODEL`,
    /// `PALANK_KNOWLEDGE_TOP_K`, `PALANK_KNOWLEDGE_MIN_SCORE`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> KnowledgeResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup("PALANK_KNOWLEDGE_MODE") {
            self.mode = mode.parse()?;
        }
        if let Some(model) = lookup("PALANK_KNOWLEDGE_MODEL") {
            self.model = Some(model).filter(|m| !m.trim().is_empty());
        }
        if let Some(top_k) = lookup("PALANK_KNOWLEDGE_TOP_K") {
            self.top_k = top_k
                .trim()
                .parse()
                .map_err(|_| KnowledgeError::config(format!("invalid top_k '{}'", top_k)))?;
        }
        if let Some(score) = lookup("PALANK_KNOWLEDGE_MIN_SCORE") {
            self.min_similarity_score = score.trim().parse().map_err(|_| {
                KnowledgeError::config(format!("invalid min_similarity_score '{}'", score))
            })?;
        }
        Ok(())
    }

    /// 범위 검증
    pub fn validate(&self) -> KnowledgeResult<()> {
        validate_chunking(self.chunk_size, self.chunk_overlap)?;
        validate_score(self.min_similarity_score)?;

        if self.top_k == 0 {
            return Err(KnowledgeError::config("top_k must be at least 1"));
        }
        if !VECTOR_STORAGES.contains(&self.vector_store.as_str()) {
            return Err(KnowledgeError::config(format!(
                "unknown vector_store '{}' (available: {})",
                self.vector_store,
                VECTOR_STORAGES.join(", ")
            )));
        }
        Ok(())
    }

    /// 데이터 디렉토리
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(get_data_dir)
    }

    /// 설정값으로 만든 프로파일
    pub fn implied_profile(&self) -> KnowledgeConfig {
        KnowledgeConfig {
            name: self.default_config.clone(),
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            min_similarity_score: self.min_similarity_score,
            mode: self.mode,
            model: self.model.clone(),
        }
    }
}

fn validate_chunking(chunk_size: usize, chunk_overlap: usize) -> KnowledgeResult<()> {
    let (min, max) = CHUNK_SIZE_RANGE;
    if !(min..=max).contains(&chunk_size) {
        return Err(KnowledgeError::config(format!(
            "chunk_size {} out of range {}..={}",
            chunk_size, min, max
        )));
    }
    if chunk_overlap > CHUNK_OVERLAP_MAX {
        return Err(KnowledgeError::config(format!(
            "chunk_overlap {} exceeds {}",
            chunk_overlap, CHUNK_OVERLAP_MAX
        )));
    }
    ChunkConfig {
        chunk_size,
        chunk_overlap,
    }
    .validate()
}

fn validate_score(score: f32) -> KnowledgeResult<()> {
    if !(0.0..=1.0).contains(&score) {
        return Err(KnowledgeError::config(format!(
            "min_similarity_score {} out of range 0.0..=1.0",
            score
        )));
    }
    Ok(())
}

// ============================================================================
// KnowledgeConfig (Profile)
// ============================================================================

/// 이름 있는 지식베이스 설정 프로파일
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeConfig {
    pub name: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub min_similarity_score: f32,
    pub mode: ChainMode,
    #[serde(default)]
    pub model: Option<String>,
}

impl KnowledgeConfig {
    pub fn validate(&self) -> KnowledgeResult<()> {
        validate_chunking(self.chunk_size, self.chunk_overlap)?;
        validate_score(self.min_similarity_score)
    }

    pub fn chunk_config(&self) -> ChunkConfig {
        ChunkConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
        }
    }
}

// ============================================================================
// KnowledgeConfigService
// ============================================================================

/// 프로파일 관리
///
/// 프로파일은 읽기 전용이며, 검증에 실패한 파일은 경고 후 건너뜁니다.
#[derive(Debug, Clone)]
pub struct KnowledgeConfigService {
    settings: KnowledgeSettings,
    profiles: BTreeMap<String, KnowledgeConfig>,
}

impl KnowledgeConfigService {
    pub fn new(settings: KnowledgeSettings) -> Self {
        Self {
            settings,
            profiles: BTreeMap::new(),
        }
    }

    pub fn settings(&self) -> &KnowledgeSettings {
        &self.settings
    }

    /// 설정 교체 (로드된 프로파일은 유지)
    pub fn set_settings(&mut self, settings: KnowledgeSettings) -> KnowledgeResult<()> {
        settings.validate()?;
        self.settings = settings;
        Ok(())
    }

    /// 프로파일 디렉토리 (`<data_dir>/configs`)
    pub fn profile_dir(&self) -> PathBuf {
        self.settings.data_dir().join("configs")
    }

    /// 프로파일 디렉토리의 `*.toml` 전체 로드
    pub fn load_all_config(&mut self) -> KnowledgeResult<usize> {
        let dir = self.profile_dir();
        self.profiles.clear();

        if !dir.exists() {
            return Ok(0);
        }

        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("toml") {
                continue;
            }

            match Self::read_profile(&path) {
                Ok(profile) => {
                    tracing::debug!("Loaded knowledge config '{}' from {:?}", profile.name, path);
                    self.profiles.insert(profile.name.clone(), profile);
                }
                Err(e) => tracing::warn!("Skipping knowledge config {:?}: {}", path, e),
            }
        }

        tracing::info!("Loaded {} knowledge configs", self.profiles.len());
        Ok(self.profiles.len())
    }

    fn read_profile(path: &Path) -> KnowledgeResult<KnowledgeConfig> {
        let raw = std::fs::read_to_string(path)?;
        let profile: KnowledgeConfig = toml::from_str(&raw)?;
        profile.validate()?;
        Ok(profile)
    }

    /// 프로파일 추가 (검증 포함)
    pub fn insert(&mut self, profile: KnowledgeConfig) -> KnowledgeResult<()> {
        profile.validate()?;
        self.profiles.insert(profile.name.clone(), profile);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&KnowledgeConfig> {
        self.profiles.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }

    /// 활성 프로파일 (`default_config`, 없으면 설정값 기반)
    pub fn active_profile(&self) -> KnowledgeConfig {
        self.profiles
            .get(&self.settings.default_config)
            .cloned()
            .unwrap_or_else(|| self.settings.implied_profile())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let settings = KnowledgeSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.chunk_size, 500);
        assert_eq!(settings.chunk_overlap, 0);
        assert_eq!(settings.min_similarity_score, 0.5);
        assert_eq!(settings.mode, ChainMode::Default);
    }

    #[test]
    fn test_validate_ranges() {
        let cases = [
            KnowledgeSettings { chunk_size: 5, ..Default::default() },
            KnowledgeSettings { chunk_size: 2001, ..Default::default() },
            KnowledgeSettings { chunk_overlap: 201, ..Default::default() },
            KnowledgeSettings { chunk_size: 100, chunk_overlap: 100, ..Default::default() },
            KnowledgeSettings { min_similarity_score: 1.5, ..Default::default() },
            KnowledgeSettings { top_k: 0, ..Default::default() },
            KnowledgeSettings { vector_store: "faiss".into(), ..Default::default() },
        ];

        for settings in cases {
            assert!(
                matches!(settings.validate(), Err(KnowledgeError::Configuration(_))),
                "{:?} should be rejected",
                settings
            );
        }
    }

    #[test]
    fn test_load_from_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
            chunk_size = 800
            chunk_overlap = 50
            mode = "contextual-compression"
            model = "gemini/gemini-2.0-flash"
            "#,
        )
        .unwrap();

        let settings = KnowledgeSettings::load(&path).unwrap();
        assert_eq!(settings.chunk_size, 800);
        assert_eq!(settings.chunk_overlap, 50);
        assert_eq!(settings.mode, ChainMode::ContextualCompression);
        assert_eq!(settings.model.as_deref(), Some("gemini/gemini-2.0-flash"));
        assert_eq!(settings.top_k, 8);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "chunk_size = 3").unwrap();

        assert!(matches!(
            KnowledgeSettings::load(&path),
            Err(KnowledgeError::Configuration(_))
        ));
    }

    #[test]
    fn test_apply_overrides() {
        let mut settings = KnowledgeSettings::default();
        settings
            .apply_overrides(|key| match key {
                "PALANK_KNOWLEDGE_MODE" => Some("regenerate".to_string()),
                "PALANK_KNOWLEDGE_TOP_K" => Some("12".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(settings.mode, ChainMode::Regenerate);
        assert_eq!(settings.top_k, 12);

        let err = settings.apply_overrides(|key| {
            (key == "PALANK_KNOWLEDGE_MODE").then(|| "fancy".to_string())
        });
        assert!(err.is_err());
    }

    #[test]
    fn test_profiles_and_active_profile() {
        let dir = TempDir::new().unwrap();
        let settings = KnowledgeSettings {
            data_dir: Some(dir.path().to_path_buf()),
            default_config: "docs".to_string(),
            ..Default::default()
        };

        let mut service = KnowledgeConfigService::new(settings);
        assert_eq!(service.load_all_config().unwrap(), 0);
        assert_eq!(service.active_profile().name, "docs");
        assert_eq!(service.active_profile().chunk_size, 500);

        let profile_dir = service.profile_dir();
        std::fs::create_dir_all(&profile_dir).unwrap();
        std::fs::write(
            profile_dir.join("docs.toml"),
            r#"
            name = "docs"
            chunk_size = 300
            chunk_overlap = 30
            min_similarity_score = 0.7
            mode = "regenerate"
            model = "gemini/gemini-2.0-flash"
            "#,
        )
        .unwrap();
        std::fs::write(
            profile_dir.join("broken.toml"),
            "name = \"broken\"\nchunk_size = 10\nchunk_overlap = 10\nmin_similarity_score = 0.1\nmode = \"default\"\n",
        )
        .unwrap();

        assert_eq!(service.load_all_config().unwrap(), 1);
        assert_eq!(service.names(), vec!["docs"]);

        let active = service.active_profile();
        assert_eq!(active.chunk_config().chunk_size, 300);
        assert_eq!(active.mode, ChainMode::Regenerate);
        assert_eq!(active.min_similarity_score, 0.7);
    }
}
