//! Knowledge Service - 지식베이스 선택 해석 및 벡터 스토어 관리
//!
//! - 대화의 지식베이스 선택(패턴/이름 목록) → `DocumentConfig` 목록
//! - `DocumentConfig` → 벡터 스토어 핸들 (경로별 캐시)
//! - 파일/폴더 수집 → 청킹 → 벡터 스토어 추가 → 레코드 등록

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, RwLock};

use crate::collector::FileCollector;
use crate::config::{KnowledgeConfig, KnowledgeConfigService, KnowledgeSettings};
use crate::embedding::EmbeddingProvider;
use crate::error::KnowledgeError;
use crate::loader::{LoaderFields, LoaderRegistry};

use super::chunker::TextChunker;
use super::lance::LanceVectorStore;
use super::store::{DocumentConfig, KnowledgeStore};
use super::vector::{MemoryVectorStore, VectorStoreHandle};

// ============================================================================
// KnowledgeSelection
// ============================================================================

/// 대화의 지식베이스 선택
///
/// 문자열이면 이름 정규식, 배열이면 이름 목록(`|`로 결합)으로 취급합니다.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KnowledgeSelection {
    Pattern(String),
    Names(Vec<String>),
}

impl KnowledgeSelection {
    /// 이름 매칭용 정규식
    pub fn to_pattern(&self) -> String {
        match self {
            Self::Pattern(pattern) => pattern.clone(),
            Self::Names(names) => names
                .iter()
                .map(|n| regex::escape(n))
                .collect::<Vec<_>>()
                .join("|"),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Pattern(pattern) => pattern.trim().is_empty(),
            Self::Names(names) => names.iter().all(|n| n.trim().is_empty()),
        }
    }
}

impl From<&str> for KnowledgeSelection {
    fn from(pattern: &str) -> Self {
        Self::Pattern(pattern.to_string())
    }
}

// ============================================================================
// VectorStoreFactory
// ============================================================================

/// `DocumentConfig` → 벡터 스토어 핸들
#[async_trait]
pub trait VectorStoreFactory: Send + Sync {
    /// 담당 스토어 종류 (`DocumentConfig::vector_storage`)
    fn storage(&self) -> &'static str;

    /// 스토어 열기
    async fn open(&self, config: &DocumentConfig) -> Result<Arc<dyn VectorStoreHandle>>;

    /// 프로세스가 끝나도 내용이 남는지
    fn is_persistent(&self) -> bool {
        true
    }
}

/// LanceDB 스토어 팩토리
pub struct LanceStoreFactory {
    embedder: Arc<dyn EmbeddingProvider>,
}

impl LanceStoreFactory {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { embedder }
    }
}

#[async_trait]
impl VectorStoreFactory for LanceStoreFactory {
    fn storage(&self) -> &'static str {
        "lancedb"
    }

    async fn open(&self, config: &DocumentConfig) -> Result<Arc<dyn VectorStoreHandle>> {
        let store: Arc<dyn VectorStoreHandle> = Arc::new(
            LanceVectorStore::open(
                config.name.clone(),
                Path::new(&config.path),
                self.embedder.clone(),
            )
            .await?,
        );
        Ok(store)
    }
}

/// 인메모리 스토어 팩토리
///
/// 같은 경로는 프로세스 안에서 같은 스토어를 돌려주므로
/// 핸들 캐시가 비워져도 내용은 유지됩니다.
pub struct MemoryStoreFactory {
    embedder: Arc<dyn EmbeddingProvider>,
    stores: Mutex<HashMap<String, Arc<MemoryVectorStore>>>,
}

impl MemoryStoreFactory {
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            stores: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl VectorStoreFactory for MemoryStoreFactory {
    fn storage(&self) -> &'static str {
        "memory"
    }

    async fn open(&self, config: &DocumentConfig) -> Result<Arc<dyn VectorStoreHandle>> {
        let mut stores = self.stores.lock().await;
        let store: Arc<dyn VectorStoreHandle> = stores
            .entry(config.path.clone())
            .or_insert_with(|| {
                Arc::new(MemoryVectorStore::new(
                    config.name.clone(),
                    self.embedder.clone(),
                ))
            })
            .clone();
        Ok(store)
    }

    fn is_persistent(&self) -> bool {
        false
    }
}

// ============================================================================
// IngestReport
// ============================================================================

/// 수집 결과
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub name: String,
    pub files: usize,
    pub skipped: usize,
    pub documents: usize,
    pub chunks: usize,
}

// ============================================================================
// KnowledgeService
// ============================================================================

/// 지식베이스 서비스
///
/// `main`/CLI에서 명시적으로 생성하여 검색 파이프라인에 전달합니다.
pub struct KnowledgeService {
    configs: RwLock<KnowledgeConfigService>,
    store: KnowledgeStore,
    loaders: LoaderRegistry,
    factories: HashMap<&'static str, Arc<dyn VectorStoreFactory>>,
    handles: Mutex<HashMap<String, Arc<dyn VectorStoreHandle>>>,
}

impl KnowledgeService {
    /// 서비스 생성 (lancedb/memory 팩토리, 기본 로더 등록)
    pub fn new(
        configs: KnowledgeConfigService,
        store: KnowledgeStore,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        let mut service = Self {
            configs: RwLock::new(configs),
            store,
            loaders: LoaderRegistry::with_defaults(),
            factories: HashMap::new(),
            handles: Mutex::new(HashMap::new()),
        };
        service.register_factory(Arc::new(LanceStoreFactory::new(embedder.clone())));
        service.register_factory(Arc::new(MemoryStoreFactory::new(embedder)));
        service
    }

    /// 데이터 디렉토리의 `knowledge.db`로 서비스 열기
    pub fn open(configs: KnowledgeConfigService, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let db_path = configs.settings().data_dir().join("knowledge.db");
        let store = KnowledgeStore::open(&db_path)
            .with_context(|| format!("Failed to open knowledge store at {:?}", db_path))?;
        Ok(Self::new(configs, store, embedder))
    }

    /// 팩토리 등록 (같은 종류는 교체)
    pub fn register_factory(&mut self, factory: Arc<dyn VectorStoreFactory>) {
        self.factories.insert(factory.storage(), factory);
    }

    pub fn store(&self) -> &KnowledgeStore {
        &self.store
    }

    pub fn loaders(&self) -> &LoaderRegistry {
        &self.loaders
    }

    pub fn loaders_mut(&mut self) -> &mut LoaderRegistry {
        &mut self.loaders
    }

    pub async fn settings(&self) -> KnowledgeSettings {
        self.configs.read().await.settings().clone()
    }

    pub async fn active_profile(&self) -> KnowledgeConfig {
        self.configs.read().await.active_profile()
    }

    /// 설정 교체
    pub async fn update_settings(&self, settings: KnowledgeSettings) -> Result<()> {
        self.configs.write().await.set_settings(settings)?;
        Ok(())
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// 선택 → 레코드 목록
    ///
    /// 선택이 있으면 이름 정규식을 기본 스토어 종류 안에서 매칭하고,
    /// 없으면 `default_knowledge`와 정확히 일치하는 레코드를 찾습니다.
    pub async fn resolve(&self, selection: Option<&KnowledgeSelection>) -> Result<Vec<DocumentConfig>> {
        let settings = self.settings().await;

        let configs = match selection.filter(|s| !s.is_empty()) {
            Some(selection) => {
                let pattern = selection.to_pattern();
                tracing::debug!("Resolving knowledge pattern '{}'", pattern);
                self.store.find_by_pattern(&pattern, &settings.vector_store)?
            }
            None => self.store.find_by_name(&settings.default_knowledge)?,
        };

        if configs.is_empty() {
            tracing::warn!(
                "No knowledge base matched {:?} (default: '{}')",
                selection,
                settings.default_knowledge
            );
        } else {
            tracing::debug!(
                "Selected knowledge: {:?}",
                configs.iter().map(|c| c.name.as_str()).collect::<Vec<_>>()
            );
        }

        Ok(configs)
    }

    /// 선택 → 벡터 스토어 핸들 목록 (레코드 순서 유지)
    pub async fn resolve_stores(
        &self,
        selection: Option<&KnowledgeSelection>,
    ) -> Result<Vec<Arc<dyn VectorStoreHandle>>> {
        let configs = self.resolve(selection).await?;
        let mut stores = Vec::with_capacity(configs.len());
        for config in &configs {
            stores.push(self.load_vector_store(config).await?);
        }
        Ok(stores)
    }

    /// 레코드 → 벡터 스토어 핸들 (경로별 캐시)
    pub async fn load_vector_store(&self, config: &DocumentConfig) -> Result<Arc<dyn VectorStoreHandle>> {
        let mut handles = self.handles.lock().await;
        if let Some(handle) = handles.get(&config.path) {
            return Ok(handle.clone());
        }

        let factory = self.factories.get(config.vector_storage.as_str()).ok_or_else(|| {
            KnowledgeError::config(format!(
                "no vector store factory for '{}' (knowledge '{}')",
                config.vector_storage, config.name
            ))
        })?;

        let handle = factory
            .open(config)
            .await
            .with_context(|| format!("Failed to open vector store for '{}'", config.name))?;

        tracing::debug!("Opened {} store for '{}'", config.vector_storage, config.name);
        handles.insert(config.path.clone(), handle.clone());
        Ok(handle)
    }

    /// 캐시된 핸들 해제
    pub async fn clear_vector_stores(&self) {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            tracing::debug!("Releasing {} cached vector stores", handles.len());
        }
        handles.clear();
    }

    pub async fn cached_store_count(&self) -> usize {
        self.handles.lock().await.len()
    }

    // ========================================================================
    // Ingestion
    // ========================================================================

    /// 파일 또는 폴더를 지식베이스 `name`에 추가
    ///
    /// 기존 레코드가 있으면 그 스토어에 이어서 추가합니다.
    /// 폴더 수집 중 개별 파일 실패는 경고 후 건너뜁니다.
    pub async fn ingest(&self, path: &Path, name: &str) -> Result<IngestReport> {
        let name = name.trim();
        if name.is_empty() {
            return Err(KnowledgeError::config("knowledge name must not be empty").into());
        }

        let settings = self.settings().await;
        let chunker = TextChunker::new(self.active_profile().await.chunk_config())?;
        let fields = LoaderFields {
            chunk_size: Some(chunker.config().chunk_size),
            chunk_overlap: Some(chunker.config().chunk_overlap),
        };

        let is_dir = path.is_dir();
        let files: Vec<PathBuf> = if is_dir {
            FileCollector::with_defaults(self.loaders.clone())
                .collect_directory(path)?
                .into_iter()
                .map(|f| f.path)
                .collect()
        } else {
            // 단일 파일은 지원 여부를 에러로 알림
            self.loaders.resolve(path)?;
            vec![path.to_path_buf()]
        };

        let config = match self.store.find_by_name(name)?.into_iter().next() {
            Some(existing) => existing,
            None => DocumentConfig {
                name: name.to_string(),
                path: store_location(&settings.data_dir(), name, &settings.vector_store),
                vector_storage: settings.vector_store.clone(),
            },
        };
        self.ensure_durable(&config)?;
        let handle = self.load_vector_store(&config).await?;

        let mut report = IngestReport {
            name: name.to_string(),
            ..Default::default()
        };

        for file in &files {
            let documents = match self.loaders.load(file, &fields).await {
                Ok(documents) => documents,
                Err(e) if is_dir => {
                    tracing::warn!("Skipping {:?}: {:#}", file, e);
                    report.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let chunks = chunker.split_documents(&documents);
            let added = handle
                .add_chunks(&chunks)
                .await
                .with_context(|| format!("Failed to store chunks from {:?}", file))?;

            report.files += 1;
            report.documents += documents.len();
            report.chunks += added;
        }

        self.store.upsert(&config)?;

        tracing::info!(
            "Ingested {} files ({} documents, {} chunks) into '{}'",
            report.files,
            report.documents,
            report.chunks,
            name
        );
        Ok(report)
    }

    /// 파일 레지스트리에 휘발성 스토어 레코드를 남기지 않음
    ///
    /// 다음 프로세스가 레코드만 보고 빈 스토어를 열게 되기 때문입니다.
    fn ensure_durable(&self, config: &DocumentConfig) -> Result<()> {
        let volatile = self
            .factories
            .get(config.vector_storage.as_str())
            .map(|f| !f.is_persistent())
            .unwrap_or(false);

        if volatile && self.store.is_persistent() {
            return Err(KnowledgeError::config(format!(
                "'{}' storage does not survive the process; knowledge '{}' cannot be registered in {:?}",
                config.vector_storage,
                config.name,
                self.store.db_path()
            ))
            .into());
        }
        Ok(())
    }
}

/// 지식베이스 이름 → 스토어 위치
///
/// lancedb: `<data_dir>/vectors/<sha256(name) 앞 16자>.lance`
fn store_location(data_dir: &Path, name: &str, vector_storage: &str) -> String {
    if vector_storage == "memory" {
        return format!("memory://{}", name);
    }

    let digest = Sha256::digest(name.as_bytes());
    let prefix: String = digest.iter().take(8).map(|b| format!("{:02x}", b)).collect();
    data_dir
        .join("vectors")
        .join(format!("{}.lance", prefix))
        .display()
        .to_string()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::tests::KeywordEmbedding;
    use tempfile::TempDir;

    fn embedder() -> Arc<dyn EmbeddingProvider> {
        Arc::new(KeywordEmbedding::new(&["rust", "python", "async", "memory", "tokio"]))
    }

    fn memory_service(dir: &TempDir) -> KnowledgeService {
        let settings = KnowledgeSettings {
            data_dir: Some(dir.path().to_path_buf()),
            vector_store: "memory".to_string(),
            chunk_size: 40,
            ..Default::default()
        };
        KnowledgeService::new(
            KnowledgeConfigService::new(settings),
            KnowledgeStore::open_in_memory().unwrap(),
            embedder(),
        )
    }

    fn record(name: &str) -> DocumentConfig {
        DocumentConfig {
            name: name.to_string(),
            path: format!("memory://{}", name),
            vector_storage: "memory".to_string(),
        }
    }

    #[test]
    fn test_selection_to_pattern() {
        let names = KnowledgeSelection::Names(vec!["docs".into(), "c++".into()]);
        assert_eq!(names.to_pattern(), r"docs|c\+\+");
        assert_eq!(KnowledgeSelection::from("rust.*").to_pattern(), "rust.*");
        assert!(KnowledgeSelection::Names(vec![]).is_empty());
        assert!(KnowledgeSelection::from("  ").is_empty());
    }

    #[test]
    fn test_selection_deserializes_untagged() {
        let pattern: KnowledgeSelection = serde_json::from_str(r#""rust.*""#).unwrap();
        assert_eq!(pattern, KnowledgeSelection::Pattern("rust.*".into()));

        let names: KnowledgeSelection = serde_json::from_str(r#"["a","b"]"#).unwrap();
        assert_eq!(names, KnowledgeSelection::Names(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn test_store_location_is_stable() {
        let dir = Path::new("/data");
        let a = store_location(dir, "rust-docs", "lancedb");
        assert_eq!(a, store_location(dir, "rust-docs", "lancedb"));
        assert_ne!(a, store_location(dir, "python-docs", "lancedb"));
        assert!(a.ends_with(".lance"));
        assert_eq!(store_location(dir, "kb", "memory"), "memory://kb");
    }

    #[tokio::test]
    async fn test_resolve_default_and_pattern() {
        let dir = TempDir::new().unwrap();
        let service = memory_service(&dir);
        service.store().upsert(&record("default")).unwrap();
        service.store().upsert(&record("rust-book")).unwrap();
        service.store().upsert(&record("rust-ref")).unwrap();

        let default = service.resolve(None).await.unwrap();
        assert_eq!(default, vec![record("default")]);

        let selection = KnowledgeSelection::from("^rust");
        let names: Vec<_> = service
            .resolve(Some(&selection))
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.name)
            .collect();
        assert_eq!(names, vec!["rust-book", "rust-ref"]);
    }

    #[tokio::test]
    async fn test_resolve_nothing_is_empty_not_error() {
        let dir = TempDir::new().unwrap();
        let service = memory_service(&dir);

        assert!(service.resolve(None).await.unwrap().is_empty());
        assert!(service.resolve_stores(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_vector_store_caches_by_path() {
        let dir = TempDir::new().unwrap();
        let service = memory_service(&dir);

        let a = service.load_vector_store(&record("kb")).await.unwrap();
        let b = service.load_vector_store(&record("kb")).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(service.cached_store_count().await, 1);

        service.clear_vector_stores().await;
        assert_eq!(service.cached_store_count().await, 0);
    }

    #[tokio::test]
    async fn test_load_vector_store_unknown_storage() {
        let dir = TempDir::new().unwrap();
        let service = memory_service(&dir);
        let config = DocumentConfig {
            vector_storage: "faiss".to_string(),
            ..record("kb")
        };

        let err = service.load_vector_store(&config).await.err().unwrap();
        assert!(matches!(
            err.downcast_ref::<KnowledgeError>(),
            Some(KnowledgeError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_ingest_directory_into_memory_store() {
        let dir = TempDir::new().unwrap();
        let docs = tempfile::Builder::new().prefix("docs").tempdir().unwrap();
        std::fs::write(docs.path().join("a.md"), "rust async tokio. rust memory safety.").unwrap();
        std::fs::write(docs.path().join("b.txt"), "python async").unwrap();
        std::fs::write(docs.path().join("c.bin"), "ignored").unwrap();

        let service = memory_service(&dir);
        let report = service.ingest(docs.path(), "default").await.unwrap();

        assert_eq!(report.files, 2);
        assert!(report.chunks >= 2);

        let stores = service.resolve_stores(None).await.unwrap();
        assert_eq!(stores.len(), 1);
        assert_eq!(stores[0].count().await.unwrap(), report.chunks);

        // 핸들 캐시를 비워도 같은 스토어가 열림
        service.clear_vector_stores().await;
        let stores = service.resolve_stores(None).await.unwrap();
        assert_eq!(stores[0].count().await.unwrap(), report.chunks);
    }

    #[tokio::test]
    async fn test_memory_ingest_refused_for_file_registry() {
        let dir = TempDir::new().unwrap();
        let docs = tempfile::Builder::new().prefix("docs").tempdir().unwrap();
        let file = docs.path().join("a.txt");
        std::fs::write(&file, "rust async tokio").unwrap();

        let open = || {
            let settings = KnowledgeSettings {
                data_dir: Some(dir.path().to_path_buf()),
                vector_store: "memory".to_string(),
                ..Default::default()
            };
            KnowledgeService::open(KnowledgeConfigService::new(settings), embedder()).unwrap()
        };

        let first = open();
        assert!(first.store().is_persistent());
        let err = first.ingest(&file, "default").await.err().unwrap();
        assert!(matches!(
            err.downcast_ref::<KnowledgeError>(),
            Some(KnowledgeError::Configuration(_))
        ));
        drop(first);

        // 다음 프로세스는 빈 지식베이스를 "있음"으로 보지 않음
        let second = open();
        assert!(second.store().list().unwrap().is_empty());
        assert!(second.resolve_stores(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_ingest_unsupported_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("archive.zip");
        std::fs::write(&path, "zip").unwrap();

        let service = memory_service(&dir);
        let err = service.ingest(&path, "kb").await.err().unwrap();
        assert!(matches!(
            err.downcast_ref::<KnowledgeError>(),
            Some(KnowledgeError::UnsupportedFormat(_))
        ));
        assert!(service.store().list().unwrap().is_empty());
    }
}
