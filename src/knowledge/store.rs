//! Knowledge Store - rusqlite 기반 지식베이스 레코드 저장소
//!
//! 지식베이스 이름 → 벡터 스토어 위치(`DocumentConfig`) 바인딩을 보관합니다.
//! 저장 위치: ~/.palank-knowledge/knowledge.db

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use regex::Regex;
use rusqlite::{params, Connection, OpenFlags, Row};
use serde::{Deserialize, Serialize};

use crate::error::KnowledgeError;

// ============================================================================
// Types
// ============================================================================

/// 지식베이스 레코드
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentConfig {
    /// 지식베이스 이름
    pub name: String,
    /// 벡터 스토어 위치
    pub path: String,
    /// 벡터 스토어 종류 (lancedb, memory)
    pub vector_storage: String,
}

/// 저장된 레코드 (생성 시각 포함)
#[derive(Debug, Clone, Serialize)]
pub struct StoredDocumentConfig {
    pub config: DocumentConfig,
    pub created_at: DateTime<Utc>,
}

/// 저장소 통계
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub knowledge_count: usize,
    pub db_path: PathBuf,
}

// ============================================================================
// KnowledgeStore
// ============================================================================

/// 지식베이스 레코드 저장소 (동기)
pub struct KnowledgeStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl KnowledgeStore {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// 인메모리 저장소 (테스트/일회성 실행용)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory SQLite")?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: PathBuf::from(":memory:"),
        };
        store.initialize()?;
        Ok(store)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// 파일에 저장되는 저장소인지 (인메모리 저장소는 프로세스와 함께 사라짐)
    pub fn is_persistent(&self) -> bool {
        self.db_path.as_path() != Path::new(":memory:")
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// 스키마 초기화
    fn initialize(&self) -> Result<()> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS knowledge (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                path TEXT NOT NULL,
                vector_storage TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
            [],
        )
        .context("Failed to create knowledge table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_knowledge_storage ON knowledge(vector_storage)",
            [],
        )
        .context("Failed to create vector_storage index")?;

        tracing::debug!("Knowledge store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// 레코드 저장 (이름이 같으면 갱신)
    pub fn upsert(&self, config: &DocumentConfig) -> Result<()> {
        let conn = self.lock()?;
        let now = Utc::now().to_rfc3339();

        conn.execute(
            "INSERT INTO knowledge (name, path, vector_storage, created_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO UPDATE SET
                path = excluded.path,
                vector_storage = excluded.vector_storage",
            params![config.name, config.path, config.vector_storage, now],
        )
        .context("Failed to upsert knowledge record")?;

        tracing::debug!("Stored knowledge record: {}", config.name);
        Ok(())
    }

    /// 이름으로 조회 (정확히 일치)
    pub fn find_by_name(&self, name: &str) -> Result<Vec<DocumentConfig>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT name, path, vector_storage, created_at FROM knowledge
             WHERE name = ?1 ORDER BY id",
        )?;

        let rows = stmt
            .query_map(params![name], row_to_stored)?
            .filter_map(|r| r.ok())
            .map(|s| s.config)
            .collect();

        Ok(rows)
    }

    /// 이름 정규식 + 스토어 종류로 조회
    ///
    /// SQLite에 REGEXP가 없으므로 종류로 거른 뒤 Rust에서 매칭합니다.
    pub fn find_by_pattern(&self, pattern: &str, vector_storage: &str) -> Result<Vec<DocumentConfig>> {
        let regex = Regex::new(pattern).map_err(|e| {
            KnowledgeError::config(format!("invalid knowledge pattern '{}': {}", pattern, e))
        })?;

        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT name, path, vector_storage, created_at FROM knowledge
             WHERE vector_storage = ?1 ORDER BY id",
        )?;

        let rows = stmt
            .query_map(params![vector_storage], row_to_stored)?
            .filter_map(|r| r.ok())
            .map(|s| s.config)
            .filter(|c| regex.is_match(&c.name))
            .collect();

        Ok(rows)
    }

    /// 전체 목록 (등록 순)
    pub fn list(&self) -> Result<Vec<StoredDocumentConfig>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT name, path, vector_storage, created_at FROM knowledge ORDER BY id",
        )?;

        let rows = stmt
            .query_map([], row_to_stored)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(rows)
    }

    /// 저장소 통계
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM knowledge", [], |row| row.get(0))
            .unwrap_or(0);

        Ok(StoreStats {
            knowledge_count: count as usize,
            db_path: self.db_path.clone(),
        })
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

fn row_to_stored(row: &Row<'_>) -> rusqlite::Result<StoredDocumentConfig> {
    Ok(StoredDocumentConfig {
        config: DocumentConfig {
            name: row.get(0)?,
            path: row.get(1)?,
            vector_storage: row.get(2)?,
        },
        created_at: parse_datetime(row.get::<_, String>(3)?),
    })
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================
