//! LanceDB Vector Store - 지식베이스별 벡터 스토어
//!
//! 지식베이스 하나가 `.lance` 디렉토리 하나를 가집니다.
//! 코사인 거리로 검색하고 `score = 1 - distance`를 0.0 ~ 1.0으로 잘라 반환합니다.
//! ref: https://lancedb.github.io/lancedb/

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::DistanceType;

use crate::embedding::EmbeddingProvider;

use super::document::{Chunk, Metadata};
use super::vector::VectorStoreHandle;

/// 청크 테이블 이름
const TABLE_NAME: &str = "chunks";

// ============================================================================
// LanceVectorStore
// ============================================================================

/// LanceDB 벡터 스토어
pub struct LanceVectorStore {
    id: String,
    path: PathBuf,
    db: Connection,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl LanceVectorStore {
    /// 스토어 열기 (디렉토리가 없으면 생성)
    ///
    /// # Arguments
    /// * `id` - 스토어 식별자 (지식베이스 이름)
    /// * `path` - .lance 디렉토리 경로
    /// * `embedder` - 쿼리/청크 임베딩 프로바이더
    pub async fn open(
        id: impl Into<String>,
        path: &Path,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        Ok(Self {
            id: id.into(),
            path: path.to_path_buf(),
            db,
            embedder,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn dimension(&self) -> i32 {
        self.embedder.dimension() as i32
    }

    /// 청크 테이블 스키마
    fn schema(dimension: i32) -> Schema {
        Schema::new(vec![
            Field::new("content", DataType::Utf8, false),
            Field::new("metadata", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    dimension,
                ),
                false,
            ),
        ])
    }

    /// 청크 + 임베딩 → RecordBatch
    fn to_batch(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<RecordBatch> {
        let dimension = self.dimension();

        if let Some(bad) = embeddings.iter().find(|e| e.len() != dimension as usize) {
            anyhow::bail!(
                "Embedding dimension mismatch: expected {}, got {}",
                dimension,
                bad.len()
            );
        }

        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        let metadata: Vec<String> = chunks
            .iter()
            .map(|c| serde_json::to_string(&c.metadata))
            .collect::<std::result::Result<_, _>>()
            .context("Failed to serialize chunk metadata")?;

        let values = Float32Array::from(embeddings.concat());
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embedding_list =
            FixedSizeListArray::try_new(field, dimension, Arc::new(values) as Arc<dyn Array>, None)
                .context("Failed to create embedding array")?;

        RecordBatch::try_new(
            Arc::new(Self::schema(dimension)),
            vec![
                Arc::new(StringArray::from(contents)),
                Arc::new(StringArray::from(metadata)),
                Arc::new(embedding_list),
            ],
        )
        .context("Failed to create RecordBatch")
    }

    async fn table_exists(&self) -> bool {
        self.db
            .table_names()
            .execute()
            .await
            .map(|names| names.iter().any(|n| n == TABLE_NAME))
            .unwrap_or(false)
    }

    async fn open_table(&self) -> Result<lancedb::table::Table> {
        self.db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .with_context(|| format!("Failed to open table in {:?}", self.path))
    }

    /// 검색 결과 배치 → (청크, 스코어)
    fn batch_to_results(batch: &RecordBatch) -> Result<Vec<(Chunk, f32)>> {
        let contents = batch
            .column_by_name("content")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| anyhow::anyhow!("Missing content column"))?;

        let metadata = batch
            .column_by_name("metadata")
            .and_then(|c| c.as_any().downcast_ref::<StringArray>())
            .ok_or_else(|| anyhow::anyhow!("Missing metadata column"))?;

        // _distance 컬럼 (LanceDB가 자동 추가)
        let distances = batch
            .column_by_name("_distance")
            .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
            .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

        (0..batch.num_rows())
            .map(|i| {
                let meta: Metadata = serde_json::from_str(metadata.value(i)).unwrap_or_default();
                let chunk = Chunk {
                    content: contents.value(i).to_string(),
                    metadata: meta,
                };
                Ok((chunk, distance_to_score(distances.value(i))))
            })
            .collect()
    }
}

/// 코사인 거리(0 ~ 2) → 유사도 스코어(0 ~ 1)
fn distance_to_score(distance: f32) -> f32 {
    (1.0 - distance).clamp(0.0, 1.0)
}

#[async_trait]
impl VectorStoreHandle for LanceVectorStore {
    fn id(&self) -> &str {
        &self.id
    }

    async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<(Chunk, f32)>> {
        if k == 0 || !self.table_exists().await {
            return Ok(vec![]);
        }

        let query_embedding = self
            .embedder
            .embed_query(query)
            .await
            .context("Failed to embed query")?;

        let table = self.open_table().await?;
        let stream = table
            .vector_search(query_embedding)
            .context("Failed to create vector search")?
            .distance_type(DistanceType::Cosine)
            .limit(k)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        let batches: Vec<RecordBatch> = stream.try_collect().await?;

        let mut results = Vec::new();
        for batch in &batches {
            results.extend(Self::batch_to_results(batch)?);
        }

        // 배치 경계와 무관하게 스코어 내림차순 보장
        results.sort_by(|a, b| b.1.total_cmp(&a.1));
        results.truncate(k);
        Ok(results)
    }

    async fn add_chunks(&self, chunks: &[Chunk]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self
            .embedder
            .embed_batch(&texts)
            .await
            .context("Failed to embed chunks")?;

        let batch = self.to_batch(chunks, &embeddings)?;
        let schema = batch.schema();
        let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);

        if self.table_exists().await {
            self.open_table()
                .await?
                .add(batches)
                .execute()
                .await
                .context("Failed to add chunks to table")?;
        } else {
            self.db
                .create_table(TABLE_NAME, batches)
                .execute()
                .await
                .context("Failed to create table")?;
        }

        tracing::debug!("Added {} chunks to {:?}", chunks.len(), self.path);
        Ok(chunks.len())
    }

    async fn count(&self) -> Result<usize> {
        if !self.table_exists().await {
            return Ok(0);
        }

        self.open_table()
            .await?
            .count_rows(None)
            .await
            .context("Failed to count rows")
    }
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
        Arc::new(KeywordEmbedding::new(&["rust", "python", "async", "memory"]))
    }

    #[test]
    fn test_distance_to_score() {
        assert_eq!(distance_to_score(0.0), 1.0);
        assert_eq!(distance_to_score(0.25), 0.75);
        assert_eq!(distance_to_score(1.5), 0.0);
    }

    #[tokio::test]
    async fn test_lance_store_add_and_count() {
        let temp_dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open("kb", &temp_dir.path().join("kb.lance"), embedder())
            .await
            .unwrap();

        assert_eq!(store.count().await.unwrap(), 0);

        let added = store
            .add_chunks(&[Chunk::new("rust async"), Chunk::new("python memory")])
            .await
            .unwrap();
        assert_eq!(added, 2);
        assert_eq!(store.count().await.unwrap(), 2);

        store.add_chunks(&[Chunk::new("rust memory")]).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_lance_search_returns_scored_chunks() {
        let temp_dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open("kb", &temp_dir.path().join("kb.lance"), embedder())
            .await
            .unwrap();

        store
            .add_chunks(&[
                Chunk::new("rust async").with_metadata("source", "a.md"),
                Chunk::new("python memory"),
                Chunk::new("rust memory"),
            ])
            .await
            .unwrap();

        let results = store
            .similarity_search_with_score("rust async", 2)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.content, "rust async");
        assert_eq!(results[0].0.source(), Some("a.md"));
        assert!(results[0].1 > 0.99);
        assert!(results[0].1 >= results[1].1);
    }

    #[tokio::test]
    async fn test_lance_search_empty_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = LanceVectorStore::open("kb", &temp_dir.path().join("empty.lance"), embedder())
            .await
            .unwrap();

        let results = store.similarity_search_with_score("rust", 3).await.unwrap();
        assert!(results.is_empty());
    }
}
