//! Vector Store - 벡터 스토어 핸들 트레이트 및 인메모리 구현
//!
//! 검색 파이프라인은 벡터 스토어를 `similarity_search_with_score`만 가진
//! 불투명한 핸들로 취급합니다. 인덱싱은 각 구현체의 몫입니다.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::embedding::EmbeddingProvider;

use super::document::Chunk;

// ============================================================================
// VectorStoreHandle Trait
// ============================================================================

/// 벡터 스토어 핸들 (async)
///
/// 여러 대화에서 동시에 검색할 수 있어야 하므로 `Send + Sync`입니다.
#[async_trait]
pub trait VectorStoreHandle: Send + Sync {
    /// 스토어 식별자 (결과 태깅용)
    fn id(&self) -> &str;

    /// 유사도 검색
    ///
    /// 스코어 내림차순으로 최대 `k`개의 (청크, 0.0 ~ 1.0 스코어)를 반환합니다.
    async fn similarity_search_with_score(&self, query: &str, k: usize)
        -> Result<Vec<(Chunk, f32)>>;

    /// 청크 추가 (임베딩은 스토어가 계산)
    async fn add_chunks(&self, chunks: &[Chunk]) -> Result<usize>;

    /// 저장된 청크 개수
    async fn count(&self) -> Result<usize>;
}

// ============================================================================
// MemoryVectorStore
// ============================================================================

/// 인메모리 벡터 스토어
///
/// 전체 스캔 + 코사인 유사도. 소규모 지식베이스와 테스트용입니다.
pub struct MemoryVectorStore {
    id: String,
    embedder: Arc<dyn EmbeddingProvider>,
    entries: RwLock<Vec<(Chunk, Vec<f32>)>>,
}

impl MemoryVectorStore {
    pub fn new(id: impl Into<String>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            id: id.into(),
            embedder,
            entries: RwLock::new(Vec::new()),
        }
    }
}

#[async_trait]
impl VectorStoreHandle for MemoryVectorStore {
    fn id(&self) -> &str {
        &self.id
    }

    async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<(Chunk, f32)>> {
        if k == 0 {
            return Ok(vec![]);
        }

        let query_embedding = self
            .embedder
            .embed_query(query)
            .await
            .context("Failed to embed query")?;

        let entries = self.entries.read().await;
        let mut scored: Vec<(Chunk, f32)> = entries
            .iter()
            .map(|(chunk, embedding)| {
                let similarity = cosine_similarity(&query_embedding, embedding).clamp(0.0, 1.0);
                (chunk.clone(), similarity)
            })
            .collect();

        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);
        Ok(scored)
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

        let mut entries = self.entries.write().await;
        entries.extend(chunks.iter().cloned().zip(embeddings));
        Ok(chunks.len())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.read().await.len())
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// 코사인 유사도 계산
///
/// 결과는 -1.0 ~ 1.0 범위입니다. 길이가 다르거나 영벡터면 0.0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::tests::KeywordEmbedding;

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.0001);
    }

    #[test]
    fn test_cosine_similarity_empty() {
        let a: Vec<f32> = vec![];
        assert_eq!(cosine_similarity(&a, &a), 0.0);
    }

    #[tokio::test]
    async fn test_memory_store_search_orders_by_score() {
        let embedder = Arc::new(KeywordEmbedding::new(&["rust", "python", "memory"]));
        let store = MemoryVectorStore::new("kb", embedder);

        store
            .add_chunks(&[
                Chunk::new("python scripting"),
                Chunk::new("rust memory safety"),
                Chunk::new("rust ownership"),
            ])
            .await
            .unwrap();
        assert_eq!(store.count().await.unwrap(), 3);

        let results = store
            .similarity_search_with_score("rust memory", 2)
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0.content, "rust memory safety");
        assert!(results[0].1 >= results[1].1);
        assert!(results.iter().all(|(_, s)| (0.0..=1.0).contains(s)));
    }

    #[tokio::test]
    async fn test_memory_store_zero_k() {
        let embedder = Arc::new(KeywordEmbedding::new(&["rust"]));
        let store = MemoryVectorStore::new("kb", embedder);
        store.add_chunks(&[Chunk::new("rust")]).await.unwrap();

        let results = store.similarity_search_with_score("rust", 0).await.unwrap();
        assert!(results.is_empty());
    }
}
