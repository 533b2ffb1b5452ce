//! Multi-Store Retriever - 여러 벡터 스토어 통합 검색
//!
//! 모든 스토어를 동시에 검색한 뒤 최소 유사도로 거르고,
//! 스코어 내림차순으로 병합하여 전체 상위 `max_k`개만 반환합니다.
//! 스토어 하나의 실패는 그 스토어의 결과가 없는 것으로 취급합니다.

use std::sync::Arc;

use futures::future::join_all;

use crate::error::KnowledgeError;
use crate::knowledge::{ScoredChunk, VectorStoreHandle};

// ============================================================================
// Options
// ============================================================================

/// 검색 옵션
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrieverOptions {
    /// 최소 유사도 (미만은 제외)
    pub min_similarity_score: f32,
    /// 병합 후 최대 결과 수 (스토어별 검색 개수이기도 함)
    pub max_k: usize,
}

impl Default for RetrieverOptions {
    fn default() -> Self {
        Self {
            min_similarity_score: 0.5,
            max_k: 8,
        }
    }
}

// ============================================================================
// MultiScoreThresholdRetriever
// ============================================================================

/// 다중 스토어 + 스코어 임계값 검색기
#[derive(Clone)]
pub struct MultiScoreThresholdRetriever {
    stores: Vec<Arc<dyn VectorStoreHandle>>,
    options: RetrieverOptions,
}

impl MultiScoreThresholdRetriever {
    /// 스토어 목록으로 생성 (순서가 동점 처리 순서)
    pub fn from_vector_stores(
        stores: Vec<Arc<dyn VectorStoreHandle>>,
        options: RetrieverOptions,
    ) -> Self {
        Self { stores, options }
    }

    pub fn options(&self) -> RetrieverOptions {
        self.options
    }

    pub fn store_ids(&self) -> Vec<&str> {
        self.stores.iter().map(|s| s.id()).collect()
    }

    /// 통합 검색
    pub async fn retrieve(&self, query: &str) -> Vec<ScoredChunk> {
        retrieve(
            query,
            &self.stores,
            self.options.min_similarity_score,
            self.options.max_k,
        )
        .await
    }
}

/// 통합 검색
///
/// 1. 모든 스토어에서 `max_k`개씩 동시 검색
/// 2. `min_similarity_score` 미만(NaN 포함) 제거
/// 3. 스토어 id 태깅 후 병합
/// 4. 스코어 내림차순 안정 정렬 (동점은 스토어 순서 → 스토어 내 순위)
/// 5. 상위 `max_k`개
pub async fn retrieve(
    query: &str,
    stores: &[Arc<dyn VectorStoreHandle>],
    min_similarity_score: f32,
    max_k: usize,
) -> Vec<ScoredChunk> {
    if stores.is_empty() || max_k == 0 {
        return vec![];
    }

    let searches = stores
        .iter()
        .map(|store| store.similarity_search_with_score(query, max_k));
    let outcomes = join_all(searches).await;

    let mut merged: Vec<ScoredChunk> = Vec::new();
    for (store, outcome) in stores.iter().zip(outcomes) {
        let results = match outcome {
            Ok(results) => results,
            Err(e) => {
                let error = KnowledgeError::StoreQuery {
                    store: store.id().to_string(),
                    message: format!("{:#}", e),
                };
                tracing::warn!("{}", error);
                continue;
            }
        };

        merged.extend(
            results
                .into_iter()
                .filter(|(_, score)| *score >= min_similarity_score)
                .map(|(chunk, score)| ScoredChunk {
                    chunk,
                    score,
                    source_store_id: store.id().to_string(),
                }),
        );
    }

    // sort_by는 안정 정렬
    merged.sort_by(|a, b| b.score.total_cmp(&a.score));
    merged.truncate(max_k);

    tracing::debug!(
        "Retrieved {} chunks from {} stores (min score {})",
        merged.len(),
        stores.len(),
        min_similarity_score
    );
    merged
}

// ============================================================================
// Tests
// ============================================================================
