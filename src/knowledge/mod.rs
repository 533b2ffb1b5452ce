//! Knowledge 모듈 - 지식베이스 저장 계층
//!
//! - Document: 원본 문서 / 청크 / 스코어 청크
//! - Chunker: 문자 단위 슬라이딩 윈도우 분할
//! - Vector: 벡터 스토어 핸들 트레이트 + 인메모리 구현
//! - Lance: LanceDB 벡터 스토어
//! - Store: 지식베이스 이름 → 벡터 스토어 위치 (SQLite)
//! - Service: 지식베이스 선택 해석, 스토어 핸들 캐시, 수집

mod chunker;
mod document;
mod lance;
mod service;
mod store;
mod vector;

// Re-exports
pub use chunker::{
    chunk, chunk_offset, ChunkConfig, TextChunker, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE,
};
pub use document::{Chunk, Metadata, RawDocument, ScoredChunk};
pub use lance::LanceVectorStore;
pub use service::{
    IngestReport, KnowledgeSelection, KnowledgeService, LanceStoreFactory, MemoryStoreFactory,
    VectorStoreFactory,
};
pub use store::{DocumentConfig, KnowledgeStore, StoreStats, StoredDocumentConfig};
pub use vector::{cosine_similarity, MemoryVectorStore, VectorStoreHandle};
