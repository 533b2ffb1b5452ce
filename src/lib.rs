//! palank-knowledge - 대화형 지식베이스 검색
//!
//! 문서를 청크로 나누어 이름 있는 벡터 스토어(LanceDB/메모리)에 저장하고,
//! 대화마다 선택된 여러 스토어를 동시에 검색하여 최소 유사도와 전체 상한을
//! 적용한 결과를 프롬프트 변수로 넘깁니다.

pub mod chain;
pub mod chat;
pub mod cli;
pub mod collector;
pub mod config;
pub mod embedding;
pub mod error;
pub mod gemini;
pub mod knowledge;
pub mod llm;
pub mod loader;
pub mod retriever;

// Re-exports
pub use chain::{build_chain, ChainMode, ChainOptions, SearchChain};
pub use chat::{ConversationContext, KnowledgeChat, PromptVariables, KNOWLEDGE_PROMPT_KEY};
pub use config::{get_data_dir, KnowledgeConfig, KnowledgeConfigService, KnowledgeSettings};
pub use embedding::{EmbeddingProvider, GeminiEmbedding};
pub use error::{KnowledgeError, KnowledgeResult};
pub use gemini::{get_api_key, has_api_key};
pub use knowledge::{
    chunk, Chunk, ChunkConfig, DocumentConfig, KnowledgeSelection, KnowledgeService,
    KnowledgeStore, LanceVectorStore, MemoryVectorStore, RawDocument, ScoredChunk, TextChunker,
    VectorStoreHandle,
};
pub use loader::{DocumentLoader, LoaderFields, LoaderRegistry};
pub use retriever::{retrieve, MultiScoreThresholdRetriever, RetrieverOptions};
