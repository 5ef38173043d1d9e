//! mailrag - 이메일·PDF 로컬 하이브리드 RAG 인덱스
//!
//! 문서를 fine/coarse 두 세분도로 분할해 벡터 + BM25 이중 인덱스에 저장하고,
//! 쿼리마다 세분도를 골라 두 엔진 결과를 융합한 인용 근거를 돌려줍니다.

pub mod cli;
pub mod collector;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod knowledge;

// Re-exports
pub use config::{get_data_dir, EmbeddingBackend, RagConfig};
pub use embedding::{create_embedder, EmbeddingProvider, GeminiEmbedding, HashEmbedding};
pub use error::{RagError, Result};
pub use knowledge::{
    BatchReport, Document, DocumentMetadata, Engine, Evidence, EvidenceItem, Granularity,
    GranularityHint, IndexOutcome, IndexStats, IndexStatus, KnowledgeService, Query,
    RetrievalResult, Selection, SourceType, TelemetrySnapshot,
};
