//! Knowledge 모듈 - 이중 세분도 하이브리드 검색 코어
//!
//! - Segmenter: 문서를 fine/coarse 두 세분도 청크로 분할
//! - DualIndexStore: 벡터 + BM25 인덱스를 하나의 불변 스냅샷으로 관리, SQLite 영속화
//! - QueryRouter: 쿼리 특성으로 세분도 선택
//! - HybridRetriever: 두 엔진 병렬 실행 + 엔진별 타임아웃
//! - fuse: min-max 정규화, 가중합 융합, 중복 제거, 인용 번호
//! - KnowledgeService: 외부 인터페이스

mod chunker;
mod cleaner;
mod document;
mod fusion;
mod hybrid;
mod index;
mod lexical;
mod router;
mod service;
mod store;
mod telemetry;
mod vector;

// Re-exports
pub use chunker::{ChunkConfig, SegmentedDocument, Segmenter};
pub use cleaner::{redact, TextCleaner, REDACTED};
pub use document::{
    span_overlap_ratio, Chunk, Document, DocumentMetadata, Granularity, IndexEntry, SourceType,
};
pub use fusion::{cite_chunks, fuse, min_max_normalize, Engine, Evidence, EvidenceItem, RetrievalResult};
pub use hybrid::{HybridRetriever, Query};
pub use index::{
    ChangeSet, DocumentRecord, DualIndexStore, IndexSnapshot, IndexStats, ScoredChunk, Segment,
    SourceTotals, StoredChunk,
};
pub use lexical::{tokenize, LexicalIndex, TermStats};
pub use router::{GranularityHint, QueryPreprocessor, QueryRouter, RouteDecision, Selection, MAX_KEYWORDS};
pub use service::{BatchReport, IndexOutcome, IndexStatus, KnowledgeService};
pub use store::{content_hash, KnowledgeStore, ModelIdentity, StoredDocument};
pub use telemetry::{Telemetry, TelemetrySnapshot};
pub use vector::{cosine_similarity, exact_search, exact_search_until, l2_normalize, top_k_by_score};
