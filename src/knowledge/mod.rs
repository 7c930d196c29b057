//! Knowledge 모듈 - 검색 후보와 하이브리드 검색
//!
//! - Candidate: 검색된 청크 (인덱스 스코어 + 리랭킹 스코어)
//! - Adapter: 인덱스 히트 → Candidate 정규화
//! - Hybrid: 가중치/기본값을 적용한 하이브리드 검색 진입점
//! - Chunker: 토큰 기준 재귀 텍스트 분할
//! - Ledger: 적재된 PDF 기록 (SQLite)

mod adapter;
mod candidate;
mod chunker;
mod hybrid;
mod ledger;

// Re-exports
pub use adapter::{normalize_hits, ClauseWeights, ScoreSourceAdapter};
pub use candidate::{Candidate, Metadata};
pub use chunker::{
    Chunk, Chunker, RecursiveSplitter, RegexTokenCounter, TokenCounter, DEFAULT_SEPARATORS,
};
pub use hybrid::HybridRetriever;
pub use ledger::{file_sha256, id_prefix, IngestLedger, IngestRecord};
