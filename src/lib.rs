//! pdf-rag - PDF 하이브리드 RAG 파이프라인
//!
//! Elasticsearch BM25 + 벡터 유사도 하이브리드 검색, 외부 리랭커(실패 시 RRF 폴백),
//! LLM 답변 생성을 묶은 PDF 질의응답 시스템입니다.

pub mod answer;
pub mod cli;
pub mod collector;
pub mod config;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod index;
pub mod knowledge;
pub mod pipeline;
pub mod rerank;

// Re-exports
pub use answer::{AnswerGenerator, AnswerWithSources, Source};
pub use config::{get_data_dir, RagConfig, RRF_K};
pub use embedding::{EmbeddingProvider, HttpEmbedding};
pub use error::{RagError, RagResult, ServiceFault};
pub use index::{DocumentIndex, ElasticIndex, Filter, MemoryIndex, SearchBackend};
pub use knowledge::{
    Candidate, Chunk, HybridRetriever, IngestLedger, IngestRecord, RecursiveSplitter,
    ScoreSourceAdapter,
};
pub use pipeline::{PipelineStats, ProcessOutcome, RagPipeline};
pub use rerank::{HttpRerankClient, RankFusion, RerankClient, RerankRequest, Reranker};
