//! RAG 파이프라인
//!
//! 적재: PDF 로드 → 청킹 → 임베딩 → 인덱싱 → 기록
//! 질의: 쿼리 임베딩 → 하이브리드 검색 → 리랭킹 → 답변 생성

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::answer::{AnswerGenerator, AnswerWithSources};
use crate::config::RagConfig;
use crate::embedding::{EmbeddingProvider, HttpEmbedding};
use crate::extractor::{load_pages, Page};
use crate::index::{DocumentIndex, ElasticIndex, Filter, IndexStats, SearchBackend};
use crate::knowledge::{
    file_sha256, id_prefix, Candidate, HybridRetriever, IngestLedger, IngestRecord,
    RecursiveSplitter,
};
use crate::rerank::Reranker;

// ============================================================================
// Types
// ============================================================================

/// PDF 한 건의 처리 결과
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// 인덱싱 완료
    Indexed { chunks: usize },
    /// 같은 내용으로 이미 인덱싱되어 건너뜀
    Skipped,
    /// 실패 (사유)
    Failed { reason: String },
}

impl ProcessOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// 파이프라인 통계
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub backend: String,
    pub index: IndexStats,
    pub ingested_files: usize,
    pub ledger_path: PathBuf,
}

// ============================================================================
// RagPipeline
// ============================================================================

/// RAG 파이프라인
pub struct RagPipeline {
    config: RagConfig,
    index: Arc<dyn DocumentIndex>,
    retriever: HybridRetriever,
    reranker: Reranker,
    /// 임베딩 URL이 없으면 None (적재/질의 불가, 관리 명령은 가능)
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    splitter: RecursiveSplitter,
    answer: AnswerGenerator,
    ledger: IngestLedger,
}

impl RagPipeline {
    /// 설정으로 Elasticsearch 기반 파이프라인 생성
    pub fn from_config(config: RagConfig) -> Result<Self> {
        let index = Arc::new(
            ElasticIndex::new(config.elasticsearch.clone())
                .context("Failed to create Elasticsearch client")?,
        );

        let embedder: Option<Arc<dyn EmbeddingProvider>> = if config.embedding.url.is_empty() {
            warn!("EMBEDDING_URL is not set; process and query are unavailable");
            None
        } else {
            Some(Arc::new(HttpEmbedding::new(&config.embedding)?))
        };

        let reranker =
            Reranker::from_config(&config.rerank).context("Failed to create re-ranker client")?;
        let ledger = IngestLedger::open_default()?;

        Self::with_components(config, index, embedder, reranker, ledger)
    }

    /// 구성 요소를 직접 지정하여 생성
    pub fn with_components<I>(
        config: RagConfig,
        index: Arc<I>,
        embedder: Option<Arc<dyn EmbeddingProvider>>,
        reranker: Reranker,
        ledger: IngestLedger,
    ) -> Result<Self>
    where
        I: DocumentIndex + 'static,
    {
        let backend: Arc<dyn SearchBackend> = index.clone();
        let retriever = HybridRetriever::new(backend, config.retrieval.clone());
        let splitter = RecursiveSplitter::from_config(&config.chunking)?;
        let answer = AnswerGenerator::new(config.llm.clone())?;

        info!(
            "Pipeline ready (index={}, re-ranker={}, rerank top_k={})",
            index.name(),
            if reranker.uses_external_model() { "external" } else { "rrf" },
            reranker.default_top_k()
        );

        Ok(Self {
            config,
            index,
            retriever,
            reranker,
            embedder,
            splitter,
            answer,
            ledger,
        })
    }

    /// 설정
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    fn embedder(&self) -> Result<&dyn EmbeddingProvider> {
        self.embedder
            .as_deref()
            .context("Embedding service is not configured. Set EMBEDDING_URL or [embedding].url")
    }

    // ------------------------------------------------------------------------
    // Ingest
    // ------------------------------------------------------------------------

    /// 여러 PDF 처리 (순차)
    pub async fn process_documents(
        &self,
        paths: &[PathBuf],
        force: bool,
    ) -> BTreeMap<PathBuf, ProcessOutcome> {
        let mut results = BTreeMap::new();
        for path in paths {
            info!("Processing PDF: {}", path.display());
            let outcome = self.process_pdf(path, force).await;
            results.insert(path.clone(), outcome);
        }
        results
    }

    /// PDF 한 건 처리
    ///
    /// 실패는 로그 후 `ProcessOutcome::Failed`로 반환합니다.
    pub async fn process_pdf(&self, path: &Path, force: bool) -> ProcessOutcome {
        match self.try_process_pdf(path, force).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Failed to process {}: {:#}", path.display(), e);
                ProcessOutcome::Failed {
                    reason: format!("{:#}", e),
                }
            }
        }
    }

    async fn try_process_pdf(&self, path: &Path, force: bool) -> Result<ProcessOutcome> {
        let path = std::fs::canonicalize(path)
            .with_context(|| format!("PDF file not found: {}", path.display()))?;
        let file_path = path.to_string_lossy().to_string();

        let hash = file_sha256(&path)?;
        if !force && self.ledger.is_current(&file_path, &hash)? {
            info!("Skipping unchanged PDF: {}", file_path);
            return Ok(ProcessOutcome::Skipped);
        }

        self.embedder()?;

        info!("Step 1: Loading PDF pages");
        let pages = load_pages(&path).await?;
        info!("Loaded {} pages from PDF", pages.len());

        let indexed = self.index_pages(&file_path, &hash, &pages).await?;
        info!("PDF processing completed: {} chunks indexed", indexed);

        Ok(ProcessOutcome::Indexed { chunks: indexed })
    }

    /// 페이지 청킹 → 임베딩 → 인덱싱 → 기록 (적재된 청크 수 반환)
    async fn index_pages(&self, file_path: &str, hash: &str, pages: &[Page]) -> Result<usize> {
        let embedder = self.embedder()?;

        info!("Step 2: Chunking pages");
        let chunks = self.splitter.chunk_pages(pages);
        if chunks.is_empty() {
            bail!("No text could be extracted from {}", file_path);
        }

        info!("Step 3: Generating embeddings for {} chunks", chunks.len());
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = embedder.embed_batch(&texts).await?;

        info!("Step 4: Indexing in {}", self.index.name());
        self.index
            .ensure_index(embedder.dimension())
            .await
            .context("Failed to create index")?;

        // 기존 청크를 지우기 전에 기록부터 무효화 (적재 실패 시 다음 실행에서 재시도)
        self.ledger.remove(file_path)?;

        // 이전 버전의 청크는 ID 접두사가 다르므로 먼저 삭제
        let removed = self
            .index
            .delete_by_file(file_path)
            .await
            .context("Failed to delete previous chunks")?;
        if removed > 0 {
            info!("Removed {} stale chunks for {}", removed, file_path);
        }

        let indexed = self
            .index
            .index_chunks(&chunks, &embeddings, id_prefix(hash))
            .await
            .context("Failed to index chunks")?;

        self.ledger.record(file_path, hash, indexed)?;
        Ok(indexed)
    }

    // ------------------------------------------------------------------------
    // Query
    // ------------------------------------------------------------------------

    /// 쿼리 임베딩 (0벡터/빈 벡터는 에러)
    async fn embed_queries(&self, queries: &[String]) -> Result<Vec<Vec<f32>>> {
        let embeddings = self.embedder()?.embed_batch(queries).await?;

        if embeddings.len() != queries.len()
            || embeddings
                .iter()
                .any(|e| e.is_empty() || e.iter().all(|v| *v == 0.0))
        {
            bail!("Failed to generate query embedding (empty or zero vector)");
        }
        Ok(embeddings)
    }

    /// 검색 + 리랭킹
    pub async fn retrieve(
        &self,
        query: &str,
        retrieval_k: Option<usize>,
        rerank_k: Option<usize>,
        filters: &[Filter],
    ) -> Result<Vec<Candidate>> {
        let embeddings = self.embed_queries(&[query.to_string()]).await?;
        let embedding = embeddings.first().context("Missing query embedding")?;

        let candidates = self
            .retriever
            .search(query, embedding, retrieval_k, filters)
            .await;
        Ok(self.reranker.rerank(query, candidates, rerank_k).await)
    }

    /// 질의 → 답변
    pub async fn query(
        &self,
        query: &str,
        retrieval_k: Option<usize>,
        rerank_k: Option<usize>,
        filters: &[Filter],
    ) -> Result<AnswerWithSources> {
        let reranked = self.retrieve(query, retrieval_k, rerank_k, filters).await?;
        Ok(self.answer.generate_with_sources(query, &reranked).await)
    }

    /// 여러 쿼리의 검색 결과를 RRF로 통합
    ///
    /// 쿼리별 검색은 동시에 실행합니다.
    pub async fn retrieve_multi(
        &self,
        queries: &[String],
        retrieval_k: Option<usize>,
        rerank_k: Option<usize>,
        filters: &[Filter],
    ) -> Result<Vec<Candidate>> {
        let embeddings = self.embed_queries(queries).await?;

        let searches = queries
            .iter()
            .zip(&embeddings)
            .map(|(query, embedding)| self.retriever.search(query, embedding, retrieval_k, filters));
        let per_query = futures::future::join_all(searches).await;

        Ok(self
            .reranker
            .rerank_multiple_queries(queries, per_query, rerank_k)?)
    }

    /// 여러 쿼리 → 답변 (답변은 쿼리들을 이어 붙인 질문으로 생성)
    pub async fn query_multi(
        &self,
        queries: &[String],
        retrieval_k: Option<usize>,
        rerank_k: Option<usize>,
        filters: &[Filter],
    ) -> Result<AnswerWithSources> {
        let fused = self
            .retrieve_multi(queries, retrieval_k, rerank_k, filters)
            .await?;
        let question = queries.join(" / ");
        Ok(self.answer.generate_with_sources(&question, &fused).await)
    }

    // ------------------------------------------------------------------------
    // Management
    // ------------------------------------------------------------------------

    /// 인덱스 생성 (이미 있으면 false)
    pub async fn initialize_index(&self) -> Result<bool> {
        let created = self
            .index
            .ensure_index(self.config.embedding.dimension)
            .await?;
        info!("Index initialized (created={})", created);
        Ok(created)
    }

    /// 인덱스 연결 확인
    pub async fn test_connection(&self) -> Result<String> {
        let version = self.index.ping().await?;
        info!("Connected to {} ({})", self.index.name(), version);
        Ok(version)
    }

    /// 문서 삭제 (인덱스 청크 + 기록)
    pub async fn delete_document(&self, path: &Path) -> Result<u64> {
        let file_path = std::fs::canonicalize(path)
            .unwrap_or_else(|_| path.to_path_buf())
            .to_string_lossy()
            .to_string();

        let removed = self.index.delete_by_file(&file_path).await?;
        self.ledger.remove(&file_path)?;
        info!("Deleted {} chunks for {}", removed, file_path);
        Ok(removed)
    }

    /// 인덱스 전체 삭제 (기록도 비움)
    pub async fn delete_index(&self) -> Result<bool> {
        let existed = self.index.delete_index().await?;
        let cleared = self.ledger.clear()?;
        info!("Deleted index (existed={}), cleared {} records", existed, cleared);
        Ok(existed)
    }

    /// 적재 기록 목록
    pub fn list_documents(&self) -> Result<Vec<IngestRecord>> {
        self.ledger.list()
    }

    /// 통계
    pub async fn stats(&self) -> Result<PipelineStats> {
        Ok(PipelineStats {
            backend: self.index.name().to_string(),
            index: self.index.stats().await?,
            ingested_files: self.ledger.count()?,
            ledger_path: self.ledger.db_path().to_path_buf(),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tempfile::TempDir;

    use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

    use crate::error::{RagError, ServiceFault};
    use crate::index::{IndexHit, IndexQuery, MemoryIndex};
    use crate::knowledge::Chunk;

    /// 키워드 기반 결정적 임베딩
    struct KeywordEmbedding;

    #[async_trait]
    impl EmbeddingProvider for KeywordEmbedding {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            let lower = text.to_lowercase();
            Ok(vec![
                if lower.contains("warranty") { 1.0 } else { 0.0 },
                if lower.contains("battery") { 1.0 } else { 0.0 },
                0.1,
            ])
        }

        fn dimension(&self) -> usize {
            3
        }

        fn name(&self) -> &str {
            "keyword"
        }
    }

    /// 항상 0벡터
    struct ZeroEmbedding;

    #[async_trait]
    impl EmbeddingProvider for ZeroEmbedding {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Ok(vec![0.0; 3])
        }

        fn dimension(&self) -> usize {
            3
        }

        fn name(&self) -> &str {
            "zero"
        }
    }

    fn pipeline(
        embedder: Option<Arc<dyn EmbeddingProvider>>,
    ) -> (TempDir, Arc<MemoryIndex>, RagPipeline) {
        let dir = TempDir::new().unwrap();
        let ledger = IngestLedger::open(&dir.path().join("ingest.db")).unwrap();
        let index = Arc::new(MemoryIndex::new());
        let config = RagConfig::default();
        let reranker = Reranker::rrf_only(config.rerank.top_k);
        let pipeline =
            RagPipeline::with_components(config, index.clone(), embedder, reranker, ledger)
                .unwrap();
        (dir, index, pipeline)
    }

    /// `fail`이 켜지면 적재만 실패하는 인덱스
    struct FlakyIndex {
        inner: MemoryIndex,
        fail: AtomicBool,
    }

    #[async_trait]
    impl SearchBackend for FlakyIndex {
        async fn execute(&self, query: &IndexQuery) -> Result<Vec<IndexHit>, ServiceFault> {
            self.inner.execute(query).await
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    #[async_trait]
    impl DocumentIndex for FlakyIndex {
        async fn ping(&self) -> Result<String, ServiceFault> {
            self.inner.ping().await
        }

        async fn ensure_index(&self, dimension: usize) -> Result<bool, ServiceFault> {
            self.inner.ensure_index(dimension).await
        }

        async fn index_chunks(
            &self,
            chunks: &[Chunk],
            embeddings: &[Vec<f32>],
            id_prefix: &str,
        ) -> Result<usize, RagError> {
            if self.fail.load(AtomicOrdering::SeqCst) {
                return Err(ServiceFault::Timeout("bulk request timed out".to_string()).into());
            }
            self.inner.index_chunks(chunks, embeddings, id_prefix).await
        }

        async fn delete_by_file(&self, file_path: &str) -> Result<u64, ServiceFault> {
            self.inner.delete_by_file(file_path).await
        }

        async fn delete_index(&self) -> Result<bool, ServiceFault> {
            self.inner.delete_index().await
        }

        async fn stats(&self) -> Result<IndexStats, ServiceFault> {
            self.inner.stats().await
        }
    }

    async fn seed(index: &MemoryIndex) {
        use serde_json::json;

        let mut chunks = vec![
            Chunk::new(0, "The warranty covers two years of use."),
            Chunk::new(1, "Replace the battery every six months."),
        ];
        for chunk in &mut chunks {
            chunk.metadata.insert("file_name".to_string(), json!("manual.pdf"));
            chunk.metadata.insert("file_path".to_string(), json!("/docs/manual.pdf"));
        }
        let embeddings = vec![vec![1.0, 0.0, 0.1], vec![0.0, 1.0, 0.1]];
        index.index_chunks(&chunks, &embeddings, "abc").await.unwrap();
    }

    #[tokio::test]
    async fn test_query_end_to_end() {
        let (_dir, index, pipeline) = pipeline(Some(Arc::new(KeywordEmbedding)));
        seed(&index).await;

        let result = pipeline.query("warranty period", None, Some(1), &[]).await.unwrap();

        assert_eq!(result.num_sources, 1);
        assert_eq!(result.sources[0].file_name, "manual.pdf");
        assert!(result.sources[0].text.contains("warranty"));
        assert!((result.sources[0].score - 1.0 / 61.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_query_rejects_zero_embedding() {
        let (_dir, index, pipeline) = pipeline(Some(Arc::new(ZeroEmbedding)));
        seed(&index).await;

        let err = pipeline.query("anything", None, None, &[]).await.unwrap_err();
        assert!(err.to_string().contains("query embedding"));
    }

    #[tokio::test]
    async fn test_query_without_embedder_fails() {
        let (_dir, _index, pipeline) = pipeline(None);
        assert!(pipeline.query("q", None, None, &[]).await.is_err());
    }

    #[tokio::test]
    async fn test_retrieve_multi_fuses() {
        let (_dir, index, pipeline) = pipeline(Some(Arc::new(KeywordEmbedding)));
        seed(&index).await;

        let queries = vec!["warranty".to_string(), "battery".to_string()];
        let fused = pipeline.retrieve_multi(&queries, None, None, &[]).await.unwrap();

        assert_eq!(fused.len(), 2);
        assert!(fused.iter().all(|c| c.rerank_score.is_some()));
    }

    #[tokio::test]
    async fn test_process_missing_file_fails() {
        let (_dir, _index, pipeline) = pipeline(Some(Arc::new(KeywordEmbedding)));
        let outcome = pipeline
            .process_pdf(Path::new("/nonexistent/file.pdf"), false)
            .await;
        assert!(outcome.is_failure());
    }

    #[tokio::test]
    async fn test_process_skips_unchanged() {
        let (dir, _index, pipeline) = pipeline(Some(Arc::new(KeywordEmbedding)));
        let pdf = dir.path().join("doc.pdf");
        std::fs::write(&pdf, b"%PDF-1.4 not really").unwrap();

        let canonical = std::fs::canonicalize(&pdf).unwrap();
        let hash = file_sha256(&canonical).unwrap();
        pipeline
            .ledger
            .record(&canonical.to_string_lossy(), &hash, 3)
            .unwrap();

        assert_eq!(pipeline.process_pdf(&pdf, false).await, ProcessOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_failed_reindex_invalidates_record() {
        let dir = TempDir::new().unwrap();
        let ledger = IngestLedger::open(&dir.path().join("ingest.db")).unwrap();
        let index = Arc::new(FlakyIndex {
            inner: MemoryIndex::new(),
            fail: AtomicBool::new(false),
        });
        let config = RagConfig::default();
        let reranker = Reranker::rrf_only(config.rerank.top_k);
        let pipeline = RagPipeline::with_components(
            config,
            index.clone(),
            Some(Arc::new(KeywordEmbedding)),
            reranker,
            ledger,
        )
        .unwrap();

        let pdf = dir.path().join("manual.pdf");
        std::fs::write(&pdf, b"%PDF-1.4 not really").unwrap();
        let canonical = std::fs::canonicalize(&pdf).unwrap();
        let file_path = canonical.to_string_lossy().to_string();
        let hash = file_sha256(&canonical).unwrap();

        let mut page = Page::new(1, "The warranty covers two years of use.");
        page.metadata.insert("file_path".to_string(), serde_json::json!(file_path));
        let pages = vec![page];

        let indexed = pipeline.index_pages(&file_path, &hash, &pages).await.unwrap();
        assert!(indexed > 0);
        assert_eq!(index.inner.len(), indexed);
        assert_eq!(pipeline.process_pdf(&pdf, false).await, ProcessOutcome::Skipped);

        // 강제 재적재 중 적재 실패: 기존 청크는 지워졌으므로 기록도 남으면 안 됨
        index.fail.store(true, AtomicOrdering::SeqCst);
        let err = pipeline.index_pages(&file_path, &hash, &pages).await.unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to index chunks"));
        assert!(index.inner.is_empty());
        assert!(!pipeline.ledger.is_current(&file_path, &hash).unwrap());
        assert!(pipeline.ledger.get(&file_path).unwrap().is_none());

        // 다음 실행은 건너뛰지 않고 다시 처리를 시도
        assert_ne!(pipeline.process_pdf(&pdf, false).await, ProcessOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_delete_and_stats() {
        let (_dir, index, pipeline) = pipeline(Some(Arc::new(KeywordEmbedding)));
        seed(&index).await;

        let stats = pipeline.stats().await.unwrap();
        assert_eq!(stats.backend, "memory");
        assert_eq!(stats.index.document_count, 2);

        let removed = pipeline
            .delete_document(Path::new("/docs/manual.pdf"))
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert!(index.is_empty());
    }
}
