//! 하이브리드 검색 - BM25 + 벡터 유사도
//!
//! 설정된 가중치/기본값을 `ScoreSourceAdapter`에 전달하는 공개 진입점입니다.
//! 스코어링은 인덱스가 수행하고, 이 계층은 호출 간 상태를 갖지 않습니다.

use std::sync::Arc;

use tracing::info;

use super::adapter::{ClauseWeights, ScoreSourceAdapter};
use super::Candidate;
use crate::config::RetrievalConfig;
use crate::index::{Filter, SearchBackend};

/// 하이브리드 검색기
///
/// `&self`만 사용하므로 여러 쿼리에서 동시에 호출할 수 있습니다.
#[derive(Clone)]
pub struct HybridRetriever {
    adapter: ScoreSourceAdapter,
    config: RetrievalConfig,
}

impl HybridRetriever {
    /// 검색 백엔드와 설정으로 생성
    pub fn new(backend: Arc<dyn SearchBackend>, config: RetrievalConfig) -> Self {
        Self {
            adapter: ScoreSourceAdapter::new(backend),
            config,
        }
    }

    /// 검색 설정
    pub fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    fn weights(&self) -> ClauseWeights {
        ClauseWeights {
            lexical: self.config.lexical_weight,
            vector: self.config.vector_weight,
        }
    }

    fn width(&self, top_k: Option<usize>) -> usize {
        top_k.filter(|k| *k > 0).unwrap_or(self.config.top_k)
    }

    /// 하이브리드 검색 (BM25 + 벡터)
    ///
    /// `top_k`가 None 또는 0이면 `retrieval.top_k`를 사용합니다.
    pub async fn search(
        &self,
        query: &str,
        query_embedding: &[f32],
        top_k: Option<usize>,
        filters: &[Filter],
    ) -> Vec<Candidate> {
        let size = self.width(top_k);
        let results = self
            .adapter
            .hybrid(
                query,
                query_embedding,
                size,
                self.weights(),
                self.config.min_score,
                filters,
            )
            .await;

        info!(
            "Hybrid search on {}: {} results (top_k={}, lexical={}, vector={})",
            self.adapter.backend_name(),
            results.len(),
            size,
            self.config.lexical_weight,
            self.config.vector_weight
        );
        results
    }

    /// BM25 키워드 검색만
    pub async fn search_lexical(
        &self,
        query: &str,
        top_k: Option<usize>,
        filters: &[Filter],
    ) -> Vec<Candidate> {
        self.adapter
            .lexical(query, self.width(top_k), filters)
            .await
    }

    /// 벡터 유사도 검색만
    pub async fn search_vector(
        &self,
        query_embedding: &[f32],
        top_k: Option<usize>,
        filters: &[Filter],
    ) -> Vec<Candidate> {
        self.adapter
            .vector(
                query_embedding,
                self.width(top_k),
                self.config.min_score,
                filters,
            )
            .await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::index::MemoryIndex;

    fn retriever() -> HybridRetriever {
        let index = MemoryIndex::new();
        let docs = [
            ("d1", "rust async runtime", vec![1.0, 0.0]),
            ("d2", "python asyncio loop", vec![0.8, 0.2]),
            ("d3", "gardening tips for spring", vec![-1.0, 0.0]),
        ];
        for (i, (id, text, emb)) in docs.into_iter().enumerate() {
            index
                .insert(
                    id,
                    json!({"text": text, "chunk_id": i, "metadata": {"file_name": format!("{id}.pdf")}}),
                    emb,
                )
                .unwrap();
        }
        HybridRetriever::new(Arc::new(index), RetrievalConfig::default())
    }

    #[tokio::test]
    async fn test_search_respects_threshold_and_order() {
        let r = retriever();
        let results = r.search("rust runtime", &[1.0, 0.0], None, &[]).await;

        assert!(!results.is_empty());
        assert_eq!(results[0].id, "d1");
        assert!(results.iter().all(|c| c.score >= 0.1));
        assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_search_top_k_limits() {
        let r = retriever();
        assert_eq!(r.search("loop", &[1.0, 0.0], Some(1), &[]).await.len(), 1);
    }

    #[tokio::test]
    async fn test_search_with_filter() {
        let r = retriever();
        let results = r
            .search(
                "rust",
                &[1.0, 0.0],
                None,
                &[Filter::term("metadata.file_name", "d2.pdf")],
            )
            .await;

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "d2");
    }

    #[tokio::test]
    async fn test_lexical_and_vector_entry_points() {
        let r = retriever();

        let lexical = r.search_lexical("gardening", None, &[]).await;
        assert_eq!(lexical.len(), 1);
        assert_eq!(lexical[0].id, "d3");

        let vector = r.search_vector(&[-1.0, 0.0], Some(1), &[]).await;
        assert_eq!(vector[0].id, "d3");
    }
}
