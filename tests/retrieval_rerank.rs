//! 하이브리드 검색 + 리랭킹 통합 테스트 (MemoryIndex, 가짜 리랭커)

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use pdf_rag::config::{RerankConfig, RetrievalConfig};
use pdf_rag::error::{RagError, ServiceFault};
use pdf_rag::index::{Filter, MemoryIndex};
use pdf_rag::knowledge::{Candidate, HybridRetriever};
use pdf_rag::rerank::{RankFusion, RerankClient, RerankRequest, Reranker};

// ============================================================================
// Fixtures
// ============================================================================

fn corpus() -> Arc<MemoryIndex> {
    let index = MemoryIndex::new();
    let docs = [
        ("d1", "warranty covers two years", "manual.pdf", 1, vec![1.0, 0.0, 0.0]),
        ("d2", "battery replacement every six months", "manual.pdf", 2, vec![0.0, 1.0, 0.0]),
        ("d3", "warranty claims require a receipt", "guide.pdf", 1, vec![0.8, 0.2, 0.0]),
    ];

    for (i, (id, text, file_name, page, embedding)) in docs.into_iter().enumerate() {
        let source = json!({
            "text": text,
            "chunk_id": i,
            "metadata": { "file_name": file_name, "page_number": page },
        });
        index.insert(id, source, embedding).unwrap();
    }

    Arc::new(index)
}

fn retriever(config: RetrievalConfig) -> HybridRetriever {
    HybridRetriever::new(corpus(), config)
}

fn ids(candidates: &[Candidate]) -> Vec<&str> {
    candidates.iter().map(|c| c.id.as_str()).collect()
}

/// 요청마다 같은 응답(또는 에러)을 돌려주는 리랭커
struct ScriptedClient {
    response: Result<Value, ServiceFault>,
    calls: AtomicUsize,
}

impl ScriptedClient {
    fn new(response: Result<Value, ServiceFault>) -> Arc<Self> {
        Arc::new(Self {
            response,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl RerankClient for ScriptedClient {
    async fn rerank(&self, _request: &RerankRequest) -> Result<Value, ServiceFault> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.response {
            Ok(value) => Ok(value.clone()),
            Err(ServiceFault::Timeout(msg)) => Err(ServiceFault::Timeout(msg.clone())),
            Err(ServiceFault::Status { status, body }) => Err(ServiceFault::status(*status, body)),
            Err(other) => Err(ServiceFault::Transport(other.to_string())),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

// ============================================================================
// Hybrid search
// ============================================================================

#[tokio::test]
async fn test_hybrid_search_orders_by_weighted_score() {
    let results = retriever(RetrievalConfig::default())
        .search("warranty", &[1.0, 0.0, 0.0], None, &[])
        .await;

    assert_eq!(ids(&results), vec!["d1", "d3", "d2"]);
    assert!(results.windows(2).all(|w| w[0].score >= w[1].score));
    assert_eq!(results[0].file_name(), Some("manual.pdf"));
    assert_eq!(results[0].page_number(), Some(1));
    assert!(results.iter().all(|c| c.rerank_score.is_none()));
}

#[tokio::test]
async fn test_hybrid_search_applies_min_score() {
    let config = RetrievalConfig {
        min_score: 1.0,
        ..Default::default()
    };
    let results = retriever(config)
        .search("warranty", &[1.0, 0.0, 0.0], None, &[])
        .await;

    assert_eq!(ids(&results), vec!["d1", "d3"]);
    assert!(results.iter().all(|c| c.score >= 1.0));
}

#[tokio::test]
async fn test_hybrid_search_survives_nan_embedding() {
    let config = RetrievalConfig {
        min_score: 0.0,
        ..Default::default()
    };
    let results = retriever(config)
        .search("warranty", &[f32::NAN, 0.0, 0.0], None, &[])
        .await;

    assert!(!results.is_empty());
    assert_eq!(results[0].id, "d1");
    assert!(results.iter().all(|c| c.score.is_finite()));
}

#[tokio::test]
async fn test_hybrid_search_filters_and_limits() {
    let r = retriever(RetrievalConfig::default());

    let filtered = r
        .search(
            "warranty",
            &[1.0, 0.0, 0.0],
            None,
            &[Filter::term("metadata.file_name", "guide.pdf")],
        )
        .await;
    assert_eq!(ids(&filtered), vec!["d3"]);

    let limited = r.search("warranty", &[1.0, 0.0, 0.0], Some(1), &[]).await;
    assert_eq!(ids(&limited), vec!["d1"]);
}

#[tokio::test]
async fn test_lexical_search_has_no_threshold() {
    let config = RetrievalConfig {
        min_score: 100.0,
        ..Default::default()
    };
    let results = retriever(config).search_lexical("battery", None, &[]).await;

    assert_eq!(ids(&results), vec!["d2"]);
}

// ============================================================================
// Re-ranking
// ============================================================================

#[tokio::test]
async fn test_rrf_end_to_end() {
    let candidates = retriever(RetrievalConfig::default())
        .search("warranty", &[1.0, 0.0, 0.0], None, &[])
        .await;

    let reranked = Reranker::rrf_only(10).rerank("warranty", candidates, Some(2)).await;

    assert_eq!(ids(&reranked), vec!["d1", "d3"]);
    assert!((reranked[0].rerank_score.unwrap() - 0.016393).abs() < 1e-6);
    assert!((reranked[1].rerank_score.unwrap() - 0.016129).abs() < 1e-6);
}

#[tokio::test]
async fn test_rerank_top_k_larger_than_candidates() {
    let candidates = vec![Candidate::new("a", "first"), Candidate::new("b", "second")];

    let reranked = Reranker::rrf_only(10)
        .rerank("q", candidates.clone(), Some(3))
        .await;
    assert_eq!(ids(&reranked), vec!["a", "b"]);
    assert!(reranked.iter().all(|c| c.rerank_score.is_some()));

    let client = ScriptedClient::new(Err(ServiceFault::status(500, "boom")));
    let reranker = Reranker::with_client(client, &RerankConfig::default());
    let fallback = reranker.rerank("q", candidates, Some(3)).await;
    assert_eq!(fallback, reranked);
}

#[tokio::test]
async fn test_external_model_reorders_candidates() {
    let candidates = retriever(RetrievalConfig::default())
        .search("warranty", &[1.0, 0.0, 0.0], None, &[])
        .await;

    let client = ScriptedClient::new(Ok(json!([
        { "index": 2, "relevance_score": 0.91 },
        { "index": 0, "relevance_score": 0.42 },
    ])));
    let reranker = Reranker::with_client(client.clone(), &RerankConfig::default());
    let reranked = reranker.rerank("battery", candidates, Some(3)).await;

    assert_eq!(ids(&reranked), vec!["d2", "d1"]);
    assert_eq!(reranked[0].rerank_score, Some(0.91));
    assert_eq!(client.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_every_failure_falls_back_to_rrf() {
    let candidates = retriever(RetrievalConfig::default())
        .search("warranty", &[1.0, 0.0, 0.0], None, &[])
        .await;
    let expected = Reranker::rrf_only(2)
        .rerank("warranty", candidates.clone(), None)
        .await;

    let responses = vec![
        Err(ServiceFault::Timeout("30s".to_string())),
        Err(ServiceFault::status(503, "unavailable")),
        Err(ServiceFault::Transport("connection refused".to_string())),
        Ok(json!({ "unexpected": true })),
        Ok(json!("not an object")),
        Ok(json!({ "results": [{ "index": 99, "score": 1.0 }] })),
    ];

    for response in responses {
        let client = ScriptedClient::new(response);
        let reranker = Reranker::with_client(client, &RerankConfig::default());
        let out = reranker.rerank("warranty", candidates.clone(), Some(2)).await;
        assert_eq!(out, expected);
    }
}

#[tokio::test]
async fn test_rerank_empty_candidates_skips_model() {
    let client = ScriptedClient::new(Ok(json!({ "results": [] })));
    let reranker = Reranker::with_client(client.clone(), &RerankConfig::default());

    assert!(reranker.rerank("q", vec![], Some(5)).await.is_empty());
    assert_eq!(client.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_multi_query_fusion_accumulates() {
    let r = retriever(RetrievalConfig::default());
    let warranty = r.search("warranty", &[1.0, 0.0, 0.0], None, &[]).await;
    let battery = r.search("battery", &[0.0, 1.0, 0.0], None, &[]).await;

    let queries = vec!["warranty".to_string(), "battery".to_string()];
    let fused = Reranker::rrf_only(10)
        .rerank_multiple_queries(&queries, vec![warranty, battery], None)
        .unwrap();

    // 각 id는 한 번만 나오고, 점수는 두 리스트 기여도의 합
    assert_eq!(fused.len(), 3);
    let total: f64 = fused.iter().map(|c| c.rerank_score.unwrap()).sum();
    let fusion = RankFusion::default();
    let expected: f64 = (1..=3).map(|r| 2.0 * fusion.contribution(r)).sum();
    assert!((total - expected).abs() < 1e-9);
}

#[test]
fn test_multi_query_count_mismatch() {
    let err = Reranker::rrf_only(10)
        .rerank_multiple_queries(&["only one".to_string()], vec![vec![], vec![]], None)
        .unwrap_err();

    match err {
        RagError::InputMismatch {
            expected, actual, ..
        } => {
            assert_eq!(expected, 1);
            assert_eq!(actual, 2);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_rrf_keeps_idless_candidates_apart() {
    let fused = RankFusion::default().fuse_lists(
        vec![
            vec![Candidate::new("", "a"), Candidate::new("x", "b")],
            vec![Candidate::new("", "c"), Candidate::new("x", "d")],
        ],
        10,
    );

    assert_eq!(fused.len(), 3);
    assert_eq!(fused[0].id, "x");
    assert_eq!(fused[0].text, "b");
    assert!((fused[0].rerank_score.unwrap() - 2.0 / 62.0).abs() < 1e-12);
}
