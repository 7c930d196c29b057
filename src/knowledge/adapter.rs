//! Score Source Adapter - 인덱스 히트를 검색 후보로 변환
//!
//! 한 번의 검색 요청을 인덱스에 보내고, 응답을 `Candidate` 목록으로 정규화합니다.
//! 인덱스 호출이 실패하면 로그를 남기고 빈 목록을 반환합니다.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error};

use super::{Candidate, Metadata};
use crate::index::{Filter, IndexHit, IndexQuery, QueryMode, SearchBackend};

/// 절 가중치 (부스트)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClauseWeights {
    pub lexical: f64,
    pub vector: f64,
}

/// 검색 백엔드 어댑터
#[derive(Clone)]
pub struct ScoreSourceAdapter {
    backend: Arc<dyn SearchBackend>,
}

impl ScoreSourceAdapter {
    pub fn new(backend: Arc<dyn SearchBackend>) -> Self {
        Self { backend }
    }

    /// 백엔드 이름
    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    /// BM25 + 벡터 하이브리드 검색
    pub async fn hybrid(
        &self,
        query: &str,
        embedding: &[f32],
        size: usize,
        weights: ClauseWeights,
        min_score: f64,
        filters: &[Filter],
    ) -> Vec<Candidate> {
        self.run(IndexQuery {
            mode: QueryMode::Hybrid {
                text: query.to_string(),
                embedding: embedding.to_vec(),
            },
            lexical_weight: weights.lexical,
            vector_weight: weights.vector,
            size,
            min_score: Some(min_score),
            filters: filters.to_vec(),
        })
        .await
    }

    /// BM25 검색 (최소 스코어 없음)
    pub async fn lexical(&self, query: &str, size: usize, filters: &[Filter]) -> Vec<Candidate> {
        self.run(IndexQuery {
            mode: QueryMode::Lexical {
                text: query.to_string(),
            },
            lexical_weight: 1.0,
            vector_weight: 0.0,
            size,
            min_score: None,
            filters: filters.to_vec(),
        })
        .await
    }

    /// 벡터 유사도 검색
    pub async fn vector(
        &self,
        embedding: &[f32],
        size: usize,
        min_score: f64,
        filters: &[Filter],
    ) -> Vec<Candidate> {
        self.run(IndexQuery {
            mode: QueryMode::Vector {
                embedding: embedding.to_vec(),
            },
            lexical_weight: 0.0,
            vector_weight: 1.0,
            size,
            min_score: Some(min_score),
            filters: filters.to_vec(),
        })
        .await
    }

    async fn run(&self, query: IndexQuery) -> Vec<Candidate> {
        match self.backend.execute(&query).await {
            Ok(hits) => {
                let candidates = normalize_hits(hits, query.min_score);
                debug!(
                    "{} search returned {} candidates",
                    self.backend.name(),
                    candidates.len()
                );
                candidates
            }
            Err(e) => {
                error!("Search failed on {}: {}", self.backend.name(), e);
                vec![]
            }
        }
    }
}

/// 원시 히트를 후보로 정규화
///
/// - ID 중복은 처음 것만 유지 (ID 없는 히트는 각각 유지)
/// - `min_score`가 있으면 그 미만은 제거
/// - 스코어 내림차순 안정 정렬
pub fn normalize_hits(hits: Vec<IndexHit>, min_score: Option<f64>) -> Vec<Candidate> {
    let mut seen = HashSet::new();

    let mut candidates: Vec<Candidate> = hits
        .into_iter()
        .map(to_candidate)
        .filter(|c| !c.has_id() || seen.insert(c.id.clone()))
        .filter(|c| min_score.map_or(true, |min| c.score >= min))
        .collect();

    candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    candidates
}

fn to_candidate(hit: IndexHit) -> Candidate {
    let source = hit.source;

    let text = source
        .get("text")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let chunk_id = match source.get("chunk_id") {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    };

    let metadata: Metadata = match source.get("metadata") {
        Some(Value::Object(map)) => map.clone().into_iter().collect(),
        _ => Metadata::new(),
    };

    let score = hit.score.filter(|s| s.is_finite()).unwrap_or(0.0);

    Candidate {
        id: hit.id.unwrap_or_default(),
        text,
        chunk_id,
        metadata,
        score,
        rerank_score: None,
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    use crate::error::ServiceFault;

    fn hit(id: &str, score: f64, source: Value) -> IndexHit {
        IndexHit {
            id: Some(id.to_string()),
            score: Some(score),
            source,
        }
    }

    #[test]
    fn test_normalize_tolerates_missing_fields() {
        let hits = vec![
            hit("a", 1.0, json!({"text": "x", "chunk_id": "7", "metadata": {"page_number": 2}})),
            IndexHit {
                id: None,
                score: None,
                source: json!({}),
            },
        ];
        let candidates = normalize_hits(hits, None);

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].chunk_id, 7);
        assert_eq!(candidates[0].page_number(), Some(2));
        assert_eq!(candidates[1].id, "");
        assert_eq!(candidates[1].text, "");
        assert_eq!(candidates[1].score, 0.0);
    }

    #[test]
    fn test_normalize_dedupes_and_sorts() {
        let hits = vec![
            hit("a", 0.5, json!({"text": "first a"})),
            hit("b", 0.9, json!({"text": "b"})),
            hit("a", 0.8, json!({"text": "second a"})),
            hit("c", 0.05, json!({"text": "c"})),
        ];
        let candidates = normalize_hits(hits, Some(0.1));

        let ids: Vec<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(candidates[1].text, "first a");
    }

    #[test]
    fn test_non_finite_score_becomes_zero() {
        let candidates = normalize_hits(vec![hit("a", f64::NAN, json!({}))], None);
        assert_eq!(candidates[0].score, 0.0);
    }

    struct FailingBackend;

    #[async_trait]
    impl SearchBackend for FailingBackend {
        async fn execute(&self, _query: &IndexQuery) -> Result<Vec<IndexHit>, ServiceFault> {
            Err(ServiceFault::Transport("connection refused".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    #[tokio::test]
    async fn test_fault_returns_empty() {
        let adapter = ScoreSourceAdapter::new(Arc::new(FailingBackend));
        let weights = ClauseWeights {
            lexical: 0.3,
            vector: 0.7,
        };

        assert!(adapter.hybrid("q", &[1.0], 5, weights, 0.1, &[]).await.is_empty());
        assert!(adapter.lexical("q", 5, &[]).await.is_empty());
        assert!(adapter.vector(&[1.0], 5, 0.1, &[]).await.is_empty());
    }
}
