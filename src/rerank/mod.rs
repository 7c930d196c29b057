//! Rerank 모듈 - 검색 후보 재정렬
//!
//! 두 가지 전략:
//! - 외부 리랭커 모델 (HTTP)
//! - RRF (Reciprocal Rank Fusion)
//!
//! 외부 리랭커가 실패하거나 응답 형식을 알 수 없으면 RRF로 폴백합니다.
//! 리랭킹 실패로 파이프라인이 중단되는 일은 없습니다.

mod client;
mod parser;
mod rrf;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::config::RerankConfig;
use crate::error::{RagError, RagResult, ServiceFault};
use crate::knowledge::Candidate;

pub use client::{HttpRerankClient, RerankClient, RerankRequest};
pub use parser::{parse_response, RankedIndex, ResponseShape, RESPONSE_SHAPES};
pub use rrf::RankFusion;

/// 리랭킹 코디네이터
///
/// 호출 간 상태가 없으므로 여러 쿼리에서 동시에 사용할 수 있습니다.
pub struct Reranker {
    /// None이면 RRF만 사용
    client: Option<Arc<dyn RerankClient>>,
    model: String,
    top_k: usize,
    fusion: RankFusion,
}

impl Reranker {
    /// 설정에서 생성
    ///
    /// `enabled`이고 URL이 있을 때만 HTTP 리랭커를 사용합니다.
    pub fn from_config(config: &RerankConfig) -> Result<Self, ServiceFault> {
        let client: Option<Arc<dyn RerankClient>> = if config.uses_external_model() {
            let http = HttpRerankClient::new(
                config.url.clone(),
                Duration::from_secs(config.timeout_secs),
            )?;
            Some(Arc::new(http))
        } else {
            None
        };

        Ok(Self {
            client,
            model: config.model.clone(),
            top_k: config.top_k,
            fusion: RankFusion::default(),
        })
    }

    /// 지정한 리랭커 클라이언트로 생성
    pub fn with_client(client: Arc<dyn RerankClient>, config: &RerankConfig) -> Self {
        Self {
            client: Some(client),
            model: config.model.clone(),
            top_k: config.top_k,
            fusion: RankFusion::default(),
        }
    }

    /// RRF 전용
    pub fn rrf_only(top_k: usize) -> Self {
        Self {
            client: None,
            model: String::new(),
            top_k,
            fusion: RankFusion::default(),
        }
    }

    /// 외부 리랭커 사용 여부
    pub fn uses_external_model(&self) -> bool {
        self.client.is_some()
    }

    /// 기본 반환 개수
    pub fn default_top_k(&self) -> usize {
        self.top_k
    }

    fn width(&self, top_k: Option<usize>) -> usize {
        top_k.filter(|k| *k > 0).unwrap_or(self.top_k)
    }

    /// 후보 재정렬 (최대 top_k개)
    ///
    /// 후보가 없으면 외부 호출 없이 빈 목록을 반환합니다.
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<Candidate>,
        top_k: Option<usize>,
    ) -> Vec<Candidate> {
        let top_k = self.width(top_k);

        if candidates.is_empty() {
            return vec![];
        }

        let Some(client) = &self.client else {
            return self.fusion.fuse_lists(vec![candidates], top_k);
        };

        let request = RerankRequest {
            query: query.to_string(),
            documents: candidates.iter().map(|c| c.text.clone()).collect(),
            model: self.model.clone(),
            top_k,
        };

        let response = match client.rerank(&request).await {
            Ok(response) => response,
            Err(e) => {
                error!("Error calling re-ranker ({}): {}. Falling back to RRF", client.name(), e);
                return self.fusion.fuse_lists(vec![candidates], top_k);
            }
        };

        let Some((shape, entries)) = parse_response(&response) else {
            warn!(
                "Unexpected re-ranker response format (keys: {}). Falling back to RRF",
                response_keys(&response)
            );
            return self.fusion.fuse_lists(vec![candidates], top_k);
        };

        debug!("Re-ranker response parsed as '{}' ({} entries)", shape, entries.len());

        let reranked = select_ranked(&candidates, &entries, top_k);
        if reranked.is_empty() {
            warn!(
                "Re-ranker returned no in-range indices for {} candidates. Falling back to RRF",
                candidates.len()
            );
            return self.fusion.fuse_lists(vec![candidates], top_k);
        }

        info!("Re-ranked {} -> {} candidates", candidates.len(), reranked.len());
        reranked
    }

    /// 여러 쿼리의 결과 리스트를 RRF로 통합
    ///
    /// 외부 리랭커는 호출하지 않습니다. 쿼리 수와 리스트 수가 다르면 `InputMismatch`.
    pub fn rerank_multiple_queries(
        &self,
        queries: &[String],
        per_query_results: Vec<Vec<Candidate>>,
        top_k: Option<usize>,
    ) -> RagResult<Vec<Candidate>> {
        if queries.len() != per_query_results.len() {
            return Err(RagError::InputMismatch {
                what: "result lists",
                expected: queries.len(),
                actual: per_query_results.len(),
            });
        }

        Ok(self.fusion.fuse_lists(per_query_results, self.width(top_k)))
    }
}

/// 리랭커가 지정한 순서대로 원래 후보를 선택
///
/// 범위를 벗어난 인덱스는 건너뛰고, 같은 인덱스는 처음 것만 사용합니다.
fn select_ranked(candidates: &[Candidate], entries: &[RankedIndex], top_k: usize) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    let mut selected = Vec::with_capacity(top_k.min(entries.len()));

    for entry in entries {
        if selected.len() >= top_k {
            break;
        }
        let Some(candidate) = candidates.get(entry.index) else {
            debug!("Skipping out-of-range re-ranker index {}", entry.index);
            continue;
        };
        if !seen.insert(entry.index) {
            continue;
        }

        let mut candidate = candidate.clone();
        candidate.rerank_score = Some(entry.score);
        selected.push(candidate);
    }

    selected
}

fn response_keys(response: &serde_json::Value) -> String {
    match response {
        serde_json::Value::Object(map) => map.keys().cloned().collect::<Vec<_>>().join(", "),
        serde_json::Value::Array(_) => "array".to_string(),
        other => other.to_string().chars().take(50).collect(),
    }
}

// ============================================================================
// Tests
// ============================================================================
