//! Reciprocal Rank Fusion
//!
//! score(d) = Σ 1 / (k + rank_i(d)), rank은 각 입력 리스트 안에서 1부터 시작합니다.
//!
//! ref: https://www.elastic.co/blog/hybrid-search-rrf

use std::collections::HashMap;

use tracing::debug;

use crate::config::RRF_K;
use crate::knowledge::Candidate;

/// RRF 엔진 (순수 함수, I/O 없음)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RankFusion {
    k: u32,
}

impl Default for RankFusion {
    fn default() -> Self {
        Self { k: RRF_K }
    }
}

impl RankFusion {
    /// 감쇠 상수
    pub fn k(&self) -> u32 {
        self.k
    }

    /// 순위 하나의 기여도
    pub fn contribution(&self, rank: usize) -> f64 {
        1.0 / (f64::from(self.k) + rank as f64)
    }

    /// 여러 순위 리스트를 합쳐 융합
    ///
    /// 순위는 리스트마다 1부터 다시 셉니다.
    pub fn fuse_lists(&self, lists: Vec<Vec<Candidate>>, top_k: usize) -> Vec<Candidate> {
        let ranked = lists.into_iter().flat_map(|list| {
            list.into_iter()
                .enumerate()
                .map(|(i, candidate)| (i + 1, candidate))
        });
        self.fuse(ranked, top_k)
    }

    /// (순위, 후보) 나열을 융합
    ///
    /// - 같은 `id`의 기여도는 합산되고 처음 등장한 후보가 대표로 남습니다.
    /// - `id`가 비어 있으면 다른 후보와 합쳐지지 않습니다.
    /// - 같은 점수는 처음 등장한 순서를 유지합니다.
    /// - 반환되는 모든 후보의 `rerank_score`는 누적 RRF 점수로 덮어씁니다.
    pub fn fuse<I>(&self, ranked: I, top_k: usize) -> Vec<Candidate>
    where
        I: IntoIterator<Item = (usize, Candidate)>,
    {
        let mut groups: Vec<(Candidate, f64)> = Vec::new();
        let mut by_id: HashMap<String, usize> = HashMap::new();

        for (rank, candidate) in ranked {
            let contribution = self.contribution(rank);

            if candidate.has_id() {
                if let Some(&slot) = by_id.get(&candidate.id) {
                    groups[slot].1 += contribution;
                    continue;
                }
                by_id.insert(candidate.id.clone(), groups.len());
            }
            groups.push((candidate, contribution));
        }

        debug!("RRF fused {} groups (k={})", groups.len(), self.k());

        // sort_by는 안정 정렬
        groups.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        groups
            .into_iter()
            .take(top_k)
            .map(|(mut candidate, score)| {
                candidate.rerank_score = Some(score);
                candidate
            })
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.id.as_str()).collect()
    }

    #[test]
    fn test_single_list_scores() {
        let list = vec![
            Candidate::new("d1", "a"),
            Candidate::new("d2", "b"),
            Candidate::new("d3", "c"),
        ];
        let fused = RankFusion::default().fuse_lists(vec![list], 2);

        assert_eq!(ids(&fused), vec!["d1", "d2"]);
        assert!((fused[0].rerank_score.unwrap() - 1.0 / 61.0).abs() < 1e-12);
        assert!((fused[1].rerank_score.unwrap() - 1.0 / 62.0).abs() < 1e-12);
    }

    #[test]
    fn test_accumulates_across_lists() {
        let a = vec![Candidate::new("x", ""), Candidate::new("y", "")];
        let b = vec![
            Candidate::new("z", ""),
            Candidate::new("w", ""),
            Candidate::new("x", ""),
        ];
        let fused = RankFusion::default().fuse_lists(vec![a, b], 10);

        assert_eq!(fused[0].id, "x");
        let expected = 1.0 / 61.0 + 1.0 / 63.0;
        assert!((fused[0].rerank_score.unwrap() - expected).abs() < 1e-12);
        assert_eq!(fused.len(), 4);
    }

    #[test]
    fn test_ties_keep_first_seen_order() {
        let a = vec![Candidate::new("a", ""), Candidate::new("b", "")];
        let b = vec![Candidate::new("c", ""), Candidate::new("d", "")];
        let fused = RankFusion::default().fuse_lists(vec![a, b], 10);

        assert_eq!(ids(&fused), vec!["a", "c", "b", "d"]);
    }

    #[test]
    fn test_missing_ids_are_singletons() {
        let a = vec![Candidate::new("", "first"), Candidate::new("", "second")];
        let b = vec![Candidate::new("", "third")];
        let fused = RankFusion::default().fuse_lists(vec![a, b], 10);

        assert_eq!(fused.len(), 3);
        assert_eq!(fused[0].text, "first");
        assert_eq!(fused[1].text, "third");
        assert!((fused[0].rerank_score.unwrap() - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_overwrites_prior_rerank_score() {
        let mut c = Candidate::new("d1", "");
        c.rerank_score = Some(42.0);
        let fused = RankFusion::default().fuse_lists(vec![vec![c]], 1);
        assert!((fused[0].rerank_score.unwrap() - 1.0 / 61.0).abs() < 1e-12);
    }

    #[test]
    fn test_deterministic() {
        let make = || {
            vec![
                vec![Candidate::new("a", ""), Candidate::new("b", "")],
                vec![Candidate::new("b", ""), Candidate::new("", "x")],
            ]
        };
        let fusion = RankFusion::default();
        assert_eq!(fusion.fuse_lists(make(), 10), fusion.fuse_lists(make(), 10));
    }
}
