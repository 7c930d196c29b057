//! Index 모듈 - 외부 검색 인덱스 어댑터
//!
//! - Elastic: Elasticsearch REST API (BM25 match + script_score 코사인 유사도)
//! - Memory: 같은 쿼리 의미를 프로세스 내에서 평가하는 인덱스 (테스트/임베딩용)
//!
//! 검색 코어는 `SearchBackend`만 알고, 파이프라인은 `DocumentIndex`로
//! 인덱스 생성/적재/삭제를 수행합니다.

mod elastic;
mod memory;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{RagError, RagResult, ServiceFault};
use crate::knowledge::Chunk;

pub use elastic::{render_query, ElasticIndex, VECTOR_SCORE_SCRIPT};
pub use memory::MemoryIndex;

// ============================================================================
// Query Types
// ============================================================================

/// 검색 모드
#[derive(Debug, Clone, PartialEq)]
pub enum QueryMode {
    /// BM25 + 벡터 (disjunctive)
    Hybrid { text: String, embedding: Vec<f32> },
    /// BM25만
    Lexical { text: String },
    /// 벡터 유사도만
    Vector { embedding: Vec<f32> },
}

/// 구조화 필터 (모든 필터는 AND로 적용)
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Filter {
    /// 정확히 일치 (예: metadata.file_name = "a.pdf")
    Term {
        field: String,
        value: serde_json::Value,
    },
    /// 숫자 범위 (양 끝 포함)
    Range {
        field: String,
        gte: Option<f64>,
        lte: Option<f64>,
    },
}

impl Filter {
    /// Term 필터 생성
    pub fn term(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Range 필터 생성
    pub fn range(field: impl Into<String>, gte: Option<f64>, lte: Option<f64>) -> Self {
        Self::Range {
            field: field.into(),
            gte,
            lte,
        }
    }
}

/// 인덱스에 보내는 검색 요청
#[derive(Debug, Clone, PartialEq)]
pub struct IndexQuery {
    pub mode: QueryMode,
    /// BM25 절 부스트
    pub lexical_weight: f64,
    /// 벡터 절 부스트
    pub vector_weight: f64,
    /// 최대 결과 수
    pub size: usize,
    /// 최소 스코어 (None이면 제한 없음)
    pub min_score: Option<f64>,
    pub filters: Vec<Filter>,
}

/// 인덱스가 돌려준 원시 히트
///
/// `source`는 저장된 문서 본문(JSON)이며 형식이 일정하지 않을 수 있습니다.
/// 정규화는 검색 어댑터가 담당합니다.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHit {
    pub id: Option<String>,
    pub score: Option<f64>,
    pub source: serde_json::Value,
}

/// 인덱스 통계
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexStats {
    pub document_count: u64,
    pub store_size_bytes: u64,
}

// ============================================================================
// Traits
// ============================================================================

/// 검색 백엔드 트레이트
///
/// 실패는 `ServiceFault`로 반환하고, 폴백 판단은 호출자가 합니다.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    /// 검색 실행
    async fn execute(&self, query: &IndexQuery) -> Result<Vec<IndexHit>, ServiceFault>;

    /// 백엔드 이름
    fn name(&self) -> &str;
}

/// 문서 인덱스 관리 트레이트
#[async_trait]
pub trait DocumentIndex: SearchBackend {
    /// 연결 확인 (버전 문자열 반환)
    async fn ping(&self) -> Result<String, ServiceFault>;

    /// 인덱스가 없으면 생성 (생성했으면 true)
    async fn ensure_index(&self, dimension: usize) -> Result<bool, ServiceFault>;

    /// 청크와 임베딩 적재 (적재된 개수 반환)
    ///
    /// 문서 ID는 `{id_prefix}-{chunk_id}`로 결정되어 재적재 시 덮어씁니다.
    async fn index_chunks(
        &self,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
        id_prefix: &str,
    ) -> Result<usize, RagError>;

    /// 특정 파일의 청크 삭제 (삭제된 개수 반환)
    async fn delete_by_file(&self, file_path: &str) -> Result<u64, ServiceFault>;

    /// 인덱스 삭제 (존재했으면 true)
    async fn delete_index(&self) -> Result<bool, ServiceFault>;

    /// 인덱스 통계
    async fn stats(&self) -> Result<IndexStats, ServiceFault>;
}

/// 청크/임베딩 개수 검증
pub(crate) fn check_embedding_count(
    chunks: &[Chunk],
    embeddings: &[Vec<f32>],
) -> RagResult<()> {
    if chunks.len() != embeddings.len() {
        return Err(RagError::InputMismatch {
            what: "embeddings",
            expected: chunks.len(),
            actual: embeddings.len(),
        });
    }
    Ok(())
}

// ============================================================================
// Similarity
// ============================================================================

/// 코사인 유사도 (보호 없음)
///
/// 길이가 다르거나 비어 있거나 노름이 0이면 NaN을 반환합니다.
/// 인덱스의 `cosineSimilarity`와 같은 방식으로 실패합니다.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return f64::NAN;
    }

    let dot_product: f64 = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| f64::from(*x) * f64::from(*y))
        .sum();
    let norm_a: f64 = a.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();
    let norm_b: f64 = b.iter().map(|x| f64::from(*x).powi(2)).sum::<f64>().sqrt();

    dot_product / (norm_a * norm_b)
}

/// 벡터 절 스코어: 코사인 유사도 + 1.0
///
/// NaN/무한대는 0.0으로 처리합니다 (`VECTOR_SCORE_SCRIPT`와 동일).
pub fn vector_score(query: &[f32], stored: &[f32]) -> f64 {
    let similarity = cosine_similarity(query, stored);
    if similarity.is_nan() || similarity.is_infinite() {
        0.0
    } else {
        similarity + 1.0
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_same() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_vector_score_range() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!((vector_score(&a, &a) - 2.0).abs() < 1e-9);
        assert!((vector_score(&a, &b) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_vector_score_degenerate_inputs_are_zero() {
        let zero = vec![0.0, 0.0, 0.0];
        let a = vec![1.0, 2.0, 3.0];
        let nan = vec![f32::NAN, 1.0, 1.0];
        let inf = vec![f32::INFINITY, 1.0, 1.0];

        for (q, s) in [
            (&a, &zero),
            (&zero, &zero),
            (&a, &nan),
            (&inf, &a),
            (&a, &vec![1.0]),
            (&vec![], &vec![]),
        ] {
            let score = vector_score(q, s);
            assert_eq!(score, 0.0, "query={q:?} stored={s:?}");
        }
    }

    #[test]
    fn test_check_embedding_count() {
        let chunks = vec![Chunk::new(0, "a"), Chunk::new(1, "b")];
        assert!(check_embedding_count(&chunks, &[vec![0.1], vec![0.2]]).is_ok());
        assert!(matches!(
            check_embedding_count(&chunks, &[vec![0.1]]),
            Err(RagError::InputMismatch {
                expected: 2,
                actual: 1,
                ..
            })
        ));
    }
}
