//! 검색 후보 (Candidate)
//!
//! 한 번의 검색 호출에서 새로 만들어지고, 리랭킹을 거쳐 답변 생성에 전달된 뒤 버려집니다.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 청크 메타데이터 (file_name, page_number, title 등)
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// 검색된 청크 하나
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// 인덱스 문서 ID (빈 문자열이면 ID 없음)
    pub id: String,
    /// 청크 텍스트
    pub text: String,
    /// 인덱싱 시 부여된 청크 번호 (문서 내에서만 유일)
    pub chunk_id: i64,
    /// 메타데이터
    #[serde(default)]
    pub metadata: Metadata,
    /// 인덱스 스코어 (BM25 + 벡터 가중합, 높을수록 좋음)
    pub score: f64,
    /// 리랭킹 스코어 (리랭킹 전에는 None)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f64>,
}

impl Candidate {
    /// 새 후보 생성
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            chunk_id: 0,
            metadata: Metadata::new(),
            score: 0.0,
            rerank_score: None,
        }
    }

    /// 스코어 지정
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }

    /// 청크 번호 지정
    pub fn with_chunk_id(mut self, chunk_id: i64) -> Self {
        self.chunk_id = chunk_id;
        self
    }

    /// 메타데이터 항목 추가
    pub fn with_metadata(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    /// 유효한 ID가 있는지
    pub fn has_id(&self) -> bool {
        !self.id.trim().is_empty()
    }

    /// 원본 파일명
    pub fn file_name(&self) -> Option<&str> {
        self.metadata.get("file_name").and_then(|v| v.as_str())
    }

    /// 페이지 번호 (1부터)
    pub fn page_number(&self) -> Option<i64> {
        self.metadata.get("page_number").and_then(|v| v.as_i64())
    }

    /// 현재 단계에서 정렬 기준이 되는 스코어
    pub fn ranking_score(&self) -> f64 {
        self.rerank_score.unwrap_or(self.score)
    }
}
