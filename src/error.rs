//! 에러 타입
//!
//! 외부 서비스(인덱스, 리랭커, 임베딩, LLM) 호출 실패는 `ServiceFault`로,
//! 호출자 계약 위반은 `RagError`로 표현합니다.
//!
//! 검색/리랭킹 코어는 `ServiceFault`를 호출자에게 전파하지 않고
//! 로그 후 빈 결과 또는 RRF 폴백으로 처리합니다.

use thiserror::Error;

/// 외부 서비스 호출 실패
#[derive(Debug, Error)]
pub enum ServiceFault {
    /// 네트워크/연결 실패
    #[error("transport error: {0}")]
    Transport(String),

    /// 타임아웃
    #[error("request timed out: {0}")]
    Timeout(String),

    /// 비정상 HTTP 상태 코드
    #[error("service returned {status}: {body}")]
    Status { status: u16, body: String },

    /// 응답은 받았지만 알려진 형식이 아님
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl ServiceFault {
    /// 응답 본문을 로그에 남길 수 있는 길이로 잘라 Status 에러 생성
    pub fn status(status: u16, body: &str) -> Self {
        let body: String = body.chars().take(500).collect();
        Self::Status { status, body }
    }
}

impl From<reqwest::Error> for ServiceFault {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Status {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else if err.is_decode() {
            Self::MalformedResponse(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ServiceFault {
    fn from(err: serde_json::Error) -> Self {
        Self::MalformedResponse(err.to_string())
    }
}

/// 라이브러리 에러
#[derive(Debug, Error)]
pub enum RagError {
    /// 인자 개수 불일치 (예: 쿼리 수 != 결과 리스트 수)
    #[error("input mismatch: expected {expected} {what}, got {actual}")]
    InputMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    /// 설정 오류
    #[error("invalid configuration: {0}")]
    Config(String),

    /// 외부 서비스 실패
    #[error(transparent)]
    Service(#[from] ServiceFault),
}

pub type RagResult<T> = std::result::Result<T, RagError>;

// ============================================================================
// Tests
// ============================================================================
