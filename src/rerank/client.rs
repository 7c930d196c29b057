//! 리랭커 HTTP 클라이언트

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;

use crate::error::ServiceFault;

/// 리랭커 요청 본문
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RerankRequest {
    pub query: String,
    pub documents: Vec<String>,
    pub model: String,
    pub top_k: usize,
}

/// 리랭커 호출 트레이트
///
/// 응답 JSON을 그대로 돌려주고, 형식 해석은 `Reranker`가 합니다.
#[async_trait]
pub trait RerankClient: Send + Sync {
    async fn rerank(&self, request: &RerankRequest) -> Result<Value, ServiceFault>;

    fn name(&self) -> &str;
}

/// HTTP 리랭커 클라이언트
pub struct HttpRerankClient {
    client: Client,
    url: String,
}

impl HttpRerankClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ServiceFault> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl RerankClient for HttpRerankClient {
    async fn rerank(&self, request: &RerankRequest) -> Result<Value, ServiceFault> {
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(ServiceFault::status(status.as_u16(), &body));
        }

        Ok(serde_json::from_str(&body)?)
    }

    /// 로그에 남길 엔드포인트
    fn name(&self) -> &str {
        &self.url
    }
}
