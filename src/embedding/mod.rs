//! 임베딩 모듈 - HTTP 임베딩 서버를 통한 텍스트 벡터화
//!
//! 자체 호스팅 임베딩 서버(`{texts, model}`)와 OpenAI 호환 서버(`{input, model}`)를 모두 지원합니다.
//! 첫 요청이 422로 거절되면 OpenAI 형식으로 한 번 더 시도합니다.
//!
//! ## 사용법
//! ```rust,ignore
//! let embedder = HttpEmbedding::new(&config.embedding)?;
//! let vectors = embedder.embed_batch(&texts).await?;
//! ```

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::config::EmbeddingConfig;

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// 임베딩 프로바이더 트레이트
///
/// 텍스트를 벡터로 변환하는 인터페이스입니다.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// 단일 텍스트 임베딩
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// 배치 임베딩 (기본 구현: 순차 호출)
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// 임베딩 차원 수
    fn dimension(&self) -> usize;

    /// 프로바이더 이름
    fn name(&self) -> &str;
}

// ============================================================================
// HTTP Embedding
// ============================================================================

/// 429 에러 시 최대 재시도 횟수
const MAX_RETRIES: u32 = 3;
/// 재시도 시 초기 백오프 (ms)
const INITIAL_BACKOFF_MS: u64 = 2000;

/// 요청 본문 형식
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PayloadFormat {
    /// {"texts": [...], "model": ...}
    Texts,
    /// {"input": [...], "model": ...} (OpenAI 호환)
    Input,
}

/// HTTP 임베딩 구현체
#[derive(Debug)]
pub struct HttpEmbedding {
    client: reqwest::Client,
    url: String,
    model: String,
    dimension: usize,
    batch_size: usize,
    initial_backoff: Duration,
}

impl HttpEmbedding {
    /// 설정에서 생성
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        if config.url.trim().is_empty() {
            bail!("Embedding URL is not configured. Set EMBEDDING_URL or [embedding].url");
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            url: config.url.clone(),
            model: config.model.clone(),
            dimension: config.dimension,
            batch_size: config.batch_size.max(1),
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    /// 429 재시도 초기 백오프 변경
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// 배치 하나 요청
    async fn request_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut format = PayloadFormat::Texts;
        let mut last_error: Option<anyhow::Error> = None;

        let mut attempt = 0;
        while attempt <= MAX_RETRIES {
            let payload = match format {
                PayloadFormat::Texts => json!({ "texts": texts, "model": self.model }),
                PayloadFormat::Input => json!({ "input": texts, "model": self.model }),
            };

            let response = match self.client.post(&self.url).json(&payload).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send embedding request: {}", e));
                    if attempt < MAX_RETRIES {
                        let backoff = self.backoff(attempt);
                        tracing::warn!(
                            "Request failed, retrying in {:?} (attempt {}/{})",
                            backoff,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                    }
                    attempt += 1;
                    continue;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read response body")?;

            if status.is_success() {
                let value: Value = serde_json::from_str(&body).with_context(|| {
                    format!(
                        "Embedding API returned non-JSON response: {}",
                        truncate(&body, 200)
                    )
                })?;
                return parse_embeddings(&value);
            }

            match status.as_u16() {
                422 if format == PayloadFormat::Texts => {
                    tracing::warn!("422 error with 'texts' format, trying OpenAI-compatible 'input' format");
                    format = PayloadFormat::Input;
                    // 형식 전환은 재시도 횟수에 포함하지 않음
                    continue;
                }
                429 => {
                    let backoff = self.backoff(attempt);
                    tracing::warn!(
                        "Rate limit hit (429), backing off {:?} (attempt {}/{})",
                        backoff,
                        attempt + 1,
                        MAX_RETRIES
                    );
                    last_error = Some(anyhow::anyhow!("Rate limit exceeded (429)"));
                    if attempt < MAX_RETRIES {
                        tokio::time::sleep(backoff).await;
                    }
                    attempt += 1;
                }
                _ => bail!("Embedding API error ({}): {}", status, truncate(&body, 500)),
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Embedding failed after {} retries", MAX_RETRIES)))
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.initial_backoff * 2u32.pow(attempt)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbedding {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .context("Embedding API returned no vectors")
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let total_batches = texts.len().div_ceil(self.batch_size);
        tracing::info!(
            "Starting embedding generation: {} texts in {} batches",
            texts.len(),
            total_batches
        );

        let mut results = Vec::with_capacity(texts.len());
        for (i, batch) in texts.chunks(self.batch_size).enumerate() {
            tracing::debug!("Embedding batch {}/{}: {} texts", i + 1, total_batches, batch.len());

            let vectors = self.request_batch(batch).await?;
            if vectors.len() != batch.len() {
                bail!(
                    "Embedding count mismatch: sent {} texts, got {} vectors",
                    batch.len(),
                    vectors.len()
                );
            }
            if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
                bail!(
                    "Embedding dimension mismatch: expected {}, got {}",
                    self.dimension,
                    bad.len()
                );
            }
            results.extend(vectors);
        }

        Ok(results)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model
    }
}

// ============================================================================
// Response Parsing
// ============================================================================

/// 임베딩 응답 파싱
///
/// 지원 형식:
/// - `{"data": {"text_vectors": [[...]]}}`
/// - `{"data": [{"embedding": [...]}]}` (OpenAI)
/// - `{"embeddings": [[...]]}`
/// - `{"embedding": [...]}` (단일)
/// - `[[...]]`
pub fn parse_embeddings(value: &Value) -> Result<Vec<Vec<f32>>> {
    let vectors: Vec<&Value> = if let Some(data) = value.get("data") {
        match data {
            Value::Object(_) => match data.get("text_vectors").and_then(Value::as_array) {
                Some(vectors) => vectors.iter().collect(),
                None => bail!("Unexpected 'data' format: {}", truncate(&data.to_string(), 200)),
            },
            Value::Array(items) => items
                .iter()
                .map(|item| item.get("embedding").context("Missing 'embedding' in data item"))
                .collect::<Result<_>>()?,
            _ => bail!("Unexpected 'data' format: {}", truncate(&data.to_string(), 200)),
        }
    } else if let Some(embeddings) = value.get("embeddings").and_then(Value::as_array) {
        embeddings.iter().collect()
    } else if let Some(embedding) = value.get("embedding") {
        vec![embedding]
    } else if let Some(items) = value.as_array() {
        items.iter().collect()
    } else {
        bail!(
            "Unexpected embedding response format: {}",
            truncate(&value.to_string(), 200)
        );
    };

    vectors.into_iter().map(to_vector).collect()
}

fn to_vector(value: &Value) -> Result<Vec<f32>> {
    value
        .as_array()
        .context("Embedding is not an array")?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .context("Embedding contains a non-numeric value")
        })
        .collect()
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

// ============================================================================
// Tests
// ============================================================================
