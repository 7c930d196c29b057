//! 답변 생성 모듈
//!
//! 리랭킹된 후보로 컨텍스트를 만들고 LLM(OpenAI 호환 chat completion)으로 답변을 생성합니다.
//! LLM이 설정되지 않았거나 호출이 실패하면 템플릿 답변을 반환합니다.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use crate::config::LlmConfig;
use crate::error::ServiceFault;
use crate::knowledge::Candidate;

/// 관련 문서를 찾지 못했을 때의 답변
pub const NO_RESULTS_ANSWER: &str =
    "I couldn't find any relevant information to answer your question.";

const SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions based on the provided context. If the context doesn't contain enough information, say so.";

/// 부분 문서를 붙이기 위한 최소 남은 글자 수
const MIN_PARTIAL_CHARS: usize = 100;
/// 템플릿 답변에 포함할 컨텍스트 글자 수
const TEMPLATE_CONTEXT_CHARS: usize = 500;
/// 출처에 포함할 텍스트 글자 수
const SOURCE_PREVIEW_CHARS: usize = 200;

// ============================================================================
// Types
// ============================================================================

/// 답변 출처
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Source {
    /// 청크 앞부분 (200자)
    pub text: String,
    pub file_name: String,
    pub page_number: Option<i64>,
    pub chunk_id: i64,
    /// 리랭킹 스코어 (없으면 검색 스코어)
    pub score: f64,
}

/// 출처가 포함된 답변
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerWithSources {
    pub answer: String,
    pub sources: Vec<Source>,
    pub num_sources: usize,
}

// ============================================================================
// AnswerGenerator
// ============================================================================

/// 답변 생성기
pub struct AnswerGenerator {
    client: reqwest::Client,
    config: LlmConfig,
}

impl AnswerGenerator {
    pub fn new(config: LlmConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to create HTTP client")?;

        if !config.api_url.is_empty() && config.api_key.is_empty() {
            warn!("LLM_API_URL is set but LLM_API_KEY is missing. Using template answers.");
        }

        Ok(Self { client, config })
    }

    /// LLM 호출 여부
    pub fn has_llm(&self) -> bool {
        !self.config.api_url.is_empty() && !self.config.api_key.is_empty()
    }

    /// 답변과 출처 생성
    pub async fn generate_with_sources(
        &self,
        query: &str,
        candidates: &[Candidate],
    ) -> AnswerWithSources {
        let answer = self.generate(query, candidates).await;
        let sources: Vec<Source> = candidates.iter().map(to_source).collect();

        AnswerWithSources {
            answer,
            num_sources: sources.len(),
            sources,
        }
    }

    /// 답변 생성
    pub async fn generate(&self, query: &str, candidates: &[Candidate]) -> String {
        if candidates.is_empty() {
            return NO_RESULTS_ANSWER.to_string();
        }

        let context = build_context(candidates, self.config.max_context_chars);

        if !self.has_llm() {
            return template_answer(&context, candidates.len());
        }

        match self.call_llm(&build_prompt(query, &context)).await {
            Ok(answer) => answer,
            Err(e) => {
                error!("Error calling LLM API: {}. Using template answer", e);
                template_answer(&context, 0)
            }
        }
    }

    /// chat completion 호출
    async fn call_llm(&self, prompt: &str) -> Result<String, ServiceFault> {
        let mut payload = chat_payload(&self.config.model, prompt);

        let (mut status, mut body) = self.post(&payload).await?;

        if status == 400 && is_temperature_error(&body) {
            debug!("Model rejected temperature, retrying with temperature=1");
            payload["temperature"] = json!(1);
            (status, body) = self.post(&payload).await?;
        }

        if !(200..300).contains(&status) {
            return Err(ServiceFault::status(status, &body));
        }

        let value: Value = serde_json::from_str(&body)?;
        parse_completion(&value).ok_or_else(|| {
            ServiceFault::MalformedResponse(format!(
                "unexpected LLM response: {}",
                truncate_chars(&body, 200)
            ))
        })
    }

    async fn post(&self, payload: &Value) -> Result<(u16, String), ServiceFault> {
        let url = &self.config.api_url;
        let mut request = self.client.post(url).json(payload);

        request = if url.contains("anthropic.com") {
            request
                .header("x-api-key", &self.config.api_key)
                .header("anthropic-version", "2023-06-01")
        } else {
            request.bearer_auth(&self.config.api_key)
        };

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok((status, body))
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// 후보 텍스트를 순서대로 이어 컨텍스트 생성
///
/// `max_chars`를 넘는 문서는 남은 공간이 100자를 넘을 때만 잘라서 붙입니다.
pub fn build_context(candidates: &[Candidate], max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut current = 0;

    for candidate in candidates {
        let len = candidate.text.chars().count();

        if current + len > max_chars {
            let remaining = max_chars.saturating_sub(current);
            if remaining > MIN_PARTIAL_CHARS {
                parts.push(truncate_chars(&candidate.text, remaining));
            }
            break;
        }

        parts.push(candidate.text.clone());
        current += len;
    }

    parts.join("\n\n")
}

/// LLM 프롬프트
pub fn build_prompt(query: &str, context: &str) -> String {
    format!(
        "Based on the following context, please answer the question. If the context doesn't contain enough information to answer the question, please say so.\n\n\
         Context:\n{context}\n\n\
         Question: {query}\n\n\
         Answer:"
    )
}

/// LLM 없이 만드는 템플릿 답변
pub fn template_answer(context: &str, num_docs: usize) -> String {
    if context.is_empty() {
        return NO_RESULTS_ANSWER.to_string();
    }

    let mut answer = String::from("Based on the retrieved documents, here is relevant information:\n\n");
    answer.push_str(&truncate_chars(context, TEMPLATE_CONTEXT_CHARS));

    if num_docs > 0 {
        answer.push_str(&format!("\n\n[Retrieved from {} document(s)]", num_docs));
    }

    answer.push_str("\n\nNote: For better answers, please configure an LLM API in the config file.");
    answer
}

/// chat completion 요청 본문
///
/// - gpt-4o / gpt-5 / o1 계열: `max_completion_tokens` 2000 (추론 토큰 포함)
/// - 그 외: `max_tokens` 500
/// - 온도 고정 모델은 temperature 1
pub fn chat_payload(model: &str, prompt: &str) -> Value {
    let lower = model.to_lowercase();

    let uses_completion_tokens =
        lower.contains("gpt-4o") || lower.contains("gpt-5") || lower.contains("o1");
    let fixed_temperature = lower.contains("o1")
        || lower.contains("gpt-4o-mini")
        || (lower.contains("gpt-4o") && model.contains("2024"));

    let mut payload = json!({
        "model": model,
        "messages": [
            { "role": "system", "content": SYSTEM_PROMPT },
            { "role": "user", "content": prompt }
        ],
        "temperature": if fixed_temperature { json!(1) } else { json!(0.7) },
    });

    if uses_completion_tokens {
        payload["max_completion_tokens"] = json!(2000);
    } else {
        payload["max_tokens"] = json!(500);
    }

    payload
}

/// 400 응답이 temperature 관련인지
fn is_temperature_error(body: &str) -> bool {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return false;
    };
    let Some(error) = value.get("error") else {
        return false;
    };

    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_lowercase();
    let param = error.get("param").and_then(Value::as_str).unwrap_or_default();

    message.contains("temperature") || param == "temperature"
}

/// 응답에서 답변 텍스트 추출
///
/// `choices[0].message.content` → `choices[0].message`(문자열) → `content` → `text`
pub fn parse_completion(value: &Value) -> Option<String> {
    if let Some(message) = value.pointer("/choices/0/message") {
        return match message {
            Value::String(s) => Some(s.clone()),
            Value::Object(_) => match message.get("content") {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Null) => Some(String::new()),
                _ => None,
            },
            _ => None,
        };
    }

    value
        .get("content")
        .or_else(|| value.get("text"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn to_source(candidate: &Candidate) -> Source {
    Source {
        text: truncate_chars(&candidate.text, SOURCE_PREVIEW_CHARS),
        file_name: candidate.file_name().unwrap_or("Unknown").to_string(),
        page_number: candidate.page_number(),
        chunk_id: candidate.chunk_id,
        score: candidate.ranking_score(),
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

// ============================================================================
// Tests
// ============================================================================
