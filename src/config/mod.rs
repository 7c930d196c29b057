//! 설정 모듈
//!
//! 기본값 → TOML 파일 → 환경변수 순서로 병합한 `RagConfig`를 만듭니다.
//! 각 컴포넌트는 생성 시 자기 섹션을 값으로 받으며, 이후 전역 상태를 읽지 않습니다.
//!
//! 설정 파일 위치: `--config` 경로 또는 ~/.pdf-rag/config.toml

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::RagError;

/// RRF 감쇠 상수 (고정값)
/// ref: https://plg.uwaterloo.ca/~gvcormac/cormacksigir09-rrf.pdf
pub const RRF_K: u32 = 60;

// ============================================================================
// Data Directory
// ============================================================================

/// 데이터 디렉토리 경로 (~/.pdf-rag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".pdf-rag")
}

// ============================================================================
// Sections
// ============================================================================

/// Elasticsearch 연결 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElasticsearchConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub api_key: String,
    /// false면 자체 서명 인증서 허용
    pub verify_certs: bool,
    pub index_name: String,
}

impl Default for ElasticsearchConfig {
    fn default() -> Self {
        Self {
            host: "https://localhost:9200".to_string(),
            user: "elastic".to_string(),
            password: String::new(),
            api_key: String::new(),
            verify_certs: false,
            index_name: "pdf_rag_index".to_string(),
        }
    }
}

/// 임베딩 서비스 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub url: String,
    pub model: String,
    pub dimension: usize,
    pub batch_size: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            model: "qwen3-embedding-0.6b".to_string(),
            dimension: 1024,
            batch_size: 10,
            timeout_secs: 30,
        }
    }
}

/// 리랭커 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankConfig {
    pub url: String,
    pub model: String,
    /// 리랭킹 후 반환할 결과 수
    pub top_k: usize,
    /// 외부 리랭커 사용 여부 (false면 RRF만 사용)
    pub enabled: bool,
    pub timeout_secs: u64,
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            model: "qwen3-reranker-0.6b".to_string(),
            top_k: 10,
            enabled: true,
            timeout_secs: 30,
        }
    }
}

impl RerankConfig {
    /// 외부 리랭커를 실제로 호출하는지 여부
    pub fn uses_external_model(&self) -> bool {
        self.enabled && !self.url.trim().is_empty()
    }
}

/// 하이브리드 검색 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// 리랭킹 전 검색 결과 수
    pub top_k: usize,
    /// BM25 절 가중치
    pub lexical_weight: f64,
    /// 벡터 유사도 절 가중치
    pub vector_weight: f64,
    /// 최소 스코어 (미만은 버림)
    pub min_score: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 10,
            lexical_weight: 0.3,
            vector_weight: 0.7,
            min_score: 0.1,
        }
    }
}

/// 청킹 설정 (토큰 단위)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
        }
    }
}

/// 답변 생성 LLM 설정
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    /// 컨텍스트 최대 문자 수
    pub max_context_chars: usize,
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            api_key: String::new(),
            model: "gpt-5-nano".to_string(),
            max_context_chars: 2000,
            timeout_secs: 60,
        }
    }
}

// ============================================================================
// RagConfig
// ============================================================================

/// 전체 설정
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub elasticsearch: ElasticsearchConfig,
    pub embedding: EmbeddingConfig,
    pub rerank: RerankConfig,
    pub retrieval: RetrievalConfig,
    pub chunking: ChunkingConfig,
    pub llm: LlmConfig,
}

impl RagConfig {
    /// 설정 로드
    ///
    /// `path`가 주어지면 해당 파일이 반드시 존재해야 하고,
    /// 없으면 기본 위치의 config.toml을 (있을 때만) 읽습니다.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default_path = get_data_dir().join("config.toml");
                if default_path.exists() {
                    Self::from_file(&default_path)?
                } else {
                    Self::default()
                }
            }
        };

        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    /// TOML 파일에서 읽기
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&raw).with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// TOML 문자열 파싱
    pub fn from_toml(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        Ok(config)
    }

    /// 환경변수 오버라이드
    ///
    /// 빈 값은 무시합니다. `lookup`은 테스트에서 환경을 대체하기 위한 인자입니다.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("ELASTICSEARCH_HOST") {
            self.elasticsearch.host = v;
        }
        if let Some(v) = get("ELASTICSEARCH_USER") {
            self.elasticsearch.user = v;
        }
        if let Some(v) = get("ELASTICSEARCH_PASSWORD") {
            self.elasticsearch.password = v;
        }
        if let Some(v) = get("ELASTICSEARCH_API_KEY") {
            self.elasticsearch.api_key = v;
        }
        if let Some(v) = get("ELASTICSEARCH_VERIFY_CERTS") {
            self.elasticsearch.verify_certs = v.eq_ignore_ascii_case("true");
        }
        if let Some(v) = get("ELASTICSEARCH_INDEX_NAME") {
            self.elasticsearch.index_name = v;
        }
        if let Some(v) = get("EMBEDDING_URL") {
            self.embedding.url = v;
        }
        if let Some(v) = get("RERANK_URL") {
            self.rerank.url = v;
        }
        if let Some(v) = get("LLM_API_URL") {
            self.llm.api_url = v;
        }
        if let Some(v) = get("LLM_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = get("LLM_MODEL") {
            self.llm.model = v;
        }
    }

    /// 설정 값 검증
    pub fn validate(&self) -> Result<(), RagError> {
        let r = &self.retrieval;
        for (name, weight) in [
            ("retrieval.lexical_weight", r.lexical_weight),
            ("retrieval.vector_weight", r.vector_weight),
        ] {
            if !weight.is_finite() || weight < 0.0 {
                return Err(RagError::Config(format!(
                    "{name} must be a finite non-negative number"
                )));
            }
        }
        if r.lexical_weight == 0.0 && r.vector_weight == 0.0 {
            return Err(RagError::Config(
                "retrieval weights must not both be zero".to_string(),
            ));
        }
        if !r.min_score.is_finite() || r.min_score < 0.0 {
            return Err(RagError::Config(
                "retrieval.min_score must be zero or greater".to_string(),
            ));
        }
        if r.top_k == 0 {
            return Err(RagError::Config(
                "retrieval.top_k must be greater than zero".to_string(),
            ));
        }
        if self.rerank.top_k == 0 {
            return Err(RagError::Config(
                "rerank.top_k must be greater than zero".to_string(),
            ));
        }
        if self.embedding.dimension == 0 || self.embedding.batch_size == 0 {
            return Err(RagError::Config(
                "embedding.dimension and embedding.batch_size must be greater than zero"
                    .to_string(),
            ));
        }
        if self.chunking.chunk_size == 0
            || self.chunking.chunk_overlap >= self.chunking.chunk_size
        {
            return Err(RagError::Config(
                "chunking.chunk_overlap must be smaller than a non-zero chunking.chunk_size"
                    .to_string(),
            ));
        }

        for (name, value) in [
            ("elasticsearch.host", &self.elasticsearch.host),
            ("embedding.url", &self.embedding.url),
            ("rerank.url", &self.rerank.url),
            ("llm.api_url", &self.llm.api_url),
        ] {
            if !value.trim().is_empty() {
                url::Url::parse(value)
                    .map_err(|e| RagError::Config(format!("{name} is not a valid URL: {e}")))?;
            }
        }

        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = RagConfig::default();
        assert_eq!(config.retrieval.lexical_weight, 0.3);
        assert_eq!(config.retrieval.vector_weight, 0.7);
        assert_eq!(config.retrieval.top_k, 10);
        assert_eq!(config.retrieval.min_score, 0.1);
        assert_eq!(config.rerank.top_k, 10);
        assert_eq!(config.chunking.chunk_size, 500);
        assert_eq!(config.elasticsearch.index_name, "pdf_rag_index");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RagConfig::from_toml(
            r#"
            [retrieval]
            lexical_weight = 0.5

            [rerank]
            enabled = false
            "#,
        )
        .unwrap();

        assert_eq!(config.retrieval.lexical_weight, 0.5);
        assert_eq!(config.retrieval.vector_weight, 0.7);
        assert!(!config.rerank.enabled);
        assert_eq!(config.rerank.model, "qwen3-reranker-0.6b");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("ELASTICSEARCH_HOST", "http://es:9200"),
            ("ELASTICSEARCH_VERIFY_CERTS", "TRUE"),
            ("RERANK_URL", "http://rerank:8000/rerank"),
            ("LLM_MODEL", ""),
        ]);

        let mut config = RagConfig::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.elasticsearch.host, "http://es:9200");
        assert!(config.elasticsearch.verify_certs);
        assert_eq!(config.rerank.url, "http://rerank:8000/rerank");
        // 빈 값은 무시
        assert_eq!(config.llm.model, "gpt-5-nano");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = RagConfig::default();
        config.retrieval.vector_weight = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.retrieval.lexical_weight = 0.0;
        config.retrieval.vector_weight = 0.0;
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.chunking.chunk_overlap = 500;
        assert!(config.validate().is_err());

        let mut config = RagConfig::default();
        config.rerank.url = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_uses_external_model() {
        let mut rerank = RerankConfig::default();
        assert!(!rerank.uses_external_model());

        rerank.url = "http://localhost:8000/rerank".to_string();
        assert!(rerank.uses_external_model());

        rerank.enabled = false;
        assert!(!rerank.uses_external_model());
    }
}
