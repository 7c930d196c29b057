//! Elasticsearch 인덱스 - REST API 클라이언트
//!
//! 하이브리드 검색은 하나의 bool 쿼리로 실행합니다:
//! - should[0]: `text` 필드 BM25 match (lexical_weight 부스트)
//! - should[1]: script_score 코사인 유사도 + 1.0 (vector_weight 부스트)
//! - filter: 구조화 필터 (AND)
//!
//! ref: https://www.elastic.co/guide/en/elasticsearch/reference/current/query-dsl-script-score-query.html

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::{json, Value};

use super::{
    check_embedding_count, DocumentIndex, Filter, IndexHit, IndexQuery, IndexStats, QueryMode,
    SearchBackend,
};
use crate::config::ElasticsearchConfig;
use crate::error::{RagError, ServiceFault};
use crate::knowledge::Chunk;

/// 벡터 유사도 스크립트 (NaN/무한대는 0.0)
pub const VECTOR_SCORE_SCRIPT: &str = "double similarity = cosineSimilarity(params.query_vector, 'embedding'); \
if (Double.isNaN(similarity) || Double.isInfinite(similarity)) { return 0.0; } \
return similarity + 1.0;";

/// 검색 결과로 가져올 필드
const SOURCE_FIELDS: [&str; 3] = ["text", "chunk_id", "metadata"];

/// bulk 요청당 문서 수
const BULK_BATCH_SIZE: usize = 100;

/// 요청 타임아웃
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// Query Rendering
// ============================================================================

/// `IndexQuery`를 Elasticsearch 검색 본문으로 변환
pub fn render_query(query: &IndexQuery) -> Value {
    let filters: Vec<Value> = query.filters.iter().map(render_filter).collect();

    let bool_query = match &query.mode {
        QueryMode::Hybrid { text, embedding } => json!({
            "should": [
                lexical_clause(text, Some(query.lexical_weight)),
                vector_clause(embedding, Some(query.vector_weight)),
            ],
            "minimum_should_match": 1,
            "filter": filters,
        }),
        QueryMode::Lexical { text } => json!({
            "must": [lexical_clause(text, None)],
            "filter": filters,
        }),
        QueryMode::Vector { embedding } => json!({
            "must": [vector_clause(embedding, None)],
            "filter": filters,
        }),
    };

    let mut body = json!({
        "size": query.size,
        "query": { "bool": bool_query },
        "_source": SOURCE_FIELDS,
    });

    if let Some(min_score) = query.min_score {
        body["min_score"] = json!(min_score);
    }

    body
}

fn lexical_clause(text: &str, boost: Option<f64>) -> Value {
    match boost {
        Some(boost) => json!({ "match": { "text": { "query": text, "boost": boost } } }),
        None => json!({ "match": { "text": text } }),
    }
}

fn vector_clause(embedding: &[f32], boost: Option<f64>) -> Value {
    let mut clause = json!({
        "script_score": {
            "query": { "match_all": {} },
            "script": {
                "source": VECTOR_SCORE_SCRIPT,
                "params": { "query_vector": embedding },
            },
        }
    });
    if let Some(boost) = boost {
        clause["script_score"]["boost"] = json!(boost);
    }
    clause
}

fn render_filter(filter: &Filter) -> Value {
    match filter {
        Filter::Term { field, value } => json!({ "term": { field.as_str(): value } }),
        Filter::Range { field, gte, lte } => {
            let mut bounds = serde_json::Map::new();
            if let Some(gte) = gte {
                bounds.insert("gte".to_string(), json!(gte));
            }
            if let Some(lte) = lte {
                bounds.insert("lte".to_string(), json!(lte));
            }
            json!({ "range": { field.as_str(): bounds } })
        }
    }
}

/// 인덱스 매핑 (text + dense_vector + metadata)
fn index_mapping(dimension: usize) -> Value {
    json!({
        "mappings": {
            "properties": {
                "text": { "type": "text", "analyzer": "standard" },
                "embedding": {
                    "type": "dense_vector",
                    "dims": dimension,
                    "index": true,
                    "similarity": "cosine"
                },
                "chunk_id": { "type": "integer" },
                "metadata": {
                    "type": "object",
                    "properties": {
                        "title": { "type": "text" },
                        "author": { "type": "text" },
                        "file_name": { "type": "keyword" },
                        "file_path": { "type": "keyword" },
                        "total_pages": { "type": "integer" },
                        "page_number": { "type": "integer" }
                    }
                }
            }
        }
    })
}

/// 검색 응답에서 히트 추출
fn parse_hits(body: &Value) -> Result<Vec<IndexHit>, ServiceFault> {
    let hits = body
        .pointer("/hits/hits")
        .and_then(|v| v.as_array())
        .ok_or_else(|| ServiceFault::MalformedResponse("missing hits.hits array".to_string()))?;

    Ok(hits
        .iter()
        .map(|hit| IndexHit {
            id: hit.get("_id").and_then(|v| v.as_str()).map(str::to_string),
            score: hit.get("_score").and_then(|v| v.as_f64()),
            source: hit.get("_source").cloned().unwrap_or(Value::Null),
        })
        .collect())
}

// ============================================================================
// ElasticIndex
// ============================================================================

/// Elasticsearch 인덱스 클라이언트
///
/// 내부 `reqwest::Client`는 커넥션 풀을 공유하므로 동시 검색에 그대로 재사용합니다.
#[derive(Debug, Clone)]
pub struct ElasticIndex {
    client: reqwest::Client,
    config: ElasticsearchConfig,
}

impl ElasticIndex {
    /// 설정으로 생성
    pub fn new(config: ElasticsearchConfig) -> Result<Self, ServiceFault> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(!config.verify_certs)
            .build()?;

        Ok(Self { client, config })
    }

    /// 인덱스 이름
    pub fn index_name(&self) -> &str {
        &self.config.index_name
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.host.trim_end_matches('/'), path)
    }

    /// 인증 헤더 적용 (API 키 > Basic > 없음)
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, self.url(path));
        if !self.config.api_key.is_empty() {
            builder.header("Authorization", format!("ApiKey {}", self.config.api_key))
        } else if !self.config.password.is_empty() {
            builder.basic_auth(&self.config.user, Some(&self.config.password))
        } else {
            builder
        }
    }

    /// 요청 전송 후 JSON 응답 반환 (비정상 상태는 ServiceFault)
    async fn send_json(&self, builder: RequestBuilder) -> Result<Value, ServiceFault> {
        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(ServiceFault::status(status.as_u16(), &text));
        }

        Ok(serde_json::from_str(&text)?)
    }

    /// bulk 요청 본문 (NDJSON)
    fn bulk_body(&self, chunks: &[Chunk], embeddings: &[Vec<f32>], id_prefix: &str) -> String {
        let mut body = String::new();
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            let action = json!({
                "index": {
                    "_index": self.config.index_name,
                    "_id": format!("{}-{}", id_prefix, chunk.chunk_id),
                }
            });
            let source = json!({
                "text": chunk.text,
                "embedding": embedding,
                "chunk_id": chunk.chunk_id,
                "metadata": chunk.metadata,
            });
            body.push_str(&action.to_string());
            body.push('\n');
            body.push_str(&source.to_string());
            body.push('\n');
        }
        body
    }
}

#[async_trait]
impl SearchBackend for ElasticIndex {
    async fn execute(&self, query: &IndexQuery) -> Result<Vec<IndexHit>, ServiceFault> {
        let body = render_query(query);
        let path = format!("{}/_search", self.config.index_name);

        let response = self
            .send_json(self.request(Method::POST, &path).json(&body))
            .await?;

        parse_hits(&response)
    }

    fn name(&self) -> &str {
        "elasticsearch"
    }
}

#[async_trait]
impl DocumentIndex for ElasticIndex {
    async fn ping(&self) -> Result<String, ServiceFault> {
        let info = self.send_json(self.request(Method::GET, "")).await?;
        info.pointer("/version/number")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| ServiceFault::MalformedResponse("missing version.number".to_string()))
    }

    async fn ensure_index(&self, dimension: usize) -> Result<bool, ServiceFault> {
        let index = self.config.index_name.clone();
        let response = self.request(Method::HEAD, &index).send().await?;

        match response.status() {
            status if status.is_success() => {
                tracing::info!("Index '{}' already exists", index);
                Ok(false)
            }
            StatusCode::NOT_FOUND => {
                self.send_json(self.request(Method::PUT, &index).json(&index_mapping(dimension)))
                    .await?;
                tracing::info!("Index '{}' created (dims={})", index, dimension);
                Ok(true)
            }
            status => Err(ServiceFault::status(status.as_u16(), "index existence check failed")),
        }
    }

    async fn index_chunks(
        &self,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
        id_prefix: &str,
    ) -> Result<usize, RagError> {
        check_embedding_count(chunks, embeddings)?;

        let mut indexed = 0;
        let mut failed = 0;

        for (chunk_batch, embedding_batch) in chunks
            .chunks(BULK_BATCH_SIZE)
            .zip(embeddings.chunks(BULK_BATCH_SIZE))
        {
            let body = self.bulk_body(chunk_batch, embedding_batch, id_prefix);
            let response = self
                .send_json(
                    self.request(Method::POST, "_bulk?refresh=wait_for")
                        .header("Content-Type", "application/x-ndjson")
                        .body(body),
                )
                .await?;

            let items = response
                .get("items")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default();

            for item in &items {
                match item.pointer("/index/error") {
                    Some(error) => {
                        failed += 1;
                        if failed <= 3 {
                            tracing::warn!("Bulk item failed: {}", error);
                        }
                    }
                    None => indexed += 1,
                }
            }
        }

        if failed > 0 {
            tracing::warn!("{} chunks failed to index", failed);
            return Err(ServiceFault::MalformedResponse(format!(
                "{failed} of {} bulk items failed",
                chunks.len()
            ))
            .into());
        }

        tracing::info!("Indexed {} chunks into '{}'", indexed, self.config.index_name);
        Ok(indexed)
    }

    async fn delete_by_file(&self, file_path: &str) -> Result<u64, ServiceFault> {
        let path = format!("{}/_delete_by_query?refresh=true", self.config.index_name);
        let body = json!({ "query": { "term": { "metadata.file_path": file_path } } });

        match self
            .send_json(self.request(Method::POST, &path).json(&body))
            .await
        {
            Ok(response) => Ok(response.get("deleted").and_then(|v| v.as_u64()).unwrap_or(0)),
            // 인덱스가 없으면 지울 것도 없음
            Err(ServiceFault::Status { status: 404, .. }) => Ok(0),
            Err(e) => Err(e),
        }
    }

    async fn delete_index(&self) -> Result<bool, ServiceFault> {
        let index = self.config.index_name.clone();
        match self.send_json(self.request(Method::DELETE, &index)).await {
            Ok(_) => {
                tracing::info!("Index '{}' deleted", index);
                Ok(true)
            }
            Err(ServiceFault::Status { status: 404, .. }) => {
                tracing::info!("Index '{}' does not exist", index);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn stats(&self) -> Result<IndexStats, ServiceFault> {
        let path = format!("{}/_stats", self.config.index_name);
        let response = self.send_json(self.request(Method::GET, &path)).await?;

        Ok(IndexStats {
            document_count: response
                .pointer("/_all/primaries/docs/count")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
            store_size_bytes: response
                .pointer("/_all/primaries/store/size_in_bytes")
                .and_then(|v| v.as_u64())
                .unwrap_or(0),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
