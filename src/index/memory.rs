//! 메모리 인덱스 - 프로세스 내 검색 백엔드
//!
//! Elasticsearch 쿼리와 같은 스코어링 규칙을 로컬에서 평가합니다:
//! - lexical: BM25 (k1=1.2, b=0.75)
//! - vector: 코사인 유사도 + 1.0 (NaN/무한대 → 0.0)
//! - hybrid: 매치된 절들의 가중합
//!
//! 클러스터 없이 파이프라인을 돌리거나 테스트할 때 사용합니다.

use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{
    check_embedding_count, vector_score, DocumentIndex, Filter, IndexHit, IndexQuery, IndexStats,
    QueryMode, SearchBackend,
};
use crate::error::{RagError, ServiceFault};
use crate::knowledge::Chunk;

const BM25_K1: f64 = 1.2;
const BM25_B: f64 = 0.75;

/// 저장된 문서
#[derive(Debug, Clone)]
struct StoredDoc {
    id: String,
    source: Value,
    tokens: Vec<String>,
    embedding: Vec<f32>,
}

/// 메모리 인덱스
#[derive(Debug, Default)]
pub struct MemoryIndex {
    docs: RwLock<Vec<StoredDoc>>,
}

impl MemoryIndex {
    /// 빈 인덱스 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 문서 하나를 직접 추가 (같은 ID는 교체)
    pub fn insert(&self, id: &str, source: Value, embedding: Vec<f32>) -> Result<(), ServiceFault> {
        let text = source.get("text").and_then(|v| v.as_str()).unwrap_or("");
        let doc = StoredDoc {
            id: id.to_string(),
            tokens: tokenize(text),
            source,
            embedding,
        };

        let mut docs = self
            .docs
            .write()
            .map_err(|e| ServiceFault::Transport(format!("Lock error: {}", e)))?;

        match docs.iter_mut().find(|d| d.id == doc.id) {
            Some(existing) => *existing = doc,
            None => docs.push(doc),
        }
        Ok(())
    }

    /// 저장된 문서 수
    pub fn len(&self) -> usize {
        self.docs.read().map(|d| d.len()).unwrap_or(0)
    }

    /// 비어 있는지
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl SearchBackend for MemoryIndex {
    async fn execute(&self, query: &IndexQuery) -> Result<Vec<IndexHit>, ServiceFault> {
        let docs = self
            .docs
            .read()
            .map_err(|e| ServiceFault::Transport(format!("Lock error: {}", e)))?;

        let candidates: Vec<&StoredDoc> = docs
            .iter()
            .filter(|d| query.filters.iter().all(|f| matches_filter(&d.source, f)))
            .collect();

        let bm25 = match &query.mode {
            QueryMode::Hybrid { text, .. } | QueryMode::Lexical { text } => {
                Some(Bm25::new(&docs, &tokenize(text)))
            }
            QueryMode::Vector { .. } => None,
        };

        let mut scored: Vec<(f64, &StoredDoc)> = candidates
            .into_iter()
            .filter_map(|doc| {
                let lexical = bm25.as_ref().map(|b| b.score(&doc.tokens)).unwrap_or(0.0);
                let score = match &query.mode {
                    QueryMode::Hybrid { embedding, .. } => {
                        let vector = vector_score(embedding, &doc.embedding);
                        query.lexical_weight * lexical + query.vector_weight * vector
                    }
                    // match 절에 걸리지 않은 문서는 결과에서 제외
                    QueryMode::Lexical { .. } if lexical <= 0.0 => return None,
                    QueryMode::Lexical { .. } => lexical,
                    QueryMode::Vector { embedding } => vector_score(embedding, &doc.embedding),
                };
                Some((score, doc))
            })
            .filter(|(score, _)| query.min_score.map_or(true, |min| *score >= min))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(query.size);

        Ok(scored
            .into_iter()
            .map(|(score, doc)| IndexHit {
                id: Some(doc.id.clone()),
                score: Some(score),
                source: doc.source.clone(),
            })
            .collect())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[async_trait]
impl DocumentIndex for MemoryIndex {
    async fn ping(&self) -> Result<String, ServiceFault> {
        Ok(format!("memory ({} docs)", self.len()))
    }

    async fn ensure_index(&self, _dimension: usize) -> Result<bool, ServiceFault> {
        Ok(false)
    }

    async fn index_chunks(
        &self,
        chunks: &[Chunk],
        embeddings: &[Vec<f32>],
        id_prefix: &str,
    ) -> Result<usize, RagError> {
        check_embedding_count(chunks, embeddings)?;

        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            let source = json!({
                "text": chunk.text,
                "chunk_id": chunk.chunk_id,
                "metadata": chunk.metadata,
            });
            self.insert(
                &format!("{}-{}", id_prefix, chunk.chunk_id),
                source,
                embedding.clone(),
            )?;
        }

        Ok(chunks.len())
    }

    async fn delete_by_file(&self, file_path: &str) -> Result<u64, ServiceFault> {
        let mut docs = self
            .docs
            .write()
            .map_err(|e| ServiceFault::Transport(format!("Lock error: {}", e)))?;

        let before = docs.len();
        docs.retain(|d| {
            d.source.pointer("/metadata/file_path").and_then(|v| v.as_str()) != Some(file_path)
        });
        Ok((before - docs.len()) as u64)
    }

    async fn delete_index(&self) -> Result<bool, ServiceFault> {
        let mut docs = self
            .docs
            .write()
            .map_err(|e| ServiceFault::Transport(format!("Lock error: {}", e)))?;
        let existed = !docs.is_empty();
        docs.clear();
        Ok(existed)
    }

    async fn stats(&self) -> Result<IndexStats, ServiceFault> {
        let docs = self
            .docs
            .read()
            .map_err(|e| ServiceFault::Transport(format!("Lock error: {}", e)))?;

        Ok(IndexStats {
            document_count: docs.len() as u64,
            store_size_bytes: docs.iter().map(|d| d.source.to_string().len() as u64).sum(),
        })
    }
}

// ============================================================================
// BM25
// ============================================================================

/// 쿼리 하나에 대한 BM25 스코어러
struct Bm25 {
    /// (term, idf)
    terms: Vec<(String, f64)>,
    avg_len: f64,
}

impl Bm25 {
    fn new(docs: &[StoredDoc], query_terms: &[String]) -> Self {
        let n = docs.len() as f64;
        let avg_len = if docs.is_empty() {
            0.0
        } else {
            docs.iter().map(|d| d.tokens.len()).sum::<usize>() as f64 / n
        };

        let mut terms: Vec<(String, f64)> = Vec::new();
        for term in query_terms {
            if terms.iter().any(|(t, _)| t == term) {
                continue;
            }
            let df = docs.iter().filter(|d| d.tokens.contains(term)).count() as f64;
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
            terms.push((term.clone(), idf));
        }

        Self { terms, avg_len }
    }

    fn score(&self, tokens: &[String]) -> f64 {
        if tokens.is_empty() || self.avg_len == 0.0 {
            return 0.0;
        }
        let len = tokens.len() as f64;

        self.terms
            .iter()
            .map(|(term, idf)| {
                let tf = tokens.iter().filter(|t| *t == term).count() as f64;
                if tf == 0.0 {
                    return 0.0;
                }
                let norm = BM25_K1 * (1.0 - BM25_B + BM25_B * len / self.avg_len);
                idf * tf * (BM25_K1 + 1.0) / (tf + norm)
            })
            .sum()
    }
}

/// 소문자 영숫자 토큰 분리 (standard analyzer 근사)
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

// ============================================================================
// Filters
// ============================================================================

/// 점(.)으로 구분된 필드 경로 조회 (예: metadata.file_name)
fn lookup<'a>(source: &'a Value, field: &str) -> Option<&'a Value> {
    field
        .split('.')
        .try_fold(source, |value, key| value.get(key))
}

fn matches_filter(source: &Value, filter: &Filter) -> bool {
    match filter {
        Filter::Term { field, value } => match (lookup(source, field), value) {
            (Some(Value::Number(a)), Value::Number(b)) => a.as_f64() == b.as_f64(),
            (Some(actual), expected) => actual == expected,
            (None, _) => false,
        },
        Filter::Range { field, gte, lte } => {
            let Some(actual) = lookup(source, field).and_then(|v| v.as_f64()) else {
                return false;
            };
            gte.map_or(true, |g| actual >= g) && lte.map_or(true, |l| actual <= l)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(id: i64, text: &str, file: &str, page: i64) -> Chunk {
        let mut c = Chunk::new(id, text);
        c.metadata.insert("file_name".to_string(), json!(file));
        c.metadata.insert("file_path".to_string(), json!(format!("/docs/{file}")));
        c.metadata.insert("page_number".to_string(), json!(page));
        c
    }

    async fn seeded() -> MemoryIndex {
        let index = MemoryIndex::new();
        let chunks = vec![
            chunk(0, "the warranty period is two years", "a.pdf", 1),
            chunk(1, "battery replacement instructions", "a.pdf", 2),
            chunk(2, "warranty claims require a receipt", "b.pdf", 1),
        ];
        let embeddings = vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.7, 0.7]];
        index.index_chunks(&chunks, &embeddings, "doc").await.unwrap();
        index
    }

    fn query(mode: QueryMode) -> IndexQuery {
        IndexQuery {
            mode,
            lexical_weight: 0.3,
            vector_weight: 0.7,
            size: 10,
            min_score: Some(0.1),
            filters: vec![],
        }
    }

    #[tokio::test]
    async fn test_lexical_only_matches_terms() {
        let index = seeded().await;
        let mut q = query(QueryMode::Lexical {
            text: "warranty".to_string(),
        });
        q.min_score = None;

        let hits = index.execute(&q).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|h| h.source["text"]
            .as_str()
            .unwrap()
            .contains("warranty")));
    }

    #[tokio::test]
    async fn test_hybrid_is_weighted_sum() {
        let index = seeded().await;
        let hits = index
            .execute(&query(QueryMode::Hybrid {
                text: "battery".to_string(),
                embedding: vec![0.0, 1.0],
            }))
            .await
            .unwrap();

        // 벡터 절은 match_all이므로 모든 문서가 점수를 가짐
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].id.as_deref(), Some("doc-1"));
        // doc-0: lexical 0 + 0.7 * (0 + 1.0)
        let doc0 = hits.iter().find(|h| h.id.as_deref() == Some("doc-0")).unwrap();
        assert!((doc0.score.unwrap() - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_filters_are_conjunctive() {
        let index = seeded().await;
        let mut q = query(QueryMode::Vector {
            embedding: vec![1.0, 0.0],
        });
        q.filters = vec![
            Filter::term("metadata.file_name", "a.pdf"),
            Filter::range("metadata.page_number", Some(2.0), None),
        ];

        let hits = index.execute(&q).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.as_deref(), Some("doc-1"));
    }

    #[tokio::test]
    async fn test_degenerate_embedding_scores_zero() {
        let index = seeded().await;
        let mut q = query(QueryMode::Vector {
            embedding: vec![0.0, 0.0],
        });
        q.min_score = None;

        let hits = index.execute(&q).await.unwrap();
        assert!(hits.iter().all(|h| h.score == Some(0.0)));
    }

    #[tokio::test]
    async fn test_delete_by_file_and_reindex_replaces() {
        let index = seeded().await;
        assert_eq!(index.delete_by_file("/docs/a.pdf").await.unwrap(), 2);
        assert_eq!(index.len(), 1);

        index
            .index_chunks(&[chunk(2, "replaced", "b.pdf", 1)], &[vec![1.0, 0.0]], "doc")
            .await
            .unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(tokenize("Hello, World! x2"), vec!["hello", "world", "x2"]);
        assert!(tokenize("  ...  ").is_empty());
    }
}
