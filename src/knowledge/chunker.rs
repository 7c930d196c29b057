//! Text Chunking Module
//!
//! 토큰 수 기준 재귀 분할을 제공합니다.
//! 큰 구분자(문단)부터 작은 구분자(문자)까지 차례로 시도하여
//! `chunk_size` 토큰 이하의 조각을 만들고, 이웃 청크 사이에 `chunk_overlap` 토큰을 겹칩니다.

use std::collections::VecDeque;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::Metadata;
use crate::config::ChunkingConfig;
use crate::extractor::Page;

/// 기본 구분자 (우선순위 순)
pub const DEFAULT_SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// 단어 덩어리 또는 개별 구두점
const TOKEN_PATTERN: &str = r"\w+|[^\w\s]";

// ============================================================================
// Chunk
// ============================================================================

/// 인덱싱 단위 청크
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    /// 문서 내 순번 (0부터)
    pub chunk_id: i64,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Chunk {
    pub fn new(chunk_id: i64, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            chunk_id,
            metadata: Metadata::new(),
        }
    }
}

// ============================================================================
// Token Counting
// ============================================================================

/// 토큰 수 계산 트레이트
pub trait TokenCounter: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

/// 정규식 기반 토큰 카운터
///
/// 단어 덩어리와 구두점을 각각 토큰 하나로 셉니다.
/// BPE 어휘 없이 GPT 계열 토큰 수를 근사합니다.
pub struct RegexTokenCounter {
    pattern: Regex,
}

impl RegexTokenCounter {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(TOKEN_PATTERN)?,
        })
    }
}

impl TokenCounter for RegexTokenCounter {
    fn count(&self, text: &str) -> usize {
        self.pattern.find_iter(text).count()
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// 텍스트 청킹 전략 트레이트
pub trait Chunker: Send + Sync {
    /// 텍스트를 청크로 분할
    fn chunk(&self, text: &str) -> Vec<String>;

    /// 청커 이름
    fn name(&self) -> &'static str;
}

// ============================================================================
// RecursiveSplitter
// ============================================================================

/// 재귀 구분자 분할기
pub struct RecursiveSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
    counter: Box<dyn TokenCounter>,
}

impl RecursiveSplitter {
    /// 토큰 카운터를 지정하여 생성
    pub fn new(chunk_size: usize, chunk_overlap: usize, counter: Box<dyn TokenCounter>) -> Self {
        Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
            counter,
        }
    }

    /// 설정에서 생성 (정규식 토큰 카운터 사용)
    pub fn from_config(config: &ChunkingConfig) -> anyhow::Result<Self> {
        Ok(Self::new(
            config.chunk_size,
            config.chunk_overlap,
            Box::new(RegexTokenCounter::new()?),
        ))
    }

    /// 구분자 목록 교체
    pub fn with_separators(mut self, separators: &[&str]) -> Self {
        self.separators = separators.iter().map(|s| s.to_string()).collect();
        self
    }

    /// 토큰 수
    pub fn count_tokens(&self, text: &str) -> usize {
        self.counter.count(text)
    }

    /// 페이지들을 하나로 이어 붙여 청크로 분할
    ///
    /// 파일 단위 메타데이터는 첫 페이지에서 가져오고,
    /// `page_number`는 청크가 시작하는 페이지로 설정합니다.
    pub fn chunk_pages(&self, pages: &[Page]) -> Vec<Chunk> {
        let Some(first) = pages.first() else {
            warn!("No pages provided for chunking");
            return vec![];
        };

        let mut combined = String::new();
        let mut page_starts: Vec<(usize, usize)> = Vec::with_capacity(pages.len());
        for (i, page) in pages.iter().enumerate() {
            if i > 0 {
                combined.push_str("\n\n");
            }
            page_starts.push((combined.len(), page.number));
            combined.push_str(&page.text);
        }

        info!(
            "Starting chunking: {} pages, {} tokens (size={}, overlap={})",
            pages.len(),
            self.count_tokens(&combined),
            self.chunk_size,
            self.chunk_overlap
        );

        let mut cursor = 0;
        let chunks: Vec<Chunk> = self
            .chunk(&combined)
            .into_iter()
            .enumerate()
            .map(|(i, text)| {
                let start = match combined[cursor..].find(&text) {
                    Some(offset) => cursor + offset,
                    None => cursor,
                };
                cursor = next_char_boundary(&combined, start);

                let page_number = page_starts
                    .iter()
                    .take_while(|(offset, _)| *offset <= start)
                    .last()
                    .map(|(_, number)| *number)
                    .unwrap_or(first.number);

                let chunk_id = i as i64;
                let mut metadata = first.metadata.clone();
                metadata.insert("page_number".to_string(), json!(page_number));
                metadata.insert("chunk_id".to_string(), json!(chunk_id));

                Chunk {
                    text,
                    chunk_id,
                    metadata,
                }
            })
            .collect();

        if !chunks.is_empty() {
            let sizes: Vec<usize> = chunks.iter().map(|c| self.count_tokens(&c.text)).collect();
            info!(
                "Created {} chunks from {} pages (avg {:.1} tokens, max {})",
                chunks.len(),
                pages.len(),
                sizes.iter().sum::<usize>() as f64 / sizes.len() as f64,
                sizes.iter().max().copied().unwrap_or(0)
            );
        }

        chunks
    }

    /// 구분자 목록을 따라 재귀 분할
    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        // 텍스트에 존재하는 첫 구분자 선택 ("" 는 항상 선택됨)
        let mut separator = "";
        let mut remaining: &[String] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() || text.contains(sep.as_str()) {
                separator = sep;
                remaining = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut fitting: Vec<String> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if self.count_tokens(&piece) <= self.chunk_size {
                fitting.push(piece);
                continue;
            }

            if !fitting.is_empty() {
                chunks.extend(self.merge(&fitting));
                fitting.clear();
            }

            if separator.is_empty() || remaining.is_empty() {
                chunks.push(piece);
            } else {
                chunks.extend(self.split_recursive(&piece, remaining));
            }
        }

        if !fitting.is_empty() {
            chunks.extend(self.merge(&fitting));
        }

        chunks
    }

    /// 작은 조각들을 chunk_size 이하로 병합 (overlap 유지)
    fn merge(&self, pieces: &[String]) -> Vec<String> {
        let mut merged = Vec::new();
        let mut window: VecDeque<(&str, usize)> = VecDeque::new();
        let mut total = 0;

        for piece in pieces {
            let len = self.count_tokens(piece);

            if total + len > self.chunk_size && !window.is_empty() {
                if total > self.chunk_size {
                    debug!(
                        "Created a chunk of {} tokens, longer than {}",
                        total, self.chunk_size
                    );
                }
                push_joined(&mut merged, &window);

                // overlap 이하가 되고 다음 조각이 들어갈 때까지 앞에서 제거
                while total > self.chunk_overlap
                    || (total + len > self.chunk_size && total > 0)
                {
                    match window.pop_front() {
                        Some((_, front_len)) => total -= front_len,
                        None => break,
                    }
                }
            }

            window.push_back((piece, len));
            total += len;
        }

        push_joined(&mut merged, &window);
        merged
    }
}

impl Chunker for RecursiveSplitter {
    fn chunk(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return vec![];
        }
        self.split_recursive(text, &self.separators)
    }

    fn name(&self) -> &'static str {
        "RecursiveSplitter"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 구분자로 분할하되 구분자를 다음 조각 앞에 유지
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }

    let mut pieces = Vec::new();
    for (i, part) in text.split(separator).enumerate() {
        let piece = if i == 0 {
            part.to_string()
        } else {
            format!("{separator}{part}")
        };
        if !piece.is_empty() {
            pieces.push(piece);
        }
    }
    pieces
}

/// 윈도우 조각을 이어 붙여 공백 제거 후 추가
fn push_joined(out: &mut Vec<String>, window: &VecDeque<(&str, usize)>) {
    let joined: String = window.iter().map(|(s, _)| *s).collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

/// 다음 UTF-8 문자 경계
fn next_char_boundary(s: &str, index: usize) -> usize {
    let mut i = (index + 1).min(s.len());
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

// ============================================================================
// Tests
// ============================================================================
