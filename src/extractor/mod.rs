//! PDF 페이지 로딩 모듈
//!
//! PDF를 페이지 단위로 읽고 파일 메타데이터를 붙입니다.
//! 청킹은 `knowledge::RecursiveSplitter`가 담당합니다.

pub mod pdf;

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::json;

use crate::knowledge::Metadata;

// ============================================================================
// Page
// ============================================================================

/// PDF 한 페이지
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    /// 페이지 번호 (1부터 시작)
    pub number: usize,
    /// 페이지 텍스트
    pub text: String,
    /// file_name, file_path, page_number, total_pages, title
    pub metadata: Metadata,
}

impl Page {
    /// 메타데이터 없이 생성 (테스트/직접 입력용)
    pub fn new(number: usize, text: impl Into<String>) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert("page_number".to_string(), json!(number));
        Self {
            number,
            text: text.into(),
            metadata,
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

/// PDF 파일을 페이지 목록으로 로드
///
/// PDF 추출은 CPU 바운드이므로 blocking 스레드에서 실행합니다.
pub async fn load_pages(path: &Path) -> Result<Vec<Page>> {
    if !path.exists() {
        bail!("PDF file not found: {}", path.display());
    }

    let owned = path.to_path_buf();
    let texts = tokio::task::spawn_blocking(move || pdf::extract_pages(&owned))
        .await
        .context("PDF extraction task failed")??;

    Ok(build_pages(path, texts))
}

/// 페이지 텍스트에 파일 메타데이터 부착
fn build_pages(path: &Path, texts: Vec<String>) -> Vec<Page> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let title = path
        .file_stem()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let file_path = path.to_string_lossy().to_string();
    let total_pages = texts.len();

    texts
        .into_iter()
        .enumerate()
        .map(|(i, text)| {
            let mut page = Page::new(i + 1, text);
            page.metadata.insert("file_name".to_string(), json!(file_name));
            page.metadata.insert("file_path".to_string(), json!(file_path));
            page.metadata.insert("total_pages".to_string(), json!(total_pages));
            page.metadata.insert("title".to_string(), json!(title));
            page
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
