//! PDF 텍스트 추출 모듈
//!
//! pdf-extract 크레이트를 사용하여 PDF에서 텍스트를 추출합니다.

use std::path::Path;

use anyhow::{Context, Result};
use regex::Regex;

/// 페이지 구분선 패턴 (예: "--- Page 3 ---", "=== 12 ===")
const PAGE_MARKER_PATTERN: &str = r"(?m)^[\s]*[-=]+[\s]*(?:Page[\s]*)?(\d+)[\s]*[-=]+[\s]*$";

/// PDF에서 페이지별 텍스트 추출
///
/// 텍스트가 전혀 없으면 (스캔 문서 등) 빈 페이지 하나를 반환합니다.
pub fn extract_pages(path: &Path) -> Result<Vec<String>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read PDF: {:?}", path))?;

    let text = pdf_extract::extract_text_from_mem(&bytes)
        .with_context(|| format!("Failed to extract text from PDF: {:?}", path))?;

    if text.trim().is_empty() {
        tracing::warn!(
            "No text extracted from PDF: {:?}. It might be a scanned document.",
            path
        );
        return Ok(vec![String::new()]);
    }

    split_pdf_pages(&text)
}

/// PDF 텍스트를 페이지별로 분리
///
/// 폼피드 → 페이지 구분선 순으로 시도하고, 둘 다 실패하면 전체를 한 페이지로 봅니다.
fn split_pdf_pages(text: &str) -> Result<Vec<String>> {
    let pages = non_empty_trimmed(text.split('\x0c'));
    if pages.len() > 1 {
        return Ok(pages);
    }

    let marker = Regex::new(PAGE_MARKER_PATTERN).context("Invalid page marker pattern")?;
    if marker.is_match(text) {
        let pages = non_empty_trimmed(marker.split(text));
        if pages.len() > 1 {
            return Ok(pages);
        }
    }

    Ok(vec![text.trim().to_string()])
}

fn non_empty_trimmed<'a>(parts: impl Iterator<Item = &'a str>) -> Vec<String> {
    parts
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
