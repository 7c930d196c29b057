//! 파일 수집 모듈
//!
//! 로컬 PDF 파일 및 폴더를 수집하여 인덱싱 대상으로 넘깁니다.
//! .gitignore 패턴을 존중하고, `.pdf` 확장자만 수집합니다.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ignore::WalkBuilder;

/// PDF 확장자인지 확인 (대소문자 무시)
pub fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.eq_ignore_ascii_case("pdf"))
        .unwrap_or(false)
}

// ============================================================================
// Collected File
// ============================================================================

/// 수집된 PDF 파일 정보
#[derive(Debug, Clone)]
pub struct CollectedFile {
    /// 파일 절대 경로
    pub path: PathBuf,
    /// 파일 크기 (바이트)
    pub size: u64,
}

impl CollectedFile {
    /// 파일에서 CollectedFile 생성 (PDF가 아니면 None)
    pub fn from_path(path: PathBuf) -> Result<Option<Self>> {
        if !is_pdf(&path) {
            return Ok(None);
        }

        let metadata = std::fs::metadata(&path)
            .with_context(|| format!("Failed to read metadata: {:?}", path))?;

        if !metadata.is_file() {
            return Ok(None);
        }

        Ok(Some(Self {
            path,
            size: metadata.len(),
        }))
    }
}

// ============================================================================
// File Collector
// ============================================================================

/// 파일 수집기 설정
#[derive(Debug, Clone)]
pub struct CollectorConfig {
    /// .gitignore 패턴 존중 여부
    pub respect_gitignore: bool,
    /// 숨김 파일 포함 여부
    pub include_hidden: bool,
    /// 최대 파일 크기 (바이트, 0이면 제한 없음)
    pub max_file_size: u64,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            respect_gitignore: true,
            include_hidden: false,
            max_file_size: 200 * 1024 * 1024, // 200MB
        }
    }
}

/// PDF 수집기
pub struct FileCollector {
    config: CollectorConfig,
}

impl FileCollector {
    /// 새 수집기 생성
    pub fn new(config: CollectorConfig) -> Self {
        Self { config }
    }

    /// 기본 설정으로 수집기 생성
    pub fn with_defaults() -> Self {
        Self::new(CollectorConfig::default())
    }

    /// 단일 파일 수집 (크기 제한을 넘거나 PDF가 아니면 None)
    pub fn collect_file(&self, path: &Path) -> Result<Option<CollectedFile>> {
        let pdf = std::fs::canonicalize(path)
            .with_context(|| format!("PDF file not found: {}", path.display()))?;
        if !pdf.is_file() {
            anyhow::bail!("{} is not a regular file", pdf.display());
        }

        Ok(CollectedFile::from_path(pdf)?.filter(|f| self.within_limit(f)))
    }

    /// 폴더 재귀 수집 (경로순 정렬)
    pub fn collect_directory(&self, path: &Path) -> Result<Vec<CollectedFile>> {
        let root = std::fs::canonicalize(path)
            .with_context(|| format!("Directory not found: {}", path.display()))?;
        if !root.is_dir() {
            anyhow::bail!("{} is not a directory", root.display());
        }

        let use_ignore = self.config.respect_gitignore;
        let walker = WalkBuilder::new(&root)
            .hidden(!self.config.include_hidden)
            .git_ignore(use_ignore)
            .git_global(use_ignore)
            .git_exclude(use_ignore)
            // git 저장소 밖에서도 .gitignore 적용
            .require_git(false)
            .build();

        let mut files: Vec<CollectedFile> = walker
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .filter_map(|entry| match CollectedFile::from_path(entry.into_path()) {
                Ok(file) => file,
                Err(e) => {
                    tracing::warn!("Skipping PDF: {:#}", e);
                    None
                }
            })
            .filter(|file| self.within_limit(file))
            .collect();

        files.sort_by(|a, b| a.path.cmp(&b.path));
        tracing::info!("Found {} PDF files under {}", files.len(), root.display());
        Ok(files)
    }

    fn within_limit(&self, file: &CollectedFile) -> bool {
        let limit = self.config.max_file_size;
        if limit > 0 && file.size > limit {
            tracing::warn!(
                "Skipping {} ({} bytes exceeds {} byte limit)",
                file.path.display(),
                file.size,
                limit
            );
            return false;
        }
        true
    }
}

// ============================================================================
// Tests
// ============================================================================
