//! Ingest Ledger - rusqlite 기반 적재 기록
//!
//! 어떤 PDF가 어떤 내용(sha256)으로 몇 개의 청크로 적재됐는지 기록합니다.
//! `process`는 해시가 같은 파일을 건너뜁니다 (`--force` 제외).
//! 저장 위치: ~/.pdf-rag/ingest.db

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::config::get_data_dir;

/// 적재 기록 한 건
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestRecord {
    pub file_path: String,
    pub sha256: String,
    pub chunk_count: usize,
    pub indexed_at: DateTime<Utc>,
}

impl IngestRecord {
    /// 인덱스 문서 ID 접두사 (해시 앞 16자)
    pub fn id_prefix(&self) -> &str {
        id_prefix(&self.sha256)
    }
}

/// 해시에서 문서 ID 접두사 추출
pub fn id_prefix(sha256: &str) -> &str {
    &sha256[..sha256.len().min(16)]
}

/// 파일 내용의 sha256 (hex)
pub fn file_sha256(path: &Path) -> Result<String> {
    let mut file =
        std::fs::File::open(path).with_context(|| format!("Failed to open file: {:?}", path))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];

    loop {
        let n = file
            .read(&mut buf)
            .with_context(|| format!("Failed to read file: {:?}", path))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// IngestLedger
// ============================================================================

/// 적재 기록 저장소
pub struct IngestLedger {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl IngestLedger {
    /// 저장소 열기 (없으면 생성)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS ingested_files (
                file_path TEXT PRIMARY KEY,
                sha256 TEXT NOT NULL,
                chunk_count INTEGER NOT NULL,
                indexed_at TEXT NOT NULL
            )",
            [],
        )
        .context("Failed to create ingested_files table")?;

        tracing::debug!("Ingest ledger initialized at {:?}", path);

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        })
    }

    /// 기본 위치에서 열기 (~/.pdf-rag/ingest.db)
    pub fn open_default() -> Result<Self> {
        Self::open(&get_data_dir().join("ingest.db"))
    }

    /// DB 경로 반환
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| anyhow::anyhow!("Lock error: {}", e))
    }

    /// 기록 조회
    pub fn get(&self, file_path: &str) -> Result<Option<IngestRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT file_path, sha256, chunk_count, indexed_at FROM ingested_files
             WHERE file_path = ?1",
            params![file_path],
            row_to_record,
        )
        .optional()
        .context("Failed to query ingest record")
    }

    /// 같은 내용으로 이미 적재되었는지
    pub fn is_current(&self, file_path: &str, sha256: &str) -> Result<bool> {
        Ok(self
            .get(file_path)?
            .map(|r| r.sha256 == sha256)
            .unwrap_or(false))
    }

    /// 적재 기록 (같은 경로는 교체)
    pub fn record(&self, file_path: &str, sha256: &str, chunk_count: usize) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO ingested_files (file_path, sha256, chunk_count, indexed_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![file_path, sha256, chunk_count as i64, Utc::now().to_rfc3339()],
        )
        .context("Failed to insert ingest record")?;

        tracing::info!("Recorded {} ({} chunks)", file_path, chunk_count);
        Ok(())
    }

    /// 기록 삭제
    pub fn remove(&self, file_path: &str) -> Result<bool> {
        let conn = self.lock()?;
        let rows = conn.execute(
            "DELETE FROM ingested_files WHERE file_path = ?1",
            params![file_path],
        )?;
        Ok(rows > 0)
    }

    /// 전체 기록 삭제 (인덱스 삭제 시)
    pub fn clear(&self) -> Result<usize> {
        let conn = self.lock()?;
        Ok(conn.execute("DELETE FROM ingested_files", [])?)
    }

    /// 기록 목록 (최근 순)
    pub fn list(&self) -> Result<Vec<IngestRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT file_path, sha256, chunk_count, indexed_at FROM ingested_files
             ORDER BY indexed_at DESC, file_path",
        )?;

        let records = stmt
            .query_map([], row_to_record)?
            .filter_map(|r| r.ok())
            .collect();

        Ok(records)
    }

    /// 기록 수
    pub fn count(&self) -> Result<usize> {
        let conn = self.lock()?;
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM ingested_files", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<IngestRecord> {
    Ok(IngestRecord {
        file_path: row.get(0)?,
        sha256: row.get(1)?,
        chunk_count: row.get::<_, i64>(2)? as usize,
        indexed_at: parse_datetime(row.get::<_, String>(3)?),
    })
}

/// RFC3339 문자열을 DateTime<Utc>로 파싱
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================
