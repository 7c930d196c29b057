//! CLI 모듈
//!
//! pdf-rag CLI 명령어 정의 및 구현

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use crate::answer::AnswerWithSources;
use crate::collector::FileCollector;
use crate::config::{get_data_dir, RagConfig};
use crate::index::Filter;
use crate::pipeline::{ProcessOutcome, RagPipeline};

// ============================================================================
// CLI Definition
// ============================================================================

#[derive(Parser)]
#[command(name = "pdf-rag")]
#[command(version, about = "PDF 하이브리드 RAG 시스템", long_about = None)]
pub struct Cli {
    /// 설정 파일 경로 (기본: ~/.pdf-rag/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// 로그 레벨 (RUST_LOG가 있으면 그쪽이 우선)
    #[arg(long, global = true, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// 로그 파일 경로 (기본: ~/.pdf-rag/logs/rag_system_<시각>.log)
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// PDF 파일 또는 폴더를 인덱싱
    Process {
        /// 처리할 PDF 파일
        #[arg(long, conflicts_with = "dir", required_unless_present = "dir")]
        pdf: Option<PathBuf>,

        /// 처리할 폴더 (재귀)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// 변경이 없어도 다시 인덱싱
        #[arg(long)]
        force: bool,
    },

    /// 질문하기 (여러 개를 주면 결과를 RRF로 통합)
    Query {
        /// 질문
        #[arg(required = true)]
        query: Vec<String>,

        /// 리랭킹 후 결과 수
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// 리랭킹 전 검색 결과 수
        #[arg(long)]
        retrieval_k: Option<usize>,

        /// 파일명 필터
        #[arg(long)]
        file_name: Option<String>,

        /// JSON으로 출력
        #[arg(long)]
        json: bool,
    },

    /// 인덱스 연결 확인
    Test,

    /// 인덱스 생성
    Init,

    /// 인덱싱된 PDF 목록
    List,

    /// PDF 한 건의 청크 삭제
    Delete {
        /// 삭제할 PDF 경로
        #[arg(long)]
        pdf: PathBuf,
    },

    /// 인덱스 전체 삭제
    DeleteIndex {
        /// 확인 없이 삭제
        #[arg(short, long)]
        yes: bool,
    },

    /// 상태 확인
    Status,
}

// ============================================================================
// CLI Runner
// ============================================================================

/// CLI 명령어 실행
pub async fn run(cli: Cli) -> Result<()> {
    let config = RagConfig::load(cli.config.as_deref()).context("설정 로드 실패")?;
    let pipeline = RagPipeline::from_config(config).context("파이프라인 초기화 실패")?;

    match cli.command {
        Commands::Process { pdf, dir, force } => cmd_process(&pipeline, pdf, dir, force).await,
        Commands::Query {
            query,
            top_k,
            retrieval_k,
            file_name,
            json,
        } => cmd_query(&pipeline, &query, top_k, retrieval_k, file_name, json).await,
        Commands::Test => cmd_test(&pipeline).await,
        Commands::Init => cmd_init(&pipeline).await,
        Commands::List => cmd_list(&pipeline),
        Commands::Delete { pdf } => cmd_delete(&pipeline, pdf).await,
        Commands::DeleteIndex { yes } => cmd_delete_index(&pipeline, yes).await,
        Commands::Status => cmd_status(&pipeline).await,
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// PDF 처리 명령어 (process)
async fn cmd_process(
    pipeline: &RagPipeline,
    pdf: Option<PathBuf>,
    dir: Option<PathBuf>,
    force: bool,
) -> Result<()> {
    let collector = FileCollector::with_defaults();

    let files = if let Some(ref pdf_path) = pdf {
        match collector.collect_file(pdf_path)? {
            Some(f) => vec![f],
            None => {
                println!("[!] PDF 파일이 아닙니다: {}", pdf_path.display());
                return Ok(());
            }
        }
    } else if let Some(ref dir_path) = dir {
        collector.collect_directory(dir_path)?
    } else {
        bail!("--pdf 또는 --dir를 지정해야 합니다");
    };

    if files.is_empty() {
        println!("[!] 처리할 PDF가 없습니다.");
        return Ok(());
    }

    let total_size: u64 = files.iter().map(|f| f.size).sum();
    println!(
        "[*] 처리 대상: {} PDF ({})",
        files.len(),
        format_bytes(total_size as usize)
    );
    println!();

    let paths: Vec<PathBuf> = files.into_iter().map(|f| f.path).collect();
    let results = pipeline.process_documents(&paths, force).await;

    let mut indexed = 0;
    let mut skipped = 0;
    let mut failed = 0;

    for (path, outcome) in &results {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("unknown");

        match outcome {
            ProcessOutcome::Indexed { chunks } => {
                println!("[OK] {} ({} 청크)", name, chunks);
                indexed += 1;
            }
            ProcessOutcome::Skipped => {
                println!("[-] {} (변경 없음)", name);
                skipped += 1;
            }
            ProcessOutcome::Failed { reason } => {
                println!("[!] {}: {}", name, reason);
                failed += 1;
            }
        }
    }

    println!();
    println!(
        "[OK] 완료: 인덱싱 {}, 건너뜀 {}, 실패 {}",
        indexed, skipped, failed
    );

    if failed > 0 && indexed == 0 && skipped == 0 {
        bail!("모든 PDF 처리에 실패했습니다");
    }

    Ok(())
}

/// 질문 명령어 (query)
async fn cmd_query(
    pipeline: &RagPipeline,
    queries: &[String],
    top_k: Option<usize>,
    retrieval_k: Option<usize>,
    file_name: Option<String>,
    json: bool,
) -> Result<()> {
    let filters: Vec<Filter> = file_name
        .into_iter()
        .map(|name| Filter::term("metadata.file_name", name))
        .collect();

    let result = match queries {
        [] => bail!("질문을 입력해야 합니다"),
        [single] => {
            if !json {
                println!("[*] 질문: \"{}\"", single);
            }
            pipeline
                .query(single, retrieval_k, top_k, &filters)
                .await
                .context("질의 실패")?
        }
        many => {
            if !json {
                println!("[*] 질문 {} 개를 통합 검색합니다", many.len());
            }
            pipeline
                .query_multi(many, retrieval_k, top_k, &filters)
                .await
                .context("질의 실패")?
        }
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_answer(&result);
    }

    Ok(())
}

fn print_answer(result: &AnswerWithSources) {
    println!("\n[OK] 답변:\n");
    println!("{}", result.answer);

    if result.sources.is_empty() {
        return;
    }

    println!("\n[*] 출처 ({} 건):\n", result.num_sources);
    for (i, source) in result.sources.iter().enumerate() {
        let page = source
            .page_number
            .map(|p| format!("p.{}", p))
            .unwrap_or_else(|| "-".to_string());

        println!(
            "{}. {} ({}) [점수: {:.4}]",
            i + 1,
            source.file_name,
            page,
            source.score
        );
        println!("   {}", truncate_text(&source.text, 200));
        println!();
    }
}

/// 연결 확인 명령어 (test)
async fn cmd_test(pipeline: &RagPipeline) -> Result<()> {
    println!(
        "[*] 인덱스 연결 확인 중: {}",
        pipeline.config().elasticsearch.host
    );

    let version = pipeline
        .test_connection()
        .await
        .context("인덱스 연결 실패")?;
    println!("[OK] 연결 성공 ({})", version);

    Ok(())
}

/// 인덱스 생성 명령어 (init)
async fn cmd_init(pipeline: &RagPipeline) -> Result<()> {
    let index_name = &pipeline.config().elasticsearch.index_name;

    if pipeline
        .initialize_index()
        .await
        .context("인덱스 생성 실패")?
    {
        println!("[OK] 인덱스 생성됨: {}", index_name);
    } else {
        println!("[OK] 인덱스가 이미 존재합니다: {}", index_name);
    }

    Ok(())
}

/// 목록 명령어 (list)
fn cmd_list(pipeline: &RagPipeline) -> Result<()> {
    let records = pipeline.list_documents().context("목록 조회 실패")?;

    if records.is_empty() {
        println!("[!] 인덱싱된 PDF가 없습니다.");
        return Ok(());
    }

    println!("[OK] 인덱싱된 PDF ({} 건):\n", records.len());

    for record in records {
        println!("  {}", record.file_path);
        println!(
            "        {} | {} 청크 | {}",
            record.indexed_at.format("%Y-%m-%d %H:%M"),
            record.chunk_count,
            record.id_prefix()
        );
    }

    Ok(())
}

/// 삭제 명령어 (delete)
async fn cmd_delete(pipeline: &RagPipeline, pdf: PathBuf) -> Result<()> {
    let removed = pipeline
        .delete_document(&pdf)
        .await
        .context("문서 삭제 실패")?;

    if removed > 0 {
        println!("[OK] {} 청크 삭제됨: {}", removed, pdf.display());
    } else {
        println!("[!] 삭제할 청크가 없습니다: {}", pdf.display());
    }

    Ok(())
}

/// 인덱스 삭제 명령어 (delete-index)
async fn cmd_delete_index(pipeline: &RagPipeline, yes: bool) -> Result<()> {
    let index_name = &pipeline.config().elasticsearch.index_name;

    if !yes {
        println!(
            "[!] 인덱스 '{}'와 적재 기록이 모두 삭제됩니다. 계속하려면 --yes를 붙이세요.",
            index_name
        );
        return Ok(());
    }

    if pipeline.delete_index().await.context("인덱스 삭제 실패")? {
        println!("[OK] 인덱스 삭제됨: {}", index_name);
    } else {
        println!("[!] 인덱스가 존재하지 않습니다: {}", index_name);
    }

    Ok(())
}

/// 상태 명령어 (status)
async fn cmd_status(pipeline: &RagPipeline) -> Result<()> {
    let config = pipeline.config();

    println!("pdf-rag v{}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("[*] 데이터 디렉토리: {}", get_data_dir().display());
    println!(
        "[*] 인덱스: {} / {}",
        config.elasticsearch.host, config.elasticsearch.index_name
    );

    if config.embedding.url.is_empty() {
        println!("[!] 임베딩 서버: 미설정");
        println!("    설정: export EMBEDDING_URL=http://...");
    } else {
        println!(
            "[OK] 임베딩 서버: {} ({}, {}차원)",
            config.embedding.url, config.embedding.model, config.embedding.dimension
        );
    }

    if config.rerank.uses_external_model() {
        println!("[OK] 리랭커: {} ({})", config.rerank.url, config.rerank.model);
    } else {
        println!("[*] 리랭커: RRF");
    }

    if config.llm.api_url.is_empty() || config.llm.api_key.is_empty() {
        println!("[*] 답변 생성: 템플릿");
    } else {
        println!("[OK] 답변 생성: {}", config.llm.model);
    }

    match pipeline.stats().await {
        Ok(stats) => {
            println!(
                "[OK] 인덱스 문서: {} 청크 ({})",
                stats.index.document_count,
                format_bytes(stats.index.store_size_bytes as usize)
            );
            println!("[OK] 적재된 PDF: {} 건", stats.ingested_files);
        }
        Err(e) => {
            println!("[!] 통계 조회 실패: {:#}", e);
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// 텍스트 자르기 (UTF-8 안전)
fn truncate_text(text: &str, max_chars: usize) -> String {
    let cleaned = text.replace('\n', " ").replace('\r', "");
    let cleaned = cleaned.trim();

    if cleaned.chars().count() <= max_chars {
        cleaned.to_string()
    } else {
        let truncated: String = cleaned.chars().take(max_chars).collect();
        format!("{}...", truncated)
    }
}

/// 바이트 크기 포맷팅
fn format_bytes(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = KB * 1024;

    if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

// ============================================================================
// Tests
// ============================================================================
