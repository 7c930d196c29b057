//! pdf-rag CLI 진입점

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pdf_rag::cli::{run, Cli};
use pdf_rag::config::get_data_dir;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // 로깅 초기화 (콘솔 + 파일)
    init_logging(&cli)?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run(cli))
}

fn init_logging(cli: &Cli) -> Result<()> {
    let log_path = cli.log_file.clone().unwrap_or_else(default_log_path);

    if let Some(parent) = log_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create log directory: {:?}", parent))?;
    }

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("Failed to open log file: {:?}", log_path))?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.log_level.as_str()));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        .init();

    Ok(())
}

fn default_log_path() -> PathBuf {
    get_data_dir().join("logs").join(format!(
        "rag_system_{}.log",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    ))
}
