//! Archive ingestion command
//!
//! Run with: cargo run -p archive-ingest -- <PATH> [--recursive]

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use archive_ingest::config::{IngestConfig, LoggingConfig, StoreBackend};
use archive_ingest::types::BatchResult;
use archive_ingest::{discover_archives, storage, ArchiveReport, BatchContext, PipelineOrchestrator};
use clap::{Parser, ValueEnum};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

const MIB: u64 = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Load the files inside ZIP archives into a document store
#[derive(Debug, Parser)]
#[command(name = "archive-ingest", version, about)]
struct Args {
    /// Archive file, or directory of archives
    path: PathBuf,

    /// Search the directory recursively
    #[arg(short, long)]
    recursive: bool,

    /// TOML configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// MongoDB connection string
    #[arg(long)]
    uri: Option<String>,

    /// Target database
    #[arg(long, value_name = "NAME")]
    database: Option<String>,

    /// Target collection
    #[arg(long, value_name = "NAME")]
    collection: Option<String>,

    /// Root directory for temporary extraction areas
    #[arg(long, value_name = "DIR")]
    temp_root: Option<PathBuf>,

    /// Skip files larger than this many MiB
    #[arg(long, value_name = "N")]
    max_file_size_mb: Option<u64>,

    /// Documents per insert-many call
    #[arg(long, value_name = "N")]
    chunk_size: Option<usize>,

    /// Archives processed concurrently
    #[arg(long, value_name = "N")]
    parallel: Option<usize>,

    /// Batch id stamped on every record (generated when omitted)
    #[arg(long, value_name = "ID")]
    batch_id: Option<String>,

    /// Use the in-memory store; nothing is persisted
    #[arg(long)]
    dry_run: bool,

    /// Summary format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,

    /// Also write logs to this file
    #[arg(long, value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Log level for this crate (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

impl Args {
    fn apply(&self, config: &mut IngestConfig) -> archive_ingest::Result<()> {
        if let Some(uri) = &self.uri {
            config.store.uri = Some(uri.clone());
        }
        if let Some(database) = &self.database {
            config.store.database = database.clone();
        }
        if let Some(collection) = &self.collection {
            config.store.collection = collection.clone();
        }
        if let Some(dir) = &self.temp_root {
            config.extraction.temp_root = dir.clone();
        }
        if let Some(mb) = self.max_file_size_mb {
            config.extraction.set_max_file_size_mb(mb)?;
        }
        if let Some(n) = self.chunk_size {
            config.store.chunk_size = n;
        }
        if let Some(n) = self.parallel {
            config.processing.parallel_archives = n;
        }
        if let Some(file) = &self.log_file {
            config.logging.file = Some(file.clone());
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.to_lowercase();
        }
        if self.recursive {
            config.processing.recursive = true;
        }
        if self.dry_run {
            config.store.backend = StoreBackend::Memory;
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Run aborted: {:#}", e);
            eprintln!("{} {:#}", style("error:").red().bold(), e);
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    check_dotenv(dotenvy::dotenv())?;

    let mut config = IngestConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config)?;
    config.validate()?;

    let _log_guard = init_tracing(&config.logging)?;

    tracing::info!("archive-ingest {} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!("  - Store: {:?}", config.store.backend);
    tracing::info!("  - Target: {}.{}", config.store.database, config.store.collection);
    tracing::info!("  - Temp root: {}", config.extraction.temp_root.display());
    tracing::info!("  - Max file size: {} bytes", config.extraction.max_file_size_bytes);
    tracing::info!("  - Chunk size: {}", config.store.chunk_size);

    let archives = discover_archives(&args.path, config.processing.recursive)?;

    let store = storage::connect(&config.store).await?;
    let orchestrator = PipelineOrchestrator::new(Arc::new(config), store);
    let existing = orchestrator.preflight().await.context("Document store unreachable")?;

    let text_output = args.output == OutputFormat::Text;
    if text_output {
        println!("{}", style("Archive ingestion").bold().underlined());
        println!("  {}: {}", style("Source").cyan(), args.path.display());
        println!("  {}: {}", style("Archives").cyan(), archives.len());
        println!("  {}: {}", style("Documents in collection").cyan(), existing);
    }

    let progress = progress_bar(archives.len() as u64, text_output);
    let bar = progress.clone();
    let orchestrator = orchestrator.with_progress(Arc::new(move |report: &ArchiveReport| {
        bar.set_message(report.archive.clone());
        bar.inc(1);
    }));

    let token = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, letting in-flight archives finish");
            token.cancel();
        }
    });

    let batch = match &args.batch_id {
        Some(id) => BatchContext::with_id(id.clone()),
        None => BatchContext::new(),
    };
    let result = orchestrator.run(archives, &batch).await?;
    progress.finish_and_clear();

    match args.output {
        OutputFormat::Text => print_summary(&result),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
    }
    Ok(())
}

/// A missing `.env` is fine; an unreadable or malformed one is not
fn check_dotenv(loaded: Result<PathBuf, dotenvy::Error>) -> anyhow::Result<()> {
    match loaded {
        Ok(_) => Ok(()),
        Err(dotenvy::Error::Io(e)) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).context("Failed to load .env"),
    }
}

fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,archive_ingest={}", logging.level)));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    if logging.json {
        layers.push(fmt::layer().json().with_writer(std::io::stderr).boxed());
    } else {
        layers.push(fmt::layer().with_writer(std::io::stderr).boxed());
    }

    let guard = match &logging.file {
        Some(path) => {
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .with_context(|| format!("Log file path has no file name: {}", path.display()))?;
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;

            let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));
            if logging.json {
                layers.push(fmt::layer().json().with_writer(writer).boxed());
            } else {
                layers.push(fmt::layer().with_ansi(false).with_writer(writer).boxed());
            }
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry().with(layers).with(filter).init();
    Ok(guard)
}

fn progress_bar(len: u64, visible: bool) -> ProgressBar {
    if !visible || !console::Term::stderr().is_term() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new(len);
    if let Ok(style) =
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")
    {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb
}

fn print_summary(result: &BatchResult) {
    let totals = &result.totals;
    println!();
    println!("{}", style(format!("Batch {}", result.batch_id)).bold().underlined());
    println!(
        "  {}: {} done, {} failed, {} cancelled",
        style("Archives").cyan(),
        style(totals.archives_processed).green(),
        style(totals.archives_failed).red(),
        totals.archives_cancelled
    );
    println!(
        "  {}: {} inserted, {} skipped, {} failed",
        style("Files").cyan(),
        style(totals.files_processed).green(),
        style(totals.files_skipped).yellow(),
        style(totals.files_failed).red()
    );
    println!(
        "  {}: {} ({:.2} MB)",
        style("Bytes written").cyan(),
        totals.bytes_written,
        totals.bytes_written as f64 / MIB as f64
    );
    println!("  {}: {:.1}s", style("Duration").cyan(), result.duration_secs);

    let failed: Vec<_> = result.failed_archives().collect();
    if !failed.is_empty() {
        println!("\n{}", style("Failed archives").red().bold());
        for report in failed {
            println!(
                "  - {} ({}): {}",
                report.archive,
                report.failed_at.map(|s| s.as_str()).unwrap_or("unknown"),
                report.error.as_deref().unwrap_or_default()
            );
        }
    }
}
