//! # RAG Client CLI (`rag`)
//!
//! The `rag` binary drives the upload and search pipelines against a
//! configured backend.
//!
//! ## Usage
//!
//! ```bash
//! rag [--config ./config/rag.toml] [--progress off|human|json] <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `rag hash <file>` | Print a file's fingerprint |
//! | `rag upload <file>` | Fingerprint and upload a document |
//! | `rag search "<query>"` | Stream a search result |
//! | `rag ask --file <file> "<query>"` | Upload, then search with the new fingerprint |
//!
//! ## Examples
//!
//! ```bash
//! # Upload a PDF
//! RAG_BACKEND_URL=http://localhost:8000 rag upload ./papers/cats.pdf
//!
//! # Keyword search, highlighting matches
//! rag search "mammals" --mode keyword
//!
//! # Both in one go
//! rag ask --file ./papers/cats.pdf "what are cats?"
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::future::Future;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use rag_client::config::{self, Config};
use rag_client::fingerprint::compute_fingerprint;
use rag_client::models::{FileBuffer, Fingerprint, SearchMode, SearchOutcome, UploadOutcome};
use rag_client::progress::{watch_searches, watch_uploads, ProgressEvent, ProgressMode, StateReporter};
use rag_client::session::Session;

/// RAG client: upload documents and stream search answers from a RAG backend.
#[derive(Parser)]
#[command(
    name = "rag",
    about = "RAG client: upload documents and stream search answers from a RAG backend",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Without it, built-in defaults are used. `RAG_BACKEND_URL` overrides
    /// the backend base URL either way.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Progress output on stderr. Defaults to `human` when stderr is a TTY.
    #[arg(long, global = true, value_enum)]
    progress: Option<ProgressMode>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the fingerprint of a file without uploading it.
    Hash {
        /// Path to the file.
        file: PathBuf,
    },

    /// Fingerprint a document and upload it.
    Upload {
        /// Path to the document (PDF or HTML by default).
        file: PathBuf,
    },

    /// Run a query and stream the answer.
    Search {
        /// The search query string.
        query: String,

        /// Search mode: `semantic` or `keyword`. Defaults to `search.default_mode`.
        #[arg(long)]
        mode: Option<SearchMode>,

        /// Fingerprint of a previously uploaded document to scope the search.
        #[arg(long)]
        hash: Option<Fingerprint>,
    },

    /// Upload a document, then search with its fingerprint as context.
    Ask {
        /// Path to the document.
        #[arg(long)]
        file: PathBuf,

        /// The search query string.
        query: String,

        /// Search mode: `semantic` or `keyword`.
        #[arg(long)]
        mode: Option<SearchMode>,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => config::finalize(Config::default(), std::env::var(config::BASE_URL_ENV).ok())?,
    };
    let reporter = cli
        .progress
        .unwrap_or_else(ProgressMode::default_for_tty)
        .reporter();

    let ok = match cli.command {
        Commands::Hash { file } => {
            let buffer = FileBuffer::read(&file).await?;
            println!("{}  {}", compute_fingerprint(&buffer.bytes), buffer.name);
            true
        }
        Commands::Upload { file } => {
            let session = Session::new(&config)?;
            run_upload(&session, &file, reporter.as_ref()).await?
        }
        Commands::Search { query, mode, hash } => {
            let session = Session::new(&config)?;
            let mode = mode.unwrap_or(config.search.default_mode);
            run_search(&session, &query, mode, hash, reporter.as_ref()).await
        }
        Commands::Ask { file, query, mode } => {
            let session = Session::new(&config)?;
            let mode = mode.unwrap_or(config.search.default_mode);
            run_upload(&session, &file, reporter.as_ref()).await?
                && run_search(
                    &session,
                    &query,
                    mode,
                    session.uploads().last_fingerprint(),
                    reporter.as_ref(),
                )
                .await
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

async fn run_upload(session: &Session, path: &Path, reporter: &dyn StateReporter) -> Result<bool> {
    let file = FileBuffer::read(path).await?;
    let watcher = watch_uploads(session.uploads().subscribe(), reporter);
    let outcome = with_progress(session.select_file(file), watcher).await;

    let snapshot = session.uploads().snapshot();
    if snapshot.state.is_terminal() {
        reporter.report(&ProgressEvent::Upload(snapshot.clone()));
    }

    match outcome {
        UploadOutcome::Rejected { reason } => {
            eprintln!("Error: {}", reason);
            Ok(false)
        }
        outcome => {
            if let Some(line) = snapshot.file_line() {
                println!("{}", line);
            }
            if let Some(line) = snapshot.status_line() {
                println!("{}", line);
            }
            if let Some(fp) = &snapshot.fingerprint {
                println!("hash: {}", fp);
            }
            Ok(matches!(outcome, UploadOutcome::Success { .. }))
        }
    }
}

async fn run_search(
    session: &Session,
    query: &str,
    mode: SearchMode,
    fingerprint: Option<Fingerprint>,
    reporter: &dyn StateReporter,
) -> bool {
    let watcher = watch_searches(session.searches().subscribe(), reporter);
    let outcome = with_progress(session.search_with(query, mode, fingerprint), watcher).await;

    let snapshot = session.searches().snapshot();
    if snapshot.state.is_terminal() {
        reporter.report(&ProgressEvent::Search(snapshot.clone()));
    }

    match outcome {
        SearchOutcome::Rejected => {
            eprintln!("Error: query must not be empty");
            false
        }
        outcome => {
            let presented = session.presented();
            if atty::is(atty::Stream::Stdout) {
                println!("{}", presented.to_terminal());
            } else {
                println!("{}", presented.to_plain());
            }
            matches!(outcome, SearchOutcome::Done { .. })
        }
    }
}

/// Drive `op` while `watcher` reports its transitions.
///
/// The terminal transition is published in the same poll that completes
/// `op`, so callers report the final snapshot themselves.
async fn with_progress<T>(op: impl Future<Output = T>, watcher: impl Future<Output = ()>) -> T {
    tokio::pin!(op);
    tokio::select! {
        biased;
        out = &mut op => return out,
        _ = watcher => {}
    }
    op.await
}
