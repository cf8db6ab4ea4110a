//! CLI binary for bookmill.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ServiceConfig` and wires the worker, the HTTP API, and the shutdown
//! signal together.

use anyhow::{Context, Result};
use bookmill::{
    AppState, CommandEngine, DiscoveredJob, JobProcessor, JobScanner, ProgressStore,
    ServiceConfig, Worker,
};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r##"EXAMPLES:
  # Serve ./storage with the marker CLI as the engine
  bookmill serve --engine "marker-convert --json"

  # Separate storage root and port
  bookmill serve --storage-root /srv/books --port 8080 --engine pdf-engine

  # Convert two books at a time, never retry failed jobs
  bookmill serve --engine pdf-engine --max-concurrent-jobs 2 --no-retry-incomplete

  # Re-run every job in the store
  bookmill reset

  # Re-run a single job
  bookmill reset 9f1c2a

ENGINE CONTRACT:
  The engine command is invoked as `<command> <pdf-path>` and must print one
  JSON document on stdout:
    {
      "text": "# Title\n...",
      "images": [{"id": "_page_0_Picture_1.png", "data": "<base64>"}],
      "page_count": 12,
      "metadata": {}
    }
  Only "text" is required. A non-zero exit status fails the job; stderr is
  captured into the failure message.

STORAGE LAYOUT:
  <storage-root>/<job-id>/originalbook.pdf            input (marks the job)
  <storage-root>/<job-id>/pdf2markdown-progress.json  job state
  <storage-root>/<job-id>/originalbook.md             converted Markdown
  <storage-root>/<job-id>/images/                     extracted images
  <storage-root>/<job-id>/bookmetadata.json           merged metadata
  <storage-root>/events/                              lifecycle event files

ENVIRONMENT VARIABLES:
  STORAGE_ROOT      Root directory for job folders (same as --storage-root)
  BOOKMILL_ENGINE   Converter command (same as --engine)
  RUST_LOG          Tracing filter, e.g. info,bookmill=debug
"##;

/// File-based PDF-to-Markdown conversion service.
#[derive(Parser, Debug)]
#[command(
    name = "bookmill",
    version,
    about = "File-based PDF-to-Markdown conversion service",
    long_about = "Watches a storage root for job directories containing a PDF, converts each one \
to Markdown through an external engine command, and serves a small HTTP API for uploads, \
status checks, and result downloads. Jobs survive restarts: progress is persisted per job \
and completed work is never redone.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Root directory that holds one subdirectory per job.
    #[arg(long, env = "STORAGE_ROOT", default_value = "./storage", global = true)]
    storage_root: PathBuf,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the conversion worker and the HTTP API.
    Serve {
        /// Converter command. Invoked as `<command> <pdf-path>`; must print
        /// the result as one JSON document on stdout (see --help).
        #[arg(long, env = "BOOKMILL_ENGINE")]
        engine: String,

        /// Address the HTTP API binds to.
        #[arg(long, default_value = "0.0.0.0")]
        host: IpAddr,

        /// Port the HTTP API binds to.
        #[arg(long, default_value_t = 3000)]
        port: u16,

        /// Seconds to sleep between scan passes when no job completed.
        #[arg(long, default_value_t = 10)]
        poll_interval: u64,

        /// Jobs converted concurrently within one scan pass.
        #[arg(long, default_value_t = 1)]
        max_concurrent_jobs: usize,

        /// Skip image extraction; image references are still rewritten.
        #[arg(long)]
        no_extract_images: bool,

        /// Leave multi-link Contents lines as the engine produced them.
        #[arg(long)]
        no_format_contents: bool,

        /// Leave failed and interrupted jobs alone instead of retrying them.
        #[arg(long)]
        no_retry_incomplete: bool,
    },

    /// Delete progress records so jobs run again on the next scan pass.
    Reset {
        /// Reset one job instead of every job in the store.
        job_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve {
            engine,
            host,
            port,
            poll_interval,
            max_concurrent_jobs,
            no_extract_images,
            no_format_contents,
            no_retry_incomplete,
        } => {
            let config = ServiceConfig::builder()
                .storage_root(cli.storage_root)
                .poll_interval(Duration::from_secs(poll_interval))
                .max_concurrent_jobs(max_concurrent_jobs)
                .extract_images(!no_extract_images)
                .format_contents(!no_format_contents)
                .retry_incomplete(!no_retry_incomplete)
                .bind_addr(SocketAddr::new(host, port))
                .build()
                .context("Invalid configuration")?;
            run_serve(config, &engine).await
        }
        Command::Reset { job_id } => {
            let config = ServiceConfig::builder()
                .storage_root(cli.storage_root)
                .build()
                .context("Invalid configuration")?;
            run_reset(&config, job_id.as_deref()).await
        }
    }
}

/// Run the worker loop and the HTTP API until a shutdown signal arrives.
async fn run_serve(config: ServiceConfig, engine_command: &str) -> Result<()> {
    // ── Wiring ───────────────────────────────────────────────────────────
    let engine = Arc::new(CommandEngine::new(engine_command).context("Invalid engine command")?);
    info!(engine = %engine.command_line(), root = %config.storage_root.display(), "starting");

    let processor = Arc::new(JobProcessor::new(&config, engine));
    let worker = Arc::new(Worker::new(config.clone(), Arc::clone(&processor)));
    let state = AppState::new(config, processor, worker.started_flag());
    let shutdown = CancellationToken::new();

    // ── Shutdown signal ──────────────────────────────────────────────────
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            signal.cancel();
        }
    });

    // ── Worker ───────────────────────────────────────────────────────────
    // The worker cancels the shared token when it exits for any reason, so
    // a fatal storage error takes the HTTP half down instead of leaving a
    // server that accepts jobs nobody will process.
    let worker_task = tokio::spawn({
        let worker = Arc::clone(&worker);
        let shutdown = shutdown.clone();
        async move {
            let result = worker.run(shutdown.clone()).await;
            if let Err(ref e) = result {
                error!(error = %e, "worker exited");
            }
            shutdown.cancel();
            result
        }
    });

    // ── HTTP API ─────────────────────────────────────────────────────────
    let served = bookmill::server::serve(state, shutdown.clone()).await;
    shutdown.cancel();
    let worker_result = worker_task.await.context("worker task panicked")?;
    served.context("HTTP server failed")?;
    worker_result?;
    info!("bye");
    Ok(())
}

/// Delete progress records: one job's, or every job's in the store.
async fn run_reset(config: &ServiceConfig, job_id: Option<&str>) -> Result<()> {
    let progress = ProgressStore::new(config);

    if let Some(job_id) = job_id {
        let dir = config.job_dir(job_id);
        let is_dir = tokio::fs::metadata(&dir)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false);
        if !is_dir {
            anyhow::bail!(
                "no job directory named '{}' under {}",
                job_id,
                config.storage_root.display()
            );
        }
        if remove_progress(&progress, &dir).await? {
            println!("Reset job: {job_id}");
        } else {
            println!("Job {job_id} has no progress record - will be processed");
        }
        return Ok(());
    }

    println!("Scanning storage directory: {}", config.storage_root.display());
    let scanner = JobScanner::new(config);
    let jobs: Vec<DiscoveredJob> = scanner
        .scan()
        .await
        .context("Failed to scan storage root")?
        .collect()
        .await;

    let mut reset = 0usize;
    for job in &jobs {
        match remove_progress(&progress, &job.dir).await {
            Ok(true) => {
                println!("Reset job: {}", job.job_id);
                reset += 1;
            }
            Ok(false) => {
                println!("Job {} has no progress record - will be processed", job.job_id);
            }
            Err(e) => {
                eprintln!("Error resetting {}: {e}", job.job_id);
            }
        }
    }

    println!("\nReset {reset} jobs for reprocessing");
    Ok(())
}

/// Remove a job's progress record; `Ok(false)` when there was none.
async fn remove_progress(progress: &ProgressStore, job_dir: &std::path::Path) -> Result<bool> {
    let path = progress.record_path(job_dir);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}
