//! # bookmill
//!
//! A file-based PDF-to-Markdown conversion service.
//!
//! ## Why this crate?
//!
//! Batch conversion pipelines fail in boring ways: a process dies halfway
//! through a book, a job is picked up twice, a half-written result file gets
//! shipped downstream. This crate treats the filesystem as the job queue and
//! the source of truth. Each job is a directory under a storage root, each
//! directory carries its own progress record, and every write that another
//! process might observe goes through a temp file + rename. Restarting the
//! service resumes exactly where it left off.
//!
//! ## Service Overview
//!
//! ```text
//! storage root
//!  │
//!  ├─ 1. Scan      find job dirs containing the input PDF
//!  ├─ 2. Progress  skip completed jobs, retry failed/stale ones
//!  ├─ 3. Convert   run the engine, save images, rewrite references
//!  ├─ 4. Metadata  merge conversion stats into the job's metadata record
//!  ├─ 5. Events    drop start/stop event files for the message bus
//!  └─ 6. HTTP      upload / status / download / synchronous convert
//! ```
//!
//! Conversion itself is delegated to a [`ConversionEngine`]. The stock
//! [`CommandEngine`] shells out to any converter that accepts a PDF path and
//! prints a JSON document on stdout, so the heavy ML tooling stays out of
//! this process entirely.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bookmill::{CommandEngine, JobProcessor, ServiceConfig, Worker};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::builder()
//!         .storage_root("./storage")
//!         .build()?;
//!     let engine = Arc::new(CommandEngine::new("marker-convert --json")?);
//!     let processor = Arc::new(JobProcessor::new(&config, engine));
//!     let worker = Worker::new(config, processor);
//!     worker.run(CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Job Directory Layout
//!
//! | File | Written by | Purpose |
//! |------|-----------|---------|
//! | `originalbook.pdf` | caller | the input, and the marker that makes a dir a job |
//! | `pdf2markdown-progress.json` | service | job state: pending / processing / completed / failed |
//! | `originalbook.md` | service | the converted Markdown |
//! | `images/` | service | extracted page images |
//! | `bookmetadata.json` | caller + service | book metadata, merged with conversion stats |
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `bookmill` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library to avoid pulling in CLI-only deps:
//! ```toml
//! bookmill = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod adapter;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod markdown;
pub mod metadata;
pub mod process;
pub mod progress;
pub mod scan;
pub mod server;
pub mod storage;
pub mod worker;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use adapter::{ConversionAdapter, ConversionOutcome};
pub use config::{ServiceConfig, ServiceConfigBuilder};
pub use engine::{CommandEngine, ConversionEngine, EngineImage, EngineOutput, ImagePayload};
pub use error::{BookmillError, ImageError};
pub use events::{EventRecorder, ServiceEvent};
pub use metadata::MetadataStore;
pub use process::{JobProcessor, ProcessOutcome};
pub use progress::{JobStatus, ProgressRecord, ProgressStore};
pub use scan::{DiscoveredJob, JobScanner};
pub use server::AppState;
pub use worker::{ScanSummary, Worker};
