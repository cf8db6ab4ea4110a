//! Error types for the bookmill library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`BookmillError`]: **Fatal to the current operation**. Returned as
//!   `Err(BookmillError)` from store, adapter, and server entry points.
//!   Whether it is fatal to the *process* depends on where it surfaces:
//!   the Job Processor absorbs it at the job boundary (the job is marked
//!   `failed`), while the Worker Loop treats storage-root and engine-setup
//!   variants as unrecoverable.
//!
//! * [`ImageError`]: **Non-fatal**. A single embedded image could not be
//!   decoded or persisted; the conversion continues and the failure is
//!   recorded in [`crate::adapter::ConversionOutcome::image_failures`] so
//!   callers can inspect partial extraction rather than losing the whole
//!   document to one bad image.
//!
//! The separation lets callers decide their own tolerance: fail the job,
//! log and continue, or collect the skipped images for a post-run report.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the bookmill library.
///
/// Per-image failures use [`ImageError`] and are collected in
/// [`crate::adapter::ConversionOutcome`] rather than propagated here.
#[derive(Debug, Error)]
pub enum BookmillError {
    // ── Storage errors ────────────────────────────────────────────────────
    /// The storage root cannot be read or created.
    #[error("Storage root '{path}' is not usable: {source}\nCheck the directory exists and is readable, or point STORAGE_ROOT elsewhere.")]
    StorageRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not create a job directory or write its input file.
    #[error("Failed to create job files under '{path}': {source}")]
    JobCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Progress record errors ────────────────────────────────────────────
    /// The progress record exists but cannot be read.
    #[error("Failed to read progress record '{path}': {source}")]
    ProgressRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The progress record exists but is not valid JSON.
    ///
    /// This indicates storage corruption and is deliberately NOT treated as
    /// "pending": reprocessing a job whose state is unknown could clobber a
    /// completed result.
    #[error("Progress record '{path}' is corrupt: {source}\nDelete the file (or run `bookmill reset <JOB_ID>`) to reprocess the job from scratch.")]
    ProgressParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Could not persist a progress record.
    #[error("Failed to write progress record '{path}': {source}")]
    ProgressWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Metadata errors ───────────────────────────────────────────────────
    /// Could not persist the merged metadata record.
    ///
    /// Read errors on a prior record are tolerated (logged, treated as
    /// empty); only the write back is load-bearing.
    #[error("Failed to write metadata record '{path}': {source}")]
    MetadataWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Conversion errors ─────────────────────────────────────────────────
    /// The conversion engine reported a failure for this document.
    #[error("Conversion engine failed: {detail}")]
    Engine { detail: String },

    /// The engine process could not be spawned at all.
    #[error("Failed to spawn conversion engine '{command}': {source}\nCheck the command is installed and on PATH.")]
    EngineSpawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The engine ran but its output did not follow the expected contract.
    #[error("Conversion engine produced unusable output: {detail}")]
    EngineProtocol { detail: String },

    /// Engine construction failed; the worker cannot start without one.
    #[error("Conversion engine is not configured: {detail}\nPass --engine <CMD> (a command that reads a document path and prints the conversion result as JSON).")]
    EngineInit { detail: String },

    /// Could not create the per-job image directory.
    #[error("Failed to create image directory '{path}': {source}")]
    ImageDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Could not write the converted output text.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Event errors ──────────────────────────────────────────────────────
    /// Could not append a lifecycle event file.
    ///
    /// The Worker Loop downgrades this to a warning; losing one
    /// observability record must not fail the job it describes.
    #[error("Failed to write event file '{path}': {source}")]
    EventWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── API errors ────────────────────────────────────────────────────────
    /// No job directory exists for the given identifier.
    #[error("No job found with id '{job_id}'")]
    JobNotFound { job_id: String },

    /// The job exists but has produced no output text yet.
    #[error("Job '{job_id}' has no output yet")]
    OutputMissing { job_id: String },

    /// The upload request was malformed (missing field, empty filename).
    #[error("Invalid upload: {reason}")]
    InvalidUpload { reason: String },

    /// Packaging the result archive failed.
    #[error("Failed to build result archive for job '{job_id}': {detail}")]
    Archive { job_id: String, detail: String },

    /// The HTTP listener could not be bound.
    #[error("Failed to bind HTTP listener on {addr}: {source}\nIs another instance already running on this port?")]
    Bind {
        addr: std::net::SocketAddr,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A non-fatal error for a single embedded image.
///
/// Collected in [`crate::adapter::ConversionOutcome::image_failures`] when an
/// image is skipped. The overall conversion continues; skipped references are
/// still rewritten to a fallback path so the document never carries a bare
/// placeholder.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
pub enum ImageError {
    /// The image payload could not be decoded (bad base64, bad raster data).
    #[error("Image '{id}': payload could not be decoded: {detail}")]
    DecodeFailed { id: String, detail: String },

    /// The decoded image could not be written to the image directory.
    #[error("Image '{id}': write failed: {detail}")]
    WriteFailed { id: String, detail: String },

    /// The image identifier is not a plain filename and would land outside
    /// the image directory.
    #[error("Image '{id}': identifier is not a plain filename, skipped")]
    InvalidId { id: String },
}
