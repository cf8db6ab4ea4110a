//! Durable per-job progress records.
//!
//! The progress record is the single source of truth for the retry/skip
//! decision: `completed` means the job is done forever, anything else means a
//! future scan may pick it up again. One small JSON file per job, overwritten
//! (atomically) on every transition, so the status endpoint and the worker
//! can read it at any moment without coordination.
//!
//! Two asymmetric edge cases on load:
//!
//! * missing file: the job has simply never been processed, report
//!   [`JobStatus::Pending`];
//! * unparseable file: storage corruption, a hard error. Guessing "pending"
//!   here could reprocess and clobber a job that had in fact completed.

use crate::config::ServiceConfig;
use crate::error::BookmillError;
use crate::storage::write_atomic;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Step recorded while the conversion engine is running.
pub const STEP_CONVERTING: &str = "converting";
/// Step recorded while merged metadata is being written back.
pub const STEP_WRITING_METADATA: &str = "writing_metadata";

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// No processing pass has started (or no record exists yet).
    Pending,
    /// A pass is underway; `step` says which phase.
    Processing,
    /// The last pass failed; `error` carries the message.
    Failed,
    /// Done. Never reprocessed.
    Completed,
}

impl JobStatus {
    /// Lowercase wire form, as stored and as reported by the status API.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Failed => "failed",
            JobStatus::Completed => "completed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The persisted record: `{status, step?, error?}`.
///
/// `step` stays a free string so a record written by a newer revision with an
/// extra phase still loads here instead of failing the whole job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProgressRecord {
    pub fn pending() -> Self {
        Self {
            status: JobStatus::Pending,
            step: None,
            error: None,
        }
    }

    pub fn converting() -> Self {
        Self {
            status: JobStatus::Processing,
            step: Some(STEP_CONVERTING.to_string()),
            error: None,
        }
    }

    pub fn writing_metadata() -> Self {
        Self {
            status: JobStatus::Processing,
            step: Some(STEP_WRITING_METADATA.to_string()),
            error: None,
        }
    }

    pub fn completed() -> Self {
        Self {
            status: JobStatus::Completed,
            step: None,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            step: None,
            error: Some(error.into()),
        }
    }
}

/// Reads and writes the progress record inside a job directory.
#[derive(Debug, Clone)]
pub struct ProgressStore {
    filename: String,
}

impl ProgressStore {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            filename: config.progress_filename.clone(),
        }
    }

    /// Path of the record file for a job directory.
    pub fn record_path(&self, job_dir: &Path) -> PathBuf {
        job_dir.join(&self.filename)
    }

    /// Load the record; a missing file reports `pending`, a malformed file is
    /// a hard error (see module docs).
    pub async fn load(&self, job_dir: &Path) -> Result<ProgressRecord, BookmillError> {
        let path = self.record_path(job_dir);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ProgressRecord::pending());
            }
            Err(source) => return Err(BookmillError::ProgressRead { path, source }),
        };
        serde_json::from_str(&raw).map_err(|source| BookmillError::ProgressParse { path, source })
    }

    /// Atomically overwrite the record. Last write wins.
    pub async fn save(
        &self,
        job_dir: &Path,
        record: &ProgressRecord,
    ) -> Result<(), BookmillError> {
        let path = self.record_path(job_dir);
        let json = serde_json::to_string_pretty(record)
            .map_err(|e| BookmillError::Internal(format!("progress serialisation: {e}")))?;
        write_atomic(&path, json.as_bytes())
            .await
            .map_err(|source| BookmillError::ProgressWrite { path, source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> ProgressStore {
        ProgressStore::new(&ServiceConfig::default())
    }

    #[tokio::test]
    async fn missing_record_reads_as_pending() {
        let dir = TempDir::new().unwrap();
        let record = store().load(dir.path()).await.unwrap();
        assert_eq!(record, ProgressRecord::pending());
    }

    #[tokio::test]
    async fn save_then_load_round_trips_each_phase() {
        let dir = TempDir::new().unwrap();
        let store = store();

        for record in [
            ProgressRecord::converting(),
            ProgressRecord::writing_metadata(),
            ProgressRecord::failed("engine exploded"),
            ProgressRecord::completed(),
        ] {
            store.save(dir.path(), &record).await.unwrap();
            assert_eq!(store.load(dir.path()).await.unwrap(), record);
        }
    }

    #[tokio::test]
    async fn malformed_record_is_a_hard_error() {
        let dir = TempDir::new().unwrap();
        let store = store();
        std::fs::write(store.record_path(dir.path()), "{\"status\": ").unwrap();

        let err = store.load(dir.path()).await.unwrap_err();
        assert!(
            matches!(err, BookmillError::ProgressParse { .. }),
            "got: {err}"
        );
    }

    #[tokio::test]
    async fn absent_fields_are_omitted_on_disk() {
        let dir = TempDir::new().unwrap();
        let store = store();

        store
            .save(dir.path(), &ProgressRecord::completed())
            .await
            .unwrap();
        let raw = std::fs::read_to_string(store.record_path(dir.path())).unwrap();
        assert!(raw.contains("\"status\": \"completed\""), "raw: {raw}");
        assert!(!raw.contains("step"), "raw: {raw}");
        assert!(!raw.contains("error"), "raw: {raw}");

        store
            .save(dir.path(), &ProgressRecord::failed("boom"))
            .await
            .unwrap();
        let raw = std::fs::read_to_string(store.record_path(dir.path())).unwrap();
        assert!(raw.contains("\"error\": \"boom\""), "raw: {raw}");
    }

    #[tokio::test]
    async fn unknown_step_strings_still_load() {
        let dir = TempDir::new().unwrap();
        let store = store();
        std::fs::write(
            store.record_path(dir.path()),
            "{\"status\": \"processing\", \"step\": \"proofreading\"}",
        )
        .unwrap();

        let record = store.load(dir.path()).await.unwrap();
        assert_eq!(record.status, JobStatus::Processing);
        assert_eq!(record.step.as_deref(), Some("proofreading"));
    }

    #[test]
    fn status_wire_form_is_lowercase() {
        assert_eq!(JobStatus::Pending.as_str(), "pending");
        assert_eq!(JobStatus::Completed.to_string(), "completed");
        let json = serde_json::to_string(&JobStatus::Failed).unwrap();
        assert_eq!(json, "\"failed\"");
    }
}
