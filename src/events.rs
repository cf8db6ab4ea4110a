//! Append-only lifecycle events.
//!
//! Every job pass is bracketed by a start and a stop event so an external
//! observer can reconstruct what the worker did without tailing logs. Events
//! are immutable: each [`EventRecorder::record`] call writes one new file
//! named `<timestamp>_<topic>_<jobId>_<guid>.json` under the shared events
//! directory and nothing ever reads or rewrites it from this crate. Distinct
//! filenames (millisecond timestamp plus a fresh GUID) make cross-process
//! ordering a filesystem sort and remove any need for locking.

use crate::config::ServiceConfig;
use crate::error::BookmillError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Topic recorded when the worker picks a job up.
pub const TOPIC_START: &str = "service-start";
/// Topic recorded when a job pass ends, successfully or not.
pub const TOPIC_STOP: &str = "service-stop";

/// One lifecycle event, serialized verbatim into its file.
///
/// `job_id` is spelled `bookId` on the wire; downstream consumers of the
/// original storage format key on that name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceEvent {
    pub guid: Uuid,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub topic: String,
    #[serde(rename = "bookId")]
    pub job_id: String,
    pub service: String,
    /// Free-form fields merged into the top-level object
    /// (`result`, `error`, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Writes lifecycle events under `<storage_root>/<events_dir_name>/`.
#[derive(Debug, Clone)]
pub struct EventRecorder {
    events_dir: PathBuf,
    service_name: String,
}

impl EventRecorder {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            events_dir: config.events_dir(),
            service_name: config.service_name.clone(),
        }
    }

    /// Append one event; returns the path of the file written.
    ///
    /// Creates the events directory on first use. Errors propagate to the
    /// caller; the Worker Loop downgrades them to warnings because a lost
    /// event must not fail the job it describes.
    pub async fn record(
        &self,
        topic: &str,
        job_id: &str,
        extra: serde_json::Map<String, serde_json::Value>,
    ) -> Result<PathBuf, BookmillError> {
        tokio::fs::create_dir_all(&self.events_dir)
            .await
            .map_err(|source| BookmillError::EventWrite {
                path: self.events_dir.clone(),
                source,
            })?;

        let event = ServiceEvent {
            guid: Uuid::new_v4(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            topic: topic.to_string(),
            job_id: job_id.to_string(),
            service: self.service_name.clone(),
            extra,
        };

        let path = self.events_dir.join(format!(
            "{}_{}_{}_{}.json",
            event.timestamp, event.topic, event.job_id, event.guid
        ));
        let json = serde_json::to_string_pretty(&event)
            .map_err(|e| BookmillError::Internal(format!("event serialisation: {e}")))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|source| BookmillError::EventWrite {
                path: path.clone(),
                source,
            })?;

        Ok(path)
    }

    /// Where events land, for callers that report it.
    pub fn events_dir(&self) -> &Path {
        &self.events_dir
    }
}
