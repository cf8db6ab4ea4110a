//! Per-job metadata records and the non-destructive merge.
//!
//! A job may already carry a `bookmetadata.json` before conversion runs
//! (publisher info dropped in by whoever created the job). The conversion
//! result must not wipe those fields: the merge is right-biased, so
//! conversion-owned keys win but everything else survives untouched.
//!
//! Unlike the progress record, a corrupt prior metadata file is tolerated
//! (logged and treated as empty): the merge immediately overwrites it with a
//! fresh record, so nothing downstream ever reads the corrupt bytes.

use crate::config::ServiceConfig;
use crate::error::BookmillError;
use crate::storage::write_atomic;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Right-biased merge: keys in `new` overwrite keys in `existing`, keys only
/// in `existing` are preserved.
pub fn merge(existing: Map<String, Value>, new: Map<String, Value>) -> Map<String, Value> {
    let mut merged = existing;
    merged.extend(new);
    merged
}

/// Reads and writes the metadata record inside a job directory.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    filename: String,
}

impl MetadataStore {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            filename: config.metadata_filename.clone(),
        }
    }

    /// Path of the record file for a job directory.
    pub fn record_path(&self, job_dir: &Path) -> PathBuf {
        job_dir.join(&self.filename)
    }

    /// Load the prior record, tolerating absence and corruption.
    ///
    /// A file that parses to something other than a JSON object counts as
    /// corrupt. Both cases log a warning and report an empty map.
    pub async fn load_or_empty(&self, job_dir: &Path) -> Map<String, Value> {
        let path = self.record_path(job_dir);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Map::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not read prior metadata, treating as empty");
                return Map::new();
            }
        };
        match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            Ok(other) => {
                warn!(path = %path.display(), "prior metadata is not a JSON object (got {}), treating as empty", kind_of(&other));
                Map::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "prior metadata is unparseable, treating as empty");
                Map::new()
            }
        }
    }

    /// Atomically overwrite the record with the merged map.
    pub async fn save(
        &self,
        job_dir: &Path,
        metadata: &Map<String, Value>,
    ) -> Result<(), BookmillError> {
        let path = self.record_path(job_dir);
        let json = serde_json::to_string_pretty(metadata)
            .map_err(|e| BookmillError::Internal(format!("metadata serialisation: {e}")))?;
        write_atomic(&path, json.as_bytes())
            .await
            .map_err(|source| BookmillError::MetadataWrite { path, source })
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
