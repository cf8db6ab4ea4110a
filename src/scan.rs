//! Job discovery: one pass over the storage root.
//!
//! A job is any immediate subdirectory of the storage root containing a file
//! with the recognized input name. That is the entire submission protocol:
//! whoever can write a directory plus that file has submitted a job, whether
//! it was the HTTP API, an rsync from another machine, or a human with `cp`.
//! The shared events directory never carries the marker, so it is filtered
//! out like any other non-job directory.
//!
//! Each [`JobScanner::scan`] call re-enumerates the directory from scratch
//! and yields jobs lazily; nothing is remembered between scans. Entry-level
//! problems (vanished files, unreadable entries, non-UTF-8 names) skip that
//! entry at debug level. Only a storage root that cannot be opened at all is
//! an error, and for the worker that one is fatal.

use crate::config::ServiceConfig;
use crate::error::BookmillError;
use futures::{Stream, StreamExt};
use std::path::PathBuf;
use tokio_stream::wrappers::ReadDirStream;
use tracing::debug;

/// One discovered job, ready for the Job Processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredJob {
    /// The directory name, which is the job's identity everywhere (progress
    /// record, events, API).
    pub job_id: String,
    /// Absolute or root-relative job directory.
    pub dir: PathBuf,
    /// Path of the recognized input file inside `dir`.
    pub input: PathBuf,
}

/// Enumerates eligible job directories under the storage root.
#[derive(Debug, Clone)]
pub struct JobScanner {
    storage_root: PathBuf,
    input_filename: String,
}

impl JobScanner {
    pub fn new(config: &ServiceConfig) -> Self {
        Self {
            storage_root: config.storage_root.clone(),
            input_filename: config.input_filename.clone(),
        }
    }

    /// One full scan, yielding jobs as the directory is read.
    ///
    /// Directory order is whatever the filesystem reports; callers must not
    /// rely on it.
    pub async fn scan(
        &self,
    ) -> Result<impl Stream<Item = DiscoveredJob> + Send, BookmillError> {
        let read_dir = tokio::fs::read_dir(&self.storage_root).await.map_err(|source| {
            BookmillError::StorageRoot {
                path: self.storage_root.clone(),
                source,
            }
        })?;

        let input_filename = self.input_filename.clone();
        let stream = ReadDirStream::new(read_dir).filter_map(move |entry| {
            let input_filename = input_filename.clone();
            async move {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => {
                        debug!(error = %e, "skipping unreadable storage entry");
                        return None;
                    }
                };
                let dir = entry.path();
                match entry.file_type().await {
                    Ok(file_type) if file_type.is_dir() => {}
                    Ok(_) => return None,
                    Err(e) => {
                        debug!(path = %dir.display(), error = %e, "skipping entry with unreadable type");
                        return None;
                    }
                }
                let job_id = match entry.file_name().into_string() {
                    Ok(name) => name,
                    Err(name) => {
                        debug!(name = ?name, "skipping directory with non-UTF-8 name");
                        return None;
                    }
                };
                let input = dir.join(&input_filename);
                match tokio::fs::metadata(&input).await {
                    Ok(meta) if meta.is_file() => Some(DiscoveredJob { job_id, dir, input }),
                    Ok(_) | Err(_) => None,
                }
            }
        });
        Ok(stream)
    }
}
