//! The Job Processor: one job, one pass, one terminal state.
//!
//! Drives a discovered job through the full state machine:
//!
//! ```text
//! pending ──► processing(converting) ──► processing(writing_metadata) ──► completed
//!    │                 │                            │
//!    └─────────────────┴────────────────────────────┴──► failed(error)
//! ```
//!
//! Every transition is persisted before the work it announces, so a reader
//! of the progress record always sees what the worker is currently doing and
//! a crash leaves an honest `processing` record behind.
//!
//! Failures inside a pass never escape as `Err`: they become
//! [`ProcessOutcome::Failed`] plus a persisted `failed` record, so one bad
//! job cannot abort the scan that found it. The single exception is a
//! corrupt progress record, which is a storage problem rather than a job
//! problem and does propagate.

use crate::adapter::ConversionAdapter;
use crate::config::ServiceConfig;
use crate::engine::ConversionEngine;
use crate::error::BookmillError;
use crate::metadata::{self, MetadataStore};
use crate::progress::{JobStatus, ProgressRecord, ProgressStore};
use crate::scan::DiscoveredJob;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

/// How a single processing pass ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The job ran and reached `completed`.
    Completed,
    /// The job was not run; `status` is the record that vetoed it.
    Skipped { status: JobStatus },
    /// The job ran and failed; the message is also in the progress record.
    Failed { error: String },
}

/// Output filename derived from the input: same stem, `.md` extension.
pub fn output_filename(input: &Path) -> String {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    format!("{stem}.md")
}

/// Runs the per-job state machine. Shared by the Worker Loop and the
/// synchronous conversion endpoint; all state lives in the job directory.
#[derive(Debug, Clone)]
pub struct JobProcessor {
    progress: ProgressStore,
    metadata: MetadataStore,
    adapter: ConversionAdapter,
    image_dir_name: String,
    retry_incomplete: bool,
}

impl JobProcessor {
    pub fn new(config: &ServiceConfig, engine: Arc<dyn ConversionEngine>) -> Self {
        Self {
            progress: ProgressStore::new(config),
            metadata: MetadataStore::new(config),
            adapter: ConversionAdapter::new(config, engine),
            image_dir_name: config.image_dir_name.clone(),
            retry_incomplete: config.retry_incomplete,
        }
    }

    /// The progress store this processor writes through, for callers that
    /// only need to read job state.
    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    /// Run one pass over `job`.
    ///
    /// `Err` is reserved for a corrupt progress record; every in-pass
    /// failure is reported as `Ok(ProcessOutcome::Failed)`.
    pub async fn process(&self, job: &DiscoveredJob) -> Result<ProcessOutcome, BookmillError> {
        // ── Step 1: Decide whether to run ────────────────────────────────
        let record = self.progress.load(&job.dir).await?;
        match record.status {
            JobStatus::Completed => {
                debug!(job_id = %job.job_id, "already completed, skipping");
                return Ok(ProcessOutcome::Skipped {
                    status: record.status,
                });
            }
            JobStatus::Failed | JobStatus::Processing if !self.retry_incomplete => {
                debug!(job_id = %job.job_id, status = %record.status, "retries disabled, skipping");
                return Ok(ProcessOutcome::Skipped {
                    status: record.status,
                });
            }
            _ => {}
        }

        info!(job_id = %job.job_id, status = %record.status, "processing job");
        match self.run_pass(job).await {
            Ok(()) => {
                info!(job_id = %job.job_id, "job completed");
                Ok(ProcessOutcome::Completed)
            }
            Err(e) => {
                error!(job_id = %job.job_id, error = %e, "job failed");
                let failed = ProgressRecord::failed(e.to_string());
                if let Err(save_err) = self.progress.save(&job.dir, &failed).await {
                    // The job is now wrong on disk too; the next scan will
                    // retry it from whatever record survived.
                    error!(job_id = %job.job_id, error = %save_err, "could not persist the failure record");
                }
                Ok(ProcessOutcome::Failed {
                    error: e.to_string(),
                })
            }
        }
    }

    async fn run_pass(&self, job: &DiscoveredJob) -> Result<(), BookmillError> {
        // ── Step 2: Announce the conversion phase ────────────────────────
        self.progress
            .save(&job.dir, &ProgressRecord::converting())
            .await?;

        // ── Step 3: Convert ──────────────────────────────────────────────
        let output = job.dir.join(output_filename(&job.input));
        let image_dir = job.dir.join(&self.image_dir_name);
        let outcome = self
            .adapter
            .convert(&job.input, &output, &image_dir, &job.job_id)
            .await?;

        // ── Step 4: Announce the metadata phase ──────────────────────────
        self.progress
            .save(&job.dir, &ProgressRecord::writing_metadata())
            .await?;

        // ── Step 5: Merge and persist metadata ───────────────────────────
        // Right-biased: conversion keys win, everything else survives.
        let existing = self.metadata.load_or_empty(&job.dir).await;
        let merged = metadata::merge(existing, outcome.metadata_record());
        self.metadata.save(&job.dir, &merged).await?;

        // ── Step 6: Terminal state ───────────────────────────────────────
        self.progress
            .save(&job.dir, &ProgressRecord::completed())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ConversionEngine, EngineImage, EngineOutput, ImagePayload};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct StubEngine {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl ConversionEngine for StubEngine {
        async fn convert(&self, _input: &Path) -> Result<EngineOutput, BookmillError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(EngineOutput {
                text: "# Title\n![](_page_0_Picture_0.png)\n".into(),
                images: vec![EngineImage {
                    id: "_page_0_Picture_0.png".into(),
                    payload: ImagePayload::Bytes(vec![0xff]),
                }],
                page_count: 3,
                metadata: json!({"engine": "stub"}).as_object().cloned().unwrap(),
            })
        }
    }

    struct FailingEngine;

    #[async_trait]
    impl ConversionEngine for FailingEngine {
        async fn convert(&self, _input: &Path) -> Result<EngineOutput, BookmillError> {
            Err(BookmillError::Engine {
                detail: "page 2 is unreadable".into(),
            })
        }
    }

    fn make_job(root: &Path, job_id: &str) -> DiscoveredJob {
        let dir = root.join(job_id);
        std::fs::create_dir_all(&dir).unwrap();
        let input = dir.join("originalbook.pdf");
        std::fs::write(&input, b"%PDF-1.4 fake").unwrap();
        DiscoveredJob {
            job_id: job_id.to_string(),
            dir,
            input,
        }
    }

    fn processor(engine: Arc<dyn ConversionEngine>) -> JobProcessor {
        JobProcessor::new(&ServiceConfig::default(), engine)
    }

    fn read_json(path: &Path) -> serde_json::Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn fresh_job_runs_to_completed() {
        let root = TempDir::new().unwrap();
        let job = make_job(root.path(), "job-a");
        let calls = Arc::new(AtomicUsize::new(0));
        let processor = processor(Arc::new(StubEngine {
            calls: Arc::clone(&calls),
        }));

        let outcome = processor.process(&job).await.unwrap();
        assert_eq!(outcome, ProcessOutcome::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let progress = read_json(&job.dir.join("pdf2markdown-progress.json"));
        assert_eq!(progress["status"], "completed");

        let text = std::fs::read_to_string(job.dir.join("originalbook.md")).unwrap();
        assert!(text.contains("![](images/_page_0_Picture_0.png)"));
        assert!(job.dir.join("images/_page_0_Picture_0.png").exists());

        let meta = read_json(&job.dir.join("bookmetadata.json"));
        assert_eq!(meta["total_pages"], 3);
        assert_eq!(meta["total_images"], 1);
        assert_eq!(meta["engine_metadata"]["engine"], "stub");
    }

    #[tokio::test]
    async fn completed_job_is_skipped_untouched() {
        let root = TempDir::new().unwrap();
        let job = make_job(root.path(), "job-b");
        let calls = Arc::new(AtomicUsize::new(0));
        let processor = processor(Arc::new(StubEngine {
            calls: Arc::clone(&calls),
        }));

        let progress_path = job.dir.join("pdf2markdown-progress.json");
        let output_path = job.dir.join("originalbook.md");
        let meta_path = job.dir.join("bookmetadata.json");
        std::fs::write(&progress_path, "{\"status\": \"completed\"}").unwrap();
        std::fs::write(&output_path, "the earlier output").unwrap();
        std::fs::write(&meta_path, "{\"title\": \"kept\"}").unwrap();

        let outcome = processor.process(&job).await.unwrap();
        assert_eq!(
            outcome,
            ProcessOutcome::Skipped {
                status: JobStatus::Completed
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0, "engine must not run");

        // Byte-for-byte untouched.
        assert_eq!(
            std::fs::read_to_string(&progress_path).unwrap(),
            "{\"status\": \"completed\"}"
        );
        assert_eq!(
            std::fs::read_to_string(&output_path).unwrap(),
            "the earlier output"
        );
        assert_eq!(
            std::fs::read_to_string(&meta_path).unwrap(),
            "{\"title\": \"kept\"}"
        );
    }

    #[tokio::test]
    async fn failed_job_is_retried_by_default() {
        let root = TempDir::new().unwrap();
        let job = make_job(root.path(), "job-c");
        std::fs::write(
            job.dir.join("pdf2markdown-progress.json"),
            "{\"status\": \"failed\", \"error\": \"earlier run\"}",
        )
        .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let processor = processor(Arc::new(StubEngine {
            calls: Arc::clone(&calls),
        }));
        let outcome = processor.process(&job).await.unwrap();

        assert_eq!(outcome, ProcessOutcome::Completed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_disabled_skip_failed_and_stale_jobs() {
        let root = TempDir::new().unwrap();
        let config = ServiceConfig::builder()
            .retry_incomplete(false)
            .build()
            .unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let processor = JobProcessor::new(
            &config,
            Arc::new(StubEngine {
                calls: Arc::clone(&calls),
            }),
        );

        for (id, record, expected) in [
            (
                "stuck",
                "{\"status\": \"processing\", \"step\": \"converting\"}",
                JobStatus::Processing,
            ),
            (
                "broken",
                "{\"status\": \"failed\", \"error\": \"x\"}",
                JobStatus::Failed,
            ),
        ] {
            let job = make_job(root.path(), id);
            std::fs::write(job.dir.join("pdf2markdown-progress.json"), record).unwrap();
            let outcome = processor.process(&job).await.unwrap();
            assert_eq!(outcome, ProcessOutcome::Skipped { status: expected });
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stale_processing_record_is_reprocessed() {
        let root = TempDir::new().unwrap();
        let job = make_job(root.path(), "job-d");
        // Simulates a crash mid-conversion.
        std::fs::write(
            job.dir.join("pdf2markdown-progress.json"),
            "{\"status\": \"processing\", \"step\": \"converting\"}",
        )
        .unwrap();

        let processor = processor(Arc::new(StubEngine {
            calls: Arc::new(AtomicUsize::new(0)),
        }));
        let outcome = processor.process(&job).await.unwrap();

        assert_eq!(outcome, ProcessOutcome::Completed);
        let progress = read_json(&job.dir.join("pdf2markdown-progress.json"));
        assert_eq!(progress["status"], "completed");
    }

    #[tokio::test]
    async fn engine_failure_lands_in_failed_record() {
        let root = TempDir::new().unwrap();
        let job = make_job(root.path(), "job-e");
        let processor = processor(Arc::new(FailingEngine));

        let outcome = processor.process(&job).await.unwrap();
        match outcome {
            ProcessOutcome::Failed { error } => {
                assert!(error.contains("page 2 is unreadable"), "error: {error}")
            }
            other => panic!("expected Failed, got {other:?}"),
        }

        let progress = read_json(&job.dir.join("pdf2markdown-progress.json"));
        assert_eq!(progress["status"], "failed");
        assert!(progress["error"]
            .as_str()
            .unwrap()
            .contains("page 2 is unreadable"));
        assert!(!job.dir.join("originalbook.md").exists());
    }

    #[tokio::test]
    async fn corrupt_progress_record_propagates() {
        let root = TempDir::new().unwrap();
        let job = make_job(root.path(), "job-f");
        std::fs::write(job.dir.join("pdf2markdown-progress.json"), "not json at all").unwrap();

        let processor = processor(Arc::new(StubEngine {
            calls: Arc::new(AtomicUsize::new(0)),
        }));
        let err = processor.process(&job).await.unwrap_err();
        assert!(
            matches!(err, BookmillError::ProgressParse { .. }),
            "got: {err}"
        );
    }

    #[tokio::test]
    async fn prior_metadata_survives_the_merge() {
        let root = TempDir::new().unwrap();
        let job = make_job(root.path(), "job-g");
        std::fs::write(
            job.dir.join("bookmetadata.json"),
            "{\"title\": \"Moby Dick\", \"total_pages\": 999}",
        )
        .unwrap();

        let processor = processor(Arc::new(StubEngine {
            calls: Arc::new(AtomicUsize::new(0)),
        }));
        processor.process(&job).await.unwrap();

        let meta = read_json(&job.dir.join("bookmetadata.json"));
        assert_eq!(meta["title"], "Moby Dick", "caller-supplied key survives");
        assert_eq!(meta["total_pages"], 3, "conversion key wins");
    }

    #[test]
    fn output_filename_uses_the_input_stem() {
        assert_eq!(output_filename(Path::new("/x/originalbook.pdf")), "originalbook.md");
        assert_eq!(output_filename(Path::new("manuscript.epub")), "manuscript.md");
    }
}
