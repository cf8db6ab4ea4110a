//! The Worker Loop: scan, process, record, repeat.
//!
//! One iteration is one full scan of the storage root. Every discovered job
//! is bracketed by a `service-start` and a `service-stop` event and routed
//! through the [`JobProcessor`]; the stop event carries `result: "success"`
//! or `result: "error"` plus the message. Event recording failures are
//! warnings, job failures are per-job outcomes: the only errors that escape
//! [`Worker::run`] are storage-root failures, which leave nothing to loop
//! over.
//!
//! Pacing: a pass that completed at least one job rescans immediately to
//! drain whatever backlog remains. Every other pass (nothing found, or only
//! skips and failures) sleeps `poll_interval` first, so a storage root full
//! of finished or poisoned jobs polls at a steady cadence instead of
//! spinning.

use crate::config::ServiceConfig;
use crate::error::BookmillError;
use crate::events::{EventRecorder, TOPIC_START, TOPIC_STOP};
use crate::process::{JobProcessor, ProcessOutcome};
use crate::scan::{DiscoveredJob, JobScanner};
use futures::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What one scan pass did, for pacing and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanSummary {
    /// Jobs the scanner yielded.
    pub discovered: usize,
    /// Jobs that reached `completed` this pass.
    pub completed: usize,
    /// Jobs that failed this pass (including corrupt progress records).
    pub failed: usize,
    /// Jobs vetoed by their progress record.
    pub skipped: usize,
}

/// The top-level scheduling loop.
pub struct Worker {
    config: ServiceConfig,
    scanner: JobScanner,
    processor: Arc<JobProcessor>,
    recorder: EventRecorder,
    started: Arc<AtomicBool>,
}

impl Worker {
    pub fn new(config: ServiceConfig, processor: Arc<JobProcessor>) -> Self {
        let scanner = JobScanner::new(&config);
        let recorder = EventRecorder::new(&config);
        Self {
            config,
            scanner,
            processor,
            recorder,
            started: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Handle to the started flag, flipped once the loop is actually
    /// scanning. The health endpoint reports `starting` until then.
    pub fn started_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.started)
    }

    /// One full scan: discover, process with bounded parallelism, summarize.
    ///
    /// Per-job ordering (start event, process, stop event) is preserved
    /// inside each job's future; only distinct jobs overlap.
    pub async fn poll_once(&self) -> Result<ScanSummary, BookmillError> {
        let jobs = self.scanner.scan().await?;
        let results: Vec<Result<ProcessOutcome, BookmillError>> = jobs
            .map(|job| {
                let processor = Arc::clone(&self.processor);
                let recorder = self.recorder.clone();
                async move { run_job(&processor, &recorder, job).await }
            })
            .buffer_unordered(self.config.max_concurrent_jobs)
            .collect()
            .await;

        let mut summary = ScanSummary::default();
        for result in results {
            summary.discovered += 1;
            match result {
                Ok(ProcessOutcome::Completed) => summary.completed += 1,
                Ok(ProcessOutcome::Skipped { .. }) => summary.skipped += 1,
                Ok(ProcessOutcome::Failed { .. }) => summary.failed += 1,
                Err(_) => summary.failed += 1,
            }
        }
        Ok(summary)
    }

    /// Run until `shutdown` is cancelled or the storage root becomes
    /// unusable.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), BookmillError> {
        tokio::fs::create_dir_all(&self.config.storage_root)
            .await
            .map_err(|source| BookmillError::StorageRoot {
                path: self.config.storage_root.clone(),
                source,
            })?;
        info!(root = %self.config.storage_root.display(), "worker starting");
        self.started.store(true, Ordering::SeqCst);

        loop {
            if shutdown.is_cancelled() {
                break;
            }
            let summary = self.poll_once().await?;
            if summary.discovered == 0 {
                debug!("no jobs found, sleeping");
            } else if summary.completed > 0 || summary.failed > 0 {
                info!(
                    completed = summary.completed,
                    failed = summary.failed,
                    skipped = summary.skipped,
                    "scan pass finished"
                );
            }

            // Only a completion hints at remaining backlog; a pass of skips
            // or repeated failures would otherwise rescan in a tight loop.
            if summary.completed == 0 {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = tokio::time::sleep(self.config.poll_interval) => {}
                }
            }
        }
        info!("worker stopped");
        Ok(())
    }
}

/// Process one job between its start and stop events.
async fn run_job(
    processor: &JobProcessor,
    recorder: &EventRecorder,
    job: DiscoveredJob,
) -> Result<ProcessOutcome, BookmillError> {
    if let Err(e) = recorder
        .record(TOPIC_START, &job.job_id, serde_json::Map::new())
        .await
    {
        warn!(job_id = %job.job_id, error = %e, "could not record start event");
    }

    let outcome = processor.process(&job).await;

    let mut extra = serde_json::Map::new();
    match &outcome {
        Ok(ProcessOutcome::Completed) | Ok(ProcessOutcome::Skipped { .. }) => {
            extra.insert("result".into(), "success".into());
        }
        Ok(ProcessOutcome::Failed { error }) => {
            extra.insert("result".into(), "error".into());
            extra.insert("error".into(), error.as_str().into());
        }
        Err(e) => {
            error!(job_id = %job.job_id, error = %e, "job could not be processed");
            extra.insert("result".into(), "error".into());
            extra.insert("error".into(), e.to_string().into());
        }
    }
    if let Err(e) = recorder.record(TOPIC_STOP, &job.job_id, extra).await {
        warn!(job_id = %job.job_id, error = %e, "could not record stop event");
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ConversionEngine, EngineOutput};
    use async_trait::async_trait;
    use serde_json::Map;
    use std::path::Path;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Succeeds unless the input file contains the word "poison".
    struct ContentEngine;

    #[async_trait]
    impl ConversionEngine for ContentEngine {
        async fn convert(&self, input: &Path) -> Result<EngineOutput, BookmillError> {
            let raw = tokio::fs::read_to_string(input).await.map_err(|e| {
                BookmillError::Engine {
                    detail: e.to_string(),
                }
            })?;
            if raw.contains("poison") {
                return Err(BookmillError::Engine {
                    detail: "poisoned document".into(),
                });
            }
            Ok(EngineOutput {
                text: "converted".into(),
                images: vec![],
                page_count: 1,
                metadata: Map::new(),
            })
        }
    }

    fn worker_for(root: &Path) -> Worker {
        let config = ServiceConfig::builder()
            .storage_root(root)
            .poll_interval(Duration::from_millis(20))
            .build()
            .unwrap();
        let processor = Arc::new(JobProcessor::new(&config, Arc::new(ContentEngine)));
        Worker::new(config, processor)
    }

    fn seed_job(root: &Path, job_id: &str, body: &str) {
        let dir = root.join(job_id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("originalbook.pdf"), body).unwrap();
    }

    fn stop_events(root: &Path) -> Vec<serde_json::Value> {
        let mut events = vec![];
        for entry in std::fs::read_dir(root.join("events")).unwrap() {
            let path = entry.unwrap().path();
            if path.file_name().unwrap().to_str().unwrap().contains("service-stop") {
                events.push(serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap());
            }
        }
        events
    }

    #[tokio::test]
    async fn one_failing_job_does_not_block_the_others() {
        let root = TempDir::new().unwrap();
        seed_job(root.path(), "good", "fine document");
        seed_job(root.path(), "bad", "poison in here");

        let summary = worker_for(root.path()).poll_once().await.unwrap();
        assert_eq!(summary.discovered, 2);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);

        let good: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(root.path().join("good/pdf2markdown-progress.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(good["status"], "completed");

        let bad: serde_json::Value = serde_json::from_str(
            &std::fs::read_to_string(root.path().join("bad/pdf2markdown-progress.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(bad["status"], "failed");
    }

    #[tokio::test]
    async fn every_discovered_job_gets_start_and_stop_events() {
        let root = TempDir::new().unwrap();
        seed_job(root.path(), "fresh", "fine");
        seed_job(root.path(), "done", "fine");
        std::fs::write(
            root.path().join("done/pdf2markdown-progress.json"),
            "{\"status\": \"completed\"}",
        )
        .unwrap();

        let summary = worker_for(root.path()).poll_once().await.unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.skipped, 1);

        // 2 start + 2 stop, skips included.
        let count = std::fs::read_dir(root.path().join("events")).unwrap().count();
        assert_eq!(count, 4);
        for event in stop_events(root.path()) {
            assert_eq!(event["result"], "success");
            assert_eq!(event["service"], "pdf2markdown");
        }
    }

    #[tokio::test]
    async fn failed_job_stop_event_carries_the_error() {
        let root = TempDir::new().unwrap();
        seed_job(root.path(), "bad", "poison");

        worker_for(root.path()).poll_once().await.unwrap();

        let stops = stop_events(root.path());
        assert_eq!(stops.len(), 1);
        assert_eq!(stops[0]["result"], "error");
        assert!(
            stops[0]["error"].as_str().unwrap().contains("poisoned"),
            "event: {}",
            stops[0]
        );
    }

    #[tokio::test]
    async fn corrupt_progress_record_fails_the_job_not_the_pass() {
        let root = TempDir::new().unwrap();
        seed_job(root.path(), "corrupt", "fine");
        seed_job(root.path(), "ok", "fine");
        std::fs::write(
            root.path().join("corrupt/pdf2markdown-progress.json"),
            "}{ definitely not json",
        )
        .unwrap();

        let summary = worker_for(root.path()).poll_once().await.unwrap();
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.failed, 1);

        let stops = stop_events(root.path());
        assert!(stops
            .iter()
            .any(|e| e["result"] == "error" && e["bookId"] == "corrupt"));
    }

    #[tokio::test]
    async fn run_creates_the_root_flips_started_and_honors_cancel() {
        let root = TempDir::new().unwrap();
        let storage = root.path().join("nested/storage");
        let worker = Arc::new(worker_for(&storage));
        let started = worker.started_flag();
        assert!(!started.load(Ordering::SeqCst));

        let token = CancellationToken::new();
        let handle = {
            let worker = Arc::clone(&worker);
            let token = token.clone();
            tokio::spawn(async move { worker.run(token).await })
        };

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(started.load(Ordering::SeqCst));
        assert!(storage.is_dir());

        token.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn unusable_storage_root_is_fatal() {
        let root = TempDir::new().unwrap();
        let file_in_the_way = root.path().join("not-a-dir");
        std::fs::write(&file_in_the_way, "occupied").unwrap();

        let worker = worker_for(&file_in_the_way);
        let err = worker.run(CancellationToken::new()).await.unwrap_err();
        assert!(
            matches!(err, BookmillError::StorageRoot { .. }),
            "got: {err}"
        );
    }
}
