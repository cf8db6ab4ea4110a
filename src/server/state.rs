//! Shared application state for the HTTP handlers.

use crate::config::ServiceConfig;
use crate::process::JobProcessor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cheap-to-clone handle passed to every handler.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: ServiceConfig,
    processor: Arc<JobProcessor>,
    worker_started: Arc<AtomicBool>,
}

impl AppState {
    /// `worker_started` is the flag handed out by
    /// [`crate::worker::Worker::started_flag`]; the ping endpoint reports
    /// `starting` until the loop flips it.
    pub fn new(
        config: ServiceConfig,
        processor: Arc<JobProcessor>,
        worker_started: Arc<AtomicBool>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                processor,
                worker_started,
            }),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.inner.config
    }

    pub fn processor(&self) -> &JobProcessor {
        &self.inner.processor
    }

    pub fn worker_started(&self) -> bool {
        self.inner.worker_started.load(Ordering::SeqCst)
    }
}
