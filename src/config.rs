//! Configuration for the bookmill job service.
//!
//! All behaviour is controlled through [`ServiceConfig`], built via its
//! [`ServiceConfigBuilder`]. Keeping every knob in one struct makes it trivial
//! to share the config across the worker, the HTTP server, and tests, and to
//! construct isolated instances over throwaway storage roots instead of
//! relying on process-wide state.
//!
//! The only environment override is `STORAGE_ROOT` (see
//! [`ServiceConfig::from_env`]); everything else is a fixed default until a
//! caller sets it explicitly.

use crate::error::BookmillError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for one service instance.
///
/// Built via [`ServiceConfig::builder()`] or [`ServiceConfig::default()`].
///
/// # Example
/// ```rust
/// use bookmill::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .storage_root("/var/lib/bookmill")
///     .max_concurrent_jobs(4)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Directory holding one subdirectory per job plus the shared events
    /// directory. Default: `./storage`.
    ///
    /// Everything the service persists lives under this root, so pointing two
    /// instances at the same root means they will race over the same jobs.
    /// One worker per root.
    pub storage_root: PathBuf,

    /// Filename that marks a job directory as submitted. Default: `originalbook.pdf`.
    ///
    /// The scanner yields exactly the immediate subdirectories of
    /// `storage_root` that contain a file with this name. Writers create the
    /// directory first and this file last, so a half-created job is never
    /// discovered.
    pub input_filename: String,

    /// Per-job progress record filename. Default: `pdf2markdown-progress.json`.
    pub progress_filename: String,

    /// Per-job metadata record filename. Default: `bookmetadata.json`.
    pub metadata_filename: String,

    /// Name of the per-job subdirectory for extracted images. Default: `images`.
    ///
    /// Also the directory prefix used when rewriting image references inside
    /// the output text, so renaming it changes the produced Markdown.
    pub image_dir_name: String,

    /// Name of the shared event directory under the storage root. Default: `events`.
    pub events_dir_name: String,

    /// Service name stamped into every lifecycle event. Default: `pdf2markdown`.
    pub service_name: String,

    /// How long the worker sleeps after a scan that found no jobs. Default: 10 s.
    ///
    /// The worker only sleeps when idle; as long as a scan finds work it
    /// rescans immediately, so this bounds pickup latency for a freshly
    /// submitted job, not throughput. Clamped to at least 100 ms.
    pub poll_interval: Duration,

    /// Extract embedded images and rewrite references to them. Default: true.
    ///
    /// With this off the engine's text is still reference-rewritten (to
    /// fallback paths) but nothing is written to disk, and the metadata
    /// record carries `image_directory: null`.
    pub extract_images: bool,

    /// Split multi-link lines under a `Contents` heading one link per line. Default: true.
    pub format_contents: bool,

    /// Reprocess jobs whose persisted status is `failed` or a stale
    /// `processing`. Default: true.
    ///
    /// `completed` jobs are always skipped. With this off, only jobs with no
    /// record (or an explicit `pending`) are picked up, so a crashed run
    /// stays parked until someone resets it.
    pub retry_incomplete: bool,

    /// Jobs processed in parallel within one scan. Default: 1.
    ///
    /// Per-job ordering is preserved regardless; raising this only helps when
    /// the engine itself can run several documents at once. Scans never
    /// overlap each other.
    pub max_concurrent_jobs: usize,

    /// Address the HTTP API binds to. Default: `0.0.0.0:3000`.
    pub bind_addr: SocketAddr,

    /// Upload size cap in bytes for the HTTP API. Default: 100 MiB.
    pub max_upload_bytes: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("./storage"),
            input_filename: "originalbook.pdf".to_string(),
            progress_filename: "pdf2markdown-progress.json".to_string(),
            metadata_filename: "bookmetadata.json".to_string(),
            image_dir_name: "images".to_string(),
            events_dir_name: "events".to_string(),
            service_name: "pdf2markdown".to_string(),
            poll_interval: Duration::from_secs(10),
            extract_images: true,
            format_contents: true,
            retry_incomplete: true,
            max_concurrent_jobs: 1,
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3000)),
            max_upload_bytes: 100 * 1024 * 1024,
        }
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// Defaults plus the single supported environment override:
    /// `STORAGE_ROOT` relocates the storage root.
    pub fn from_env() -> Result<Self, BookmillError> {
        let mut builder = Self::builder();
        if let Ok(root) = std::env::var("STORAGE_ROOT") {
            builder = builder.storage_root(root);
        }
        builder.build()
    }

    // ── Derived paths ─────────────────────────────────────────────────────

    /// Directory lifecycle events are appended to.
    pub fn events_dir(&self) -> PathBuf {
        self.storage_root.join(&self.events_dir_name)
    }

    /// Directory for the given job id.
    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.storage_root.join(job_id)
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.storage_root = root.into();
        self
    }

    pub fn input_filename(mut self, name: impl Into<String>) -> Self {
        self.config.input_filename = name.into();
        self
    }

    pub fn progress_filename(mut self, name: impl Into<String>) -> Self {
        self.config.progress_filename = name.into();
        self
    }

    pub fn metadata_filename(mut self, name: impl Into<String>) -> Self {
        self.config.metadata_filename = name.into();
        self
    }

    pub fn image_dir_name(mut self, name: impl Into<String>) -> Self {
        self.config.image_dir_name = name.into();
        self
    }

    pub fn events_dir_name(mut self, name: impl Into<String>) -> Self {
        self.config.events_dir_name = name.into();
        self
    }

    pub fn service_name(mut self, name: impl Into<String>) -> Self {
        self.config.service_name = name.into();
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval.max(Duration::from_millis(100));
        self
    }

    pub fn extract_images(mut self, v: bool) -> Self {
        self.config.extract_images = v;
        self
    }

    pub fn format_contents(mut self, v: bool) -> Self {
        self.config.format_contents = v;
        self
    }

    pub fn retry_incomplete(mut self, v: bool) -> Self {
        self.config.retry_incomplete = v;
        self
    }

    pub fn max_concurrent_jobs(mut self, n: usize) -> Self {
        self.config.max_concurrent_jobs = n.max(1);
        self
    }

    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    pub fn max_upload_bytes(mut self, n: usize) -> Self {
        self.config.max_upload_bytes = n.max(1);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, BookmillError> {
        let c = &self.config;
        if c.storage_root.as_os_str().is_empty() {
            return Err(BookmillError::InvalidConfig(
                "storage_root must not be empty".into(),
            ));
        }
        for (field, value) in [
            ("input_filename", &c.input_filename),
            ("progress_filename", &c.progress_filename),
            ("metadata_filename", &c.metadata_filename),
            ("image_dir_name", &c.image_dir_name),
            ("events_dir_name", &c.events_dir_name),
        ] {
            if value.is_empty() {
                return Err(BookmillError::InvalidConfig(format!(
                    "{field} must not be empty"
                )));
            }
            if value.contains('/') || value.contains('\\') {
                return Err(BookmillError::InvalidConfig(format!(
                    "{field} must be a single path component, got '{value}'"
                )));
            }
        }
        if c.service_name.is_empty() {
            return Err(BookmillError::InvalidConfig(
                "service_name must not be empty".into(),
            ));
        }
        if c.max_concurrent_jobs == 0 {
            return Err(BookmillError::InvalidConfig(
                "max_concurrent_jobs must be ≥ 1".into(),
            ));
        }
        Ok(self.config)
    }
}
