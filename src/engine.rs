//! The conversion-engine seam.
//!
//! Everything the service knows about the actual document transformation
//! passes through [`ConversionEngine`]: one call in, one [`EngineOutput`]
//! out. The Job Processor never learns which engine sits behind the trait,
//! so swapping a local binary for a network service (or a stub in tests)
//! touches nothing but construction.
//!
//! [`CommandEngine`] is the shipped implementation: it runs an external
//! command per document and reads the result as one JSON object from stdout:
//!
//! ```json
//! {
//!   "text": "# Title\n...",
//!   "images": [{"id": "_page_0_Picture_1.png", "data": "<base64>"}],
//!   "page_count": 12,
//!   "metadata": {"engine": "marker", "ocr": true}
//! }
//! ```
//!
//! Nonzero exit or undecodable stdout becomes an engine error, which the Job
//! Processor records as the job's failure.

use crate::error::BookmillError;
use async_trait::async_trait;
use serde::Deserialize;
use std::fmt;
use std::path::Path;
use tokio::process::Command;

/// One embedded image as handed back by an engine.
#[derive(Debug, Clone)]
pub struct EngineImage {
    /// Engine-internal identifier, also the filename the image is saved
    /// under (`_page_<N>_Picture_<M>.<ext>`).
    pub id: String,
    pub payload: ImagePayload,
}

/// The payload representations engines are allowed to hand back.
#[derive(Clone)]
pub enum ImagePayload {
    /// Already-decoded raster, re-encoded on save according to the id's
    /// extension.
    Decoded(image::DynamicImage),
    /// Encoded bytes (PNG/JPEG/...), written verbatim.
    Bytes(Vec<u8>),
    /// Inline base64, optionally carrying a `data:...;base64,` prefix.
    Encoded(String),
}

impl fmt::Debug for ImagePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImagePayload::Decoded(img) => {
                write!(f, "Decoded({}x{})", img.width(), img.height())
            }
            ImagePayload::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            ImagePayload::Encoded(s) => write!(f, "Encoded({} chars)", s.len()),
        }
    }
}

/// Everything one engine invocation produces.
#[derive(Debug, Clone, Default)]
pub struct EngineOutput {
    /// The converted document text, possibly containing placeholder image
    /// references (see [`crate::markdown::rewrite_image_references`]).
    pub text: String,
    pub images: Vec<EngineImage>,
    pub page_count: usize,
    /// Engine-specific metadata, nested verbatim under `engine_metadata` in
    /// the job's metadata record.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// The narrow interface to the external conversion engine.
#[async_trait]
pub trait ConversionEngine: Send + Sync {
    /// Convert one document. Called exactly once per processing pass.
    async fn convert(&self, input: &Path) -> Result<EngineOutput, BookmillError>;
}

// ── CommandEngine ────────────────────────────────────────────────────────────

/// Runs an external command per document: `<program> [args...] <input_path>`.
#[derive(Debug, Clone)]
pub struct CommandEngine {
    program: String,
    args: Vec<String>,
}

impl CommandEngine {
    /// Split a command line on whitespace: first token is the program, the
    /// rest are fixed arguments, the input path is appended per call. No
    /// shell is involved, so there is no quoting; use a wrapper script for
    /// arguments containing spaces.
    pub fn new(command: &str) -> Result<Self, BookmillError> {
        let mut parts = command.split_whitespace().map(String::from);
        let program = parts.next().ok_or_else(|| BookmillError::EngineInit {
            detail: "empty command".into(),
        })?;
        Ok(Self {
            program,
            args: parts.collect(),
        })
    }

    /// The command line as configured, for logging.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Stdout contract of the external command.
#[derive(Deserialize)]
struct WireOutput {
    text: String,
    #[serde(default)]
    images: Vec<WireImage>,
    #[serde(default)]
    page_count: usize,
    #[serde(default)]
    metadata: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct WireImage {
    id: String,
    /// Base64, with or without a `data:` prefix.
    data: String,
}

impl From<WireOutput> for EngineOutput {
    fn from(wire: WireOutput) -> Self {
        EngineOutput {
            text: wire.text,
            images: wire
                .images
                .into_iter()
                .map(|img| EngineImage {
                    id: img.id,
                    payload: ImagePayload::Encoded(img.data),
                })
                .collect(),
            page_count: wire.page_count,
            metadata: wire.metadata,
        }
    }
}

#[async_trait]
impl ConversionEngine for CommandEngine {
    async fn convert(&self, input: &Path) -> Result<EngineOutput, BookmillError> {
        let output = Command::new(&self.program)
            .args(&self.args)
            .arg(input)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| BookmillError::EngineSpawn {
                command: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stderr = stderr.trim();
            let mut detail = format!("'{}' exited with {}", self.program, output.status);
            if !stderr.is_empty() {
                detail.push_str(": ");
                detail.push_str(stderr);
            }
            return Err(BookmillError::Engine { detail });
        }

        let wire: WireOutput =
            serde_json::from_slice(&output.stdout).map_err(|e| BookmillError::EngineProtocol {
                detail: format!("stdout is not a valid result object: {e}"),
            })?;
        Ok(wire.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_command_fails_construction() {
        let err = CommandEngine::new("   ").unwrap_err();
        assert!(matches!(err, BookmillError::EngineInit { .. }), "got: {err}");
    }

    #[test]
    fn command_line_round_trips_program_and_args() {
        let engine = CommandEngine::new("marker --fast --lang en").unwrap();
        assert_eq!(engine.command_line(), "marker --fast --lang en");
    }

    #[tokio::test]
    async fn missing_binary_reports_spawn_error() {
        let engine = CommandEngine::new("bookmill-no-such-engine").unwrap();
        let err = engine.convert(Path::new("/dev/null")).await.unwrap_err();
        assert!(matches!(err, BookmillError::EngineSpawn { .. }), "got: {err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn nonzero_exit_reports_engine_error() {
        let engine = CommandEngine::new("false").unwrap();
        let err = engine.convert(Path::new("/dev/null")).await.unwrap_err();
        assert!(matches!(err, BookmillError::Engine { .. }), "got: {err}");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_json_stdout_reports_protocol_error() {
        // `echo <path>` exits 0 but prints the path, not a result object.
        let engine = CommandEngine::new("echo").unwrap();
        let err = engine.convert(Path::new("/dev/null")).await.unwrap_err();
        assert!(
            matches!(err, BookmillError::EngineProtocol { .. }),
            "got: {err}"
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn valid_stdout_parses_into_engine_output() {
        use base64::Engine as _;

        // `cat <input>` replays the file, so the "document" holds the wire
        // JSON the engine is expected to print.
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("originalbook.pdf");
        let data = base64::engine::general_purpose::STANDARD.encode(b"pixels");
        std::fs::write(
            &input,
            serde_json::json!({
                "text": "# Title\n![](_page_0_Picture_0.png)\n",
                "images": [{"id": "_page_0_Picture_0.png", "data": data}],
                "page_count": 3,
                "metadata": {"engine": "stub"},
            })
            .to_string(),
        )
        .unwrap();

        let engine = CommandEngine::new("cat").unwrap();
        let out = engine.convert(&input).await.unwrap();
        assert_eq!(out.page_count, 3);
        assert_eq!(out.images.len(), 1);
        assert_eq!(out.images[0].id, "_page_0_Picture_0.png");
        assert!(out.text.starts_with("# Title"));
        assert_eq!(out.metadata["engine"], "stub");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn missing_optional_fields_default() {
        let dir = tempfile::TempDir::new().unwrap();
        let input = dir.path().join("minimal.pdf");
        std::fs::write(&input, "{\"text\": \"hello\"}").unwrap();

        let engine = CommandEngine::new("cat").unwrap();
        let out = engine.convert(&input).await.unwrap();
        assert_eq!(out.text, "hello");
        assert!(out.images.is_empty());
        assert_eq!(out.page_count, 0);
        assert!(out.metadata.is_empty());
    }
}
