//! The Conversion Adapter: one engine call turned into files on disk.
//!
//! The adapter owns everything between "here is an input document" and "the
//! job directory holds the output text and its images": it runs the engine,
//! persists each returned image payload, rewrites the placeholder references
//! inside the text, applies the contents-section formatting, and writes the
//! final text atomically.
//!
//! Failure handling is deliberately asymmetric. An engine failure is the
//! job's failure and propagates unchanged to the Job Processor. A single
//! image that cannot be decoded or written is logged, recorded in
//! [`ConversionOutcome::image_failures`], and skipped; its reference in the
//! text still gets a fallback path so the document never ships a bare
//! placeholder.

use crate::config::ServiceConfig;
use crate::engine::{ConversionEngine, EngineImage, ImagePayload};
use crate::error::{BookmillError, ImageError};
use crate::markdown::{format_contents_sections, rewrite_image_references};
use crate::storage::write_atomic;
use base64::Engine as _;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// What one conversion pass produced, in the shape the metadata record wants.
#[derive(Debug, Clone)]
pub struct ConversionOutcome {
    /// Page count as reported by the engine.
    pub total_pages: usize,
    /// Images actually persisted (failures excluded).
    pub total_images: usize,
    /// Where the output text was written.
    pub output_file: PathBuf,
    /// The image directory, or `None` when extraction is disabled.
    pub image_directory: Option<PathBuf>,
    /// Engine metadata, passed through verbatim.
    pub engine_metadata: Map<String, Value>,
    /// Images that were skipped, for callers that want to report them.
    pub image_failures: Vec<ImageError>,
}

impl ConversionOutcome {
    /// The conversion's contribution to the job's metadata record.
    ///
    /// Right-merged over any prior record by the Job Processor, so exactly
    /// these keys are conversion-owned.
    pub fn metadata_record(&self) -> Map<String, Value> {
        let mut record = Map::new();
        record.insert("total_pages".into(), self.total_pages.into());
        record.insert("total_images".into(), self.total_images.into());
        record.insert(
            "output_file".into(),
            Value::String(self.output_file.to_string_lossy().into_owned()),
        );
        record.insert(
            "image_directory".into(),
            match &self.image_directory {
                Some(dir) => Value::String(dir.to_string_lossy().into_owned()),
                None => Value::Null,
            },
        );
        record.insert(
            "engine_metadata".into(),
            Value::Object(self.engine_metadata.clone()),
        );
        record
    }
}

/// Wraps the engine and materializes its output into a job directory.
#[derive(Clone)]
pub struct ConversionAdapter {
    engine: Arc<dyn ConversionEngine>,
    extract_images: bool,
    format_contents: bool,
    image_dir_name: String,
}

impl fmt::Debug for ConversionAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionAdapter")
            .field("engine", &"<dyn ConversionEngine>")
            .field("extract_images", &self.extract_images)
            .field("format_contents", &self.format_contents)
            .field("image_dir_name", &self.image_dir_name)
            .finish()
    }
}

impl ConversionAdapter {
    pub fn new(config: &ServiceConfig, engine: Arc<dyn ConversionEngine>) -> Self {
        Self {
            engine,
            extract_images: config.extract_images,
            format_contents: config.format_contents,
            image_dir_name: config.image_dir_name.clone(),
        }
    }

    /// Convert `input`, writing the text to `output` and images under
    /// `image_dir`. Calls the engine exactly once.
    pub async fn convert(
        &self,
        input: &Path,
        output: &Path,
        image_dir: &Path,
        job_id: &str,
    ) -> Result<ConversionOutcome, BookmillError> {
        // ── Step 1: Run the engine ───────────────────────────────────────
        let engine_output = self.engine.convert(input).await?;
        info!(
            job_id,
            "engine produced {} pages, {} images, {} bytes of text",
            engine_output.page_count,
            engine_output.images.len(),
            engine_output.text.len()
        );

        // ── Step 2: Persist images ───────────────────────────────────────
        let (resolved, image_failures) =
            if self.extract_images && !engine_output.images.is_empty() {
                self.save_images(&engine_output.images, image_dir, job_id)
                    .await?
            } else {
                (HashMap::new(), Vec::new())
            };

        // ── Step 3: Rewrite references ───────────────────────────────────
        // Runs even when nothing was extracted so unextracted references
        // still pick up their fallback paths.
        let mut text =
            rewrite_image_references(&engine_output.text, &resolved, &self.image_dir_name);

        // ── Step 4: Contents formatting ──────────────────────────────────
        if self.format_contents {
            text = format_contents_sections(&text);
        }

        // ── Step 5: Write the output text ────────────────────────────────
        write_atomic(output, text.as_bytes())
            .await
            .map_err(|source| BookmillError::OutputWrite {
                path: output.to_path_buf(),
                source,
            })?;

        Ok(ConversionOutcome {
            total_pages: engine_output.page_count,
            total_images: resolved.len(),
            output_file: output.to_path_buf(),
            image_directory: self.extract_images.then(|| image_dir.to_path_buf()),
            engine_metadata: engine_output.metadata,
            image_failures,
        })
    }

    /// Save every payload, collecting per-image failures instead of
    /// propagating them. Only the directory creation itself is fatal.
    async fn save_images(
        &self,
        images: &[EngineImage],
        image_dir: &Path,
        job_id: &str,
    ) -> Result<(HashMap<String, String>, Vec<ImageError>), BookmillError> {
        tokio::fs::create_dir_all(image_dir)
            .await
            .map_err(|source| BookmillError::ImageDir {
                path: image_dir.to_path_buf(),
                source,
            })?;

        let mut resolved = HashMap::new();
        let mut failures = Vec::new();
        for image in images {
            match save_one(image, image_dir).await {
                Ok(()) => {
                    resolved.insert(
                        image.id.clone(),
                        format!("{}/{}", self.image_dir_name, image.id),
                    );
                }
                Err(failure) => {
                    warn!(job_id, error = %failure, "skipping image");
                    failures.push(failure);
                }
            }
        }
        Ok((resolved, failures))
    }
}

/// Persist a single payload under its identifier.
async fn save_one(image: &EngineImage, image_dir: &Path) -> Result<(), ImageError> {
    // The id doubles as the filename; anything that is not a plain filename
    // could land outside the image directory.
    if image.id.is_empty() || image.id.contains(['/', '\\']) || image.id == ".." {
        return Err(ImageError::InvalidId {
            id: image.id.clone(),
        });
    }
    let path = image_dir.join(&image.id);

    let bytes = match &image.payload {
        ImagePayload::Decoded(img) => {
            let format = match Path::new(&image.id).extension().and_then(|e| e.to_str()) {
                Some(ext) if ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg") => {
                    image::ImageFormat::Jpeg
                }
                _ => image::ImageFormat::Png,
            };
            let mut buf = std::io::Cursor::new(Vec::new());
            img.write_to(&mut buf, format)
                .map_err(|e| ImageError::DecodeFailed {
                    id: image.id.clone(),
                    detail: format!("re-encoding failed: {e}"),
                })?;
            buf.into_inner()
        }
        ImagePayload::Bytes(bytes) => bytes.clone(),
        ImagePayload::Encoded(data) => {
            let b64 = match data.strip_prefix("data:") {
                Some(rest) => match rest.split_once(',') {
                    Some((_, b64)) => b64,
                    None => {
                        return Err(ImageError::DecodeFailed {
                            id: image.id.clone(),
                            detail: "data: URL without a comma separator".into(),
                        })
                    }
                },
                None => data.as_str(),
            };
            // Engines wrap base64 at arbitrary columns; strip all whitespace
            // before decoding.
            let compact: String = b64.chars().filter(|c| !c.is_whitespace()).collect();
            base64::engine::general_purpose::STANDARD
                .decode(compact)
                .map_err(|e| ImageError::DecodeFailed {
                    id: image.id.clone(),
                    detail: e.to_string(),
                })?
        }
    };

    tokio::fs::write(&path, bytes)
        .await
        .map_err(|e| ImageError::WriteFailed {
            id: image.id.clone(),
            detail: e.to_string(),
        })
}
