//! Request handlers.
//!
//! Uploads land as job directories for the worker to find; reads go straight
//! to the files the worker wrote. Handlers return `Result<_, BookmillError>`
//! and let the error's `IntoResponse` impl shape the failure body.

use crate::error::BookmillError;
use crate::process::{output_filename, ProcessOutcome};
use crate::scan::DiscoveredJob;
use crate::server::archive::{archive_path, build_result_archive};
use crate::server::state::AppState;
use crate::storage::write_atomic;
use axum::extract::{Multipart, Path as UrlPath, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use uuid::Uuid;

/// `GET /ping`: 200 once the worker loop is scanning, 503 before that.
pub(super) async fn ping(State(state): State<AppState>) -> impl IntoResponse {
    if state.worker_started() {
        (StatusCode::OK, Json(json!({"status": "ok"})))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "starting"})),
        )
    }
}

/// `POST /api/jobs`: store the upload as a new job directory and hand back
/// the id. The worker picks it up on a later scan.
pub(super) async fn upload_job(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, BookmillError> {
    let upload = read_upload_field(multipart).await?;

    let job_id = Uuid::new_v4().to_string();
    let job_dir = state.config().job_dir(&job_id);
    tokio::fs::create_dir_all(&job_dir)
        .await
        .map_err(|source| BookmillError::JobCreate {
            path: job_dir.clone(),
            source,
        })?;

    // Atomic so a concurrent scan never sees a partially written input.
    let input = job_dir.join(&state.config().input_filename);
    write_atomic(&input, &upload.bytes)
        .await
        .map_err(|source| BookmillError::JobCreate {
            path: input.clone(),
            source,
        })?;

    info!(job_id, filename = %upload.filename, bytes = upload.bytes.len(), "job accepted");
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({"job_id": job_id, "status": "accepted"})),
    ))
}

/// `GET /api/jobs/:job_id/status`: the progress record's status, nothing
/// more. 404 when no such job directory exists.
pub(super) async fn job_status(
    State(state): State<AppState>,
    UrlPath(job_id): UrlPath<String>,
) -> Result<Json<serde_json::Value>, BookmillError> {
    let job_dir = checked_job_dir(&state, &job_id).await?;
    let record = state.processor().progress().load(&job_dir).await?;
    Ok(Json(json!({"status": record.status})))
}

/// `GET /api/jobs/:job_id/download`: the packaged result. 404 until the
/// output text exists; the archive is built on first request and reused.
pub(super) async fn download_result(
    State(state): State<AppState>,
    UrlPath(job_id): UrlPath<String>,
) -> Result<Response, BookmillError> {
    let job_dir = checked_job_dir(&state, &job_id).await?;
    let config = state.config();

    let output = job_dir.join(output_filename(Path::new(&config.input_filename)));
    if !is_file(&output).await {
        return Err(BookmillError::OutputMissing { job_id });
    }

    let archive = archive_path(&job_dir, &job_id);
    if !is_file(&archive).await {
        build_result_archive(config, &job_dir, &output, &job_id, &job_id).await?;
    }

    let bytes = tokio::fs::read(&archive)
        .await
        .map_err(|e| BookmillError::Archive {
            job_id: job_id.clone(),
            detail: format!("could not read archive: {e}"),
        })?;
    Ok(attachment_response(&format!("{job_id}_result.zip"), bytes))
}

/// `POST /convert`: the synchronous path. Same processor, same archive
/// layout, but a private directory that is deleted once the response bytes
/// are in hand.
pub(super) async fn convert_sync(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, BookmillError> {
    let upload = read_upload_field(multipart).await?;
    let filename = sanitize_filename(&upload.filename)?;

    // The uploaded file keeps its own name, so the scanner's marker check
    // never claims this directory for the worker.
    let job_id = format!("api_job_{}", Uuid::new_v4());
    let job_dir = state.config().job_dir(&job_id);
    tokio::fs::create_dir_all(&job_dir)
        .await
        .map_err(|source| BookmillError::JobCreate {
            path: job_dir.clone(),
            source,
        })?;

    let result = convert_in_place(&state, &job_id, &job_dir, &filename, &upload.bytes).await;
    if let Err(e) = tokio::fs::remove_dir_all(&job_dir).await {
        warn!(job_id, error = %e, "could not clean up conversion directory");
    }
    result
}

async fn convert_in_place(
    state: &AppState,
    job_id: &str,
    job_dir: &Path,
    filename: &str,
    bytes: &[u8],
) -> Result<Response, BookmillError> {
    let input = job_dir.join(filename);
    write_atomic(&input, bytes)
        .await
        .map_err(|source| BookmillError::JobCreate {
            path: input.clone(),
            source,
        })?;

    let job = DiscoveredJob {
        job_id: job_id.to_string(),
        dir: job_dir.to_path_buf(),
        input: input.clone(),
    };
    match state.processor().process(&job).await? {
        ProcessOutcome::Completed => {}
        ProcessOutcome::Failed { error } => return Err(BookmillError::Internal(error)),
        ProcessOutcome::Skipped { status } => {
            return Err(BookmillError::Internal(format!(
                "fresh conversion was skipped as {status}"
            )))
        }
    }

    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("result")
        .to_string();
    let output = job_dir.join(output_filename(&input));
    let archive = build_result_archive(state.config(), job_dir, &output, &stem, job_id).await?;
    let bytes = tokio::fs::read(&archive)
        .await
        .map_err(|e| BookmillError::Archive {
            job_id: job_id.to_string(),
            detail: format!("could not read archive: {e}"),
        })?;

    info!(job_id, filename, "synchronous conversion finished");
    Ok(attachment_response(&format!("{stem}_result.zip"), bytes))
}

// ── Helpers ──────────────────────────────────────────────────────────────────

struct Upload {
    filename: String,
    bytes: axum::body::Bytes,
}

/// Pull the `file` field out of the multipart body.
async fn read_upload_field(mut multipart: Multipart) -> Result<Upload, BookmillError> {
    while let Some(field) =
        multipart
            .next_field()
            .await
            .map_err(|e| BookmillError::InvalidUpload {
                reason: format!("could not read multipart field: {e}"),
            })?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or_default().to_string();
        if filename.is_empty() {
            return Err(BookmillError::InvalidUpload {
                reason: "no filename provided".into(),
            });
        }
        let bytes = field.bytes().await.map_err(|e| BookmillError::InvalidUpload {
            reason: format!("could not read upload: {e}"),
        })?;
        return Ok(Upload { filename, bytes });
    }
    Err(BookmillError::InvalidUpload {
        reason: "multipart field 'file' is missing".into(),
    })
}

/// A job id is a single path component; anything else cannot name a job
/// directory and reports as not found.
async fn checked_job_dir(state: &AppState, job_id: &str) -> Result<PathBuf, BookmillError> {
    if job_id.is_empty() || job_id == "." || job_id == ".." || job_id.contains(['/', '\\']) {
        return Err(BookmillError::JobNotFound {
            job_id: job_id.to_string(),
        });
    }
    let dir = state.config().job_dir(job_id);
    match tokio::fs::metadata(&dir).await {
        Ok(meta) if meta.is_dir() => Ok(dir),
        _ => Err(BookmillError::JobNotFound {
            job_id: job_id.to_string(),
        }),
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

fn attachment_response(filename: &str, bytes: Vec<u8>) -> Response {
    let headers = [
        (header::CONTENT_TYPE, "application/zip".to_string()),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        ),
    ];
    (headers, bytes).into_response()
}

/// ASCII-safe single-component version of an uploaded filename.
fn sanitize_filename(raw: &str) -> Result<String, BookmillError> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or(raw);
    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('.').to_string();
    if cleaned.is_empty() {
        return Err(BookmillError::InvalidUpload {
            reason: format!("filename '{raw}' has no usable characters"),
        });
    }
    Ok(cleaned)
}
