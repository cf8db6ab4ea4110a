//! HTTP surface for the conversion service.
//!
//! Thin by design: the API creates job directories and reads their files,
//! while all mutation of progress and metadata stays with the worker. The
//! one exception is `POST /convert`, which runs the same Job Processor
//! synchronously on a private directory and returns the packaged result.
//!
//! Routes:
//!
//! | Method | Path                          | Purpose                          |
//! |--------|-------------------------------|----------------------------------|
//! | GET    | `/ping`                       | worker liveness                  |
//! | POST   | `/api/jobs`                   | enqueue an upload                |
//! | GET    | `/api/jobs/:job_id/status`    | progress record status           |
//! | GET    | `/api/jobs/:job_id/download`  | packaged result archive          |
//! | POST   | `/convert`                    | synchronous convert-and-download |

pub mod archive;
mod routes;
mod state;

pub use state::AppState;

use crate::error::BookmillError;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

/// Build the full router. Exposed separately from [`serve`] so tests can
/// drive it without a socket.
pub fn router(state: AppState) -> Router {
    let max_upload = state.config().max_upload_bytes;
    Router::new()
        .route("/ping", get(routes::ping))
        .route(
            "/api/jobs",
            post(routes::upload_job).layer(DefaultBodyLimit::max(max_upload)),
        )
        .route("/api/jobs/:job_id/status", get(routes::job_status))
        .route("/api/jobs/:job_id/download", get(routes::download_result))
        .route(
            "/convert",
            post(routes::convert_sync).layer(DefaultBodyLimit::max(max_upload)),
        )
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and serve until `shutdown` is cancelled.
pub async fn serve(state: AppState, shutdown: CancellationToken) -> Result<(), BookmillError> {
    let addr = state.config().bind_addr;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| BookmillError::Bind { addr, source })?;
    info!("listening on http://{addr}");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| BookmillError::Internal(format!("http server: {e}")))
}

// ── Error mapping ────────────────────────────────────────────────────────────

impl IntoResponse for BookmillError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            BookmillError::JobNotFound { .. } | BookmillError::OutputMissing { .. } => {
                (StatusCode::NOT_FOUND, "not_found")
            }
            BookmillError::InvalidUpload { .. } => (StatusCode::BAD_REQUEST, "invalid_upload"),
            BookmillError::Engine { .. }
            | BookmillError::EngineSpawn { .. }
            | BookmillError::EngineProtocol { .. }
            | BookmillError::EngineInit { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "engine_error")
            }
            BookmillError::Archive { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "archive_error"),
            BookmillError::StorageRoot { .. }
            | BookmillError::JobCreate { .. }
            | BookmillError::ProgressRead { .. }
            | BookmillError::ProgressParse { .. }
            | BookmillError::ProgressWrite { .. }
            | BookmillError::MetadataWrite { .. }
            | BookmillError::ImageDir { .. }
            | BookmillError::OutputWrite { .. }
            | BookmillError::EventWrite { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error")
            }
            BookmillError::InvalidConfig(_)
            | BookmillError::Bind { .. }
            | BookmillError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        };

        if status.is_server_error() {
            error!(error = %self, "request failed");
        }

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}
