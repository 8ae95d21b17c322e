//! Upload endpoints.
//!
//! Stored files live flat under the configured upload directory, which is
//! the same volume the worker jobs mount.

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use tower_http::limit::RequestBodyLimitLayer;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// Body returned for an accepted upload.
pub const UPLOAD_ACCEPTED_MESSAGE: &str = "File uploaded successfully!";

/// POST /upload
///
/// Accepts a multipart form with a required `file` field. The file is
/// stored under its own name (final path component only), then a worker
/// job is started for it.
async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, &'static str)> {
    let mut file_data: Option<(String, Vec<u8>)> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field
            .file_name()
            .and_then(stored_file_name)
            .ok_or_else(|| AppError::BadRequest("Missing or invalid file name".into()))?;
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        file_data = Some((file_name, data.to_vec()));
    }

    let (file_name, data) =
        file_data.ok_or_else(|| AppError::BadRequest("Unable to get file".into()))?;

    let path = state.config.upload_dir.join(&file_name);
    tokio::fs::write(&path, &data)
        .await
        .map_err(|e| AppError::InternalError(format!("Unable to save file {}: {e}", path.display())))?;
    tracing::info!(file = %file_name, bytes = data.len(), "Upload stored");

    // Background job tracking owns the handle from here on.
    let _tracking = state.pipeline.start_job(&file_name).await?;

    Ok((StatusCode::OK, UPLOAD_ACCEPTED_MESSAGE))
}

/// GET /list -- names of the stored uploads, sorted.
async fn list_files(State(state): State<AppState>) -> AppResult<Json<Vec<String>>> {
    let mut entries = tokio::fs::read_dir(&state.config.upload_dir)
        .await
        .map_err(|e| AppError::InternalError(format!("Unable to read upload directory: {e}")))?;

    let mut names = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| AppError::InternalError(format!("Unable to read upload directory: {e}")))?
    {
        let is_file = entry.file_type().await.map(|t| t.is_file()).unwrap_or(false);
        if is_file {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    names.sort();
    Ok(Json(names))
}

/// Reduce a client-supplied file name to a safe, flat name.
///
/// Keeps only the final path component (either separator) and rejects
/// names that are empty or refer to a directory.
pub fn stored_file_name(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next().unwrap_or("").trim();
    match name {
        "" | "." | ".." => None,
        _ => Some(name.to_string()),
    }
}

pub fn router(max_upload_bytes: usize) -> Router<AppState> {
    // The body limits apply to `/upload` only.
    let upload = Router::new()
        .route("/upload", post(upload_file))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_upload_bytes));

    Router::new()
        .route("/list", get(list_files))
        .merge(upload)
}
