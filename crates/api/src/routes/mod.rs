pub mod health;
pub mod upload;

use std::path::Path;

use axum::routing::get;
use axum::Router;
use tower_http::services::ServeDir;

use crate::state::AppState;
use crate::ws;

/// Build the route tree.
///
/// ```text
/// /health        service status (GET)
/// /upload        store a file and start its worker job (POST, multipart)
/// /list          stored file names (GET)
/// /files/{name}  stored files (GET)
/// /ws            WebSocket notifications
/// ```
pub fn app_routes(upload_dir: &Path, max_upload_bytes: usize) -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(upload::router(max_upload_bytes))
        .nest_service("/files", ServeDir::new(upload_dir))
        .route("/ws", get(ws::ws_handler))
}
