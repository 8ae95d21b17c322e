use std::sync::Arc;

use crate::config::ServerConfig;
use crate::engine::Pipeline;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    /// Dispatcher, publisher and viewer hub.
    pub pipeline: Arc<Pipeline>,
}
