//! Live viewer connections.
//!
//! Provides the [`NotificationHub`] registry, the WebSocket upgrade handler
//! and read loop, and the heartbeat task.

mod handler;
mod heartbeat;
pub mod hub;

pub use handler::{connection_lifetime, ws_handler, WsViewer};
pub use heartbeat::start_heartbeat;
pub use hub::{BroadcastReport, DeliveryError, NotificationHub, ViewerConnection};
