//! Detector API server library.
//!
//! Exposes the building blocks (config, state, error handling, routes,
//! the notification hub and its WebSocket transport, the upload pipeline)
//! so integration tests and the binary entrypoint can both access them.

pub mod bus;
pub mod config;
pub mod engine;
pub mod error;
pub mod notifications;
pub mod router;
pub mod routes;
pub mod state;
pub mod ws;
