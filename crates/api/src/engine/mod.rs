//! Upload processing engine.
//!
//! Ties the job dispatcher, the bus publisher and the notification hub
//! together behind one service object shared by the HTTP handlers.

pub mod pipeline;

pub use pipeline::{JobSettings, Pipeline};
