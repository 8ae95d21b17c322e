//! Shared domain types for the detector notification pipeline.
//!
//! Everything in here is pure: no I/O, no async. The cluster, events and
//! api crates build on these definitions.

pub mod error;
pub mod job;
pub mod naming;
pub mod notification;
pub mod types;
