//! Notification delivery.
//!
//! The [`NotificationRelay`] consumes upload events from the bus and
//! broadcasts them to live viewers.

pub mod relay;

pub use relay::NotificationRelay;
