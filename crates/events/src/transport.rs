//! Bus transport contract.
//!
//! Producers and consumers are separate handles so a slow consume loop can
//! never hold up a publish, and vice versa.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::message::{Ack, BusMessage};

/// Publishing side of the bus. Shared by every upload.
#[async_trait]
pub trait BusProducer: Send + Sync {
    /// Append a message and wait for the broker's acknowledgment.
    async fn publish(&self, topic: &str, key: &[u8], value: &[u8]) -> Result<Ack, TransportError>;
}

/// Consuming side of the bus, bound to one topic and consumer group.
#[async_trait]
pub trait BusConsumer: Send {
    /// Next message, waiting at most `wait`. `Ok(None)` when nothing arrived.
    ///
    /// Must be cancel-safe: dropping the future consumes nothing.
    async fn fetch(&mut self, wait: Duration) -> Result<Option<BusMessage>, TransportError>;

    /// Mark `message` as processed for this consumer group.
    async fn commit(&mut self, message: &BusMessage) -> Result<(), TransportError>;
}

#[async_trait]
impl<C: BusConsumer + ?Sized> BusConsumer for Box<C> {
    async fn fetch(&mut self, wait: Duration) -> Result<Option<BusMessage>, TransportError> {
        (**self).fetch(wait).await
    }

    async fn commit(&mut self, message: &BusMessage) -> Result<(), TransportError> {
        (**self).commit(message).await
    }
}
