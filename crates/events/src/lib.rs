//! Detector event bus client.
//!
//! This crate provides both sides of the upload-notification bus:
//!
//! - [`BusProducer`] / [`BusConsumer`]: the transport contract.
//! - [`MemoryBroker`]: partitioned, consumer-group aware in-process
//!   transport with bounded retention, for tests and local runs.
//! - `KafkaProducer` / `KafkaConsumer` (feature `kafka`): the same
//!   contract over a Kafka cluster.
//! - [`Publisher`]: publish with acknowledgment and a bounded retry
//!   budget for transient broker errors.
//! - [`ConsumeLoop`]: the long-running fetch → handle → commit loop.

mod commits;
pub mod consumer;
pub mod error;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod memory;
pub mod message;
pub mod publisher;
pub mod transport;

pub use consumer::{ConsumeLoop, ConsumeStats, MessageHandler};
pub use error::{HandlerError, PublishError, TransportError};
#[cfg(feature = "kafka")]
pub use kafka::{KafkaConfig, KafkaConsumer, KafkaProducer};
pub use memory::{MemoryBroker, MemoryConsumer, DEFAULT_MAX_RETAINED};
pub use message::{Ack, BusMessage};
pub use publisher::{Publisher, RetryPolicy};
pub use transport::{BusConsumer, BusProducer};
