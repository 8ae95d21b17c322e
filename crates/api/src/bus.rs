//! Event bus transport selection.

use std::sync::Arc;

use detector_events::{BusConsumer, BusProducer, MemoryBroker, TransportError};

use crate::config::{BusBackend, ServerConfig};

#[derive(Debug, thiserror::Error)]
pub enum BusSetupError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("BUS_BACKEND=kafka requires the `kafka` feature")]
    KafkaUnsupported,
}

/// Both ends of the configured bus, bound to the configured topic and group.
pub struct EventBus {
    pub producer: Arc<dyn BusProducer>,
    pub consumer: Box<dyn BusConsumer>,
    memory: Option<MemoryBroker>,
}

impl EventBus {
    pub fn connect(config: &ServerConfig) -> Result<Self, BusSetupError> {
        match config.bus_backend {
            BusBackend::Memory => Self::in_process(config),
            BusBackend::Kafka => Self::kafka(config),
        }
    }

    fn in_process(config: &ServerConfig) -> Result<Self, BusSetupError> {
        let broker = MemoryBroker::with_retention(config.bus_max_retained);
        broker.create_topic(&config.bus_topic, config.bus_partitions);
        let consumer = broker.subscribe(&config.bus_topic, &config.bus_group)?;
        tracing::info!(
            topic = %config.bus_topic,
            partitions = config.bus_partitions,
            "In-process event bus created",
        );
        Ok(Self {
            producer: Arc::new(broker.clone()),
            consumer: Box::new(consumer),
            memory: Some(broker),
        })
    }

    #[cfg(feature = "kafka")]
    fn kafka(config: &ServerConfig) -> Result<Self, BusSetupError> {
        use detector_events::{KafkaConsumer, KafkaProducer};

        let kafka = config.kafka_config();
        let producer = KafkaProducer::new(&kafka)?;
        let consumer = KafkaConsumer::subscribe(&kafka, &config.bus_topic, &config.bus_group)?;
        Ok(Self {
            producer: Arc::new(producer),
            consumer: Box::new(consumer),
            memory: None,
        })
    }

    #[cfg(not(feature = "kafka"))]
    fn kafka(_config: &ServerConfig) -> Result<Self, BusSetupError> {
        Err(BusSetupError::KafkaUnsupported)
    }

    /// Split into the producer, the consumer, and a handle for shutdown.
    pub fn split(self) -> (Arc<dyn BusProducer>, Box<dyn BusConsumer>, BusHandle) {
        (self.producer, self.consumer, BusHandle { memory: self.memory })
    }
}

/// Shuts down the in-process broker. Kafka clients close on drop.
pub struct BusHandle {
    memory: Option<MemoryBroker>,
}

impl BusHandle {
    pub fn close(&self) {
        if let Some(broker) = &self.memory {
            broker.close();
        }
    }
}
