//! Kafka transport over `rdkafka`.
//!
//! Auto-commit is disabled. The consumer tracks handled offsets per
//! partition and stores the group's committed position only up to the
//! oldest offset that has not been committed, so a message whose handler
//! failed is delivered again when the group next starts.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};

use crate::commits::PartitionCommits;
use crate::error::TransportError;
use crate::message::{Ack, BusMessage};
use crate::transport::{BusConsumer, BusProducer};

/// Connection settings shared by the producer and the consumer.
#[derive(Debug, Clone)]
pub struct KafkaConfig {
    /// Comma-separated `host:port` list.
    pub brokers: String,
    pub client_id: String,
    /// Upper bound on one delivery, including librdkafka's own retries.
    pub message_timeout: Duration,
    /// Out-of-order commits kept per partition before the oldest failed
    /// offset is given up.
    pub max_pending_commits: usize,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: "my-kafka:9092".to_string(),
            client_id: "detector-api".to_string(),
            message_timeout: Duration::from_secs(10),
            max_pending_commits: 4096,
        }
    }
}

impl KafkaConfig {
    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("client.id", &self.client_id);
        config
    }
}

/// Whether a librdkafka error code is worth retrying.
fn is_transient_code(code: RDKafkaErrorCode) -> bool {
    matches!(
        code,
        RDKafkaErrorCode::MessageTimedOut
            | RDKafkaErrorCode::QueueFull
            | RDKafkaErrorCode::AllBrokersDown
            | RDKafkaErrorCode::BrokerTransportFailure
            | RDKafkaErrorCode::OperationTimedOut
            | RDKafkaErrorCode::RequestTimedOut
            | RDKafkaErrorCode::LeaderNotAvailable
            | RDKafkaErrorCode::NotLeaderForPartition
            | RDKafkaErrorCode::NetworkException
            | RDKafkaErrorCode::NotEnoughReplicas
            | RDKafkaErrorCode::RebalanceInProgress
    )
}

fn classify(err: &KafkaError) -> TransportError {
    if matches!(err, KafkaError::Canceled) {
        return TransportError::Closed;
    }
    match err.rdkafka_error_code() {
        Some(code) if is_transient_code(code) => TransportError::Transient(err.to_string()),
        _ => TransportError::Permanent(err.to_string()),
    }
}

/// Publishing side backed by a Kafka cluster.
pub struct KafkaProducer {
    producer: FutureProducer,
    queue_timeout: Duration,
}

impl KafkaProducer {
    pub fn new(config: &KafkaConfig) -> Result<Self, TransportError> {
        let producer: FutureProducer = config
            .client_config()
            .set("acks", "all")
            .set("message.timeout.ms", config.message_timeout.as_millis().to_string())
            .create()
            .map_err(|e| classify(&e))?;
        tracing::info!(brokers = %config.brokers, "Kafka producer created");
        Ok(Self {
            producer,
            queue_timeout: config.message_timeout,
        })
    }
}

#[async_trait]
impl BusProducer for KafkaProducer {
    async fn publish(&self, topic: &str, key: &[u8], value: &[u8]) -> Result<Ack, TransportError> {
        let record = FutureRecord::to(topic).key(key).payload(value);
        match self.producer.send(record, Timeout::After(self.queue_timeout)).await {
            Ok((partition, offset)) => Ok(Ack {
                partition: partition as u32,
                offset: offset as u64,
            }),
            Err((e, _)) => Err(classify(&e)),
        }
    }
}

/// A consumer group member reading one topic from a Kafka cluster.
pub struct KafkaConsumer {
    consumer: StreamConsumer,
    topic: String,
    group: String,
    /// Handled offsets per partition since this member first saw it.
    commits: HashMap<i32, PartitionCommits>,
    max_pending: usize,
}

impl KafkaConsumer {
    /// Join `group` and subscribe to `topic`. A group with no committed
    /// position starts from the earliest message.
    pub fn subscribe(config: &KafkaConfig, topic: &str, group: &str) -> Result<Self, TransportError> {
        let consumer: StreamConsumer = config
            .client_config()
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .create()
            .map_err(|e| classify(&e))?;
        consumer.subscribe(&[topic]).map_err(|e| classify(&e))?;

        tracing::info!(brokers = %config.brokers, topic, group, "Kafka consumer subscribed");
        Ok(Self {
            consumer,
            topic: topic.to_string(),
            group: group.to_string(),
            commits: HashMap::new(),
            max_pending: config.max_pending_commits,
        })
    }
}

#[async_trait]
impl BusConsumer for KafkaConsumer {
    async fn fetch(&mut self, wait: Duration) -> Result<Option<BusMessage>, TransportError> {
        let message = match tokio::time::timeout(wait, self.consumer.recv()).await {
            Err(_) => return Ok(None),
            Ok(Err(e)) => return Err(classify(&e)),
            Ok(Ok(message)) => message,
        };

        let (partition, offset) = (message.partition(), message.offset());
        // The first offset seen on a partition is the group's committed
        // position for it.
        self.commits
            .entry(partition)
            .or_insert_with(|| PartitionCommits::starting_at(offset as u64));

        Ok(Some(BusMessage {
            topic: message.topic().to_string(),
            partition: partition as u32,
            offset: offset as u64,
            key: message.key().unwrap_or_default().to_vec(),
            value: message.payload().unwrap_or_default().to_vec(),
        }))
    }

    async fn commit(&mut self, message: &BusMessage) -> Result<(), TransportError> {
        let partition = message.partition as i32;
        let commits = self
            .commits
            .entry(partition)
            .or_insert_with(|| PartitionCommits::starting_at(message.offset));
        let before = commits.low;

        commits.commit(message.offset);
        let abandoned = commits.cap_pending(self.max_pending);
        if abandoned > 0 {
            tracing::warn!(
                topic = %self.topic,
                group = %self.group,
                partition,
                abandoned,
                "Too many commits pending behind a failed message, giving it up",
            );
        }
        if commits.low == before {
            return Ok(());
        }

        // Kafka stores the next offset to read.
        let mut offsets = TopicPartitionList::new();
        offsets
            .add_partition_offset(&self.topic, partition, Offset::Offset(commits.low as i64))
            .map_err(|e| classify(&e))?;
        self.consumer
            .commit(&offsets, CommitMode::Async)
            .map_err(|e| classify(&e))
    }
}
