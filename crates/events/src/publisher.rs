//! Acknowledged publishing with a bounded retry budget.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{PublishError, TransportError};
use crate::message::Ack;
use crate::transport::BusProducer;

/// Retry budget for transient publish failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Calculate the next backoff delay, clamped to `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next_ms = (current.as_millis() as f64 * self.multiplier) as u64;
        Duration::from_millis(next_ms).min(self.max_delay)
    }
}

/// Publishes to one topic and waits for each message to be acknowledged.
pub struct Publisher {
    producer: Arc<dyn BusProducer>,
    topic: String,
    retry: RetryPolicy,
}

impl Publisher {
    pub fn new(producer: Arc<dyn BusProducer>, topic: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Publish one message.
    ///
    /// Transient broker errors are retried with exponential backoff up to
    /// `max_attempts`; permanent errors and a closed transport fail at once.
    pub async fn publish(&self, key: &[u8], value: &[u8]) -> Result<Ack, PublishError> {
        let mut delay = self.retry.initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match self.producer.publish(&self.topic, key, value).await {
                Ok(ack) => {
                    tracing::debug!(
                        topic = %self.topic,
                        partition = ack.partition,
                        offset = ack.offset,
                        attempt,
                        "Message acknowledged",
                    );
                    return Ok(ack);
                }
                Err(TransportError::Closed) => return Err(PublishError::Closed),
                Err(TransportError::Permanent(msg)) => {
                    tracing::error!(topic = %self.topic, error = %msg, "Publish rejected");
                    return Err(PublishError::Rejected(msg));
                }
                Err(TransportError::Transient(msg)) => {
                    if attempt >= self.retry.max_attempts {
                        return Err(PublishError::Exhausted {
                            attempts: attempt,
                            last: msg,
                        });
                    }
                    tracing::warn!(
                        topic = %self.topic,
                        error = %msg,
                        delay_ms = delay.as_millis() as u64,
                        "Publish attempt {attempt} failed, retrying",
                    );
                }
            }

            tokio::time::sleep(delay).await;
            delay = self.retry.next_delay(delay);
        }
    }
}
