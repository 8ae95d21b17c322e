//! The long-running consume loop.
//!
//! [`ConsumeLoop`] fetches one message at a time, hands it to a
//! [`MessageHandler`] and commits its position only when the handler
//! succeeds. A failed message is left uncommitted so it is redelivered the
//! next time the group subscribes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{HandlerError, TransportError};
use crate::transport::BusConsumer;

/// Default bound on a single fetch.
pub const DEFAULT_FETCH_WAIT: Duration = Duration::from_secs(1);

/// Default pause after a failed fetch.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Application callback invoked once per delivered message.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, key: &[u8], value: &[u8]) -> Result<(), HandlerError>;
}

/// Counters reported when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumeStats {
    pub handled: u64,
    pub failed: u64,
    pub committed: u64,
}

/// Fetch, handle, commit. Runs until cancelled or the transport closes.
pub struct ConsumeLoop<C> {
    consumer: C,
    fetch_wait: Duration,
    retry_delay: Duration,
}

impl<C: BusConsumer> ConsumeLoop<C> {
    pub fn new(consumer: C) -> Self {
        Self {
            consumer,
            fetch_wait: DEFAULT_FETCH_WAIT,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_fetch_wait(mut self, fetch_wait: Duration) -> Self {
        self.fetch_wait = fetch_wait;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Run the loop to completion.
    ///
    /// Cancellation is observed while fetching and while backing off, never
    /// in the middle of a handler: a started handler runs to completion and
    /// its commit is applied first.
    pub async fn run(
        mut self,
        handler: Arc<dyn MessageHandler>,
        cancel: CancellationToken,
    ) -> ConsumeStats {
        let mut stats = ConsumeStats::default();
        let fetch_wait = self.fetch_wait;

        tracing::info!("Consume loop started");

        loop {
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Consume loop cancelled");
                    break;
                }
                result = self.consumer.fetch(fetch_wait) => result,
            };

            let message = match fetched {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(TransportError::Closed) => {
                    tracing::info!("Bus transport closed, consume loop exiting");
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Fetch failed, retrying");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.retry_delay) => continue,
                    }
                }
            };

            match handler.handle(&message.key, &message.value).await {
                Ok(()) => {
                    stats.handled += 1;
                    match self.consumer.commit(&message).await {
                        Ok(()) => stats.committed += 1,
                        Err(TransportError::Closed) => {
                            tracing::info!("Bus transport closed during commit");
                            break;
                        }
                        Err(e) => {
                            tracing::error!(
                                partition = message.partition,
                                offset = message.offset,
                                error = %e,
                                "Commit failed",
                            );
                        }
                    }
                }
                Err(e) => {
                    stats.failed += 1;
                    tracing::error!(
                        partition = message.partition,
                        offset = message.offset,
                        error = %e,
                        "Handler failed, message left uncommitted",
                    );
                }
            }
        }

        tracing::info!(
            handled = stats.handled,
            failed = stats.failed,
            committed = stats.committed,
            "Consume loop stopped",
        );
        stats
    }
}
