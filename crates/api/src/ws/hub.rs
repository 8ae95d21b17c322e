//! Live viewer registry and notification fan-out.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use detector_core::notification::NotificationEvent;
use futures::future::join_all;
use tokio::sync::Mutex;

/// Default bound on a single delivery.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Delivery to one viewer failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("connection closed")]
    Closed,

    #[error("send timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),
}

/// A live viewer the hub can push text frames to.
#[async_trait]
pub trait ViewerConnection: Send + Sync {
    async fn send(&self, text: &str) -> Result<(), DeliveryError>;

    async fn ping(&self) -> Result<(), DeliveryError>;

    /// Best-effort close. Never fails.
    async fn close(&self);
}

/// Outcome of one [`NotificationHub::broadcast`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// Registry of live viewer connections.
///
/// A single lock guards every mutation and every broadcast iteration, so
/// register and unregister wait for an in-flight broadcast to finish.
/// Pings and shutdown closes run on a snapshot taken under the lock and
/// never hold it while awaiting a viewer. The registry holds `Weak`
/// references; each connection is owned by its read loop.
pub struct NotificationHub {
    connections: Mutex<HashMap<String, Weak<dyn ViewerConnection>>>,
    send_timeout: Duration,
}

impl NotificationHub {
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            connections: Mutex::new(HashMap::new()),
            send_timeout,
        }
    }

    /// Register a connection. Re-registering an id replaces the entry.
    pub async fn register(&self, conn_id: String, connection: &Arc<dyn ViewerConnection>) {
        let mut conns = self.connections.lock().await;
        if conns.insert(conn_id.clone(), Arc::downgrade(connection)).is_some() {
            tracing::debug!(conn_id = %conn_id, "Replaced existing viewer registration");
        }
    }

    /// Remove a connection by its ID. Unknown IDs are ignored.
    pub async fn unregister(&self, conn_id: &str) {
        self.connections.lock().await.remove(conn_id);
    }

    /// Deliver `event` to every registered connection.
    ///
    /// Sends run concurrently, each bounded by the send timeout. A
    /// connection whose send fails (or that has already been dropped) is
    /// removed and closed; the others are unaffected.
    pub async fn broadcast(&self, event: &NotificationEvent) -> BroadcastReport {
        let payload = event.to_json();
        let payload = payload.as_str();
        let send_timeout = self.send_timeout;

        let mut conns = self.connections.lock().await;
        let targets: Vec<(String, Option<Arc<dyn ViewerConnection>>)> = conns
            .iter()
            .map(|(conn_id, weak)| (conn_id.clone(), weak.upgrade()))
            .collect();
        let sends = targets.into_iter().map(|(conn_id, connection)| async move {
            let result = match &connection {
                Some(c) => tokio::time::timeout(send_timeout, c.send(payload))
                    .await
                    .unwrap_or(Err(DeliveryError::Timeout)),
                None => Err(DeliveryError::Closed),
            };
            (conn_id, connection, result)
        });
        let results = join_all(sends).await;

        let mut report = BroadcastReport::default();
        for (conn_id, connection, result) in results {
            match result {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(conn_id = %conn_id, error = %e, "Dropping viewer after failed send");
                    conns.remove(&conn_id);
                    if let Some(connection) = connection {
                        let _ = tokio::time::timeout(send_timeout, connection.close()).await;
                    }
                    report.dropped += 1;
                }
            }
        }

        tracing::debug!(
            delivered = report.delivered,
            dropped = report.dropped,
            "Notification broadcast",
        );
        report
    }

    /// Return the current number of registered connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Send a Ping to every connection. Failures are only logged; removal
    /// is left to the read loop and to failed broadcasts.
    pub async fn ping_all(&self) {
        let targets = self.live_connections().await;
        let pings = targets.into_iter().map(|(conn_id, connection)| async move {
            match tokio::time::timeout(self.send_timeout, connection.ping()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(conn_id = %conn_id, error = %e, "Ping failed"),
                Err(_) => tracing::debug!(conn_id = %conn_id, "Ping timed out"),
            }
        });
        join_all(pings).await;
    }

    /// Close every registered connection.
    ///
    /// Entries stay registered until each connection's read loop observes
    /// the close and unregisters it.
    pub async fn close_all(&self) {
        let targets = self.live_connections().await;
        let count = targets.len();
        let closes = targets.into_iter().map(|(_, connection)| async move {
            let _ = tokio::time::timeout(self.send_timeout, connection.close()).await;
        });
        join_all(closes).await;
        tracing::info!(count, "Closed all viewer connections");
    }

    /// Snapshot of the connections still alive. The lock is released on
    /// return.
    async fn live_connections(&self) -> Vec<(String, Arc<dyn ViewerConnection>)> {
        self.connections
            .lock()
            .await
            .iter()
            .filter_map(|(conn_id, weak)| Some((conn_id.clone(), weak.upgrade()?)))
            .collect()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(DEFAULT_SEND_TIMEOUT)
    }
}
