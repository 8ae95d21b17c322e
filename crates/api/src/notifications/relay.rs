//! Bus-to-viewer relay.
//!
//! [`NotificationRelay`] is the [`MessageHandler`] driven by the consume
//! loop. It decodes each bus value into a [`NotificationEvent`] and fans
//! it out through the [`NotificationHub`].

use std::sync::Arc;

use async_trait::async_trait;
use detector_core::notification::NotificationEvent;
use detector_events::{HandlerError, MessageHandler};

use crate::ws::NotificationHub;

pub struct NotificationRelay {
    hub: Arc<NotificationHub>,
}

impl NotificationRelay {
    pub fn new(hub: Arc<NotificationHub>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl MessageHandler for NotificationRelay {
    /// A value that is not a notification is rejected before any viewer
    /// sees it, which leaves the message uncommitted.
    async fn handle(&self, key: &[u8], value: &[u8]) -> Result<(), HandlerError> {
        let key = String::from_utf8_lossy(key);
        let event = NotificationEvent::decode(value).map_err(|e| {
            tracing::warn!(key = %key, error = %e, "Discarding undecodable notification");
            HandlerError::from(e)
        })?;

        let report = self.hub.broadcast(&event).await;
        tracing::info!(
            key = %key,
            image_url = %event.image_url,
            delivered = report.delivered,
            dropped = report.dropped,
            "Notification relayed",
        );
        Ok(())
    }
}
