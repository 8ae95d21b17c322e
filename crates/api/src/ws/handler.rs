use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, Stream, StreamExt};
use tokio::sync::Mutex;

use crate::state::AppState;
use crate::ws::hub::{DeliveryError, NotificationHub, ViewerConnection};

/// HTTP handler that upgrades the connection to WebSocket.
///
/// After the upgrade the connection is registered with the
/// [`NotificationHub`] and kept alive by its read loop.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    let hub = Arc::clone(state.pipeline.hub());
    ws.on_upgrade(move |socket| handle_socket(socket, hub))
}

/// Outbound half of an upgraded WebSocket.
pub struct WsViewer {
    sink: Mutex<SplitSink<WebSocket, Message>>,
}

impl WsViewer {
    pub fn new(sink: SplitSink<WebSocket, Message>) -> Self {
        Self {
            sink: Mutex::new(sink),
        }
    }

    async fn send_frame(&self, message: Message) -> Result<(), DeliveryError> {
        self.sink
            .lock()
            .await
            .send(message)
            .await
            .map_err(|e| DeliveryError::Transport(e.to_string()))
    }
}

#[async_trait]
impl ViewerConnection for WsViewer {
    async fn send(&self, text: &str) -> Result<(), DeliveryError> {
        self.send_frame(Message::Text(text.into())).await
    }

    async fn ping(&self) -> Result<(), DeliveryError> {
        self.send_frame(Message::Ping(Bytes::new())).await
    }

    async fn close(&self) {
        let _ = self.send_frame(Message::Close(None)).await;
    }
}

/// Manage a single WebSocket connection after upgrade.
///
/// The connection is owned here; the hub only holds a weak reference, so
/// dropping it at the end of the read loop ends its registration for good.
async fn handle_socket(socket: WebSocket, hub: Arc<NotificationHub>) {
    let conn_id = uuid::Uuid::new_v4().to_string();
    tracing::info!(conn_id = %conn_id, "WebSocket connected");

    let (sink, stream) = socket.split();
    let viewer: Arc<dyn ViewerConnection> = Arc::new(WsViewer::new(sink));
    hub.register(conn_id.clone(), &viewer).await;

    connection_lifetime(&hub, &conn_id, stream).await;

    tracing::info!(conn_id = %conn_id, "WebSocket disconnected");
}

/// Read inbound frames until the peer closes or the stream fails, then
/// unregister `conn_id`.
///
/// Inbound content is ignored; the loop exists only to detect liveness.
pub async fn connection_lifetime<S>(hub: &NotificationHub, conn_id: &str, mut stream: S)
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(conn_id = %conn_id, "Pong received");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(conn_id = %conn_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    hub.unregister(conn_id).await;
}
