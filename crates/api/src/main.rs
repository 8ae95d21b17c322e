use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use detector_cluster::{JobDispatcher, KubeApi, WorkerTemplate};
use detector_events::{ConsumeLoop, Publisher};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use detector_api::bus::EventBus;
use detector_api::config::ServerConfig;
use detector_api::engine::Pipeline;
use detector_api::notifications::NotificationRelay;
use detector_api::router::build_app_router;
use detector_api::state::AppState;
use detector_api::ws;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "detector_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env().expect("Invalid server configuration");
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    tokio::fs::create_dir_all(&config.upload_dir)
        .await
        .expect("Failed to create upload directory");

    // --- Placement ---
    let placement = KubeApi::new(&config.kube_config()).expect("Failed to build Kubernetes client");
    let dispatcher = Arc::new(
        JobDispatcher::new(Arc::new(placement), WorkerTemplate::default())
            .with_poll_interval(config.job_poll_interval()),
    );
    tracing::info!(api_url = %config.kube_api_url, namespace = %config.namespace, "Job dispatcher ready");

    // --- Event bus ---
    let (producer, consumer, bus) = EventBus::connect(&config)
        .expect("Failed to connect to the event bus")
        .split();
    let publisher = Publisher::new(producer, config.bus_topic.clone());
    tracing::info!(backend = ?config.bus_backend, topic = %config.bus_topic, "Event bus ready");

    // --- Notification hub ---
    let hub = Arc::new(ws::NotificationHub::new(config.ws_send_timeout()));
    let heartbeat_handle = ws::start_heartbeat(Arc::clone(&hub));

    // Spawn the consume loop (bus events -> live viewers).
    let consume_cancel = CancellationToken::new();
    let relay = Arc::new(NotificationRelay::new(Arc::clone(&hub)));
    let consume_handle = tokio::spawn(ConsumeLoop::new(consumer).run(relay, consume_cancel.clone()));
    tracing::info!(group = %config.bus_group, "Notification relay started");

    // --- App state ---
    let pipeline = Arc::new(Pipeline::new(
        dispatcher,
        publisher,
        Arc::clone(&hub),
        config.job_settings(),
    ));
    let state = AppState {
        config: Arc::new(config.clone()),
        pipeline,
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    consume_cancel.cancel();
    match tokio::time::timeout(Duration::from_secs(5), consume_handle).await {
        Ok(Ok(stats)) => tracing::info!(
            handled = stats.handled,
            failed = stats.failed,
            "Consume loop stopped",
        ),
        Ok(Err(e)) => tracing::error!(error = %e, "Consume loop panicked"),
        Err(_) => tracing::warn!("Consume loop did not stop in time"),
    }

    bus.close();

    let ws_count = hub.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    hub.close_all().await;

    heartbeat_handle.abort();
    tracing::info!("Heartbeat task stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by Kubernetes.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
