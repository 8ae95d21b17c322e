#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tokio::sync::Notify;
use tower::ServiceExt;

use detector_api::config::ServerConfig;
use detector_api::engine::Pipeline;
use detector_api::router::build_app_router;
use detector_api::state::AppState;
use detector_api::ws::{DeliveryError, NotificationHub, ViewerConnection};
use detector_cluster::{JobDispatcher, PlacementApi, PlacementError, UnitStatus, WorkUnitSpec, WorkerTemplate};
use detector_events::{MemoryBroker, Publisher};

pub const TOPIC: &str = "image-upload";
pub const GROUP: &str = "detector-notifier";

/// Build a test `ServerConfig` storing uploads in `upload_dir`.
pub fn test_config(upload_dir: &std::path::Path) -> ServerConfig {
    test_config_with(upload_dir, &[])
}

/// Like [`test_config`], with extra environment entries taking precedence.
pub fn test_config_with(upload_dir: &std::path::Path, overrides: &[(&str, &str)]) -> ServerConfig {
    let upload_dir = upload_dir.to_string_lossy().into_owned();
    ServerConfig::from_lookup(|var| {
        if let Some((_, value)) = overrides.iter().find(|(k, _)| *k == var) {
            return Some(value.to_string());
        }
        match var {
            "HOST" => Some("127.0.0.1".into()),
            "PORT" => Some("0".into()),
            "UPLOAD_DIR" => Some(upload_dir.clone()),
            "KUBE_TOKEN_PATH" => Some(String::new()),
            _ => None,
        }
    })
    .expect("test config is valid")
}

// ---------------------------------------------------------------------------
// Placement double
// ---------------------------------------------------------------------------

/// Accepts (or rejects) every submission and reports it as succeeded.
#[derive(Default)]
pub struct FakePlacement {
    pub reject: bool,
    pub submitted: Mutex<Vec<WorkUnitSpec>>,
}

impl FakePlacement {
    pub fn rejecting() -> Self {
        Self {
            reject: true,
            ..Default::default()
        }
    }

    pub fn submitted(&self) -> Vec<WorkUnitSpec> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlacementApi for FakePlacement {
    async fn submit(&self, spec: &WorkUnitSpec) -> Result<String, PlacementError> {
        if self.reject {
            return Err(PlacementError::Rejected {
                status: 403,
                body: "pods is forbidden".into(),
            });
        }
        self.submitted.lock().unwrap().push(spec.clone());
        Ok(spec.name.clone())
    }

    async fn status(&self, _namespace: &str, _name: &str) -> Result<UnitStatus, PlacementError> {
        Ok(UnitStatus::Succeeded)
    }

    async fn logs(&self, _namespace: &str, _name: &str) -> Result<String, PlacementError> {
        Ok(String::new())
    }
}

// ---------------------------------------------------------------------------
// Viewer double
// ---------------------------------------------------------------------------

/// Records everything sent to it; optionally fails or stalls every send,
/// holds sends until a gate opens, or never answers pings.
#[derive(Default)]
pub struct FakeViewer {
    pub fail: bool,
    pub stall: bool,
    pub stall_ping: bool,
    pub send_gate: Option<Arc<Notify>>,
    pub sent: Mutex<Vec<String>>,
    pub pings: Mutex<usize>,
    pub closed: Mutex<bool>,
}

impl FakeViewer {
    pub fn healthy() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            ..Default::default()
        })
    }

    pub fn stalled() -> Arc<Self> {
        Arc::new(Self {
            stall: true,
            ..Default::default()
        })
    }

    /// Every send waits for `gate` to be notified.
    pub fn gated(gate: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self {
            send_gate: Some(gate),
            ..Default::default()
        })
    }

    pub fn unresponsive_to_ping() -> Arc<Self> {
        Arc::new(Self {
            stall_ping: true,
            ..Default::default()
        })
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

#[async_trait]
impl ViewerConnection for FakeViewer {
    async fn send(&self, text: &str) -> Result<(), DeliveryError> {
        if self.stall {
            std::future::pending::<()>().await;
        }
        if let Some(gate) = &self.send_gate {
            gate.notified().await;
        }
        if self.fail {
            return Err(DeliveryError::Transport("broken pipe".into()));
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }

    async fn ping(&self) -> Result<(), DeliveryError> {
        if self.stall_ping {
            std::future::pending::<()>().await;
        }
        *self.pings.lock().unwrap() += 1;
        Ok(())
    }

    async fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }
}

/// Upcast for `NotificationHub::register`.
pub fn as_viewer(viewer: &Arc<FakeViewer>) -> Arc<dyn ViewerConnection> {
    Arc::clone(viewer) as Arc<dyn ViewerConnection>
}

// ---------------------------------------------------------------------------
// Application harness
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub router: Router,
    pub broker: MemoryBroker,
    pub hub: Arc<NotificationHub>,
    pub placement: Arc<FakePlacement>,
    pub upload_dir: TempDir,
}

/// Build the full application router over fakes, mirroring `main.rs`.
pub fn build_test_app(placement: FakePlacement) -> TestApp {
    build_test_app_with(placement, &[])
}

pub fn build_test_app_with(placement: FakePlacement, overrides: &[(&str, &str)]) -> TestApp {
    let upload_dir = tempfile::tempdir().expect("temp dir");
    let config = test_config_with(upload_dir.path(), overrides);

    let placement = Arc::new(placement);
    let dispatcher = Arc::new(
        JobDispatcher::new(placement.clone(), WorkerTemplate::default())
            .with_poll_interval(Duration::from_millis(10)),
    );

    let broker = MemoryBroker::new();
    broker.create_topic(TOPIC, 1);
    let publisher = Publisher::new(Arc::new(broker.clone()), TOPIC);

    let hub = Arc::new(NotificationHub::new(Duration::from_secs(1)));
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

    TestApp {
        router: build_app_router(state, &config),
        broker,
        hub,
        placement,
        upload_dir,
    }
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub const BOUNDARY: &str = "detector-test-boundary";

/// Encode one multipart field as a request body.
pub fn multipart_body(field: &str, file_name: &str, content: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{file_name}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_upload(app: Router, field: &str, file_name: &str, content: &[u8]) -> Response<Body> {
    let request = Request::post("/upload")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(field, file_name, content)))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_text(response: Response<Body>) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
