//! Kubernetes REST client for worker pods.
//!
//! Talks to the core `v1` API directly with [`reqwest`]: pod creation,
//! pod reads for status, and container log retrieval.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::error::PlacementError;
use crate::placement::{PlacementApi, UnitStatus};
use crate::spec::{WorkUnitSpec, WORKER_CONTAINER};

/// Connection settings for the Kubernetes API server.
#[derive(Debug, Clone)]
pub struct KubeConfig {
    /// Base URL, e.g. `https://kubernetes.default.svc`.
    pub api_url: String,
    /// Service-account bearer token file. Absent means anonymous.
    pub token_path: Option<PathBuf>,
    /// PEM bundle for the API server's CA. Absent means system roots.
    pub ca_path: Option<PathBuf>,
    /// Upper bound on a single API round-trip.
    pub request_timeout: Duration,
}

/// HTTP client for the Kubernetes core API.
pub struct KubeApi {
    client: reqwest::Client,
    api_url: String,
    token: Option<String>,
}

impl KubeApi {
    /// Build a client, reading the token and CA bundle from disk.
    pub fn new(config: &KubeConfig) -> Result<Self, PlacementError> {
        let mut builder = reqwest::Client::builder().timeout(config.request_timeout);

        if let Some(ca_path) = &config.ca_path {
            let pem = std::fs::read(ca_path).map_err(|e| {
                PlacementError::Config(format!("cannot read CA bundle {}: {e}", ca_path.display()))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem)?;
            builder = builder.add_root_certificate(cert);
        }

        let token = match &config.token_path {
            Some(path) => Some(
                std::fs::read_to_string(path)
                    .map_err(|e| {
                        PlacementError::Config(format!("cannot read token {}: {e}", path.display()))
                    })?
                    .trim()
                    .to_string(),
            ),
            None => None,
        };

        Ok(Self {
            client: builder.build()?,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn pods_url(&self, namespace: &str) -> String {
        format!("{}/api/v1/namespaces/{namespace}/pods", self.api_url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    // ---- private helpers ----

    /// Map non-2xx responses onto [`PlacementError`] variants.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, PlacementError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());

        Err(match status {
            StatusCode::NOT_FOUND => PlacementError::NotFound(body),
            StatusCode::TOO_MANY_REQUESTS => PlacementError::Unavailable {
                status: status.as_u16(),
                body,
            },
            s if s.is_server_error() => PlacementError::Unavailable {
                status: s.as_u16(),
                body,
            },
            s => PlacementError::Rejected {
                status: s.as_u16(),
                body,
            },
        })
    }
}

#[async_trait]
impl PlacementApi for KubeApi {
    async fn submit(&self, spec: &WorkUnitSpec) -> Result<String, PlacementError> {
        tracing::info!(
            pod = %spec.name,
            namespace = %spec.namespace,
            artifact = %spec.artifact_ref,
            "Creating worker pod",
        );

        let response = self
            .authorize(self.client.post(self.pods_url(&spec.namespace)))
            .json(&spec.to_pod_manifest())
            .send()
            .await?;

        let created: serde_json::Value = Self::ensure_success(response).await?.json().await?;
        let name = created["metadata"]["name"]
            .as_str()
            .ok_or_else(|| PlacementError::Malformed("created pod has no metadata.name".into()))?
            .to_string();

        tracing::info!(pod = %name, namespace = %spec.namespace, "Worker pod created");
        Ok(name)
    }

    async fn status(&self, namespace: &str, name: &str) -> Result<UnitStatus, PlacementError> {
        let response = self
            .authorize(self.client.get(format!("{}/{name}", self.pods_url(namespace))))
            .send()
            .await?;

        let pod: serde_json::Value = Self::ensure_success(response).await?.json().await?;
        parse_pod_status(&pod)
    }

    async fn logs(&self, namespace: &str, name: &str) -> Result<String, PlacementError> {
        let response = self
            .authorize(
                self.client
                    .get(format!("{}/{name}/log", self.pods_url(namespace)))
                    .query(&[("container", WORKER_CONTAINER)]),
            )
            .send()
            .await?;

        Ok(Self::ensure_success(response).await?.text().await?)
    }
}

/// Interpret a `v1/Pod` document's `status` block.
pub fn parse_pod_status(pod: &serde_json::Value) -> Result<UnitStatus, PlacementError> {
    let status = &pod["status"];
    let phase = status["phase"]
        .as_str()
        .ok_or_else(|| PlacementError::Malformed("pod has no status.phase".into()))?;

    Ok(match phase {
        "Pending" => UnitStatus::Pending,
        "Running" => UnitStatus::Running,
        "Succeeded" => UnitStatus::Succeeded,
        "Failed" => {
            let reason = status["reason"].as_str().unwrap_or("");
            let message = status["message"].as_str().unwrap_or("");
            UnitStatus::Failed(format!("reason: {reason}, message: {message}"))
        }
        other => UnitStatus::Unknown(other.to_string()),
    })
}
