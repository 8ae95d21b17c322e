use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use detector_cluster::KubeConfig;
#[cfg(feature = "kafka")]
use detector_events::KafkaConfig;

use crate::engine::JobSettings;

/// A configuration variable was present but unusable.
#[derive(Debug, thiserror::Error)]
#[error("{var} has invalid value {value:?}: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

/// Which transport carries upload events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusBackend {
    /// In-process broker. Events do not survive a restart.
    Memory,
    Kafka,
}

impl FromStr for BusBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(BusBackend::Memory),
            "kafka" => Ok(BusBackend::Kafka),
            other => Err(format!("unknown bus backend {other:?}, expected memory or kafka")),
        }
    }
}

/// Server configuration loaded from environment variables.
///
/// All fields have defaults matching the in-cluster deployment.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8443`).
    pub port: u16,
    /// Allowed CORS origins. `*` allows any origin.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Largest accepted upload body in bytes.
    pub max_upload_bytes: usize,
    /// Directory uploads are stored in and served from. Also the worker's
    /// mount path for the same volume.
    pub upload_dir: PathBuf,
    /// Volume claim mounted by every worker job.
    pub pvc_name: String,
    /// Namespace worker jobs run in.
    pub namespace: String,
    pub job_timeout_secs: u64,
    pub job_poll_interval_secs: u64,
    pub kube_api_url: String,
    /// Service-account token. Unset or empty disables bearer auth.
    pub kube_token_path: Option<PathBuf>,
    pub kube_ca_path: Option<PathBuf>,
    /// Bound on one Kubernetes API call. Shorter than the poll interval.
    pub kube_timeout_secs: u64,
    pub bus_backend: BusBackend,
    pub kafka_brokers: String,
    /// Records kept per partition by the in-process broker, and commits
    /// held behind a failed message by the Kafka consumer.
    pub bus_max_retained: usize,
    pub bus_topic: String,
    pub bus_group: String,
    pub bus_partitions: u32,
    /// Per-send bound for WebSocket deliveries.
    pub ws_send_timeout_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                                                |
    /// |--------------------------|--------------------------------------------------------|
    /// | `HOST`                   | `0.0.0.0`                                              |
    /// | `PORT`                   | `8443`                                                 |
    /// | `CORS_ORIGINS`           | `*`                                                    |
    /// | `REQUEST_TIMEOUT_SECS`   | `30`                                                   |
    /// | `MAX_UPLOAD_BYTES`       | `52428800`                                             |
    /// | `UPLOAD_DIR`             | `/mnt/data`                                            |
    /// | `PVC_NAME`               | `detector-pvc`                                         |
    /// | `NAMESPACE`              | `detector`                                             |
    /// | `JOB_TIMEOUT_SECS`       | `600`                                                  |
    /// | `JOB_POLL_INTERVAL_SECS` | `5`                                                    |
    /// | `KUBE_API_URL`           | `https://kubernetes.default.svc`                       |
    /// | `KUBE_TOKEN_PATH`        | `/var/run/secrets/kubernetes.io/serviceaccount/token`  |
    /// | `KUBE_CA_PATH`           | unset                                                  |
    /// | `KUBE_TIMEOUT_SECS`      | `3`                                                    |
    /// | `BUS_BACKEND`            | `kafka` (`memory` for local runs)                      |
    /// | `KAFKA_BROKERS`          | `my-kafka:9092`                                        |
    /// | `BUS_MAX_RETAINED`       | `4096`                                                 |
    /// | `BUS_TOPIC`              | `image-upload`                                         |
    /// | `BUS_GROUP`              | `detector-notifier`                                    |
    /// | `BUS_PARTITIONS`         | `1`                                                    |
    /// | `WS_SEND_TIMEOUT_SECS`   | `10`                                                   |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env), reading variables through `lookup`.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |var: &str, default: &str| lookup(var).unwrap_or_else(|| default.to_string());

        let cors_origins = text("CORS_ORIGINS", "*")
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let kube_token_path = lookup("KUBE_TOKEN_PATH")
            .unwrap_or_else(|| "/var/run/secrets/kubernetes.io/serviceaccount/token".into());
        let kube_token_path = (!kube_token_path.is_empty()).then(|| PathBuf::from(kube_token_path));

        let kube_ca_path = lookup("KUBE_CA_PATH")
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);

        let bus_partitions: u32 = parse(&lookup, "BUS_PARTITIONS", "1")?;
        if bus_partitions == 0 {
            return Err(ConfigError {
                var: "BUS_PARTITIONS",
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        let job_poll_interval_secs: u64 = parse(&lookup, "JOB_POLL_INTERVAL_SECS", "5")?;
        let kube_timeout_secs: u64 = parse(&lookup, "KUBE_TIMEOUT_SECS", "3")?;
        if kube_timeout_secs == 0 || kube_timeout_secs >= job_poll_interval_secs {
            return Err(ConfigError {
                var: "KUBE_TIMEOUT_SECS",
                value: kube_timeout_secs.to_string(),
                reason: format!(
                    "must be at least 1 and shorter than JOB_POLL_INTERVAL_SECS ({job_poll_interval_secs})"
                ),
            });
        }

        Ok(Self {
            host: text("HOST", "0.0.0.0"),
            port: parse(&lookup, "PORT", "8443")?,
            cors_origins,
            request_timeout_secs: parse(&lookup, "REQUEST_TIMEOUT_SECS", "30")?,
            max_upload_bytes: parse(&lookup, "MAX_UPLOAD_BYTES", "52428800")?,
            upload_dir: PathBuf::from(text("UPLOAD_DIR", "/mnt/data")),
            pvc_name: text("PVC_NAME", "detector-pvc"),
            namespace: text("NAMESPACE", "detector"),
            job_timeout_secs: parse(&lookup, "JOB_TIMEOUT_SECS", "600")?,
            job_poll_interval_secs,
            kube_api_url: text("KUBE_API_URL", "https://kubernetes.default.svc"),
            kube_token_path,
            kube_ca_path,
            kube_timeout_secs,
            bus_backend: parse(&lookup, "BUS_BACKEND", "kafka")?,
            kafka_brokers: text("KAFKA_BROKERS", "my-kafka:9092"),
            bus_max_retained: parse(&lookup, "BUS_MAX_RETAINED", "4096")?,
            bus_topic: text("BUS_TOPIC", "image-upload"),
            bus_group: text("BUS_GROUP", "detector-notifier"),
            bus_partitions,
            ws_send_timeout_secs: parse(&lookup, "WS_SEND_TIMEOUT_SECS", "10")?,
        })
    }

    pub fn kube_config(&self) -> KubeConfig {
        KubeConfig {
            api_url: self.kube_api_url.clone(),
            token_path: self.kube_token_path.clone(),
            ca_path: self.kube_ca_path.clone(),
            request_timeout: Duration::from_secs(self.kube_timeout_secs),
        }
    }

    #[cfg(feature = "kafka")]
    pub fn kafka_config(&self) -> KafkaConfig {
        KafkaConfig {
            brokers: self.kafka_brokers.clone(),
            max_pending_commits: self.bus_max_retained,
            ..KafkaConfig::default()
        }
    }

    pub fn job_settings(&self) -> JobSettings {
        JobSettings {
            resource_pool: self.pvc_name.clone(),
            namespace: self.namespace.clone(),
            timeout: Duration::from_secs(self.job_timeout_secs),
        }
    }

    pub fn job_poll_interval(&self) -> Duration {
        Duration::from_secs(self.job_poll_interval_secs)
    }

    pub fn ws_send_timeout(&self) -> Duration {
        Duration::from_secs(self.ws_send_timeout_secs)
    }
}

fn parse<T, F>(lookup: &F, var: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(var).unwrap_or_else(|| default.to_string());
    value.trim().parse().map_err(|e: T::Err| ConfigError {
        var,
        value: value.clone(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults_match_cluster_deployment() {
        let config = load(&[]).unwrap();

        assert_eq!(config.port, 8443);
        assert_eq!(config.upload_dir, PathBuf::from("/mnt/data"));
        assert_eq!(config.pvc_name, "detector-pvc");
        assert_eq!(config.namespace, "detector");
        assert_eq!(config.bus_topic, "image-upload");
        assert_eq!(config.bus_partitions, 1);
        assert_eq!(config.cors_origins, vec!["*".to_string()]);
        assert_eq!(
            config.kube_token_path,
            Some(PathBuf::from("/var/run/secrets/kubernetes.io/serviceaccount/token"))
        );
        assert!(config.kube_ca_path.is_none());
        assert_eq!(config.job_settings().timeout, Duration::from_secs(600));
        assert_eq!(config.job_poll_interval(), Duration::from_secs(5));
        assert_eq!(config.bus_backend, BusBackend::Kafka);
        assert_eq!(config.kafka_brokers, "my-kafka:9092");
        assert_eq!(config.bus_max_retained, 4096);
    }

    #[test]
    fn kube_calls_are_bounded_below_the_poll_interval() {
        let config = load(&[("REQUEST_TIMEOUT_SECS", "30")]).unwrap();
        assert_eq!(config.kube_config().request_timeout, Duration::from_secs(3));
        assert!(config.kube_config().request_timeout < config.job_poll_interval());

        let err = load(&[("KUBE_TIMEOUT_SECS", "5")]).unwrap_err();
        assert_eq!(err.var, "KUBE_TIMEOUT_SECS");

        let config = load(&[("KUBE_TIMEOUT_SECS", "8"), ("JOB_POLL_INTERVAL_SECS", "10")]).unwrap();
        assert_eq!(config.kube_config().request_timeout, Duration::from_secs(8));
    }

    #[test]
    fn bus_backend_is_selectable() {
        assert_eq!(load(&[("BUS_BACKEND", "memory")]).unwrap().bus_backend, BusBackend::Memory);
        assert_eq!(load(&[("BUS_BACKEND", "Kafka")]).unwrap().bus_backend, BusBackend::Kafka);
        let err = load(&[("BUS_BACKEND", "redis")]).unwrap_err();
        assert_eq!(err.var, "BUS_BACKEND");
    }

    #[test]
    fn overrides_are_applied() {
        let config = load(&[
            ("PORT", "9000"),
            ("CORS_ORIGINS", "http://a.test, http://b.test"),
            ("KUBE_TOKEN_PATH", ""),
            ("KUBE_CA_PATH", "/etc/ca.pem"),
            ("BUS_PARTITIONS", "4"),
        ])
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.cors_origins, vec!["http://a.test", "http://b.test"]);
        assert!(config.kube_token_path.is_none());
        assert_eq!(config.kube_ca_path, Some(PathBuf::from("/etc/ca.pem")));
        assert_eq!(config.bus_partitions, 4);
    }

    #[test]
    fn malformed_number_is_reported_with_its_variable() {
        let err = load(&[("JOB_TIMEOUT_SECS", "ten")]).unwrap_err();
        assert_eq!(err.var, "JOB_TIMEOUT_SECS");
        assert_eq!(err.value, "ten");
    }

    #[test]
    fn zero_partitions_is_rejected() {
        assert_matches!(load(&[("BUS_PARTITIONS", "0")]), Err(ConfigError { var: "BUS_PARTITIONS", .. }));
    }
}
