//! Worker unit specification.
//!
//! One unit runs the detector once against one artifact that already sits
//! on the shared volume claim, writing its output next to it.

use serde_json::json;

/// Name of the volume inside the unit.
pub const VOLUME_NAME: &str = "image-storage";

/// Name of the single container; also used when fetching logs.
pub const WORKER_CONTAINER: &str = "main-processor";

/// Fixed parts of every worker unit.
#[derive(Debug, Clone)]
pub struct WorkerTemplate {
    /// Container image, e.g. `docker.io/ultralytics/yolov5:latest`.
    pub image: String,
    /// Weights file passed to the detector.
    pub weights: String,
    /// Where the volume claim is mounted inside the container.
    pub mount_path: String,
}

impl Default for WorkerTemplate {
    fn default() -> Self {
        Self {
            image: "docker.io/ultralytics/yolov5:latest".to_string(),
            weights: "yolov5s.pt".to_string(),
            mount_path: "/mnt/data".to_string(),
        }
    }
}

/// A fully resolved one-shot unit ready for submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnitSpec {
    pub name: String,
    pub namespace: String,
    /// Pre-existing durable volume claim holding the artifact.
    pub claim_name: String,
    pub artifact_ref: String,
    pub image: String,
    pub weights: String,
    pub mount_path: String,
}

impl WorkUnitSpec {
    pub fn new(
        template: &WorkerTemplate,
        name: String,
        artifact_ref: &str,
        claim_name: &str,
        namespace: &str,
    ) -> Self {
        Self {
            name,
            namespace: namespace.to_string(),
            claim_name: claim_name.to_string(),
            artifact_ref: artifact_ref.to_string(),
            image: template.image.clone(),
            weights: template.weights.clone(),
            mount_path: template.mount_path.clone(),
        }
    }

    /// Positional detector arguments: source, output name, weights.
    pub fn worker_args(&self) -> Vec<String> {
        let mount = self.mount_path.trim_end_matches('/');
        vec![
            "detect.py".to_string(),
            "--source".to_string(),
            format!("{mount}/{}", self.artifact_ref),
            "--project".to_string(),
            format!("{mount}/"),
            "--name".to_string(),
            format!("{}-detected", self.artifact_ref),
            "--weights".to_string(),
            self.weights.clone(),
        ]
    }

    /// Render as a Kubernetes `v1/Pod` manifest.
    ///
    /// Restart policy is `Never`: a failed detector run stays failed.
    pub fn to_pod_manifest(&self) -> serde_json::Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": self.name,
                "namespace": self.namespace,
                "labels": {
                    "app.kubernetes.io/name": "detector-worker",
                    "app.kubernetes.io/managed-by": "detector-api",
                },
            },
            "spec": {
                "restartPolicy": "Never",
                "volumes": [{
                    "name": VOLUME_NAME,
                    "persistentVolumeClaim": { "claimName": self.claim_name },
                }],
                "containers": [{
                    "name": WORKER_CONTAINER,
                    "image": self.image,
                    "command": ["python3"],
                    "args": self.worker_args(),
                    "volumeMounts": [{
                        "name": VOLUME_NAME,
                        "mountPath": self.mount_path,
                    }],
                }],
                "securityContext": { "runAsUser": 0, "runAsGroup": 0 },
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> WorkUnitSpec {
        WorkUnitSpec::new(
            &WorkerTemplate::default(),
            "yolo-job-cat-jpg-1".into(),
            "cat.jpg",
            "detector-pvc",
            "detector",
        )
    }

    #[test]
    fn args_reference_artifact_output_and_weights() {
        let args = spec().worker_args();
        assert_eq!(
            args,
            vec![
                "detect.py",
                "--source",
                "/mnt/data/cat.jpg",
                "--project",
                "/mnt/data/",
                "--name",
                "cat.jpg-detected",
                "--weights",
                "yolov5s.pt",
            ]
        );
    }

    #[test]
    fn manifest_is_one_shot_with_single_rw_mount() {
        let m = spec().to_pod_manifest();
        assert_eq!(m["metadata"]["name"], "yolo-job-cat-jpg-1");
        assert_eq!(m["metadata"]["namespace"], "detector");
        assert_eq!(m["spec"]["restartPolicy"], "Never");

        let volumes = m["spec"]["volumes"].as_array().unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(
            volumes[0]["persistentVolumeClaim"]["claimName"],
            "detector-pvc"
        );

        let containers = m["spec"]["containers"].as_array().unwrap();
        assert_eq!(containers.len(), 1);
        let mounts = containers[0]["volumeMounts"].as_array().unwrap();
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0]["mountPath"], "/mnt/data");
        assert!(mounts[0].get("readOnly").is_none());
    }

    #[test]
    fn trailing_slash_in_mount_path_is_not_doubled() {
        let template = WorkerTemplate {
            mount_path: "/data/".into(),
            ..Default::default()
        };
        let s = WorkUnitSpec::new(&template, "n".into(), "a.png", "c", "ns");
        assert_eq!(s.worker_args()[2], "/data/a.png");
        assert_eq!(s.worker_args()[4], "/data/");
    }
}
