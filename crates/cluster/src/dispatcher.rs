//! Worker job dispatcher.
//!
//! Submits one one-shot worker unit per uploaded artifact and polls it
//! until it reaches a terminal phase or the caller's deadline passes.
//! Stray units are never cancelled here; a unit still running at the
//! deadline is left to whatever reaps finished pods in the cluster.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use detector_core::job::JobPhase;
use detector_core::naming;
use detector_core::types::Timestamp;
use tokio::time::Instant;

use crate::error::PlacementError;
use crate::placement::{PlacementApi, UnitStatus};
use crate::spec::{WorkUnitSpec, WorkerTemplate};

/// Default interval between two status reads.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound on fetching a failed worker's log.
const LOG_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// The placement system refused a unit. Never retried.
#[derive(Debug, thiserror::Error)]
#[error("failed to submit worker job {job_name}: {source}")]
pub struct SubmitError {
    pub job_name: String,
    #[source]
    pub source: PlacementError,
}

/// One external computation request, tracked from submission to terminal.
#[derive(Debug, Clone)]
pub struct Job {
    /// Unit name, also the identifier used for status reads.
    pub id: String,
    pub artifact_ref: String,
    pub namespace: String,
    /// Volume claim the unit mounts.
    pub resource_pool: String,
    pub phase: JobPhase,
    pub created_at: Timestamp,
    pub last_observed_at: Timestamp,
}

impl Job {
    fn observe(&mut self, next: JobPhase) {
        self.last_observed_at = Utc::now();
        match self.phase.advance(next) {
            Ok(phase) => self.phase = phase,
            Err(e) => tracing::warn!(job_name = %self.id, error = %e, "Ignoring phase update"),
        }
    }
}

/// Worker output attached to a failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerLog {
    Captured(String),
    /// Retrieving the log failed; the text explains why.
    Unavailable(String),
}

/// How a job ended, as seen by [`JobDispatcher::await_terminal`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded,
    Failed { reason: String, log: WorkerLog },
    /// The deadline passed first. The unit keeps running.
    TimedOut,
}

impl JobOutcome {
    pub fn phase(&self) -> JobPhase {
        match self {
            JobOutcome::Succeeded => JobPhase::Succeeded,
            JobOutcome::Failed { .. } => JobPhase::Failed,
            JobOutcome::TimedOut => JobPhase::TimedOut,
        }
    }
}

/// Submits worker units and tracks them to completion.
///
/// Designed to be shared via `Arc`; every upload runs its own
/// submit-then-await sequence concurrently with the others.
pub struct JobDispatcher {
    placement: Arc<dyn PlacementApi>,
    template: WorkerTemplate,
    poll_interval: Duration,
    last_suffix: AtomicU64,
}

impl JobDispatcher {
    /// Create a dispatcher with the default 5-second poll interval.
    pub fn new(placement: Arc<dyn PlacementApi>, template: WorkerTemplate) -> Self {
        Self {
            placement,
            template,
            poll_interval: DEFAULT_POLL_INTERVAL,
            last_suffix: AtomicU64::new(0),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Time-derived suffix, strictly increasing across calls on this dispatcher.
    fn next_suffix(&self) -> u64 {
        let now = Utc::now().timestamp_micros().max(0) as u64;
        let previous = self
            .last_suffix
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |last| {
                Some(now.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        now.max(previous + 1)
    }

    /// Submit a worker unit for `artifact_ref`, mounting `resource_pool`.
    ///
    /// Returns the tracked [`Job`] in phase `Dispatching`. A placement
    /// rejection is returned verbatim inside [`SubmitError`].
    pub async fn submit(
        &self,
        artifact_ref: &str,
        resource_pool: &str,
        namespace: &str,
    ) -> Result<Job, SubmitError> {
        let now = Utc::now();
        let mut job = Job {
            id: naming::job_name(artifact_ref, self.next_suffix()),
            artifact_ref: artifact_ref.to_string(),
            namespace: namespace.to_string(),
            resource_pool: resource_pool.to_string(),
            phase: JobPhase::Queued,
            created_at: now,
            last_observed_at: now,
        };

        let spec = WorkUnitSpec::new(
            &self.template,
            job.id.clone(),
            artifact_ref,
            resource_pool,
            namespace,
        );
        job.observe(JobPhase::Dispatching);

        match self.placement.submit(&spec).await {
            Ok(name) => {
                if name != job.id {
                    tracing::debug!(requested = %job.id, assigned = %name, "Placement renamed job");
                    job.id = name;
                }
                tracing::info!(job_name = %job.id, artifact = %artifact_ref, "Worker job submitted");
                Ok(job)
            }
            Err(source) => {
                tracing::error!(job_name = %job.id, error = %source, "Worker job rejected");
                Err(SubmitError {
                    job_name: job.id,
                    source,
                })
            }
        }
    }

    /// Poll `job` until it succeeds, fails, or `timeout` elapses.
    ///
    /// Read errors while polling are logged and retried on the next tick;
    /// only an observed terminal status or the deadline ends the wait.
    pub async fn await_terminal(&self, mut job: Job, timeout: Duration) -> JobOutcome {
        let deadline = Instant::now() + timeout;
        tracing::debug!(
            job_name = %job.id,
            timeout_secs = timeout.as_secs(),
            "Waiting for worker job",
        );

        loop {
            if Instant::now() >= deadline {
                job.observe(JobPhase::TimedOut);
                tracing::warn!(job_name = %job.id, "Worker job timed out, leaving it running");
                return JobOutcome::TimedOut;
            }

            let read = tokio::time::timeout_at(
                deadline,
                self.placement.status(&job.namespace, &job.id),
            )
            .await;

            match read {
                // Deadline hit mid-read; the check at the top reports it.
                Err(_) => continue,
                Ok(Ok(status)) => {
                    tracing::debug!(job_name = %job.id, ?status, "Worker job status");
                    match status {
                        UnitStatus::Succeeded => {
                            job.observe(JobPhase::Succeeded);
                            tracing::info!(job_name = %job.id, "Worker job succeeded");
                            return JobOutcome::Succeeded;
                        }
                        UnitStatus::Failed(reason) => {
                            job.observe(JobPhase::Failed);
                            let log = self.fetch_log(&job).await;
                            tracing::error!(job_name = %job.id, reason = %reason, "Worker job failed");
                            return JobOutcome::Failed { reason, log };
                        }
                        UnitStatus::Running => job.observe(JobPhase::Running),
                        UnitStatus::Pending | UnitStatus::Unknown(_) => {
                            job.last_observed_at = Utc::now();
                        }
                    }
                }
                Ok(Err(e)) if e.is_transient() => {
                    tracing::warn!(job_name = %job.id, error = %e, "Transient status read error, retrying");
                }
                Ok(Err(e)) => {
                    tracing::error!(job_name = %job.id, error = %e, "Status read error, retrying");
                }
            }

            let wake = (Instant::now() + self.poll_interval).min(deadline);
            tokio::time::sleep_until(wake).await;
        }
    }

    /// Best-effort retrieval of a failed worker's log.
    async fn fetch_log(&self, job: &Job) -> WorkerLog {
        let fetch = self.placement.logs(&job.namespace, &job.id);
        match tokio::time::timeout(LOG_FETCH_TIMEOUT, fetch).await {
            Ok(Ok(text)) => {
                tracing::info!(job_name = %job.id, log = %text, "Worker log for failed job");
                WorkerLog::Captured(text)
            }
            Ok(Err(e)) => {
                tracing::warn!(job_name = %job.id, error = %e, "Could not fetch worker log");
                WorkerLog::Unavailable(e.to_string())
            }
            Err(_) => {
                tracing::warn!(job_name = %job.id, "Timed out fetching worker log");
                WorkerLog::Unavailable("log fetch timed out".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{HashSet, VecDeque};
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use async_trait::async_trait;

    use super::*;

    /// Placement double that replays a scripted sequence of status reads.
    ///
    /// Once the script runs out the last entry repeats (or `Pending` when
    /// the script was empty).
    #[derive(Default)]
    struct ScriptedPlacement {
        reject_with: Mutex<Option<PlacementError>>,
        statuses: Mutex<VecDeque<Result<UnitStatus, PlacementError>>>,
        last: Mutex<Option<UnitStatus>>,
        log: Mutex<Option<Result<String, PlacementError>>>,
        submitted: Mutex<Vec<WorkUnitSpec>>,
        status_reads: AtomicU64,
    }

    impl ScriptedPlacement {
        fn with_statuses(statuses: Vec<Result<UnitStatus, PlacementError>>) -> Self {
            Self {
                statuses: Mutex::new(statuses.into()),
                ..Default::default()
            }
        }

        fn reads(&self) -> u64 {
            self.status_reads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PlacementApi for ScriptedPlacement {
        async fn submit(&self, spec: &WorkUnitSpec) -> Result<String, PlacementError> {
            if let Some(e) = self.reject_with.lock().unwrap().take() {
                return Err(e);
            }
            self.submitted.lock().unwrap().push(spec.clone());
            Ok(spec.name.clone())
        }

        async fn status(&self, _namespace: &str, _name: &str) -> Result<UnitStatus, PlacementError> {
            self.status_reads.fetch_add(1, Ordering::SeqCst);
            match self.statuses.lock().unwrap().pop_front() {
                Some(Ok(status)) => {
                    *self.last.lock().unwrap() = Some(status.clone());
                    Ok(status)
                }
                Some(Err(e)) => Err(e),
                None => Ok(self
                    .last
                    .lock()
                    .unwrap()
                    .clone()
                    .unwrap_or(UnitStatus::Pending)),
            }
        }

        async fn logs(&self, _namespace: &str, _name: &str) -> Result<String, PlacementError> {
            self.log
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Ok(String::new()))
        }
    }

    fn dispatcher(placement: Arc<ScriptedPlacement>) -> JobDispatcher {
        JobDispatcher::new(placement, WorkerTemplate::default())
    }

    #[tokio::test]
    async fn submit_builds_named_spec_in_dispatching_phase() {
        let placement = Arc::new(ScriptedPlacement::default());
        let job = dispatcher(placement.clone())
            .submit("My Photo_01.JPG", "detector-pvc", "detector")
            .await
            .unwrap();

        let re = regex::Regex::new(r"^yolo-job-my-photo-01-jpg-[0-9]+$").unwrap();
        assert!(re.is_match(&job.id), "unexpected job name {}", job.id);
        assert_eq!(job.phase, JobPhase::Dispatching);
        assert_eq!(job.resource_pool, "detector-pvc");

        let submitted = placement.submitted.lock().unwrap();
        assert_eq!(submitted.len(), 1);
        assert_eq!(submitted[0].name, job.id);
        assert_eq!(submitted[0].claim_name, "detector-pvc");
        assert_eq!(submitted[0].namespace, "detector");
        assert_eq!(submitted[0].artifact_ref, "My Photo_01.JPG");
    }

    #[tokio::test]
    async fn rejection_is_propagated_verbatim() {
        let placement = Arc::new(ScriptedPlacement::default());
        *placement.reject_with.lock().unwrap() = Some(PlacementError::Rejected {
            status: 403,
            body: "exceeded quota: compute-resources".into(),
        });

        let err = dispatcher(placement.clone())
            .submit("a.jpg", "pvc", "ns")
            .await
            .unwrap_err();

        assert_matches!(
            &err.source,
            PlacementError::Rejected { status: 403, body } if body == "exceeded quota: compute-resources"
        );
        assert!(err.job_name.starts_with("yolo-job-a-jpg-"));
        assert_eq!(placement.reads(), 0);
    }

    #[tokio::test]
    async fn concurrent_submissions_of_same_artifact_get_distinct_ids() {
        let placement = Arc::new(ScriptedPlacement::default());
        let dispatcher = Arc::new(dispatcher(placement));

        let mut handles = Vec::new();
        for _ in 0..32 {
            let d = Arc::clone(&dispatcher);
            handles.push(tokio::spawn(async move {
                d.submit("same.jpg", "pvc", "ns").await.unwrap().id
            }));
        }

        let mut ids = HashSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap());
        }
        assert_eq!(ids.len(), 32);
    }

    #[tokio::test(start_paused = true)]
    async fn succeeded_after_pending_and_running() {
        let placement = Arc::new(ScriptedPlacement::with_statuses(vec![
            Ok(UnitStatus::Pending),
            Ok(UnitStatus::Running),
            Ok(UnitStatus::Succeeded),
        ]));
        let d = dispatcher(placement.clone());
        let job = d.submit("a.jpg", "pvc", "ns").await.unwrap();

        let outcome = d.await_terminal(job, Duration::from_secs(60)).await;

        assert_eq!(outcome, JobOutcome::Succeeded);
        assert_eq!(placement.reads(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_swallowed_until_success() {
        let placement = Arc::new(ScriptedPlacement::with_statuses(vec![
            Err(PlacementError::NotFound("pods \"x\" not found".into())),
            Err(PlacementError::Unavailable {
                status: 503,
                body: "etcd leader changed".into(),
            }),
            Ok(UnitStatus::Running),
            Ok(UnitStatus::Succeeded),
        ]));
        let d = dispatcher(placement.clone());
        let job = d.submit("a.jpg", "pvc", "ns").await.unwrap();

        let outcome = d.await_terminal(job, Duration::from_secs(60)).await;

        assert_eq!(outcome, JobOutcome::Succeeded);
        assert_eq!(placement.reads(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_attaches_worker_log() {
        let placement = Arc::new(ScriptedPlacement::with_statuses(vec![Ok(
            UnitStatus::Failed("reason: Error, message: exit 1".into()),
        )]));
        *placement.log.lock().unwrap() = Some(Ok("Traceback: weights missing".into()));
        let d = dispatcher(placement.clone());
        let job = d.submit("a.jpg", "pvc", "ns").await.unwrap();

        let outcome = d.await_terminal(job, Duration::from_secs(60)).await;

        assert_eq!(
            outcome,
            JobOutcome::Failed {
                reason: "reason: Error, message: exit 1".into(),
                log: WorkerLog::Captured("Traceback: weights missing".into()),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn log_fetch_failure_does_not_mask_job_failure() {
        let placement = Arc::new(ScriptedPlacement::with_statuses(vec![Ok(
            UnitStatus::Failed("OOMKilled".into()),
        )]));
        *placement.log.lock().unwrap() = Some(Err(PlacementError::NotFound("container gone".into())));
        let d = dispatcher(placement.clone());
        let job = d.submit("a.jpg", "pvc", "ns").await.unwrap();

        let outcome = d.await_terminal(job, Duration::from_secs(60)).await;

        assert_matches!(
            outcome,
            JobOutcome::Failed { ref reason, log: WorkerLog::Unavailable(_) } if reason == "OOMKilled"
        );
        assert_eq!(outcome.phase(), JobPhase::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_exactly_at_deadline_when_never_terminal() {
        let placement = Arc::new(ScriptedPlacement::with_statuses(vec![Ok(UnitStatus::Running)]));
        let d = dispatcher(placement.clone());
        let job = d.submit("a.jpg", "pvc", "ns").await.unwrap();

        let start = Instant::now();
        let outcome = d.await_terminal(job, Duration::from_secs(12)).await;

        assert_eq!(outcome, JobOutcome::TimedOut);
        assert_eq!(start.elapsed(), Duration::from_secs(12));
        // Reads at t = 0s, 5s and 10s; none after the deadline.
        assert_eq!(placement.reads(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_errors_end_in_timeout_not_failure() {
        let placement = Arc::new(ScriptedPlacement::with_statuses(
            (0..10)
                .map(|_| {
                    Err(PlacementError::Rejected {
                        status: 403,
                        body: "forbidden".into(),
                    })
                })
                .collect(),
        ));
        let d = dispatcher(placement.clone()).with_poll_interval(Duration::from_secs(1));
        let job = d.submit("a.jpg", "pvc", "ns").await.unwrap();

        let outcome = d.await_terminal(job, Duration::from_millis(3500)).await;

        assert_eq!(outcome, JobOutcome::TimedOut);
        assert_eq!(placement.reads(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_timeout_times_out_without_reading() {
        let placement = Arc::new(ScriptedPlacement::with_statuses(vec![Ok(UnitStatus::Succeeded)]));
        let d = dispatcher(placement.clone());
        let job = d.submit("a.jpg", "pvc", "ns").await.unwrap();

        let outcome = d.await_terminal(job, Duration::ZERO).await;

        assert_eq!(outcome, JobOutcome::TimedOut);
        assert_eq!(placement.reads(), 0);
    }

    #[test]
    fn suffixes_strictly_increase() {
        let d = dispatcher(Arc::new(ScriptedPlacement::default()));
        let mut previous = 0;
        for _ in 0..1000 {
            let s = d.next_suffix();
            assert!(s > previous);
            previous = s;
        }
    }
}
