//! Upload-to-job pipeline.
//!
//! [`Pipeline`] is the single service object built at startup. For each
//! stored upload it submits a worker job, publishes the availability event
//! and tracks the job to completion in the background.

use std::sync::Arc;
use std::time::Duration;

use detector_cluster::{JobDispatcher, JobOutcome, SubmitError, WorkerLog};
use detector_core::notification::NotificationEvent;
use detector_events::Publisher;
use tokio::task::JoinHandle;

use crate::ws::NotificationHub;

/// Where and for how long worker jobs run.
#[derive(Debug, Clone)]
pub struct JobSettings {
    /// Volume claim holding uploads, mounted by every worker.
    pub resource_pool: String,
    pub namespace: String,
    /// Deadline for each job to reach a terminal phase.
    pub timeout: Duration,
}

pub struct Pipeline {
    dispatcher: Arc<JobDispatcher>,
    publisher: Publisher,
    hub: Arc<NotificationHub>,
    settings: JobSettings,
}

impl Pipeline {
    pub fn new(
        dispatcher: Arc<JobDispatcher>,
        publisher: Publisher,
        hub: Arc<NotificationHub>,
        settings: JobSettings,
    ) -> Self {
        Self {
            dispatcher,
            publisher,
            hub,
            settings,
        }
    }

    pub fn hub(&self) -> &Arc<NotificationHub> {
        &self.hub
    }

    /// Start processing a stored upload.
    ///
    /// Only a rejected submission is reported to the caller. A failed
    /// publish is logged and costs viewers this one notification. The
    /// returned handle resolves when the job is terminal or timed out.
    pub async fn start_job(&self, file_name: &str) -> Result<JoinHandle<JobOutcome>, SubmitError> {
        let job = self
            .dispatcher
            .submit(file_name, &self.settings.resource_pool, &self.settings.namespace)
            .await?;

        let event = NotificationEvent::for_upload(file_name);
        match self
            .publisher
            .publish(file_name.as_bytes(), event.to_json().as_bytes())
            .await
        {
            Ok(ack) => tracing::debug!(
                file = %file_name,
                partition = ack.partition,
                offset = ack.offset,
                "Upload event published",
            ),
            Err(e) => tracing::error!(file = %file_name, error = %e, "Failed to publish upload event"),
        }

        let dispatcher = Arc::clone(&self.dispatcher);
        let timeout = self.settings.timeout;
        Ok(tokio::spawn(async move {
            let job_name = job.id.clone();
            let outcome = dispatcher.await_terminal(job, timeout).await;
            match &outcome {
                JobOutcome::Succeeded => {
                    tracing::info!(job_name = %job_name, "Detection job succeeded");
                }
                JobOutcome::Failed { reason, log } => match log {
                    WorkerLog::Captured(text) => tracing::error!(
                        job_name = %job_name,
                        reason = %reason,
                        log = %text,
                        "Detection job failed",
                    ),
                    WorkerLog::Unavailable(why) => tracing::error!(
                        job_name = %job_name,
                        reason = %reason,
                        log_error = %why,
                        "Detection job failed, worker log unavailable",
                    ),
                },
                JobOutcome::TimedOut => {
                    tracing::warn!(job_name = %job_name, "Detection job still running at deadline");
                }
            }
            outcome
        }))
    }
}
