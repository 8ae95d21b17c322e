//! Worker job lifecycle.
//!
//! ```text
//!   Queued ──→ Dispatching ──→ Running ──→ Succeeded
//!                   │             │
//!                   │             ├──→ Failed
//!                   │             │
//!                   └─────────────┴──→ TimedOut
//! ```
//!
//! Phases only move forward. `Running` may be skipped when the worker
//! finishes between two polls. Terminal phases are permanent.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Observed phase of a single worker job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    Dispatching,
    Running,
    Succeeded,
    Failed,
    TimedOut,
}

impl JobPhase {
    fn rank(self) -> u8 {
        match self {
            JobPhase::Queued => 0,
            JobPhase::Dispatching => 1,
            JobPhase::Running => 2,
            JobPhase::Succeeded | JobPhase::Failed | JobPhase::TimedOut => 3,
        }
    }

    /// Whether no further transitions can happen.
    pub fn is_terminal(self) -> bool {
        self.rank() == 3
    }

    /// Move to `next`, refusing regressions and exits from a terminal phase.
    ///
    /// Re-observing the current non-terminal phase is accepted as a no-op.
    pub fn advance(self, next: JobPhase) -> Result<JobPhase, CoreError> {
        if self.is_terminal() {
            return Err(CoreError::Conflict(format!(
                "job already terminal ({self}), cannot move to {next}"
            )));
        }
        if next.rank() < self.rank() {
            return Err(CoreError::Conflict(format!(
                "job phase cannot move backwards from {self} to {next}"
            )));
        }
        Ok(next)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobPhase::Queued => "queued",
            JobPhase::Dispatching => "dispatching",
            JobPhase::Running => "running",
            JobPhase::Succeeded => "succeeded",
            JobPhase::Failed => "failed",
            JobPhase::TimedOut => "timed_out",
        }
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
