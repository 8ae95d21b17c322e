//! The placement-system contract.

use async_trait::async_trait;

use crate::error::PlacementError;
use crate::spec::WorkUnitSpec;

/// Status of a submitted unit as reported by the placement system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitStatus {
    /// Accepted but not started (scheduling, image pull).
    Pending,
    Running,
    Succeeded,
    /// Finished unsuccessfully, with the reported reason.
    Failed(String),
    /// A phase this client does not recognise; treated as still in flight.
    Unknown(String),
}

/// Operations the dispatcher needs from the placement system.
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// concurrent dispatch-and-poll task.
#[async_trait]
pub trait PlacementApi: Send + Sync {
    /// Submit a unit. Returns the placement-assigned name on acceptance.
    async fn submit(&self, spec: &WorkUnitSpec) -> Result<String, PlacementError>;

    /// Read the current status of a unit.
    async fn status(&self, namespace: &str, name: &str) -> Result<UnitStatus, PlacementError>;

    /// Fetch the worker's output log.
    async fn logs(&self, namespace: &str, name: &str) -> Result<String, PlacementError>;
}
