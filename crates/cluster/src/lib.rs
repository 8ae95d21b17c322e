//! Placement-system integration for detector worker jobs.
//!
//! - [`PlacementApi`]: the contract this crate consumes (submit, status,
//!   log retrieval).
//! - [`KubeApi`]: the Kubernetes REST implementation of that contract.
//! - [`WorkUnitSpec`]: the one-shot worker unit submitted per artifact.
//! - [`JobDispatcher`]: submits a unit per upload and polls it to a
//!   terminal phase.

pub mod dispatcher;
pub mod error;
pub mod kube;
pub mod placement;
pub mod spec;

pub use dispatcher::{Job, JobDispatcher, JobOutcome, SubmitError, WorkerLog};
pub use error::PlacementError;
pub use kube::{KubeApi, KubeConfig};
pub use placement::{PlacementApi, UnitStatus};
pub use spec::{WorkUnitSpec, WorkerTemplate};
