use detector_core::error::CoreError;

/// Errors reported by a bus transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Timeouts, leader elections, brief unavailability. Worth retrying.
    #[error("transient broker error: {0}")]
    Transient(String),

    /// Unknown topic, invalid request. Retrying will not help.
    #[error("permanent broker error: {0}")]
    Permanent(String),

    /// The transport was shut down.
    #[error("transport closed")]
    Closed,
}

/// Publishing did not yield an acknowledgment.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("publish rejected: {0}")]
    Rejected(String),

    #[error("publish failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("publish failed: transport closed")]
    Closed,
}

/// A message handler could not process a message.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The message value does not have the expected shape.
    #[error("cannot decode message: {0}")]
    Decode(String),

    #[error("handler failed: {0}")]
    Internal(String),
}

impl From<CoreError> for HandlerError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Validation(msg) => HandlerError::Decode(msg),
            other => HandlerError::Internal(other.to_string()),
        }
    }
}
