/// Errors from the placement-system layer.
#[derive(Debug, thiserror::Error)]
pub enum PlacementError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The placement system refused the request (4xx other than 404/429).
    #[error("placement rejected request ({status}): {body}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The unit is not (yet) visible.
    #[error("unit not found: {0}")]
    NotFound(String),

    /// The placement system is temporarily unable to answer (5xx, 429).
    #[error("placement unavailable ({status}): {body}")]
    Unavailable { status: u16, body: String },

    /// The response did not have the expected shape.
    #[error("malformed placement response: {0}")]
    Malformed(String),

    /// Local configuration prevented building a client.
    #[error("placement client configuration: {0}")]
    Config(String),
}

impl PlacementError {
    /// Whether retrying the same read later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            PlacementError::Request(_)
                | PlacementError::NotFound(_)
                | PlacementError::Unavailable { .. }
        )
    }
}
