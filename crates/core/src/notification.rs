//! Notification payload carried from the bus to live viewers.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// URL prefix under which uploaded artifacts are served.
pub const FILES_URL_PREFIX: &str = "/files/";

/// An artifact became available for viewing.
///
/// This is the only shape accepted off the bus. Anything else (extra
/// fields, missing `image_url`, non-string values) is rejected at decode
/// time and never reaches a viewer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NotificationEvent {
    pub image_url: String,
}

impl NotificationEvent {
    /// Event announcing an uploaded file by name.
    pub fn for_upload(file_name: &str) -> Self {
        Self {
            image_url: format!("{FILES_URL_PREFIX}{file_name}"),
        }
    }

    /// Decode a bus message value.
    pub fn decode(value: &[u8]) -> Result<Self, CoreError> {
        serde_json::from_slice(value)
            .map_err(|e| CoreError::Validation(format!("invalid notification payload: {e}")))
    }

    /// Encode as the JSON object published on the bus and sent to viewers.
    pub fn to_json(&self) -> String {
        // A struct with a single String field always serializes.
        serde_json::json!({ "image_url": self.image_url }).to_string()
    }
}
