use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub const BAD_REQUEST: u16 = 400;
pub const INTERNAL_ERROR: u16 = 500;

/// Payload of an `Error` frame.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub msg: String,
    pub code: u16,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>, code: u16, details: BTreeMap<String, String>) -> Self {
        Self {
            msg: msg.into(),
            code,
            details,
        }
    }

    /// Domain rejection (wrong turn, unknown battle, ...). Reason under `details.error`.
    pub fn bad_request(reason: impl Into<String>) -> Self {
        Self::new("Bad request", BAD_REQUEST, single("error", reason))
    }

    /// Payload failed shape validation; `details` maps field to reason.
    pub fn invalid_fields(details: BTreeMap<String, String>) -> Self {
        Self::new("Request contains invalid fields.", BAD_REQUEST, details)
    }

    pub fn database(reason: impl Into<String>) -> Self {
        Self::new("Failed to execute DB operations.", INTERNAL_ERROR, single("error", reason))
    }

    pub fn unknown_type(received: i64) -> Self {
        Self::new(
            "Unknown message type",
            BAD_REQUEST,
            single("received_type", received.to_string()),
        )
    }

    pub fn already_connected() -> Self {
        Self::new("Already connected", BAD_REQUEST, single("type", "Already connected"))
    }

    pub fn decode_failed(reason: impl Into<String>) -> Self {
        Self::new("Failed to decode request", BAD_REQUEST, single("error", reason))
    }
}

fn single(key: &str, value: impl Into<String>) -> BTreeMap<String, String> {
    BTreeMap::from([(key.to_string(), value.into())])
}
