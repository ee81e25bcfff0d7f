use serde::{Deserialize, Serialize};

/// Claiming request: lets an end customer take ownership of the device by
/// entering `secret_key` within `duration_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub secret_key: String,
    pub duration_ms: u64,
}

impl ClaimRequest {
    pub fn new(secret_key: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            secret_key: secret_key.into(),
            duration_ms,
        }
    }
}
