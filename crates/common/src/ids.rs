//! Identifier newtypes for Warden.
//!
//! Keeps request ids and origin keys from being mixed up with arbitrary
//! strings as they travel through the gate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest request id accepted from a client header
const MAX_REQUEST_ID_LEN: usize = 128;

/// Per-request id used to correlate log lines.
///
/// Generated for every request unless the client supplied a usable
/// `x-request-id`, in which case that value is kept.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(String);

impl RequestId {
    /// Create a new random request ID
    #[cfg(feature = "runtime")]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Adopt a client supplied id when it is short and printable
    pub fn from_header(value: &str) -> Option<Self> {
        let value = value.trim();
        let usable = !value.is_empty()
            && value.len() <= MAX_REQUEST_ID_LEN
            && value
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        usable.then(|| Self(value.to_string()))
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(feature = "runtime")]
impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Network identity that keys lockout state.
///
/// Usually the textual client IP. Kept verbatim (no normalisation) so the
/// allow-list substring check sees exactly what the client presented.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OriginKey(String);

impl OriginKey {
    pub fn new(origin: impl Into<String>) -> Self {
        Self(origin.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OriginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
