//! Warden Common
//!
//! Building blocks shared by the Warden crates:
//!
//! - **Origin classification**: private vs. external request origins
//! - **Lockout tracking**: per-origin failure counting with timed locks
//! - **Identifiers**: request ids and origin keys
//! - **Logging**: tracing subscriber bootstrap (runtime feature)

pub mod ids;
pub mod ip;
pub mod lockout;

#[cfg(feature = "runtime")]
pub mod logging;

pub use ids::{OriginKey, RequestId};
pub use ip::{classify, classify_ip, OriginClass};
pub use lockout::{
    hours_until, AccessAttemptRecord, AttemptStore, FailureOutcome, LockState,
    MemoryAttemptStore, DEFAULT_MAX_TRACKED_ORIGINS, LOCKOUT_DURATION_SECS, MAX_FAILED_ATTEMPTS,
};

#[cfg(feature = "runtime")]
pub use logging::{LogFormat, UnknownLogFormat};
