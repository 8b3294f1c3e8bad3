//! Access policy engine
//!
//! Combines origin classification, the allow-list, the shared secret and the
//! lockout store into one decision per request:
//!
//! 1. Private origin matching an allow-list fragment → allow, nothing else
//!    is consulted
//! 2. Locked origin → refuse with the hours left
//! 3. No credential → ask for one
//! 4. Wrong credential → count a failure (which may lock)
//! 5. Right credential → clear the origin's record and allow
//!
//! Only steps 4 and 5 change lockout state. Step 5 never lifts a lock that
//! concurrent failures set after step 2; such a request is refused as locked.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use constant_time_eq::constant_time_eq;
use sha2::{Digest, Sha256};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use warden_common::{classify, hours_until, AttemptStore, FailureOutcome, LockState, OriginClass};
use warden_config::AccessPolicyConfig;

/// Interval between purges of expired locks
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Outcome of one authorization check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Hand the request to the protected handlers
    Allow,
    /// No credential supplied; `external` origins must always authenticate
    RequireCredential { external: bool },
    /// Origin is locked out
    Locked { remaining_hours: u64 },
    /// Wrong credential, origin not locked yet
    InvalidCredential { remaining_attempts: u32 },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Allow => write!(f, "allow"),
            Decision::RequireCredential { .. } => write!(f, "require_credential"),
            Decision::Locked { .. } => write!(f, "locked"),
            Decision::InvalidCredential { .. } => write!(f, "invalid_credential"),
        }
    }
}

/// The authorization engine shared by every request
pub struct AccessPolicy {
    /// SHA-256 of the shared secret; the secret itself is not kept
    secret_digest: [u8; 32],
    /// Non-empty allow-list fragments
    allow_list: Vec<String>,
    /// Failure bookkeeping
    store: Arc<dyn AttemptStore>,
}

impl AccessPolicy {
    pub fn new(config: &AccessPolicyConfig, store: Arc<dyn AttemptStore>) -> Self {
        let allow_list: Vec<String> = config
            .allow_list_fragments
            .iter()
            .map(|f| f.trim())
            .filter(|f| !f.is_empty())
            .map(str::to_string)
            .collect();

        debug!(allow_list = allow_list.len(), "Created access policy");

        Self {
            secret_digest: digest(&config.secret),
            allow_list,
            store,
        }
    }

    /// The lockout store this engine mutates
    pub fn store(&self) -> &Arc<dyn AttemptStore> {
        &self.store
    }

    /// Decide a request at the current time
    pub fn authorize(&self, origin: &str, host: Option<&str>, credential: Option<&str>) -> Decision {
        self.authorize_at(origin, host, credential, Utc::now())
    }

    /// Decide a request at `now`
    pub fn authorize_at(
        &self,
        origin: &str,
        host: Option<&str>,
        credential: Option<&str>,
        now: DateTime<Utc>,
    ) -> Decision {
        let class = classify(origin);

        if class == OriginClass::Private && self.is_allow_listed(origin, host) {
            trace!(origin = %origin, host = ?host, "Allow-listed private origin");
            return Decision::Allow;
        }

        if let LockState::Locked { until } = self.store.state(origin, now) {
            debug!(origin = %origin, until = %until, "Request from locked origin");
            return Decision::Locked {
                remaining_hours: hours_until(until, now),
            };
        }

        let Some(credential) = credential.filter(|c| !c.is_empty()) else {
            return Decision::RequireCredential {
                external: class.is_external(),
            };
        };

        if !self.credential_matches(credential) {
            return match self.store.record_failure(origin, now) {
                FailureOutcome::Warned { remaining, .. } => {
                    info!(origin = %origin, remaining, "Rejected wrong credential");
                    Decision::InvalidCredential {
                        remaining_attempts: remaining,
                    }
                }
                FailureOutcome::Locked { until } => {
                    warn!(origin = %origin, until = %until, "Wrong credential locked origin");
                    Decision::Locked {
                        remaining_hours: hours_until(until, now),
                    }
                }
            };
        }

        if let LockState::Locked { until } = self.store.record_success(origin, now) {
            // Concurrent failures locked the origin after the lock check above
            return Decision::Locked {
                remaining_hours: hours_until(until, now),
            };
        }
        trace!(origin = %origin, "Credential accepted");
        Decision::Allow
    }

    /// Whether the host header or origin contains any allow-list fragment
    fn is_allow_listed(&self, origin: &str, host: Option<&str>) -> bool {
        let host = host.unwrap_or("");
        self.allow_list
            .iter()
            .any(|fragment| host.contains(fragment.as_str()) || origin.contains(fragment.as_str()))
    }

    /// Compare digests in constant time so timing says nothing about the secret
    fn credential_matches(&self, credential: &str) -> bool {
        constant_time_eq(&digest(credential), &self.secret_digest)
    }
}

impl fmt::Debug for AccessPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessPolicy")
            .field("allow_list", &self.allow_list)
            .field("tracked_origins", &self.store.tracked())
            .finish_non_exhaustive()
    }
}

fn digest(value: &str) -> [u8; 32] {
    Sha256::digest(value.as_bytes()).into()
}

// ============================================================================
// Background sweeper
// ============================================================================

/// Periodically drops expired locks so idle origins do not linger.
///
/// Lazy expiry on access stays authoritative; this only bounds memory.
pub struct LockoutSweeper {
    store: Arc<dyn AttemptStore>,
    interval: Duration,
}

impl LockoutSweeper {
    pub fn new(store: Arc<dyn AttemptStore>) -> Self {
        Self {
            store,
            interval: SWEEP_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run one purge pass
    pub fn sweep(&self, now: DateTime<Utc>) -> usize {
        let removed = self.store.purge_expired(now);
        trace!(removed, tracked = self.store.tracked(), "Lockout sweep finished");
        removed
    }

    /// Run forever on the current runtime
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            debug!(interval_secs = self.interval.as_secs(), "Starting lockout sweeper");
            let mut interval = tokio::time::interval(self.interval);
            // First tick fires immediately; nothing to purge yet
            interval.tick().await;
            loop {
                interval.tick().await;
                self.sweep(Utc::now());
            }
        })
    }
}
