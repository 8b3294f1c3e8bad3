//! Per-origin failed credential tracking with timed lockout
//!
//! Each origin moves through a small state machine:
//!
//! - **Clean**: no recorded failures
//! - **Warned(n)**: `n` consecutive failures, `n < MAX_FAILED_ATTEMPTS`
//! - **Locked(until)**: every request is refused until `until`
//!
//! A success from Clean or Warned returns the origin to Clean. A success never
//! lifts an active lock. Locks expire lazily: the first access at or after
//! `until` observes Clean, no timer is involved.
//!
//! # Concurrency
//!
//! [`MemoryAttemptStore`] keeps records in a `DashMap`. Every failure is
//! applied while holding the entry's shard lock, so concurrent wrong attempts
//! from the same origin are counted exactly once each. Clearing on success is
//! a conditional remove under the same lock, so a lock set between a caller's
//! [`AttemptStore::state`] check and its success survives.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, trace, warn};

/// Consecutive failures that lock an origin
pub const MAX_FAILED_ATTEMPTS: u32 = 5;

/// Lock window applied once the threshold is reached (24 hours)
pub const LOCKOUT_DURATION_SECS: i64 = 24 * 60 * 60;

/// Default cap on the number of origins tracked at once
pub const DEFAULT_MAX_TRACKED_ORIGINS: usize = 10_000;

/// Lock window as a chrono duration
pub fn lockout_duration() -> Duration {
    Duration::seconds(LOCKOUT_DURATION_SECS)
}

// ============================================================================
// Records and states
// ============================================================================

/// Failure bookkeeping for one origin
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessAttemptRecord {
    /// Consecutive failed attempts
    pub failure_count: u32,
    /// End of the lock window, if locked
    pub lock_until: Option<DateTime<Utc>>,
    /// Time of the most recent failure
    pub last_failure: DateTime<Utc>,
}

impl AccessAttemptRecord {
    fn blank(now: DateTime<Utc>) -> Self {
        Self {
            failure_count: 0,
            lock_until: None,
            last_failure: now,
        }
    }

    /// Whether the lock window has passed
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.lock_until, Some(until) if now >= until)
    }

    fn is_locked(&self, now: DateTime<Utc>) -> bool {
        matches!(self.lock_until, Some(until) if now < until)
    }
}

/// Observable lockout state of an origin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// No failures on record
    Clean,
    /// Some failures, still allowed to try
    Warned(u32),
    /// Refused until the given instant
    Locked { until: DateTime<Utc> },
}

impl LockState {
    /// Whole hours left in the lock window, rounded up
    pub fn remaining_hours(&self, now: DateTime<Utc>) -> Option<u64> {
        match self {
            LockState::Locked { until } => Some(hours_until(*until, now)),
            _ => None,
        }
    }
}

/// Result of recording a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Below the threshold; `remaining` further failures lock the origin
    Warned { failures: u32, remaining: u32 },
    /// The origin is locked until the given instant
    Locked { until: DateTime<Utc> },
}

/// Round a lock window up to whole hours
pub fn hours_until(until: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    let secs = (until - now).num_seconds().max(0) as u64;
    secs.div_ceil(3600)
}

// ============================================================================
// Store trait
// ============================================================================

/// Storage for per-origin attempt records.
///
/// Implementations must apply [`record_failure`](AttemptStore::record_failure)
/// atomically per origin. All methods take `now` explicitly so callers decide
/// the clock.
pub trait AttemptStore: Send + Sync {
    /// Current state of an origin, expiring a passed lock on the way
    fn state(&self, origin: &str, now: DateTime<Utc>) -> LockState;

    /// Count one failed attempt for an origin
    fn record_failure(&self, origin: &str, now: DateTime<Utc>) -> FailureOutcome;

    /// Forget an origin after a successful attempt.
    ///
    /// An active lock is left in place and returned as [`LockState::Locked`];
    /// otherwise the record is dropped and [`LockState::Clean`] returned.
    fn record_success(&self, origin: &str, now: DateTime<Utc>) -> LockState;

    /// Drop records whose lock has expired; returns how many were removed
    fn purge_expired(&self, now: DateTime<Utc>) -> usize;

    /// Number of origins currently tracked
    fn tracked(&self) -> usize;
}

// ============================================================================
// In-memory store
// ============================================================================

/// Process-local attempt store backed by a `DashMap`.
///
/// The table is bounded: when a new origin arrives at capacity, expired locks
/// are purged first and, failing that, the record with the oldest failure is
/// evicted. Active locks are only evicted when nothing else is left.
#[derive(Debug)]
pub struct MemoryAttemptStore {
    records: DashMap<String, AccessAttemptRecord>,
    max_entries: usize,
}

impl MemoryAttemptStore {
    /// Create a store with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_MAX_TRACKED_ORIGINS)
    }

    /// Create a store tracking at most `max_entries` origins
    pub fn with_capacity(max_entries: usize) -> Self {
        let max_entries = max_entries.max(1);
        trace!(max_entries, "Creating in-memory attempt store");
        Self {
            records: DashMap::new(),
            max_entries,
        }
    }

    /// Snapshot of one origin's record
    pub fn record(&self, origin: &str) -> Option<AccessAttemptRecord> {
        self.records.get(origin).map(|r| r.clone())
    }

    /// Make room for a new origin
    fn ensure_capacity(&self, now: DateTime<Utc>) {
        if self.records.len() < self.max_entries {
            return;
        }

        let purged = self.purge_expired(now);
        if purged > 0 || self.records.len() < self.max_entries {
            return;
        }

        // Prefer evicting an unlocked record, then the oldest lock
        let victim = self
            .records
            .iter()
            .min_by_key(|r| (r.is_locked(now), r.last_failure))
            .map(|r| r.key().clone());

        if let Some(origin) = victim {
            self.records.remove(&origin);
            warn!(
                origin = %origin,
                max_entries = self.max_entries,
                "Attempt table full, evicted oldest record"
            );
        }
    }
}

impl Default for MemoryAttemptStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AttemptStore for MemoryAttemptStore {
    fn state(&self, origin: &str, now: DateTime<Utc>) -> LockState {
        let state = match self.records.get(origin) {
            None => return LockState::Clean,
            Some(record) => match record.lock_until {
                Some(until) if now < until => LockState::Locked { until },
                Some(_) => LockState::Clean,
                None if record.failure_count == 0 => LockState::Clean,
                None => LockState::Warned(record.failure_count),
            },
        };

        if state == LockState::Clean {
            // Guard released above; remove only if still expired
            if self
                .records
                .remove_if(origin, |_, r| r.is_expired(now))
                .is_some()
            {
                debug!(origin = %origin, "Lock expired, origin reset");
            }
        }

        state
    }

    fn record_failure(&self, origin: &str, now: DateTime<Utc>) -> FailureOutcome {
        if !self.records.contains_key(origin) {
            self.ensure_capacity(now);
        }

        let mut entry = match self.records.entry(origin.to_string()) {
            Entry::Occupied(e) => e.into_ref(),
            Entry::Vacant(e) => e.insert(AccessAttemptRecord::blank(now)),
        };
        let record = entry.value_mut();

        if let Some(until) = record.lock_until {
            if now < until {
                trace!(origin = %origin, "Failure while locked, lock unchanged");
                return FailureOutcome::Locked { until };
            }
            // Lapsed lock counts as a clean slate
            *record = AccessAttemptRecord::blank(now);
        }

        record.failure_count += 1;
        record.last_failure = now;

        if record.failure_count >= MAX_FAILED_ATTEMPTS {
            let until = now + lockout_duration();
            record.lock_until = Some(until);
            warn!(
                origin = %origin,
                failures = record.failure_count,
                until = %until,
                "Origin locked after repeated failures"
            );
            FailureOutcome::Locked { until }
        } else {
            let remaining = MAX_FAILED_ATTEMPTS - record.failure_count;
            debug!(
                origin = %origin,
                failures = record.failure_count,
                remaining,
                "Recorded failed attempt"
            );
            FailureOutcome::Warned {
                failures: record.failure_count,
                remaining,
            }
        }
    }

    fn record_success(&self, origin: &str, now: DateTime<Utc>) -> LockState {
        if self
            .records
            .remove_if(origin, |_, r| !r.is_locked(now))
            .is_some()
        {
            debug!(origin = %origin, "Cleared failure record");
            return LockState::Clean;
        }

        match self.records.get(origin).and_then(|r| r.lock_until) {
            Some(until) if now < until => {
                warn!(origin = %origin, until = %until, "Success refused, origin is locked");
                LockState::Locked { until }
            }
            _ => LockState::Clean,
        }
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|_, r| !r.is_expired(now));
        let removed = before.saturating_sub(self.records.len());
        if removed > 0 {
            debug!(removed, "Purged expired locks");
        }
        removed
    }

    fn tracked(&self) -> usize {
        self.records.len()
    }
}
