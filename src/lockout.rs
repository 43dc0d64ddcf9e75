//! Brute-force lockout tracking: per-identifier failure counters with timed
//! lock expiry, persisted between invocations.
//!
//! The record file holds no secret material, so it is plain JSON, but it is
//! still written atomically like every other state file.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::storage::StateStore;

pub const LOCKOUT_FILE: &str = "lockout.json";

/// Consecutive failures before an identifier is locked.
pub const DEFAULT_LOCKOUT_THRESHOLD: u32 = 5;

/// How long a lock lasts.
pub fn default_lockout_window() -> Duration {
    Duration::minutes(5)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LockoutRecord {
    failure_count: u32,
    last_failure_at: DateTime<Utc>,
    locked_until: Option<DateTime<Utc>>,
}

type RecordMap = BTreeMap<String, LockoutRecord>;

pub struct LockoutTracker {
    state: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    threshold: u32,
    window: Duration,
}

impl LockoutTracker {
    pub fn new(state: Arc<dyn StateStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state,
            clock,
            threshold: DEFAULT_LOCKOUT_THRESHOLD,
            window: default_lockout_window(),
        }
    }

    pub fn with_limits(mut self, threshold: u32, window: Duration) -> Self {
        self.threshold = threshold.max(1);
        self.window = window;
        self
    }

    /// Is the identifier currently locked? Returns the remaining lock
    /// duration if so. An expired lock is cleared on the spot, returning the
    /// identifier to the unlocked state with its counter reset.
    pub fn check(&self, identifier: &str) -> Result<Option<Duration>> {
        let mut map = self.load()?;
        let Some(record) = map.get(identifier) else {
            return Ok(None);
        };
        let Some(locked_until) = record.locked_until else {
            return Ok(None);
        };

        let now = self.clock.now();
        if now < locked_until {
            return Ok(Some(locked_until - now));
        }

        map.remove(identifier);
        self.save(&map)?;
        Ok(None)
    }

    /// Record one failed resolution. Returns the remaining lock duration if
    /// this failure crossed the threshold.
    pub fn record_failure(&self, identifier: &str) -> Result<Option<Duration>> {
        let now = self.clock.now();
        let mut map = self.load()?;

        let record = map.entry(identifier.to_string()).or_insert(LockoutRecord {
            failure_count: 0,
            last_failure_at: now,
            locked_until: None,
        });
        record.failure_count += 1;
        record.last_failure_at = now;

        let locked = if record.failure_count >= self.threshold {
            record.locked_until = Some(now + self.window);
            tracing::warn!(
                identifier,
                failures = record.failure_count,
                "too many failed resolutions, locking out"
            );
            Some(self.window)
        } else {
            None
        };

        self.save(&map)?;
        Ok(locked)
    }

    /// Record a successful resolution: the identifier returns to the
    /// unlocked state with a zero counter regardless of prior failures.
    pub fn record_success(&self, identifier: &str) -> Result<()> {
        let mut map = self.load()?;
        if map.remove(identifier).is_some() {
            self.save(&map)?;
        }
        Ok(())
    }

    /// Current consecutive-failure count, for diagnostics and tests.
    pub fn failure_count(&self, identifier: &str) -> Result<u32> {
        let map = self.load()?;
        Ok(map.get(identifier).map_or(0, |r| r.failure_count))
    }

    fn load(&self) -> Result<RecordMap> {
        let Some(bytes) = self.state.read(LOCKOUT_FILE)? else {
            return Ok(RecordMap::new());
        };
        serde_json::from_slice(&bytes).context("Failed to parse lockout records")
    }

    fn save(&self, map: &RecordMap) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(map).context("Failed to serialize lockout records")?;
        self.state.write_atomic(LOCKOUT_FILE, &bytes)
    }
}
