//! Append-only audit trail of resolution attempts.
//!
//! One line per attempt; the subsystem only ever appends, so the log is a
//! faithful history for post-hoc security review. Identifiers appear in the
//! log but secrets never do.

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use chrono::SecondsFormat;

use crate::clock::Clock;
use crate::storage::StateStore;

pub const AUDIT_FILE: &str = "password_audit.log";

/// Which resolution source produced (or rejected) the attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Cache,
    Environment,
    Stored,
    Prompt,
    Default,
    /// Rejected before any source was consulted.
    Lockout,
    /// Every source was exhausted.
    None,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Source::Cache => "cache",
            Source::Environment => "environment",
            Source::Stored => "stored",
            Source::Prompt => "prompt",
            Source::Default => "default",
            Source::Lockout => "lockout",
            Source::None => "none",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::Success => "SUCCESS",
            Outcome::Failed => "FAILED",
        })
    }
}

pub struct AuditLog {
    state: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
}

impl AuditLog {
    pub fn new(state: Arc<dyn StateStore>, clock: Arc<dyn Clock>) -> Self {
        Self { state, clock }
    }

    /// Append one entry: `<timestamp> | <identifier> | <source> | <outcome>`.
    pub fn append(&self, identifier: &str, source: Source, outcome: Outcome) -> Result<()> {
        let timestamp = self
            .clock
            .now()
            .to_rfc3339_opts(SecondsFormat::Secs, true);
        let line = format!("{timestamp} | {identifier} | {source} | {outcome}");
        self.state.append_line(AUDIT_FILE, &line)
    }
}
