#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use chainpass::broker::CredentialBroker;
use chainpass::clock::ManualClock;
use chainpass::crypto::KeySource;
use chainpass::prompt::ScriptedPrompt;
use chainpass::storage::FileStateStore;
use chrono::{TimeZone, Utc};
use secrecy::SecretString;

pub fn manual_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap(),
    ))
}

pub fn passphrase_keys(passphrase: &str) -> KeySource {
    KeySource::Passphrase(SecretString::from(passphrase.to_string()))
}

/// Broker on a real file-backed state store rooted at `dir`.
pub fn broker_at(
    dir: &Path,
    passphrase: &str,
    prompt: ScriptedPrompt,
    clock: Arc<ManualClock>,
) -> CredentialBroker {
    let state = Arc::new(FileStateStore::new(dir).expect("state store"));
    CredentialBroker::with_state(state, passphrase_keys(passphrase), Arc::new(prompt))
        .with_clock(clock)
}

/// The audit log's lines, oldest first. Empty if nothing was audited yet.
pub fn audit_lines(dir: &Path) -> Vec<String> {
    match std::fs::read_to_string(dir.join("password_audit.log")) {
        Ok(content) => content.lines().map(str::to_string).collect(),
        Err(_) => Vec::new(),
    }
}

/// The `<source>` field of an audit line.
pub fn audit_source(line: &str) -> String {
    line.split(" | ").nth(2).expect("audit source field").to_string()
}

pub fn secret(value: &str) -> SecretString {
    SecretString::from(value.to_string())
}
