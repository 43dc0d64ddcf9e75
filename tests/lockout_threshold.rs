use anyhow::Result;
use chainpass::broker::ResolveError;
use chainpass::prompt::ScriptedPrompt;
use chrono::Duration;
use secrecy::ExposeSecret;

mod support;
use support::{broker_at, manual_clock, secret};

/// Five exhausted resolutions lock the identifier; the sixth call is rejected
/// before any source is consulted, even though the store could now succeed.
#[test]
fn sixth_attempt_is_locked_out_even_with_a_valid_stored_secret() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let clock = manual_clock();
    let broker = broker_at(dir.path(), "master", ScriptedPrompt::declining(), clock);

    for _ in 0..5 {
        let err = broker.resolve_secret("validator", None).unwrap_err();
        assert!(matches!(err, ResolveError::Exhausted { .. }));
    }

    // A correct secret arriving now must not help until the lock expires.
    broker.store_secret("validator", &secret("now-present"))?;

    let err = broker.resolve_secret("validator", None).unwrap_err();
    assert!(matches!(err, ResolveError::LockedOut { .. }));
    Ok(())
}

#[test]
fn lock_expires_and_resolution_proceeds_normally() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let clock = manual_clock();
    let broker = broker_at(
        dir.path(),
        "master",
        ScriptedPrompt::declining(),
        clock.clone(),
    );

    for _ in 0..5 {
        broker.resolve_secret("validator", None).unwrap_err();
    }
    broker.store_secret("validator", &secret("now-present"))?;
    assert!(matches!(
        broker.resolve_secret("validator", None).unwrap_err(),
        ResolveError::LockedOut { .. }
    ));

    clock.advance(Duration::minutes(5) + Duration::seconds(1));

    let resolved = broker.resolve_secret("validator", None).unwrap();
    assert_eq!(resolved.expose_secret(), "now-present");
    Ok(())
}

/// A success midway through a failure streak resets the counter: the streak
/// has to start over to reach the threshold.
#[test]
fn success_resets_the_failure_count() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let clock = manual_clock();
    // One prompt answer, scripted to arrive after three failures.
    let prompt = ScriptedPrompt::new(vec![None, None, None, Some("typed-in")]);
    let broker = broker_at(dir.path(), "master", prompt, clock);

    for _ in 0..3 {
        broker.resolve_secret("validator", None).unwrap_err();
    }

    let resolved = broker.resolve_secret("validator", None).unwrap();
    assert_eq!(resolved.expose_secret(), "typed-in");
    broker.clear_cache()?;

    // Four more failures only reach a count of four; no lockout yet.
    for _ in 0..4 {
        let err = broker.resolve_secret("validator", None).unwrap_err();
        assert!(matches!(err, ResolveError::Exhausted { .. }));
    }
    Ok(())
}

/// The lockout rejection is audited as FAILED from the lockout source.
#[test]
fn lockout_rejection_is_audited() -> Result<()> {
    let dir = tempfile::TempDir::new()?;
    let clock = manual_clock();
    let broker = broker_at(dir.path(), "master", ScriptedPrompt::declining(), clock);

    for _ in 0..5 {
        broker.resolve_secret("validator", None).unwrap_err();
    }
    broker.resolve_secret("validator", None).unwrap_err();

    let lines = support::audit_lines(dir.path());
    let last = lines.last().unwrap();
    assert!(last.contains("| lockout | FAILED"));
    Ok(())
}
