//! The credential broker: the resolution chain and the subsystem's public
//! entry points.
//!
//! Sources are consulted in fixed priority order (cache, environment
//! override, encrypted store, interactive prompt, configured fallback),
//! short-circuiting on the first success. Every attempt is audited; failures
//! feed the lockout tracker.

use std::sync::Arc;

use anyhow::Result;
use secrecy::SecretString;

use crate::audit::{AuditLog, Outcome, Source};
use crate::cache::SecretCache;
use crate::clock::{Clock, SystemClock};
use crate::config::ResolvedConfig;
use crate::crypto::KeySource;
use crate::duration::format_duration;
use crate::lockout::LockoutTracker;
use crate::prompt::SecretPrompt;
use crate::storage::{FileStateStore, StateStore};
use crate::store::{EncryptedStore, StoreLookup};

/// Namespace prefix for per-identifier environment overrides.
pub const ENV_PREFIX: &str = "CHAINPASS_PASSWORD";

/// Environment variable consulted for an identifier: uppercased, with
/// non-alphanumeric characters replaced by `_`, under the subsystem prefix.
pub fn override_env_var(identifier: &str) -> String {
    let mut name = String::with_capacity(ENV_PREFIX.len() + 1 + identifier.len());
    name.push_str(ENV_PREFIX);
    name.push('_');
    for c in identifier.chars() {
        if c.is_ascii_alphanumeric() {
            name.push(c.to_ascii_uppercase());
        } else {
            name.push('_');
        }
    }
    name
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// The identifier is in the locked state; no source was consulted.
    #[error(
        "'{identifier}' is locked after repeated failed attempts; retry in {}",
        format_duration(*.remaining)
    )]
    LockedOut {
        identifier: String,
        remaining: std::time::Duration,
    },

    /// Every source was exhausted. The message deliberately does not say
    /// which sources were tried or what is stored.
    #[error(
        "no credential available for '{identifier}' - store one with \
         'chainpass store {identifier}' or set the {env_var} environment variable"
    )]
    Exhausted { identifier: String, env_var: String },

    /// Filesystem or state errors, propagated unchanged.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Per-call knobs for [`CredentialBroker::resolve`].
#[derive(Debug, Clone)]
pub struct ResolveOptions {
    pub prompt_message: Option<String>,
    pub allow_default: bool,
    pub allow_interactive: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            prompt_message: None,
            allow_default: true,
            allow_interactive: true,
        }
    }
}

/// Process-reentrant credential broker.
///
/// All state lives behind the injected [`StateStore`], so every invocation of
/// the host CLI reconstructs a broker from explicit paths and keys; there is
/// no module-level singleton.
pub struct CredentialBroker {
    state: Arc<dyn StateStore>,
    keys: Arc<KeySource>,
    clock: Arc<dyn Clock>,
    prompt: Arc<dyn SecretPrompt>,
    cache_ttl: chrono::Duration,
    lockout_threshold: u32,
    lockout_window: chrono::Duration,
    default_secret: Option<SecretString>,
}

impl CredentialBroker {
    /// Open the broker against the configured data directory.
    pub fn open(
        config: &ResolvedConfig,
        keys: KeySource,
        prompt: Arc<dyn SecretPrompt>,
    ) -> Result<Self> {
        let state: Arc<dyn StateStore> = Arc::new(FileStateStore::new(&config.data_dir)?);
        let broker = Self::with_state(state, keys, prompt)
            .with_cache_ttl(chrono::Duration::from_std(config.cache_ttl)?)
            .with_lockout_limits(
                config.lockout_threshold,
                chrono::Duration::from_std(config.lockout_window)?,
            );
        Ok(match &config.default_secret {
            Some(secret) => broker.with_default_secret(secret.clone()),
            None => broker,
        })
    }

    /// Build a broker on an explicit state store (tests use the in-memory
    /// implementation here).
    pub fn with_state(
        state: Arc<dyn StateStore>,
        keys: KeySource,
        prompt: Arc<dyn SecretPrompt>,
    ) -> Self {
        Self {
            state,
            keys: Arc::new(keys),
            clock: Arc::new(SystemClock),
            prompt,
            cache_ttl: crate::cache::default_cache_ttl(),
            lockout_threshold: crate::lockout::DEFAULT_LOCKOUT_THRESHOLD,
            lockout_window: crate::lockout::default_lockout_window(),
            default_secret: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_lockout_limits(mut self, threshold: u32, window: chrono::Duration) -> Self {
        self.lockout_threshold = threshold;
        self.lockout_window = window;
        self
    }

    /// Configure the low-security fallback secret, meant for first-run flows
    /// such as initial key generation, never for previously-stored high-value
    /// secrets.
    pub fn with_default_secret(mut self, secret: SecretString) -> Self {
        self.default_secret = Some(secret);
        self
    }

    /// Resolve with default options: interactive entry and the configured
    /// fallback both permitted.
    pub fn resolve_secret(
        &self,
        identifier: &str,
        prompt_message: Option<&str>,
    ) -> Result<SecretString, ResolveError> {
        self.resolve(
            identifier,
            ResolveOptions {
                prompt_message: prompt_message.map(str::to_string),
                ..Default::default()
            },
        )
    }

    /// Run the resolution chain.
    pub fn resolve(
        &self,
        identifier: &str,
        options: ResolveOptions,
    ) -> Result<SecretString, ResolveError> {
        let lockout = self.lockout();
        let audit = self.audit();

        // 1. Locked identifiers are rejected before any source is consulted,
        // bounding brute-force cost.
        if let Some(remaining) = lockout.check(identifier)? {
            audit.append(identifier, Source::Lockout, Outcome::Failed)?;
            return Err(ResolveError::LockedOut {
                identifier: identifier.to_string(),
                remaining: remaining.to_std().unwrap_or_default(),
            });
        }

        // 2. Cache. A hit does not touch the lockout record.
        if let Some(secret) = self.cache().get(identifier)? {
            audit.append(identifier, Source::Cache, Outcome::Success)?;
            tracing::debug!(identifier, "resolved from cache");
            return Ok(secret);
        }

        // 3. Environment override.
        if let Some(secret) = env_override(identifier) {
            self.on_success(identifier, &secret, Source::Environment)?;
            return Ok(secret);
        }

        // 4. Encrypted store. An undecryptable store counts as a failure but
        // falls through so it cannot block interactive entry.
        let store_lookup = self.store().lookup(identifier)?;
        match &store_lookup {
            StoreLookup::Found(secret) => {
                let secret = secret.clone();
                self.on_success(identifier, &secret, Source::Stored)?;
                return Ok(secret);
            }
            StoreLookup::Unreadable => {
                lockout.record_failure(identifier)?;
                audit.append(identifier, Source::Stored, Outcome::Failed)?;
                tracing::warn!(identifier, "stored credential could not be decrypted");
            }
            StoreLookup::Absent => {}
        }

        // 5. Interactive prompt.
        if options.allow_interactive {
            let message = options
                .prompt_message
                .clone()
                .unwrap_or_else(|| format!("Enter secret for '{identifier}'"));
            if let Some(secret) = self.prompt.request(&message)? {
                self.on_success(identifier, &secret, Source::Prompt)?;
                return Ok(secret);
            }
        }

        // 6. Configured fallback, only for identifiers with no stored record.
        // An unreadable store may hide one, so it also suppresses the default.
        if options.allow_default && matches!(store_lookup, StoreLookup::Absent) {
            if let Some(secret) = &self.default_secret {
                let secret = secret.clone();
                self.on_success(identifier, &secret, Source::Default)?;
                return Ok(secret);
            }
        }

        // 7. Exhausted.
        lockout.record_failure(identifier)?;
        audit.append(identifier, Source::None, Outcome::Failed)?;
        Err(ResolveError::Exhausted {
            identifier: identifier.to_string(),
            env_var: override_env_var(identifier),
        })
    }

    /// Persist a secret in the encrypted store.
    pub fn store_secret(&self, identifier: &str, secret: &SecretString) -> Result<()> {
        self.store().store(identifier, secret)
    }

    /// Remove a stored secret, along with any cached copy of it.
    pub fn delete_secret(&self, identifier: &str) -> Result<()> {
        self.store().delete(identifier)?;
        self.cache().forget(identifier)
    }

    /// Drop all cached secrets. Callers use this when switching endpoints.
    pub fn clear_cache(&self) -> Result<()> {
        self.cache().clear()
    }

    fn on_success(&self, identifier: &str, secret: &SecretString, source: Source) -> Result<()> {
        self.lockout().record_success(identifier)?;
        self.cache().put(identifier, secret)?;
        self.audit().append(identifier, source, Outcome::Success)?;
        if source == Source::Default {
            tracing::warn!(identifier, "using configured fallback secret");
        } else {
            tracing::debug!(identifier, %source, "secret resolved");
        }
        Ok(())
    }

    fn store(&self) -> EncryptedStore {
        EncryptedStore::new(self.state.clone(), self.keys.clone(), self.clock.clone())
    }

    fn cache(&self) -> SecretCache {
        SecretCache::new(self.state.clone(), self.keys.clone(), self.clock.clone())
            .with_ttl(self.cache_ttl)
    }

    fn lockout(&self) -> LockoutTracker {
        LockoutTracker::new(self.state.clone(), self.clock.clone())
            .with_limits(self.lockout_threshold, self.lockout_window)
    }

    fn audit(&self) -> AuditLog {
        AuditLog::new(self.state.clone(), self.clock.clone())
    }
}

fn env_override(identifier: &str) -> Option<SecretString> {
    std::env::var(override_env_var(identifier))
        .ok()
        .filter(|value| !value.is_empty())
        .map(SecretString::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::ScriptedPrompt;
    use crate::storage::MemoryStateStore;
    use secrecy::ExposeSecret;

    fn broker_with_prompt(prompt: ScriptedPrompt) -> CredentialBroker {
        CredentialBroker::with_state(
            Arc::new(MemoryStateStore::new()),
            KeySource::Passphrase(SecretString::from("master".to_string())),
            Arc::new(prompt),
        )
    }

    #[test]
    fn env_var_name_derivation() {
        assert_eq!(
            override_env_var("my_wallet_key"),
            "CHAINPASS_PASSWORD_MY_WALLET_KEY"
        );
        assert_eq!(
            override_env_var("wallet/alice.1"),
            "CHAINPASS_PASSWORD_WALLET_ALICE_1"
        );
        assert_eq!(override_env_var("abc"), "CHAINPASS_PASSWORD_ABC");
    }

    #[test]
    fn prompt_supplies_the_secret_and_caches_it() -> Result<()> {
        let broker = broker_with_prompt(ScriptedPrompt::new(vec![Some("from-prompt")]));

        let secret = broker.resolve_secret("wallet", None).unwrap();
        assert_eq!(secret.expose_secret(), "from-prompt");

        // Second resolution is served from cache, not the (now exhausted)
        // prompt script.
        let again = broker.resolve_secret("wallet", None).unwrap();
        assert_eq!(again.expose_secret(), "from-prompt");
        Ok(())
    }

    #[test]
    fn exhausted_chain_reports_security_error() {
        let broker = broker_with_prompt(ScriptedPrompt::declining());
        let err = broker.resolve_secret("wallet", None).unwrap_err();
        assert!(matches!(err, ResolveError::Exhausted { .. }));
        let message = err.to_string();
        assert!(message.contains("CHAINPASS_PASSWORD_WALLET"));
    }

    #[test]
    fn default_used_only_when_nothing_is_stored() -> Result<()> {
        let broker = broker_with_prompt(ScriptedPrompt::declining())
            .with_default_secret(SecretString::from("fallback".to_string()));

        let secret = broker.resolve_secret("fresh-wallet", None).unwrap();
        assert_eq!(secret.expose_secret(), "fallback");

        // Once a record exists for an identifier, the fallback is refused.
        broker.store_secret("real-wallet", &SecretString::from("real".to_string()))?;
        broker.clear_cache()?;
        let resolved = broker.resolve_secret("real-wallet", None).unwrap();
        assert_eq!(resolved.expose_secret(), "real");
        Ok(())
    }

    #[test]
    fn allow_default_false_skips_fallback() {
        let broker = broker_with_prompt(ScriptedPrompt::declining())
            .with_default_secret(SecretString::from("fallback".to_string()));

        let err = broker
            .resolve(
                "wallet",
                ResolveOptions {
                    allow_default: false,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, ResolveError::Exhausted { .. }));
    }

    #[test]
    fn non_interactive_resolution_skips_prompt() {
        let prompt = ScriptedPrompt::new(vec![Some("should-not-be-used")]);
        let broker = broker_with_prompt(prompt);

        let err = broker
            .resolve(
                "wallet",
                ResolveOptions {
                    allow_interactive: false,
                    allow_default: false,
                    ..Default::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, ResolveError::Exhausted { .. }));
    }

    #[test]
    fn delete_secret_also_forgets_cache() -> Result<()> {
        let broker = broker_with_prompt(ScriptedPrompt::declining());
        broker.store_secret("wallet", &SecretString::from("stored".to_string()))?;

        // Populate the cache via resolution.
        broker.resolve_secret("wallet", None).unwrap();
        broker.delete_secret("wallet")?;

        let err = broker.resolve_secret("wallet", None).unwrap_err();
        assert!(matches!(err, ResolveError::Exhausted { .. }));
        Ok(())
    }

    #[test]
    fn default_refused_when_store_is_unreadable() -> Result<()> {
        let state = Arc::new(MemoryStateStore::new());
        let seeded = CredentialBroker::with_state(
            state.clone(),
            KeySource::Passphrase(SecretString::from("master".to_string())),
            Arc::new(ScriptedPrompt::declining()),
        );
        seeded.store_secret("wallet", &SecretString::from("real".to_string()))?;

        // Under a different key the store may hide a record, so the fallback
        // must not paper over it.
        let rekeyed = CredentialBroker::with_state(
            state,
            KeySource::Passphrase(SecretString::from("other".to_string())),
            Arc::new(ScriptedPrompt::declining()),
        )
        .with_default_secret(SecretString::from("fallback".to_string()));

        let err = rekeyed.resolve_secret("wallet", None).unwrap_err();
        assert!(matches!(err, ResolveError::Exhausted { .. }));
        Ok(())
    }

    #[test]
    fn environment_override_beats_the_store() -> Result<()> {
        let broker = broker_with_prompt(ScriptedPrompt::declining());
        broker.store_secret(
            "env-precedence-check",
            &SecretString::from("stored".to_string()),
        )?;

        std::env::set_var("CHAINPASS_PASSWORD_ENV_PRECEDENCE_CHECK", "from-env");
        let secret = broker.resolve_secret("env-precedence-check", None).unwrap();
        std::env::remove_var("CHAINPASS_PASSWORD_ENV_PRECEDENCE_CHECK");

        assert_eq!(secret.expose_secret(), "from-env");
        Ok(())
    }
}
