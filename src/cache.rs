//! TTL-bounded secret cache, encrypted at rest with the same envelope scheme
//! as the credential store so the cache file never leaks plaintext.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::crypto::{CryptoError, Envelope, KeySource, SALT_LEN};
use crate::storage::StateStore;

pub const CACHE_FILE: &str = "cache.enc";

/// Cache entries live this long after `put`.
pub fn default_cache_ttl() -> Duration {
    Duration::minutes(30)
}

const CACHE_AAD: &[u8] = b"chainpass.cache.v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    secret: String,
    resolved_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

type EntryMap = BTreeMap<String, CacheEntry>;

pub struct SecretCache {
    state: Arc<dyn StateStore>,
    keys: Arc<KeySource>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SecretCache {
    pub fn new(state: Arc<dyn StateStore>, keys: Arc<KeySource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            state,
            keys,
            clock,
            ttl: default_cache_ttl(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Look up a non-expired entry. Expired entries are misses; an
    /// unreadable cache file (e.g. after a master-key change) is treated as
    /// empty rather than an error, since the next `put` rewrites it.
    pub fn get(&self, identifier: &str) -> Result<Option<SecretString>> {
        let Some((map, _salt)) = self.load_entries()? else {
            return Ok(None);
        };

        let now = self.clock.now();
        Ok(map
            .get(identifier)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| SecretString::from(entry.secret.clone())))
    }

    /// Record a freshly resolved secret, overwriting any prior entry for the
    /// identifier and pruning entries that have already expired.
    pub fn put(&self, identifier: &str, secret: &SecretString) -> Result<()> {
        let now = self.clock.now();
        let (mut map, salt) = match self.load_entries()? {
            Some((map, salt)) => (map, Some(salt)),
            None => (EntryMap::new(), None),
        };

        map.retain(|_, entry| now < entry.expires_at);
        map.insert(
            identifier.to_string(),
            CacheEntry {
                secret: secret.expose_secret().to_string(),
                resolved_at: now,
                expires_at: now + self.ttl,
            },
        );

        self.save_entries(&map, salt)
    }

    /// Drop a single identifier's entry, if present.
    pub fn forget(&self, identifier: &str) -> Result<()> {
        let Some((mut map, salt)) = self.load_entries()? else {
            return Ok(());
        };
        if map.remove(identifier).is_some() {
            self.save_entries(&map, Some(salt))?;
        }
        Ok(())
    }

    /// Drop every entry. Used when switching endpoints so credentials do not
    /// leak across contexts.
    pub fn clear(&self) -> Result<()> {
        self.state.remove(CACHE_FILE)
    }

    fn load_entries(&self) -> Result<Option<(EntryMap, [u8; SALT_LEN])>> {
        let Some(bytes) = self.state.read(CACHE_FILE)? else {
            return Ok(None);
        };

        match self.open_entries(&bytes) {
            Ok(loaded) => Ok(Some(loaded)),
            Err(err) => {
                tracing::debug!(error = %err, "cache file unreadable, treating as empty");
                Ok(None)
            }
        }
    }

    fn open_entries(&self, bytes: &[u8]) -> Result<(EntryMap, [u8; SALT_LEN]), CryptoError> {
        let envelope = Envelope::from_bytes(bytes)?;
        let salt = envelope.salt()?;
        let plaintext = envelope.open(&self.keys, CACHE_AAD)?;
        let map: EntryMap = serde_json::from_slice(&plaintext)
            .map_err(|e| CryptoError::Malformed(e.to_string()))?;
        Ok((map, salt))
    }

    fn save_entries(&self, map: &EntryMap, salt: Option<[u8; SALT_LEN]>) -> Result<()> {
        let plaintext = serde_json::to_vec(map).context("Failed to serialize cache")?;
        let envelope = match salt {
            Some(salt) => Envelope::seal_with_salt(&self.keys, salt, CACHE_AAD, &plaintext),
            None => Envelope::seal(&self.keys, CACHE_AAD, &plaintext),
        }
        .context("Failed to encrypt cache")?;
        self.state.write_atomic(CACHE_FILE, &envelope.to_bytes()?)?;
        Ok(())
    }
}
