//! Encrypted credential store: a durable identifier -> secret map kept in a
//! single file under one authenticated-encryption envelope.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::crypto::{CryptoError, Envelope, KeySource, SALT_LEN};
use crate::storage::StateStore;

pub const STORE_FILE: &str = "passwords.enc";

/// AAD binding the envelope to this file's role, so a cache file cannot be
/// substituted for the credential store.
const STORE_AAD: &[u8] = b"chainpass.passwords.v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CredentialRecord {
    secret: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

type RecordMap = BTreeMap<String, CredentialRecord>;

/// Why a load failed, distinguishably: a missing identifier is not the same
/// thing as an undecryptable store.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("no credential stored under '{identifier}'")]
    Missing { identifier: String },

    #[error("stored credentials could not be decrypted")]
    WrongKey,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Outcome of consulting the store as one source in the resolution chain.
///
/// `Unreadable` means the file exists but did not authenticate under the
/// current master key; the chain treats that as a countable failure and falls
/// through instead of aborting.
pub enum StoreLookup {
    Found(SecretString),
    Absent,
    Unreadable,
}

pub struct EncryptedStore {
    state: Arc<dyn StateStore>,
    keys: Arc<KeySource>,
    clock: Arc<dyn Clock>,
}

impl EncryptedStore {
    pub fn new(state: Arc<dyn StateStore>, keys: Arc<KeySource>, clock: Arc<dyn Clock>) -> Self {
        Self { state, keys, clock }
    }

    /// Store (or overwrite) a secret. Read-modify-write of the whole file,
    /// written atomically.
    pub fn store(&self, identifier: &str, secret: &SecretString) -> Result<()> {
        let (mut map, salt) = match self.load_map()? {
            Some((map, salt)) => (map, Some(salt)),
            None => (RecordMap::new(), None),
        };

        let now = self.clock.now();
        let created_at = map
            .get(identifier)
            .map(|record| record.created_at)
            .unwrap_or(now);
        map.insert(
            identifier.to_string(),
            CredentialRecord {
                secret: secret.expose_secret().to_string(),
                created_at,
                updated_at: now,
            },
        );

        self.save_map(&map, salt)
    }

    /// Load a secret, failing distinguishably on absence vs wrong key.
    pub fn load(&self, identifier: &str) -> Result<SecretString, LoadError> {
        match self.lookup(identifier).map_err(LoadError::Other)? {
            StoreLookup::Found(secret) => Ok(secret),
            StoreLookup::Absent => Err(LoadError::Missing {
                identifier: identifier.to_string(),
            }),
            StoreLookup::Unreadable => Err(LoadError::WrongKey),
        }
    }

    /// Remove a stored secret. Removing an absent identifier is a no-op.
    pub fn delete(&self, identifier: &str) -> Result<()> {
        let Some((mut map, salt)) = self.load_map()? else {
            return Ok(());
        };
        if map.remove(identifier).is_some() {
            self.save_map(&map, Some(salt))?;
        }
        Ok(())
    }

    /// Consult the store as one resolution source. Filesystem errors are
    /// fatal; decryption failure is reported as [`StoreLookup::Unreadable`].
    pub fn lookup(&self, identifier: &str) -> Result<StoreLookup> {
        let Some(bytes) = self.state.read(STORE_FILE)? else {
            return Ok(StoreLookup::Absent);
        };

        let map = match self.open_map(&bytes) {
            Ok((map, _salt)) => map,
            Err(err) => {
                tracing::debug!(error = %err, "credential store undecryptable");
                return Ok(StoreLookup::Unreadable);
            }
        };

        Ok(match map.get(identifier) {
            Some(record) => StoreLookup::Found(SecretString::from(record.secret.clone())),
            None => StoreLookup::Absent,
        })
    }

    fn load_map(&self) -> Result<Option<(RecordMap, [u8; SALT_LEN])>> {
        let Some(bytes) = self.state.read(STORE_FILE)? else {
            return Ok(None);
        };
        let (map, salt) = self
            .open_map(&bytes)
            .context("Cannot update credential store: existing file is undecryptable")?;
        Ok(Some((map, salt)))
    }

    fn open_map(&self, bytes: &[u8]) -> Result<(RecordMap, [u8; SALT_LEN]), CryptoError> {
        let envelope = Envelope::from_bytes(bytes)?;
        let salt = envelope.salt()?;
        let plaintext = envelope.open(&self.keys, STORE_AAD)?;
        let map: RecordMap = serde_json::from_slice(&plaintext)
            .map_err(|e| CryptoError::Malformed(e.to_string()))?;
        Ok((map, salt))
    }

    fn save_map(&self, map: &RecordMap, salt: Option<[u8; SALT_LEN]>) -> Result<()> {
        let plaintext = serde_json::to_vec(map).context("Failed to serialize credential store")?;
        let envelope = match salt {
            Some(salt) => Envelope::seal_with_salt(&self.keys, salt, STORE_AAD, &plaintext),
            None => Envelope::seal(&self.keys, STORE_AAD, &plaintext),
        }
        .context("Failed to encrypt credential store")?;
        self.state.write_atomic(STORE_FILE, &envelope.to_bytes()?)?;
        Ok(())
    }
}
