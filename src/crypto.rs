//! Master-key handling and the authenticated-encryption envelope used for
//! every secret-bearing file on disk.
//!
//! Each encrypted file is one envelope: a random per-file salt (consumed by
//! passphrase derivation), a fresh random nonce per write, and an AES-256-GCM
//! ciphertext bound to the file's kind via AAD so envelopes cannot be swapped
//! between files. Decrypting with the wrong key is always detected.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use argon2::Argon2;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use rand::RngCore as _;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

/// Environment variable supplying the master key verbatim, bypassing
/// passphrase derivation.
pub const MASTER_KEY_ENV: &str = "CHAINPASS_MASTER_KEY";

pub const SALT_LEN: usize = 16;
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const ENVELOPE_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Authentication failed: wrong master key, or the file was tampered with.
    #[error("decryption failed (wrong master key or corrupted file)")]
    WrongKey,

    #[error("malformed encrypted envelope: {0}")]
    Malformed(String),

    #[error("key derivation failed: {0}")]
    Derivation(String),
}

/// A 256-bit encryption key, zeroized on drop.
#[derive(Clone)]
pub struct MasterKey(Zeroizing<[u8; KEY_LEN]>);

impl MasterKey {
    /// Build a key from the master-key environment value.
    ///
    /// A 64-hex-character value is decoded and used directly as the key;
    /// anything else is widened to key length with SHA-256.
    pub fn from_env_value(value: &str) -> Self {
        if let Some(key) = decode_hex_key(value) {
            return Self(Zeroizing::new(key));
        }
        let digest = Sha256::digest(value.as_bytes());
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&digest);
        Self(Zeroizing::new(key))
    }

    /// Derive a key from an operator passphrase and a per-file salt (Argon2id).
    pub fn derive(passphrase: &SecretString, salt: &[u8; SALT_LEN]) -> Result<Self, CryptoError> {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        Argon2::default()
            .hash_password_into(passphrase.expose_secret().as_bytes(), salt, &mut *key)
            .map_err(|e| CryptoError::Derivation(e.to_string()))?;
        Ok(Self(key))
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(aes_gcm::Key::<Aes256Gcm>::from_slice(&*self.0))
    }
}

/// Where the master key comes from.
///
/// An explicit external key (normally the environment override) takes
/// precedence over passphrase derivation; the broker decides which variant to
/// construct, this type just applies it against a given file's salt.
pub enum KeySource {
    External(MasterKey),
    Passphrase(SecretString),
}

impl KeySource {
    /// Read the master-key override from the environment, if set.
    pub fn from_environment() -> Option<Self> {
        std::env::var(MASTER_KEY_ENV)
            .ok()
            .filter(|v| !v.is_empty())
            .map(|v| Self::External(MasterKey::from_env_value(&v)))
    }

    fn key_for(&self, salt: &[u8; SALT_LEN]) -> Result<MasterKey, CryptoError> {
        match self {
            Self::External(key) => Ok(key.clone()),
            Self::Passphrase(passphrase) => MasterKey::derive(passphrase, salt),
        }
    }
}

/// One encrypted file on disk, serialized as JSON.
#[derive(Debug, Serialize, Deserialize)]
pub struct Envelope {
    version: u32,
    salt: String,
    nonce: String,
    ciphertext: String,
}

impl Envelope {
    /// Encrypt `plaintext` under a freshly generated salt.
    pub fn seal(keys: &KeySource, aad: &[u8], plaintext: &[u8]) -> Result<Self, CryptoError> {
        let mut salt = [0u8; SALT_LEN];
        rand::thread_rng().fill_bytes(&mut salt);
        Self::seal_with_salt(keys, salt, aad, plaintext)
    }

    /// Encrypt `plaintext` reusing an existing salt, so a rewrite of a
    /// passphrase-keyed file does not change its derived key. The nonce is
    /// always fresh.
    pub fn seal_with_salt(
        keys: &KeySource,
        salt: [u8; SALT_LEN],
        aad: &[u8],
        plaintext: &[u8],
    ) -> Result<Self, CryptoError> {
        let key = keys.key_for(&salt)?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = key
            .cipher()
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::WrongKey)?;

        Ok(Self {
            version: ENVELOPE_VERSION,
            salt: B64.encode(salt),
            nonce: B64.encode(nonce_bytes),
            ciphertext: B64.encode(ciphertext),
        })
    }

    /// Decrypt the envelope. Fails with [`CryptoError::WrongKey`] on any
    /// authentication failure; plaintext is never returned unauthenticated.
    pub fn open(&self, keys: &KeySource, aad: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if self.version != ENVELOPE_VERSION {
            return Err(CryptoError::Malformed(format!(
                "unsupported envelope version {}",
                self.version
            )));
        }

        let salt = self.salt()?;
        let nonce_bytes = decode_field(&self.nonce, "nonce")?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(CryptoError::Malformed("bad nonce length".to_string()));
        }
        let ciphertext = decode_field(&self.ciphertext, "ciphertext")?;

        let key = keys.key_for(&salt)?;
        let plaintext = key
            .cipher()
            .decrypt(
                Nonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &ciphertext,
                    aad,
                },
            )
            .map_err(|_| CryptoError::WrongKey)?;

        Ok(Zeroizing::new(plaintext))
    }

    /// The envelope's salt, for rewrites via [`Envelope::seal_with_salt`].
    pub fn salt(&self) -> Result<[u8; SALT_LEN], CryptoError> {
        let bytes = decode_field(&self.salt, "salt")?;
        bytes
            .try_into()
            .map_err(|_| CryptoError::Malformed("bad salt length".to_string()))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, CryptoError> {
        serde_json::to_vec_pretty(self).map_err(|e| CryptoError::Malformed(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        serde_json::from_slice(bytes).map_err(|e| CryptoError::Malformed(e.to_string()))
    }
}

fn decode_field(value: &str, field: &str) -> Result<Vec<u8>, CryptoError> {
    B64.decode(value)
        .map_err(|e| CryptoError::Malformed(format!("{field} base64 decode error: {e}")))
}

fn decode_hex_key(value: &str) -> Option<[u8; KEY_LEN]> {
    if value.len() != KEY_LEN * 2 || !value.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let mut key = [0u8; KEY_LEN];
    for (i, chunk) in value.as_bytes().chunks(2).enumerate() {
        let hi = (chunk[0] as char).to_digit(16)?;
        let lo = (chunk[1] as char).to_digit(16)?;
        key[i] = (hi * 16 + lo) as u8;
    }
    Some(key)
}
