//! At-rest encryption for locally stored secret material
//!
//! Two things are encrypted before they reach the database: the value of a
//! LOCAL-mode secret and the secret access key of a scope's vault credentials.
//! Both use AES-256-GCM with a fresh random nonce per write; the ciphertext
//! column stores the authentication tag appended to the encrypted bytes.
//!
//! The master key comes from `KEYTURN__ENCRYPTION__MASTER_KEY` (base64, 32
//! bytes). `key_version` is stored next to each ciphertext so that rows sealed
//! under an older key can be identified when the key changes.

use crate::config::EncryptionSettings;
use crate::errors::{KeyturnError, Result};
use crate::secrets::{SecretPayload, SecretString};
use base64::Engine;
use ring::aead::{self, Aad, BoundKey, Nonce, NonceSequence, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use std::sync::Arc;
use tracing::{debug, error, instrument};
use zeroize::Zeroizing;

const NONCE_SIZE: usize = 12;
const TAG_SIZE: usize = 16;
const KEY_SIZE: usize = 32;

/// Ciphertext plus everything needed to open it again
#[derive(Clone, PartialEq, Eq)]
pub struct SealedValue {
    pub ciphertext: Vec<u8>,
    pub nonce: Vec<u8>,
    pub key_version: String,
}

impl std::fmt::Debug for SealedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealedValue")
            .field("ciphertext_len", &self.ciphertext.len())
            .field("key_version", &self.key_version)
            .finish()
    }
}

/// Single-use nonce sequence for AES-GCM
struct SingleNonce(Option<[u8; NONCE_SIZE]>);

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.0.take().map(Nonce::assume_unique_for_key).ok_or(ring::error::Unspecified)
    }
}

/// AES-256-GCM sealing of secret material
#[derive(Clone)]
pub struct SecretEncryption {
    key_bytes: Arc<Zeroizing<[u8; KEY_SIZE]>>,
    key_version: String,
    rng: Arc<SystemRandom>,
}

impl SecretEncryption {
    pub fn new(settings: &EncryptionSettings) -> Result<Self> {
        let decoded = Zeroizing::new(
            base64::engine::general_purpose::STANDARD
                .decode(settings.master_key.expose_secret().trim())
                .map_err(|e| {
                    KeyturnError::config(format!("encryption master key is not valid base64: {}", e))
                })?,
        );

        if decoded.len() != KEY_SIZE {
            return Err(KeyturnError::config(format!(
                "encryption master key must be {} bytes, got {}",
                KEY_SIZE,
                decoded.len()
            )));
        }

        let mut key = Zeroizing::new([0u8; KEY_SIZE]);
        key.copy_from_slice(&decoded);

        debug!(key_version = %settings.key_version, "Secret encryption initialized");

        Ok(Self {
            key_bytes: Arc::new(key),
            key_version: settings.key_version.clone(),
            rng: Arc::new(SystemRandom::new()),
        })
    }

    /// Fixed all-0x42 key. Never use outside tests and local development.
    pub fn for_testing() -> Self {
        let settings = EncryptionSettings {
            master_key: SecretString::new(
                base64::engine::general_purpose::STANDARD.encode([0x42u8; KEY_SIZE]),
            ),
            key_version: "test".to_string(),
        };
        match Self::new(&settings) {
            Ok(encryption) => encryption,
            Err(_) => unreachable!("fixed test key is well formed"),
        }
    }

    pub fn key_version(&self) -> &str {
        &self.key_version
    }

    fn unbound_key(&self) -> Result<UnboundKey> {
        UnboundKey::new(&AES_256_GCM, &self.key_bytes[..]).map_err(|_| {
            error!("Failed to create AES-256-GCM key");
            KeyturnError::internal("failed to create encryption key")
        })
    }

    #[instrument(skip(self, plaintext), fields(plaintext_len = plaintext.len()))]
    pub fn seal(&self, plaintext: &[u8]) -> Result<SealedValue> {
        let mut nonce = [0u8; NONCE_SIZE];
        self.rng
            .fill(&mut nonce)
            .map_err(|_| KeyturnError::internal("failed to generate encryption nonce"))?;

        let mut sealing_key = aead::SealingKey::new(self.unbound_key()?, SingleNonce(Some(nonce)));

        let mut ciphertext = Vec::with_capacity(plaintext.len() + TAG_SIZE);
        ciphertext.extend_from_slice(plaintext);
        sealing_key
            .seal_in_place_append_tag(Aad::empty(), &mut ciphertext)
            .map_err(|_| KeyturnError::internal("failed to encrypt secret material"))?;

        Ok(SealedValue { ciphertext, nonce: nonce.to_vec(), key_version: self.key_version.clone() })
    }

    #[instrument(skip(self, sealed), fields(ciphertext_len = sealed.ciphertext.len()))]
    pub fn open(&self, sealed: &SealedValue) -> Result<Zeroizing<Vec<u8>>> {
        if sealed.nonce.len() != NONCE_SIZE {
            return Err(KeyturnError::internal(format!(
                "invalid nonce length: expected {}, got {}",
                NONCE_SIZE,
                sealed.nonce.len()
            )));
        }
        if sealed.ciphertext.len() < TAG_SIZE {
            return Err(KeyturnError::internal("ciphertext shorter than its authentication tag"));
        }
        if sealed.key_version != self.key_version {
            return Err(KeyturnError::config(format!(
                "value sealed with key version '{}' but the active key is '{}'",
                sealed.key_version, self.key_version
            )));
        }

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&sealed.nonce);
        let mut opening_key = aead::OpeningKey::new(self.unbound_key()?, SingleNonce(Some(nonce)));

        let mut buffer = Zeroizing::new(sealed.ciphertext.clone());
        let plaintext = opening_key.open_in_place(Aad::empty(), &mut buffer).map_err(|_| {
            error!("Decryption failed - tampered ciphertext or wrong key");
            KeyturnError::internal("failed to decrypt secret material")
        })?;

        Ok(Zeroizing::new(plaintext.to_vec()))
    }

    /// Seal a LOCAL-mode secret value
    pub fn seal_payload(&self, payload: &SecretPayload) -> Result<SealedValue> {
        self.seal(payload.to_secret_string().expose_secret().as_bytes())
    }

    pub fn open_payload(&self, sealed: &SealedValue) -> Result<SecretPayload> {
        let bytes = self.open(sealed)?;
        let fields = serde_json::from_slice(&bytes).map_err(|e| KeyturnError::Serialization {
            source: e,
            context: "decrypted secret value is not a JSON object".to_string(),
        })?;
        Ok(SecretPayload::new(fields))
    }

    /// Seal a single credential such as a vault secret access key
    pub fn seal_string(&self, value: &SecretString) -> Result<SealedValue> {
        self.seal(value.expose_secret().as_bytes())
    }

    pub fn open_string(&self, sealed: &SealedValue) -> Result<SecretString> {
        let bytes = self.open(sealed)?;
        let text = std::str::from_utf8(&bytes)
            .map_err(|_| KeyturnError::internal("decrypted credential is not UTF-8"))?;
        Ok(SecretString::new(text))
    }
}

impl std::fmt::Debug for SecretEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretEncryption")
            .field("key_version", &self.key_version)
            .field("key_bytes", &"[REDACTED]")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_roundtrip() {
        let encryption = SecretEncryption::for_testing();
        let payload = SecretPayload::single("password", "hunter2");

        let sealed = encryption.seal_payload(&payload).unwrap();
        assert!(!sealed.ciphertext.windows(7).any(|w| w == b"hunter2"));
        assert_eq!(sealed.nonce.len(), NONCE_SIZE);
        assert_eq!(encryption.open_payload(&sealed).unwrap(), payload);
    }

    #[test]
    fn test_fresh_nonce_per_seal() {
        let encryption = SecretEncryption::for_testing();
        let a = encryption.seal(b"same").unwrap();
        let b = encryption.seal(b"same").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let encryption = SecretEncryption::for_testing();
        let mut sealed = encryption.seal(b"sensitive").unwrap();
        sealed.ciphertext[0] ^= 0xFF;
        assert!(encryption.open(&sealed).is_err());
    }

    #[test]
    fn test_key_version_mismatch_is_config_error() {
        let encryption = SecretEncryption::for_testing();
        let mut sealed = encryption.seal_string(&SecretString::new("abc")).unwrap();
        sealed.key_version = "v0".to_string();
        assert!(matches!(encryption.open_string(&sealed), Err(KeyturnError::Config { .. })));
    }

    #[test]
    fn test_short_key_rejected() {
        let settings = EncryptionSettings {
            master_key: SecretString::new(
                base64::engine::general_purpose::STANDARD.encode([0u8; 16]),
            ),
            key_version: "v1".to_string(),
        };
        assert!(SecretEncryption::new(&settings).is_err());
    }

    #[test]
    fn test_debug_redacts_key() {
        let debug = format!("{:?}", SecretEncryption::for_testing());
        assert!(debug.contains("[REDACTED]"));
    }
}
