//! Field sealing at the encryption-at-rest boundary.
//!
//! Stores never see plaintext financial fields or audit payloads; they persist
//! the opaque strings produced by a [`FieldCipher`]. Key management lives
//! outside this crate.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, AeadCore, KeyInit, OsRng},
};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::{Serialize, de::DeserializeOwned};

use crate::types::NisabError;

const SEALED_PREFIX: &str = "v1:";
const NONCE_LEN: usize = 12;

/// Opaque encrypt/decrypt box for sensitive fields.
pub trait FieldCipher: Send + Sync {
    fn seal(&self, plaintext: &[u8]) -> Result<String, NisabError>;
    fn open(&self, sealed: &str) -> Result<Vec<u8>, NisabError>;
}

/// AES-256-GCM with a random 96-bit nonce per value.
///
/// Output layout: `v1:` + base64(nonce || ciphertext || tag).
#[derive(Clone)]
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCipher").finish_non_exhaustive()
    }
}

impl AesGcmCipher {
    pub fn from_key_bytes(key: &[u8; 32]) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(key);
        Self { cipher: Aes256Gcm::new(key) }
    }

    /// Builds a cipher from a base64-encoded 32-byte key.
    pub fn from_base64_key(encoded: &str) -> Result<Self, NisabError> {
        let bytes = STANDARD.decode(encoded.trim()).map_err(|e| NisabError::Configuration {
            message: format!("encryption key is not valid base64: {}", e),
        })?;
        let key: [u8; 32] = bytes.as_slice().try_into().map_err(|_| NisabError::Configuration {
            message: format!("encryption key must be 32 bytes, got {}", bytes.len()),
        })?;
        Ok(Self::from_key_bytes(&key))
    }

    /// Reads a base64 key from the given environment variable.
    pub fn from_env(var: &str) -> Result<Self, NisabError> {
        let encoded = std::env::var(var).map_err(|_| NisabError::Configuration {
            message: format!("{} env var not set", var),
        })?;
        Self::from_base64_key(&encoded)
    }

    /// A cipher with a freshly generated random key. Values sealed by it can only
    /// be opened by the same instance (or a clone).
    pub fn ephemeral() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Self { cipher: Aes256Gcm::new(&key) }
    }
}

impl FieldCipher for AesGcmCipher {
    fn seal(&self, plaintext: &[u8]) -> Result<String, NisabError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| NisabError::Encryption { message: format!("seal failed: {}", e) })?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(nonce.as_slice());
        blob.extend_from_slice(&ciphertext);
        Ok(format!("{}{}", SEALED_PREFIX, STANDARD.encode(blob)))
    }

    fn open(&self, sealed: &str) -> Result<Vec<u8>, NisabError> {
        let encoded = sealed.strip_prefix(SEALED_PREFIX).ok_or_else(|| NisabError::Encryption {
            message: "unknown sealed value format".to_string(),
        })?;
        let blob = STANDARD
            .decode(encoded)
            .map_err(|e| NisabError::Encryption { message: format!("corrupt sealed value: {}", e) })?;
        if blob.len() <= NONCE_LEN {
            return Err(NisabError::Encryption {
                message: "sealed value too short".to_string(),
            });
        }

        let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| NisabError::Encryption {
                message: "authentication failed while opening sealed value".to_string(),
            })
    }
}

/// Serializes `value` to JSON and seals it.
pub fn seal_json<T: Serialize>(cipher: &dyn FieldCipher, value: &T) -> Result<String, NisabError> {
    let json = serde_json::to_vec(value).map_err(|e| NisabError::Encryption {
        message: format!("serialize before seal failed: {}", e),
    })?;
    cipher.seal(&json)
}

/// Opens a value sealed by [`seal_json`] and decodes it into `T`.
pub fn open_json<T: DeserializeOwned>(cipher: &dyn FieldCipher, sealed: &str) -> Result<T, NisabError> {
    let bytes = cipher.open(sealed)?;
    serde_json::from_slice(&bytes).map_err(|e| NisabError::Encryption {
        message: format!("decode after open failed: {}", e),
    })
}
