//! At-rest authenticated encryption for `loaderSql` templates and source
//! passwords (`spec.md` §9 Design Notes).
//!
//! The engine never persists either secret in plaintext, and only the
//! Source Registry and Query Runner ever hold the decrypted form, and
//! then only transiently on the stack.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;

use crate::error::{EngineError, EngineResult};

const NONCE_LEN: usize = 12;

/// A 256-bit AES-GCM key, loaded once at process start from the
/// environment variable named by `database.encryption-key-env`.
#[derive(Clone)]
pub struct EncryptionKey(Key<Aes256Gcm>);

impl EncryptionKey {
    /// Load the key from an environment variable holding 32 raw bytes,
    /// hex-encoded (64 hex characters).
    pub fn from_env(var_name: &str) -> EngineResult<Self> {
        let hex = std::env::var(var_name)
            .map_err(|_| EngineError::Crypto(format!("encryption key env var {var_name} is not set")))?;
        Self::from_hex(&hex)
    }

    pub fn from_hex(hex: &str) -> EngineResult<Self> {
        let bytes = hex_decode(hex).map_err(EngineError::Crypto)?;
        if bytes.len() != 32 {
            return Err(EngineError::Crypto(format!(
                "encryption key must be 32 bytes (64 hex chars), got {}",
                bytes.len()
            )));
        }
        Ok(Self(*Key::<Aes256Gcm>::from_slice(&bytes)))
    }

    /// Encrypt `plaintext`, returning `(ciphertext, nonce)` ready to
    /// persist in the two sibling columns (`*_ciphertext`, `*_nonce`).
    pub fn encrypt(&self, plaintext: &str) -> EngineResult<(Vec<u8>, Vec<u8>)> {
        let cipher = Aes256Gcm::new(&self.0);
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| EngineError::Crypto(format!("encryption failed: {e}")))?;
        Ok((ciphertext, nonce_bytes.to_vec()))
    }

    /// Decrypt a `(ciphertext, nonce)` pair back into the plaintext
    /// secret. Panics are never used here: a tampered or misencrypted
    /// column surfaces as a normal `EngineError`.
    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8]) -> EngineResult<String> {
        if nonce.len() != NONCE_LEN {
            return Err(EngineError::Crypto(format!("nonce must be {NONCE_LEN} bytes, got {}", nonce.len())));
        }
        let cipher = Aes256Gcm::new(&self.0);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|e| EngineError::Crypto(format!("decryption failed: {e}")))?;
        String::from_utf8(plaintext).map_err(|e| EngineError::Crypto(format!("decrypted value was not UTF-8: {e}")))
    }
}

fn hex_decode(s: &str) -> Result<Vec<u8>, String> {
    let s = s.trim();
    if s.len() % 2 != 0 {
        return Err("hex string has odd length".into());
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).map_err(|e| format!("invalid hex digit: {e}")))
        .collect()
}
