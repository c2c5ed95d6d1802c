//! At-rest encryption for cached payloads.
//!
//! Sealed layout: `nonce (12 bytes) || ciphertext+tag`. A fresh random nonce
//! is drawn for every seal.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::error::CipherError;

const NONCE_LEN: usize = 12;

/// Pluggable cipher used by the cache store.
pub trait Cipher: Send + Sync {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError>;
    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CipherError>;
}

/// ChaCha20-Poly1305 with a 32-byte key.
pub struct ChaChaCipher {
    key: [u8; 32],
}

impl ChaChaCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn from_slice(key: &[u8]) -> Result<Self, CipherError> {
        let key: [u8; 32] = key
            .try_into()
            .map_err(|_| CipherError::KeyLength(key.len()))?;
        Ok(Self::new(key))
    }

    /// Derive the key as SHA-256 of a passphrase.
    pub fn from_passphrase(passphrase: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(b"netcache-cache-v1");
        hasher.update(passphrase.as_bytes());
        Self::new(hasher.finalize().into())
    }

    /// Random key for callers that keep key material elsewhere.
    pub fn generate_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        key
    }

    fn aead(&self) -> Result<ChaCha20Poly1305, CipherError> {
        ChaCha20Poly1305::new_from_slice(&self.key).map_err(|_| CipherError::KeyLength(self.key.len()))
    }
}

impl Cipher for ChaChaCipher {
    fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .aead()?
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|_| CipherError::Encrypt)?;
        let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, CipherError> {
        if sealed.len() < NONCE_LEN {
            return Err(CipherError::Truncated);
        }
        let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
        self.aead()?
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Decrypt)
    }
}

impl std::fmt::Debug for ChaChaCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaChaCipher").finish_non_exhaustive()
    }
}
