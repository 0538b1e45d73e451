//! Cryptographic suite used by the messaging protocol.
//!
//! The protocol only needs four primitives: keypair generation, pairwise
//! secret agreement, and symmetric encrypt/decrypt. They sit behind the
//! [`CryptoSuite`] trait so the negotiator and codec never depend on a
//! concrete implementation.

mod sea;

pub use sea::SeaSuite;

use sha2::{Digest, Sha256};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::session::KeyPair;

/// Errors produced by a [`CryptoSuite`].
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("encryption failed: {0}")]
    EncryptFailed(String),
    #[error("decryption failed: {0}")]
    DecryptFailed(String),
    #[error("invalid ciphertext format")]
    InvalidFormat,
    #[error("unsupported version: {0}")]
    UnsupportedVersion(u8),
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),
}

/// A 256-bit symmetric secret shared by two parties.
///
/// Cleared from memory on drop. The bytes are only reachable through
/// [`SharedSecret::as_bytes`], which the crypto suite uses for key derivation.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; 32]);

impl SharedSecret {
    /// Wrap raw secret bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Deterministic secret from an arbitrary passphrase (SHA-256).
    ///
    /// Used for the static fallback key; provides no forward secrecy.
    pub fn from_passphrase(passphrase: &str) -> Self {
        let digest = Sha256::digest(passphrase.as_bytes());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

/// The external cryptography module consumed by the protocol.
///
/// `secret` must be symmetric: for two complete keypairs A and B,
/// `secret(B.epub, A)` and `secret(A.epub, B)` yield the same value.
pub trait CryptoSuite: Send + Sync {
    /// Generate a fresh identity keypair.
    fn pair(&self) -> Result<KeyPair, CryptoError>;

    /// Agree on a shared secret from the peer's public encryption key and
    /// the local keypair. Only `epub` and `epriv` of `own` are required.
    fn secret(&self, peer_epub: &str, own: &KeyPair) -> Result<SharedSecret, CryptoError>;

    /// Authenticated encryption of a UTF-8 payload into a transportable string.
    fn encrypt(&self, plaintext: &str, secret: &SharedSecret) -> Result<String, CryptoError>;

    /// Inverse of [`CryptoSuite::encrypt`]. Fails on a wrong secret or tampering.
    fn decrypt(&self, ciphertext: &str, secret: &SharedSecret) -> Result<String, CryptoError>;
}
