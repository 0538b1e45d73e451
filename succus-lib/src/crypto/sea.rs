//! X25519 + AES-256-GCM implementation of [`CryptoSuite`].
//!
//! # Key agreement
//!
//! `secret(peer_epub, own)` computes X25519(own.epriv, peer_epub) and runs the
//! raw output through HKDF-SHA256, salted with `own.epub` and `peer_epub` in
//! sorted order so that the two sides of a conversation arrive at the same key.
//! The salt takes `own.epub` as given rather than recomputing it from `epriv`,
//! so a keypair whose halves were mixed yields a distinct secret.
//!
//! # Wire Format
//!
//! ```text
//! base64([1 byte version][12 bytes nonce][N bytes ciphertext][16 bytes auth tag])
//! ```
//!
//! Keys are exchanged as lowercase hex.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::SigningKey;
use hkdf::Hkdf;
use rand::rngs::OsRng;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};

use super::{CryptoError, CryptoSuite, SharedSecret};
use crate::session::KeyPair;

/// Current ciphertext format version.
const CIPHER_VERSION: u8 = 1;

/// Size of the nonce in bytes (96 bits for GCM).
const NONCE_SIZE: usize = 12;

/// Size of the authentication tag in bytes.
const TAG_SIZE: usize = 16;

const AGREEMENT_INFO: &[u8] = b"succus-pairwise-secret-v1";
const MESSAGE_INFO: &[u8] = b"succus-message-v1";

/// Default crypto suite.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeaSuite;

impl SeaSuite {
    pub fn new() -> Self {
        Self
    }

    fn message_key(secret: &SharedSecret) -> Result<[u8; 32], CryptoError> {
        let hk = Hkdf::<Sha256>::new(None, secret.as_bytes());
        let mut key = [0u8; 32];
        hk.expand(MESSAGE_INFO, &mut key)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        Ok(key)
    }
}

fn decode_key(field: &str, value: &str) -> Result<[u8; 32], CryptoError> {
    let bytes =
        hex::decode(value.trim()).map_err(|e| CryptoError::InvalidKey(format!("{field}: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey(format!("{field}: expected 32 bytes")))
}

impl CryptoSuite for SeaSuite {
    fn pair(&self) -> Result<KeyPair, CryptoError> {
        let signing = SigningKey::generate(&mut OsRng);
        let encryption = StaticSecret::random_from_rng(OsRng);
        let epub = PublicKey::from(&encryption);

        Ok(KeyPair::new(
            hex::encode(signing.verifying_key().to_bytes()),
            hex::encode(signing.to_bytes()),
            hex::encode(epub.as_bytes()),
            hex::encode(encryption.to_bytes()),
        ))
    }

    fn secret(&self, peer_epub: &str, own: &KeyPair) -> Result<SharedSecret, CryptoError> {
        let epriv = own
            .epriv
            .as_deref()
            .ok_or_else(|| CryptoError::InvalidKey("epriv: missing".to_string()))?;
        let own_secret = StaticSecret::from(decode_key("epriv", epriv)?);
        let own_public = PublicKey::from(decode_key("own epub", &own.epub)?);
        let peer_public = PublicKey::from(decode_key("epub", peer_epub)?);

        let shared = own_secret.diffie_hellman(&peer_public);
        if !shared.was_contributory() {
            return Err(CryptoError::InvalidKey(
                "epub: low-order point".to_string(),
            ));
        }

        let mut salt = [*own_public.as_bytes(), *peer_public.as_bytes()];
        salt.sort();
        let hk = Hkdf::<Sha256>::new(Some(&salt.concat()), shared.as_bytes());
        let mut key = [0u8; 32];
        hk.expand(AGREEMENT_INFO, &mut key)
            .map_err(|e| CryptoError::KeyDerivation(e.to_string()))?;
        Ok(SharedSecret::from_bytes(key))
    }

    fn encrypt(&self, plaintext: &str, secret: &SharedSecret) -> Result<String, CryptoError> {
        let key = Self::message_key(secret)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| CryptoError::EncryptFailed(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::RngCore::fill_bytes(&mut OsRng, &mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| CryptoError::EncryptFailed(e.to_string()))?;

        let mut wire = Vec::with_capacity(1 + NONCE_SIZE + ciphertext.len());
        wire.push(CIPHER_VERSION);
        wire.extend_from_slice(&nonce_bytes);
        wire.extend_from_slice(&ciphertext);

        Ok(STANDARD.encode(wire))
    }

    fn decrypt(&self, ciphertext: &str, secret: &SharedSecret) -> Result<String, CryptoError> {
        let wire = STANDARD
            .decode(ciphertext.trim())
            .map_err(|_| CryptoError::InvalidFormat)?;
        if wire.len() < 1 + NONCE_SIZE + TAG_SIZE {
            return Err(CryptoError::InvalidFormat);
        }
        if wire[0] != CIPHER_VERSION {
            return Err(CryptoError::UnsupportedVersion(wire[0]));
        }

        let nonce = Nonce::from_slice(&wire[1..1 + NONCE_SIZE]);
        let key = Self::message_key(secret)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| CryptoError::DecryptFailed(e.to_string()))?;

        let plaintext = cipher
            .decrypt(nonce, &wire[1 + NONCE_SIZE..])
            .map_err(|_| CryptoError::DecryptFailed("authentication failed".to_string()))?;

        String::from_utf8(plaintext).map_err(|e| CryptoError::DecryptFailed(e.to_string()))
    }
}
