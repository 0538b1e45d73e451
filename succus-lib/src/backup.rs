//! Password-protected keypair backups.
//!
//! The full keypair is serialized, encrypted with AES-256-GCM under a key
//! stretched from the password with Argon2, and stored alongside the public
//! halves so a restored pair can be checked before use.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::Argon2;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::session::{KeyPair, PublicKeys};
use crate::{Address, Result, SuccusError};

/// Current backup format version.
pub const BACKUP_VERSION: u32 = 1;

const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;

/// Encrypted backup of an identity keypair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyBackup {
    pub version: u32,
    /// Address the keypair was registered under, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Address>,
    /// Epoch milliseconds.
    pub created_at: i64,
    /// Encrypted keypair JSON (hex encoded)
    pub encrypted_data_hex: String,
    /// Argon2 salt (hex encoded)
    pub salt_hex: String,
    /// AES-GCM nonce (hex encoded)
    pub nonce_hex: String,
    /// Public halves, for verification after decryption.
    pub public_keys: PublicKeys,
}

impl KeyBackup {
    /// Encrypt `keypair` under `password`.
    pub fn export(keypair: &KeyPair, address: Option<&Address>, password: &str) -> Result<Self> {
        if password.is_empty() {
            return Err(SuccusError::invalid_input("password", "password cannot be empty"));
        }
        if !keypair.is_complete() {
            return Err(SuccusError::InvalidKeyMaterial(
                "only a complete keypair can be backed up".to_string(),
            ));
        }

        let mut salt = [0u8; SALT_SIZE];
        OsRng.fill_bytes(&mut salt);
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);

        let cipher = backup_cipher(password, &salt)?;
        let plaintext = Zeroizing::new(serde_json::to_vec(keypair)?);
        let encrypted = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_slice())
            .map_err(|e| SuccusError::Backup(format!("encryption failed: {e}")))?;

        Ok(Self {
            version: BACKUP_VERSION,
            address: address.cloned(),
            created_at: crate::now_ms(),
            encrypted_data_hex: hex::encode(encrypted),
            salt_hex: hex::encode(salt),
            nonce_hex: hex::encode(nonce_bytes),
            public_keys: keypair.public_keys(),
        })
    }

    /// Decrypt the keypair and check it against the stored public halves.
    pub fn import(&self, password: &str) -> Result<KeyPair> {
        if self.version != BACKUP_VERSION {
            return Err(SuccusError::Backup(format!(
                "unsupported backup version: {}",
                self.version
            )));
        }

        let salt = decode_hex("salt", &self.salt_hex)?;
        let nonce_bytes = decode_hex("nonce", &self.nonce_hex)?;
        let encrypted = decode_hex("encrypted data", &self.encrypted_data_hex)?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(SuccusError::Backup("invalid nonce length".to_string()));
        }

        let cipher = backup_cipher(password, &salt)?;
        let decrypted = Zeroizing::new(
            cipher
                .decrypt(Nonce::from_slice(&nonce_bytes), encrypted.as_slice())
                .map_err(|_| {
                    SuccusError::Backup(
                        "decryption failed - wrong password or corrupted data".to_string(),
                    )
                })?,
        );

        let keypair: KeyPair = serde_json::from_slice(&decrypted)?;
        if !keypair.is_complete() {
            return Err(SuccusError::InvalidKeyMaterial(
                "backup holds an incomplete keypair".to_string(),
            ));
        }
        if keypair.public_keys() != self.public_keys {
            return Err(SuccusError::Backup(
                "public key mismatch - backup may be corrupted".to_string(),
            ));
        }
        Ok(keypair)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn backup_cipher(password: &str, salt: &[u8]) -> Result<Aes256Gcm> {
    let mut key = Zeroizing::new([0u8; 32]);
    Argon2::default()
        .hash_password_into(password.as_bytes(), salt, &mut key[..])
        .map_err(|e| SuccusError::Backup(format!("key derivation failed: {e}")))?;
    Aes256Gcm::new_from_slice(&key[..])
        .map_err(|e| SuccusError::Backup(format!("cipher init failed: {e}")))
}

fn decode_hex(field: &str, value: &str) -> Result<Vec<u8>> {
    hex::decode(value).map_err(|e| SuccusError::Backup(format!("invalid {field}: {e}")))
}
