//! Error types for succus operations.
//!
//! Expected degradations (missing peer keys, lookup timeouts, store write
//! hiccups) are reported as values by the protocol APIs. The types here cover
//! the failures that callers must be able to tell apart.

use crate::crypto::CryptoError;
use crate::transport::{StoreError, WalletError};

/// Error codes for FFI and UI integration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum SuccusErrorCode {
    /// Invalid request/data
    InvalidInput = 1000,
    /// Key material missing or malformed
    InvalidKeyMaterial = 1001,
    /// Directory or secret resolution exceeded its bound
    LookupTimeout = 2000,
    /// No counterparty key material at all
    SecretDerivationFailure = 3000,
    /// Symmetric encryption failed
    EncryptionFailure = 3001,
    /// No ciphertext and no plaintext field in a record
    Undecodable = 4000,
    /// Every decode strategy failed and no plaintext copy exists
    DecryptionExhausted = 4001,
    /// Caller is neither sender nor recipient of the record
    NotParticipant = 4002,
    /// Store write failed after retry
    StorageFailure = 5000,
    /// Serialization error
    Serialization = 5001,
    /// Wallet/identity provider error
    Wallet = 6000,
    /// Keypair backup could not be created or restored
    Backup = 7000,
    /// Internal/unexpected error
    Internal = 9999,
}

/// Comprehensive error type for succus operations.
#[derive(Debug, thiserror::Error)]
pub enum SuccusError {
    /// Invalid data provided by the caller.
    #[error("invalid {field}: {reason}")]
    InvalidInput {
        /// Field or parameter name
        field: String,
        /// Reason for invalidity
        reason: String,
    },

    /// Keypair or directory entry is incomplete or fails sanity checks.
    #[error("invalid key material: {0}")]
    InvalidKeyMaterial(String),

    /// A bounded wait expired.
    #[error("{operation} timed out after {timeout_ms}ms")]
    LookupTimeout {
        /// Operation that timed out
        operation: String,
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// The counterparty has no key material in the directory.
    #[error("no key material available for {peer}")]
    SecretDerivationFailure {
        /// Counterparty address
        peer: String,
    },

    /// Symmetric encryption failed.
    #[error("encryption failed: {0}")]
    EncryptionFailure(String),

    /// Record carries neither ciphertext nor a plaintext field.
    #[error("undecodable record: {0}")]
    Undecodable(String),

    /// All decode strategies failed and no plaintext copy exists.
    #[error("decryption exhausted after {attempts} strategies: {last_error}")]
    DecryptionExhausted {
        /// Number of strategies tried
        attempts: usize,
        /// Error reported by the last strategy
        last_error: String,
    },

    /// The local identity is neither sender nor recipient.
    #[error("{address} is not a participant of this message")]
    NotParticipant {
        /// Local address
        address: String,
    },

    /// Store write failed after the retry with the alternate primitive.
    #[error("storage error: {0}")]
    StorageFailure(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Wallet/identity provider failure.
    #[error("wallet error: {0}")]
    Wallet(String),

    /// Keypair backup export or restore failed.
    #[error("backup error: {0}")]
    Backup(String),

    /// Internal/unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl SuccusError {
    /// Get the error code for FFI/UI integration.
    pub fn code(&self) -> SuccusErrorCode {
        match self {
            Self::InvalidInput { .. } => SuccusErrorCode::InvalidInput,
            Self::InvalidKeyMaterial(_) => SuccusErrorCode::InvalidKeyMaterial,
            Self::LookupTimeout { .. } => SuccusErrorCode::LookupTimeout,
            Self::SecretDerivationFailure { .. } => SuccusErrorCode::SecretDerivationFailure,
            Self::EncryptionFailure(_) => SuccusErrorCode::EncryptionFailure,
            Self::Undecodable(_) => SuccusErrorCode::Undecodable,
            Self::DecryptionExhausted { .. } => SuccusErrorCode::DecryptionExhausted,
            Self::NotParticipant { .. } => SuccusErrorCode::NotParticipant,
            Self::StorageFailure(_) => SuccusErrorCode::StorageFailure,
            Self::Serialization(_) => SuccusErrorCode::Serialization,
            Self::Wallet(_) => SuccusErrorCode::Wallet,
            Self::Backup(_) => SuccusErrorCode::Backup,
            Self::Internal(_) => SuccusErrorCode::Internal,
        }
    }

    /// Returns true if this error is potentially recoverable by retrying.
    ///
    /// Input errors are rejected synchronously and never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LookupTimeout { .. } | Self::StorageFailure(_) | Self::Wallet(_)
        )
    }

    /// Create an invalid input error.
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a lookup timeout error.
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::LookupTimeout {
            operation: operation.into(),
            timeout_ms,
        }
    }
}

impl From<serde_json::Error> for SuccusError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<CryptoError> for SuccusError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidKey(msg) => Self::InvalidKeyMaterial(msg),
            CryptoError::EncryptFailed(msg) => Self::EncryptionFailure(msg),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<StoreError> for SuccusError {
    fn from(err: StoreError) -> Self {
        Self::StorageFailure(err.to_string())
    }
}

impl From<WalletError> for SuccusError {
    fn from(err: WalletError) -> Self {
        Self::Wallet(err.to_string())
    }
}
