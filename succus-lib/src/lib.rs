//! Succus messaging library.
//!
//! End-to-end encrypted, address-addressed messaging layered on top of an
//! eventually-consistent replicated graph store. Two parties identified by
//! blockchain addresses exchange messages without a central server: each
//! message is encrypted with a pairwise secret and written to a deterministic
//! conversation namespace; the counterparty discovers it via a subscription.
//!
//! The crate stays stateless with respect to "who is logged in": every
//! operation receives an explicit [`SessionContext`], and the store, crypto
//! and wallet collaborators are injected through traits.
//!
//! # Features
//!
//! - **Identity directory**: address → public keypair, bounded-timeout reads
//! - **Conversation addressing**: order-independent namespaces
//! - **Secret negotiation**: ordered strategy chain with a degraded fallback
//! - **Message codec**: multi-strategy decoding with plaintext fallback
//! - **Delivery**: deduplicated subscriptions and a listener registry
//! - **Backups**: password-protected keypair export and restore
//!
//! # Example
//!
//! ```ignore
//! use succus_lib::{Messenger, MemoryGraph, SeaSuite, StaticWallet, ProtocolConfig};
//!
//! let messenger = Messenger::new(MemoryGraph::new(), SeaSuite::new(), ProtocolConfig::default());
//! let alice = messenger.authenticate(&StaticWallet::new("0xAA"), None).await?;
//! let outcome = messenger.send(&alice, "hi", &["0xBB".into()]).await;
//! assert!(outcome.is_sent());
//! ```

use serde::{Deserialize, Serialize};

pub mod addressing;
pub mod backup;
pub mod codec;
pub mod config;
pub mod crypto;
pub mod dedup;
pub mod diagnostics;
pub mod directory;
pub mod errors;
pub mod listeners;
pub mod message;
pub mod messenger;
pub mod negotiator;
pub mod session;
pub mod store;
pub mod strategy;
pub mod transport;

/// Test utilities for protocol testing.
///
/// This module is only available with the `test-utils` feature or in test builds.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use addressing::{conversation, namespace_for, Conversation};
pub use backup::KeyBackup;
pub use codec::{Decoded, Encoded, MessageCodec, PayloadVariant};
pub use config::ProtocolConfig;
pub use crypto::{CryptoError, CryptoSuite, SeaSuite, SharedSecret};
pub use dedup::{Admission, DeliveryDeduplicator, RejectReason};
pub use directory::IdentityDirectory;
pub use errors::{SuccusError, SuccusErrorCode};
pub use listeners::{ListenerHandle, ListenerRegistry};
pub use message::{HistoryEntry, IncomingMessage, Message, MessageEvent, ENCRYPT_FAILED_MARKER};
pub use diagnostics::ProbeReport;
pub use messenger::Messenger;
pub use negotiator::{DerivedSecret, SecretNegotiator, SecretSource};
pub use session::{KeyPair, PublicKeys, SessionContext};
pub use store::{MessageStore, SendOutcome, SendReceipt};
pub use transport::{
    GraphStore, GraphStoreExt, MemoryGraph, StaticWallet, StoreError, Subscription, WalletError,
    WalletSigner,
};

/// Common result alias for succus operations.
pub type Result<T> = std::result::Result<T, SuccusError>;

/// A party's blockchain account address.
///
/// Addresses are compared case-insensitively, but both the original and the
/// lowercase representation may exist as directory keys, so the original
/// casing is preserved.
///
/// # Example
///
/// ```
/// use succus_lib::Address;
///
/// let addr = Address::new("0xAbC");
/// assert_eq!(addr.normalized().as_str(), "0xabc");
/// assert!(addr.is_same(&"0xABC".into()));
/// assert_eq!(addr.variants().len(), 2);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub String);

impl Address {
    /// Create a new address from a string.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Get the address as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase-normalized copy of this address.
    pub fn normalized(&self) -> Self {
        Self(self.0.trim().to_lowercase())
    }

    /// Case-insensitive comparison.
    pub fn is_same(&self, other: &Address) -> bool {
        self.0.trim().eq_ignore_ascii_case(other.0.trim())
    }

    /// The representations under which directory entries may be stored:
    /// the original first, then the normalized form if it differs.
    pub fn variants(&self) -> Vec<Address> {
        let normalized = self.normalized();
        if normalized.0 == self.0 {
            vec![normalized]
        } else {
            vec![self.clone(), normalized]
        }
    }

    /// Check if the address is empty or whitespace.
    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Address {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deterministic shared storage location of a two-party conversation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(pub String);

impl Namespace {
    /// Wrap an already-computed namespace string.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self(namespace.into())
    }

    /// Get the namespace as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Namespace {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current wall-clock time in epoch milliseconds.
pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Shortened form of key material for log output.
pub(crate) fn truncate_key(key: &str) -> String {
    let prefix: String = key.chars().take(10).collect();
    format!("{prefix}...")
}
