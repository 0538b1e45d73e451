//! Identity keypairs and the explicit session context.
//!
//! There is no process-wide "current user". Every protocol operation that
//! needs to know who is acting receives a [`SessionContext`], so several
//! sessions can run side by side in one process.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{Address, Result, SuccusError};

/// Identity keypair: `pub`/`priv` for signing, `epub`/`epriv` for encryption.
///
/// Private halves are optional because the same shape is used for key
/// material read back from the directory, which only ever holds public keys.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct KeyPair {
    #[serde(rename = "pub")]
    pub pub_key: String,
    #[serde(rename = "priv", default, skip_serializing_if = "Option::is_none")]
    pub priv_key: Option<String>,
    pub epub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epriv: Option<String>,
}

impl KeyPair {
    /// Build a complete keypair.
    pub fn new(
        pub_key: impl Into<String>,
        priv_key: impl Into<String>,
        epub: impl Into<String>,
        epriv: impl Into<String>,
    ) -> Self {
        Self {
            pub_key: pub_key.into(),
            priv_key: Some(priv_key.into()),
            epub: epub.into(),
            epriv: Some(epriv.into()),
        }
    }

    /// Copy of this keypair without private material.
    pub fn public_only(&self) -> Self {
        Self {
            pub_key: self.pub_key.clone(),
            priv_key: None,
            epub: self.epub.clone(),
            epriv: None,
        }
    }

    /// The part of the keypair that may be published.
    pub fn public_keys(&self) -> PublicKeys {
        PublicKeys {
            pub_key: self.pub_key.clone(),
            epub: self.epub.clone(),
        }
    }

    /// True when all four components are present and non-empty.
    pub fn is_complete(&self) -> bool {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        !self.pub_key.trim().is_empty()
            && !self.epub.trim().is_empty()
            && present(&self.priv_key)
            && present(&self.epriv)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("pub", &crate::truncate_key(&self.pub_key))
            .field("epub", &crate::truncate_key(&self.epub))
            .field("has_priv", &self.priv_key.is_some())
            .field("has_epriv", &self.epriv.is_some())
            .finish()
    }
}

/// Directory entry: the published half of a keypair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeys {
    #[serde(rename = "pub")]
    pub pub_key: String,
    pub epub: String,
}

impl PublicKeys {
    pub fn new(pub_key: impl Into<String>, epub: impl Into<String>) -> Self {
        Self {
            pub_key: pub_key.into(),
            epub: epub.into(),
        }
    }

    /// Both fields present and non-empty.
    pub fn is_valid(&self) -> bool {
        !self.pub_key.trim().is_empty() && !self.epub.trim().is_empty()
    }

    /// Parse a raw store value, rejecting partial entries and tombstones.
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        let pub_key = value.get("pub")?.as_str()?;
        let epub = value.get("epub")?.as_str()?;
        let keys = Self::new(pub_key, epub);
        keys.is_valid().then_some(keys)
    }

    /// View as a keypair without private halves.
    pub fn to_keypair(&self) -> KeyPair {
        KeyPair {
            pub_key: self.pub_key.clone(),
            priv_key: None,
            epub: self.epub.clone(),
            epriv: None,
        }
    }
}

/// The authenticated caller: address plus full local keypair.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub address: Address,
    pub keypair: KeyPair,
    /// Wallet display name, stamped on outgoing records as `ensFrom`.
    pub display_name: Option<String>,
}

impl SessionContext {
    pub fn new(address: impl Into<Address>, keypair: KeyPair) -> Self {
        Self {
            address: address.into(),
            keypair,
            display_name: None,
        }
    }

    pub fn with_display_name(mut self, name: Option<String>) -> Self {
        self.display_name = name.filter(|n| !n.trim().is_empty());
        self
    }

    /// Check that the session can sign and decrypt.
    pub fn validate(&self) -> Result<()> {
        if self.address.is_empty() {
            return Err(SuccusError::invalid_input("address", "sender address is empty"));
        }
        if !self.keypair.is_complete() {
            return Err(SuccusError::InvalidKeyMaterial(
                "sender keypair is incomplete".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether `address` refers to this session's identity.
    pub fn owns(&self, address: &Address) -> bool {
        self.address.is_same(address)
    }
}
