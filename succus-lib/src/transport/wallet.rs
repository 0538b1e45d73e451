use async_trait::async_trait;

use crate::Address;

/// Errors from the wallet/identity provider.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("wallet not connected")]
    NotConnected,
    #[error("signer unavailable: {0}")]
    Signer(String),
}

/// The wallet capability: the sole source of the caller's address.
#[async_trait]
pub trait WalletSigner: Send + Sync {
    async fn address(&self) -> Result<Address, WalletError>;

    /// Human-readable name of the address (reverse name lookup), if the
    /// provider has one.
    async fn display_name(&self) -> Option<String> {
        None
    }
}

/// Wallet with a fixed address, for tests and the demo CLI.
#[derive(Debug, Clone)]
pub struct StaticWallet {
    address: Option<Address>,
    name: Option<String>,
}

impl StaticWallet {
    pub fn new(address: impl Into<Address>) -> Self {
        Self {
            address: Some(address.into()),
            name: None,
        }
    }

    /// Attach a display name, as resolved by a reverse name lookup.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// A wallet that was never connected.
    pub fn disconnected() -> Self {
        Self {
            address: None,
            name: None,
        }
    }
}

#[async_trait]
impl WalletSigner for StaticWallet {
    async fn address(&self) -> Result<Address, WalletError> {
        match &self.address {
            Some(address) if !address.is_empty() => Ok(address.clone()),
            Some(_) => Err(WalletError::Signer("empty address".to_string())),
            None => Err(WalletError::NotConnected),
        }
    }

    async fn display_name(&self) -> Option<String> {
        self.name.clone()
    }
}
