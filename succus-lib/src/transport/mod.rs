//! Interfaces to the external collaborators: the replicated graph store and
//! the wallet provider, plus in-process implementations of both.

mod memory;
mod traits;
mod wallet;

pub use memory::MemoryGraph;
pub use traits::{
    ChildUpdate, Detacher, GraphStore, GraphStoreExt, Node, StoreError, Subscription,
};
pub use wallet::{StaticWallet, WalletError, WalletSigner};

use std::future::Future;
use std::time::Duration;

use crate::{Result, SuccusError};

/// Run a store operation under a bound. Expiry is reported as
/// [`SuccusError::LookupTimeout`], store errors as storage failures.
pub(crate) async fn bounded<T>(
    timeout: Duration,
    operation: &str,
    fut: impl Future<Output = std::result::Result<T, StoreError>>,
) -> Result<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(SuccusError::from),
        Err(_) => Err(SuccusError::timeout(
            operation,
            u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        )),
    }
}
