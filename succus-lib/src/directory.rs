//! Public-key directory: address → `{pub, epub}`.
//!
//! Entries live at `skeypair{address}` under both the original and the
//! lowercase form of the address, and are also indexed under the
//! `directory_index` node so registered addresses can be enumerated.
//! Private key material is never written.
//!
//! Every read races replication, so reads are bounded and absence (including
//! a timeout) is reported as `None`/`false` rather than as an error.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::config::ProtocolConfig;
use crate::session::{PublicKeys, SessionContext};
use crate::transport::{bounded, GraphStore, GraphStoreExt};
use crate::{truncate_key, Address, Result, SuccusError};

/// Key prefix of directory entries.
pub const ENTRY_PREFIX: &str = "skeypair";

/// Store key of the directory entry for `address` (exact casing).
pub fn entry_key(address: &Address) -> String {
    format!("{}{}", ENTRY_PREFIX, address.as_str())
}

/// Identity directory over a [`GraphStore`].
#[derive(Clone)]
pub struct IdentityDirectory {
    store: Arc<dyn GraphStore>,
    config: Arc<ProtocolConfig>,
}

impl IdentityDirectory {
    pub fn new(store: Arc<dyn GraphStore>, config: Arc<ProtocolConfig>) -> Self {
        Self { store, config }
    }

    /// Publish `keys` for `address`. Last write wins.
    ///
    /// Returns `Ok(false)` when an entry write failed; fails only on
    /// incomplete key material or an empty address.
    pub async fn register(&self, address: &Address, keys: &PublicKeys) -> Result<bool> {
        if address.is_empty() {
            return Err(SuccusError::invalid_input("address", "address is empty"));
        }
        if !keys.is_valid() {
            return Err(SuccusError::InvalidKeyMaterial(
                "directory entry requires both pub and epub".to_string(),
            ));
        }

        let entry = serde_json::to_value(keys)?;
        let mut stored = true;

        for variant in address.variants() {
            let key = entry_key(&variant);
            let write = bounded(
                self.config.write_timeout(),
                "directory write",
                self.store.get(&key).put(entry.clone()),
            )
            .await;
            if let Err(e) = write {
                warn!(address = %variant, error = %e, "Failed to write directory entry");
                stored = false;
            }
        }

        // The index is a convenience for enumeration; failures here do not fail registration.
        let index_entry = index_update(address, entry);
        if let Err(e) = bounded(
            self.config.write_timeout(),
            "directory index write",
            self.store.get(&self.config.directory_index).put(index_entry),
        )
        .await
        {
            warn!(address = %address, error = %e, "Failed to update directory index");
        }

        info!(
            address = %address,
            epub = %truncate_key(&keys.epub),
            stored,
            "Registered public keys"
        );
        Ok(stored)
    }

    /// Whether a complete entry exists under either address variant.
    pub async fn has(&self, address: &Address) -> bool {
        let found = tokio::time::timeout(self.config.has_timeout(), self.find(address)).await;
        match found {
            Ok(entry) => entry.is_some(),
            Err(_) => {
                debug!(address = %address, "Directory presence check timed out");
                false
            }
        }
    }

    /// Resolve the public keys of `address`.
    ///
    /// When `session` belongs to `address` its keypair is returned without a
    /// store round-trip. Otherwise both variants are read in turn under one
    /// shared `lookup_timeout`.
    pub async fn lookup(
        &self,
        address: &Address,
        session: Option<&SessionContext>,
    ) -> Option<PublicKeys> {
        if let Some(session) = session.filter(|s| s.owns(address)) {
            return Some(session.keypair.public_keys());
        }

        match tokio::time::timeout(self.config.lookup_timeout(), self.find(address)).await {
            Ok(Some(keys)) => {
                debug!(address = %address, epub = %truncate_key(&keys.epub), "Directory hit");
                Some(keys)
            }
            Ok(None) => {
                debug!(address = %address, "No directory entry");
                None
            }
            Err(_) => {
                warn!(
                    address = %address,
                    timeout_ms = self.config.lookup_timeout_ms,
                    "Directory lookup timed out"
                );
                None
            }
        }
    }

    /// Tombstone the entries of `address`. Failures are logged, not returned.
    pub async fn remove(&self, address: &Address) -> bool {
        let mut removed = true;

        for variant in address.variants() {
            let key = entry_key(&variant);
            if let Err(e) = bounded(
                self.config.write_timeout(),
                "directory tombstone",
                self.store.get(&key).put(Value::Null),
            )
            .await
            {
                warn!(address = %variant, error = %e, "Failed to tombstone directory entry");
                removed = false;
            }
        }

        let index_entry = index_update(address, Value::Null);
        if let Err(e) = bounded(
            self.config.write_timeout(),
            "directory index write",
            self.store.get(&self.config.directory_index).put(index_entry),
        )
        .await
        {
            warn!(address = %address, error = %e, "Failed to update directory index");
        }

        info!(address = %address, removed, "Removed directory entry");
        removed
    }

    /// Addresses with a live entry in the directory index, sorted.
    pub async fn registered_addresses(&self) -> Vec<Address> {
        let listing = bounded(
            self.config.history_timeout(),
            "directory enumeration",
            self.store.get(&self.config.directory_index).map_once(),
        )
        .await;

        match listing {
            Ok(children) => {
                let mut addresses: Vec<Address> = children
                    .into_iter()
                    .filter(|(_, value)| PublicKeys::from_value(value).is_some())
                    .map(|(key, _)| Address::new(key))
                    .collect();
                addresses.sort();
                addresses
            }
            Err(e) => {
                debug!(error = %e, "Directory enumeration returned nothing");
                Vec::new()
            }
        }
    }

    async fn find(&self, address: &Address) -> Option<PublicKeys> {
        for variant in address.variants() {
            match self.store.get(&entry_key(&variant)).once().await {
                Ok(Some(value)) => {
                    if let Some(keys) = PublicKeys::from_value(&value) {
                        return Some(keys);
                    }
                }
                Ok(None) => {}
                Err(e) => debug!(address = %variant, error = %e, "Directory read failed"),
            }
        }
        None
    }
}

fn index_update(address: &Address, entry: Value) -> Value {
    let mut update = Map::new();
    update.insert(address.normalized().0, entry);
    Value::Object(update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::KeyPair;
    use crate::transport::MemoryGraph;
    use std::time::Duration;

    fn directory(graph: &MemoryGraph, config: ProtocolConfig) -> IdentityDirectory {
        IdentityDirectory::new(Arc::new(graph.clone()), Arc::new(config))
    }

    fn keys(tag: &str) -> PublicKeys {
        PublicKeys::new(format!("pub-{tag}-0000000000"), format!("epub-{tag}-000000000000"))
    }

    #[tokio::test]
    async fn test_register_writes_both_variants_and_index() {
        let graph = MemoryGraph::new();
        let dir = directory(&graph, ProtocolConfig::default());

        assert!(dir.register(&"0xAbC".into(), &keys("a")).await.unwrap());

        assert!(graph.snapshot("skeypair0xAbC").is_some());
        assert!(graph.snapshot("skeypair0xabc").is_some());
        assert_eq!(dir.registered_addresses().await, vec![Address::new("0xabc")]);
    }

    #[tokio::test]
    async fn test_register_rejects_incomplete_keys() {
        let dir = directory(&MemoryGraph::new(), ProtocolConfig::default());
        let err = dir
            .register(&"0xaa".into(), &PublicKeys::new("pub", ""))
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::SuccusErrorCode::InvalidKeyMaterial);
    }

    #[tokio::test]
    async fn test_register_reports_write_failure() {
        let graph = MemoryGraph::new();
        let dir = directory(&graph, ProtocolConfig::default());
        graph.fail_next_puts(1);

        assert!(!dir.register(&"0xaa".into(), &keys("a")).await.unwrap());
    }

    #[tokio::test]
    async fn test_reregistration_overwrites() {
        let dir = directory(&MemoryGraph::new(), ProtocolConfig::default());
        dir.register(&"0xaa".into(), &keys("old")).await.unwrap();
        dir.register(&"0xaa".into(), &keys("new")).await.unwrap();

        assert_eq!(dir.lookup(&"0xaa".into(), None).await, Some(keys("new")));
    }

    #[tokio::test]
    async fn test_lookup_tries_both_variants() {
        let graph = MemoryGraph::new();
        let dir = directory(&graph, ProtocolConfig::default());
        // Entry only under the lowercase key
        graph
            .put("skeypair0xabc", serde_json::to_value(keys("a")).unwrap())
            .await
            .unwrap();

        assert_eq!(dir.lookup(&"0xABC".into(), None).await, Some(keys("a")));
        assert!(dir.has(&"0xABC".into()).await);
    }

    #[tokio::test]
    async fn test_self_lookup_skips_store() {
        let graph = MemoryGraph::new();
        graph.set_silent_missing(true);
        let dir = directory(&graph, ProtocolConfig::default());
        let pair = KeyPair::new("pub-self-0000000", "priv", "epub-self-000000000000", "epriv");
        let session = SessionContext::new("0xAA", pair.clone());

        let found = dir.lookup(&"0xaa".into(), Some(&session)).await;
        assert_eq!(found, Some(pair.public_keys()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lookup_times_out_to_none() {
        let graph = MemoryGraph::new();
        graph.set_silent_missing(true);
        let config = ProtocolConfig::default().with_lookup_timeout(Duration::from_millis(800));
        let dir = directory(&graph, config);

        let started = tokio::time::Instant::now();
        assert_eq!(dir.lookup(&"0xnobody".into(), None).await, None);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(800) && elapsed < Duration::from_millis(900));
        assert!(!dir.has(&"0xnobody".into()).await);
    }

    #[tokio::test]
    async fn test_remove_tombstones_entries() {
        let dir = directory(&MemoryGraph::new(), ProtocolConfig::default());
        dir.register(&"0xAA".into(), &keys("a")).await.unwrap();
        dir.register(&"0xbb".into(), &keys("b")).await.unwrap();

        assert!(dir.remove(&"0xAA".into()).await);
        assert_eq!(dir.lookup(&"0xAA".into(), None).await, None);
        assert!(!dir.has(&"0xaa".into()).await);
        assert_eq!(dir.registered_addresses().await, vec![Address::new("0xbb")]);
    }
}
