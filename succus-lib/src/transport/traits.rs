use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// Errors surfaced by a [`GraphStore`] acknowledgment.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store acknowledged the write with an error.
    #[error("write rejected: {0}")]
    Rejected(String),
    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The key or child name is not acceptable to the store.
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

/// One child update delivered by a subscription: `(child key, data)`.
pub type ChildUpdate = (String, Value);

/// Replicated key/value graph store with subscription support.
///
/// Reads are not bounded by the store itself; callers impose timeouts.
/// `null` values are tombstones.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Merge-write `value` at `key`. Object values merge field by field.
    async fn put(&self, key: &str, value: Value) -> Result<(), StoreError>;

    /// Write `value` as child `child` of node `key`.
    ///
    /// This is the alternate write primitive used when `put` fails.
    async fn set(&self, key: &str, child: &str, value: Value) -> Result<(), StoreError>;

    /// One-shot read of the current value at `key`, `None` if never written.
    async fn once(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// One-shot enumeration of the children currently under `key`.
    async fn map_once(&self, key: &str) -> Result<Vec<ChildUpdate>, StoreError>;

    /// Subscribe to backlog and live child updates under `key`.
    async fn map_on(&self, key: &str) -> Result<Subscription, StoreError>;
}

type DetachFn = Box<dyn FnOnce() + Send>;

/// Live subscription to the children of a node.
///
/// Detaches from the store on [`Subscription::off`] or when dropped.
pub struct Subscription {
    updates: mpsc::UnboundedReceiver<ChildUpdate>,
    detacher: Detacher,
}

impl Subscription {
    pub fn new(
        updates: mpsc::UnboundedReceiver<ChildUpdate>,
        detach: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            updates,
            detacher: Detacher(Arc::new(Mutex::new(Some(Box::new(detach))))),
        }
    }

    /// Next child update; `None` once detached and drained.
    pub async fn next(&mut self) -> Option<ChildUpdate> {
        self.updates.recv().await
    }

    /// Detach from the store. Safe to call more than once.
    pub fn off(&mut self) {
        self.detacher.detach();
        self.updates.close();
    }

    pub fn is_active(&self) -> bool {
        self.detacher.is_attached()
    }

    /// A handle that detaches this subscription from outside the task
    /// consuming it.
    pub fn detacher(&self) -> Detacher {
        self.detacher.clone()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.off();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Shared, run-once detach action of a [`Subscription`].
#[derive(Clone)]
pub struct Detacher(Arc<Mutex<Option<DetachFn>>>);

impl Detacher {
    /// Run the detach action if it has not run yet.
    pub fn detach(&self) {
        let action = self.0.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(action) = action {
            action();
        }
    }

    pub fn is_attached(&self) -> bool {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

/// Handle to one node of a [`GraphStore`].
pub struct Node<'a, S: ?Sized> {
    store: &'a S,
    key: String,
}

impl<'a, S: GraphStore + ?Sized> Node<'a, S> {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn put(&self, value: Value) -> Result<(), StoreError> {
        self.store.put(&self.key, value).await
    }

    pub async fn set(&self, child: &str, value: Value) -> Result<(), StoreError> {
        self.store.set(&self.key, child, value).await
    }

    pub async fn once(&self) -> Result<Option<Value>, StoreError> {
        self.store.once(&self.key).await
    }

    pub async fn map_once(&self) -> Result<Vec<ChildUpdate>, StoreError> {
        self.store.map_once(&self.key).await
    }

    pub async fn map_on(&self) -> Result<Subscription, StoreError> {
        self.store.map_on(&self.key).await
    }
}

/// `get(key)` accessor returning a [`Node`] handle.
pub trait GraphStoreExt {
    fn get(&self, key: &str) -> Node<'_, Self>;
}

impl<S: GraphStore + ?Sized> GraphStoreExt for S {
    fn get(&self, key: &str) -> Node<'_, Self> {
        Node {
            store: self,
            key: key.to_string(),
        }
    }
}
