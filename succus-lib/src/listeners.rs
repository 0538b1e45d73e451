//! Listener lifecycle.
//!
//! At most one live subscription per session and conversation namespace.
//! Handles carry an idempotent cleanup that detaches the store subscription
//! and clears the deduplicator's eviction timer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, info};

use crate::{Address, Namespace};

type Cleanup = Box<dyn FnOnce() + Send>;

/// Registry key: the listening identity (normalized) and the namespace.
type ListenerKey = (Address, Namespace);

/// An active subscription on one namespace, owned by one session.
pub struct ListenerHandle {
    owner: Address,
    namespace: Namespace,
    cleanup: Mutex<Option<Cleanup>>,
    stopped: AtomicBool,
}

impl ListenerHandle {
    pub fn new(
        owner: Address,
        namespace: Namespace,
        cleanup: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            owner,
            namespace,
            cleanup: Mutex::new(Some(Box::new(cleanup))),
            stopped: AtomicBool::new(false),
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Address of the session that started the listener.
    pub fn owner(&self) -> &Address {
        &self.owner
    }

    fn key(&self) -> ListenerKey {
        (self.owner.normalized(), self.namespace.clone())
    }

    /// Run the cleanup. Later calls do nothing.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        let cleanup = self
            .cleanup
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(cleanup) = cleanup {
            cleanup();
        }
        debug!(namespace = %self.namespace, "Listener stopped");
    }

    pub fn is_active(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst)
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle")
            .field("owner", &self.owner)
            .field("namespace", &self.namespace)
            .field("active", &self.is_active())
            .finish()
    }
}

/// Registry of active listeners keyed by owner and namespace.
///
/// Sessions sharing a registry never replace or stop each other's listeners.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<HashMap<ListenerKey, ListenerHandle>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle`, stopping and discarding any listener its owner
    /// already has on the same namespace.
    pub fn start(&self, handle: ListenerHandle) {
        let key = handle.key();
        let previous = self.lock().remove(&key);
        if let Some(previous) = previous {
            info!(owner = %key.0, namespace = %key.1, "Replacing existing listener");
            previous.stop();
        }
        // Cleanup runs outside the lock; another start may have raced in.
        let raced = self.lock().insert(key, handle);
        if let Some(raced) = raced {
            raced.stop();
        }
    }

    /// Stop and remove `owner`'s listener on `namespace`. Returns whether
    /// one existed.
    pub fn stop(&self, owner: &Address, namespace: &Namespace) -> bool {
        let handle = self.lock().remove(&(owner.normalized(), namespace.clone()));
        match handle {
            Some(handle) => {
                handle.stop();
                true
            }
            None => false,
        }
    }

    /// Stop every listener started by `owner`.
    pub fn stop_owned_by(&self, owner: &Address) -> usize {
        let owner = owner.normalized();
        let handles: Vec<ListenerHandle> = {
            let mut listeners = self.lock();
            let keys: Vec<ListenerKey> = listeners
                .keys()
                .filter(|(key_owner, _)| *key_owner == owner)
                .cloned()
                .collect();
            keys.iter().filter_map(|key| listeners.remove(key)).collect()
        };
        let count = Self::stop_handles(&handles);
        if count > 0 {
            info!(owner = %owner, count, "Stopped listeners of session");
        }
        count
    }

    /// Stop every listener.
    pub fn stop_all(&self) -> usize {
        let handles: Vec<ListenerHandle> = self.lock().drain().map(|(_, h)| h).collect();
        let count = Self::stop_handles(&handles);
        if count > 0 {
            info!(count, "Stopped all listeners");
        }
        count
    }

    pub fn is_listening(&self, owner: &Address, namespace: &Namespace) -> bool {
        self.lock()
            .contains_key(&(owner.normalized(), namespace.clone()))
    }

    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    fn stop_handles(handles: &[ListenerHandle]) -> usize {
        for handle in handles {
            handle.stop();
        }
        handles.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ListenerKey, ListenerHandle>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn counted(owner: &str, namespace: &str, counter: &Arc<AtomicUsize>) -> ListenerHandle {
        let counter = Arc::clone(counter);
        ListenerHandle::new(Address::new(owner), Namespace::new(namespace), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_stop_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let handle = counted("0xaa", "ns", &calls);

        handle.stop();
        handle.stop();
        drop(handle);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_start_replaces_existing_listener() {
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let registry = ListenerRegistry::new();

        registry.start(counted("0xaa", "ns", &first));
        registry.start(counted("0xAA", "ns", &second));

        assert_eq!(registry.active_count(), 1);
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_owners_do_not_replace_each_other() {
        let alice = Arc::new(AtomicUsize::new(0));
        let bob = Arc::new(AtomicUsize::new(0));
        let registry = ListenerRegistry::new();
        let ns = Namespace::new("shared");

        registry.start(counted("0xaa", "shared", &alice));
        registry.start(counted("0xbb", "shared", &bob));

        assert_eq!(registry.active_count(), 2);
        assert!(registry.stop(&"0xAA".into(), &ns));
        assert!(registry.is_listening(&"0xbb".into(), &ns));
        assert_eq!(alice.load(Ordering::SeqCst), 1);
        assert_eq!(bob.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_stop_owned_by_leaves_other_sessions() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = ListenerRegistry::new();
        registry.start(counted("0xaa", "a", &calls));
        registry.start(counted("0xaa", "b", &calls));
        registry.start(counted("0xcc", "c", &calls));

        assert_eq!(registry.stop_owned_by(&"0xAA".into()), 2);
        assert_eq!(registry.active_count(), 1);
        assert!(registry.is_listening(&"0xcc".into(), &Namespace::new("c")));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stop_and_stop_all() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = ListenerRegistry::new();
        let owner = Address::new("0xaa");
        registry.start(counted("0xaa", "a", &calls));
        registry.start(counted("0xaa", "b", &calls));
        registry.start(counted("0xcc", "c", &calls));

        assert!(registry.stop(&owner, &Namespace::new("a")));
        assert!(!registry.stop(&owner, &Namespace::new("a")));
        assert!(!registry.is_listening(&owner, &Namespace::new("a")));

        assert_eq!(registry.stop_all(), 2);
        assert_eq!(registry.active_count(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
