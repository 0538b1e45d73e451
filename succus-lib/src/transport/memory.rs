//! In-process graph store.
//!
//! Simulates the replicated store with thread-safe node storage and
//! fan-out to subscribers. Fault injection hooks model the behaviors the
//! protocol has to survive: rejected writes, replication lag on reads of
//! absent nodes, and at-least-once replay of live updates.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use super::traits::{ChildUpdate, GraphStore, StoreError, Subscription};

type Subscribers = HashMap<String, Vec<(u64, mpsc::UnboundedSender<ChildUpdate>)>>;

#[derive(Default)]
struct GraphState {
    nodes: HashMap<String, Value>,
    subscribers: Subscribers,
}

#[derive(Default)]
struct Faults {
    failing_puts: AtomicUsize,
    failing_sets: AtomicUsize,
    silent_missing: AtomicBool,
    duplicate_live: AtomicBool,
}

#[derive(Default)]
struct Inner {
    state: Mutex<GraphState>,
    faults: Faults,
    next_subscriber: AtomicU64,
    puts: AtomicUsize,
    sets: AtomicUsize,
}

impl Inner {
    fn state(&self) -> MutexGuard<'_, GraphState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory [`GraphStore`]. Clones share the same graph.
#[derive(Clone, Default)]
pub struct MemoryGraph {
    inner: Arc<Inner>,
}

impl MemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `count` calls to `put`.
    pub fn fail_next_puts(&self, count: usize) {
        self.inner.faults.failing_puts.store(count, Ordering::SeqCst);
    }

    /// Reject the next `count` calls to `set`.
    pub fn fail_next_sets(&self, count: usize) {
        self.inner.faults.failing_sets.store(count, Ordering::SeqCst);
    }

    /// When enabled, reads of nodes that were never written never resolve.
    pub fn set_silent_missing(&self, enabled: bool) {
        self.inner
            .faults
            .silent_missing
            .store(enabled, Ordering::SeqCst);
    }

    /// When enabled, every live update is delivered twice.
    pub fn set_duplicate_delivery(&self, enabled: bool) {
        self.inner
            .faults
            .duplicate_live
            .store(enabled, Ordering::SeqCst);
    }

    /// Number of accepted `put` calls.
    pub fn put_count(&self) -> usize {
        self.inner.puts.load(Ordering::SeqCst)
    }

    /// Number of accepted `set` calls.
    pub fn set_count(&self) -> usize {
        self.inner.sets.load(Ordering::SeqCst)
    }

    /// Attached subscriptions for `key`.
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.inner
            .state()
            .subscribers
            .get(key)
            .map_or(0, |subs| subs.len())
    }

    /// Synchronous snapshot of a node, bypassing fault injection.
    pub fn snapshot(&self, key: &str) -> Option<Value> {
        self.inner.state().nodes.get(key).cloned()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    fn write_children(&self, key: &str, children: Map<String, Value>) {
        let duplicate = self.inner.faults.duplicate_live.load(Ordering::SeqCst);
        let mut state = self.inner.state();

        let node = state
            .nodes
            .entry(key.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        if let Value::Object(fields) = node {
            for (child, value) in &children {
                fields.insert(child.clone(), value.clone());
            }
        }

        if let Some(subs) = state.subscribers.get_mut(key) {
            subs.retain(|(_, tx)| !tx.is_closed());
            for (_, tx) in subs.iter() {
                for (child, value) in &children {
                    let _ = tx.send((child.clone(), value.clone()));
                    if duplicate {
                        let _ = tx.send((child.clone(), value.clone()));
                    }
                }
            }
        }
    }

    async fn pending_if_missing(&self, exists: bool) {
        if !exists && self.inner.faults.silent_missing.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

fn children_of(node: Option<&Value>) -> Vec<ChildUpdate> {
    match node {
        Some(Value::Object(fields)) => fields
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl GraphStore for MemoryGraph {
    async fn put(&self, key: &str, value: Value) -> Result<(), StoreError> {
        if key.is_empty() {
            return Err(StoreError::InvalidKey("empty key".to_string()));
        }
        if Self::take_failure(&self.inner.faults.failing_puts) {
            return Err(StoreError::Rejected(format!("put {key} rejected")));
        }
        self.inner.puts.fetch_add(1, Ordering::SeqCst);

        match value {
            Value::Object(children) => self.write_children(key, children),
            other => {
                self.inner.state().nodes.insert(key.to_string(), other);
            }
        }
        Ok(())
    }

    async fn set(&self, key: &str, child: &str, value: Value) -> Result<(), StoreError> {
        if key.is_empty() || child.is_empty() {
            return Err(StoreError::InvalidKey("empty key".to_string()));
        }
        if Self::take_failure(&self.inner.faults.failing_sets) {
            return Err(StoreError::Rejected(format!("set {key}/{child} rejected")));
        }
        self.inner.sets.fetch_add(1, Ordering::SeqCst);

        let mut children = Map::new();
        children.insert(child.to_string(), value);
        self.write_children(key, children);
        Ok(())
    }

    async fn once(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let value = self.snapshot(key);
        self.pending_if_missing(value.is_some()).await;
        Ok(value)
    }

    async fn map_once(&self, key: &str) -> Result<Vec<ChildUpdate>, StoreError> {
        let node = self.snapshot(key);
        self.pending_if_missing(node.is_some()).await;
        Ok(children_of(node.as_ref()))
    }

    async fn map_on(&self, key: &str) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_subscriber.fetch_add(1, Ordering::SeqCst);

        {
            // Backlog and registration under one lock so no write slips between.
            let mut state = self.inner.state();
            for update in children_of(state.nodes.get(key)) {
                let _ = tx.send(update);
            }
            state
                .subscribers
                .entry(key.to_string())
                .or_default()
                .push((id, tx));
        }

        let inner = Arc::clone(&self.inner);
        let key = key.to_string();
        Ok(Subscription::new(rx, move || {
            let mut state = inner.state();
            if let Some(subs) = state.subscribers.get_mut(&key) {
                subs.retain(|(sub_id, _)| *sub_id != id);
                if subs.is_empty() {
                    state.subscribers.remove(&key);
                }
            }
        }))
    }
}
