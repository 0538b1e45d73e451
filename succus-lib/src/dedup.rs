//! Duplicate suppression for at-least-once delivery.
//!
//! The store replays backlog and live updates in any order and may deliver
//! the same record several times. The deduplicator admits each logical
//! message once per retention window and filters the local identity's own
//! messages echoing back.
//!
//! # Memory
//!
//! - Entries expire a fixed retention after first sighting
//! - At most `capacity` identities are tracked; the oldest go first
//! - Owned per listener, never shared globally

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::message::{string_field, IncomingMessage, ENCRYPT_FAILED_MARKER};
use crate::Address;

/// Why a record was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Store-internal metadata key.
    Bookkeeping,
    EmptyKey,
    /// Tombstone or non-object payload.
    Malformed,
    /// Same logical message seen within the retention window.
    Duplicate,
    /// Sent by the local identity.
    SelfEcho,
}

/// Decision for one raw record.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    Accept(IncomingMessage),
    Reject(RejectReason),
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accept(_))
    }
}

#[derive(Default)]
struct SeenSet {
    first_seen: HashMap<String, i64>,
    order: VecDeque<(String, i64)>,
}

impl SeenSet {
    fn evict_before(&mut self, cutoff: i64) {
        while let Some((identity, seen_at)) = self.order.front() {
            if *seen_at >= cutoff {
                break;
            }
            // Only drop the map entry if it was not re-marked later.
            if self.first_seen.get(identity) == Some(seen_at) {
                self.first_seen.remove(identity);
            }
            self.order.pop_front();
        }
    }

    fn evict_to_capacity(&mut self, capacity: usize) {
        while self.first_seen.len() >= capacity {
            let Some((identity, seen_at)) = self.order.pop_front() else {
                break;
            };
            if self.first_seen.get(&identity) == Some(&seen_at) {
                self.first_seen.remove(&identity);
            }
        }
    }
}

/// Bounded, time-windowed duplicate filter.
pub struct DeliveryDeduplicator {
    seen: Mutex<SeenSet>,
    retention_ms: i64,
    capacity: usize,
}

impl DeliveryDeduplicator {
    pub fn new(retention: Duration, capacity: usize) -> Self {
        Self {
            seen: Mutex::new(SeenSet::default()),
            retention_ms: i64::try_from(retention.as_millis()).unwrap_or(i64::MAX),
            capacity: capacity.max(1),
        }
    }

    /// Composite identity of a record: `from|to|content|date`, or the store
    /// key when the record carries no date.
    ///
    /// The unencrypted marker is shared by every fallback record, so it never
    /// counts as content; the plaintext copy does.
    pub fn identity(key: &str, data: &Value) -> String {
        let Some(date) = data.get("date").and_then(Value::as_i64) else {
            return format!("key:{key}");
        };
        let from = string_field(data, "from").unwrap_or_default().to_lowercase();
        let to = string_field(data, "to").unwrap_or_default().to_lowercase();
        let content = ["encryptedMSG", "text", "message", "content", "raw_payload"]
            .iter()
            .filter_map(|field| string_field(data, field))
            .find(|value| *value != ENCRYPT_FAILED_MARKER)
            .unwrap_or_default();
        format!("{from}|{to}|{content}|{date}")
    }

    /// Decide on a record using the current time.
    pub fn admit(&self, key: &str, data: &Value, local: &Address) -> Admission {
        self.admit_at(key, data, local, crate::now_ms())
    }

    /// Decide on a record as of `now_ms`.
    pub fn admit_at(&self, key: &str, data: &Value, local: &Address, now_ms: i64) -> Admission {
        if key == "_" || key.starts_with('#') {
            return Admission::Reject(RejectReason::Bookkeeping);
        }
        if key.trim().is_empty() {
            return Admission::Reject(RejectReason::EmptyKey);
        }
        if !data.is_object() {
            return Admission::Reject(RejectReason::Malformed);
        }

        let identity = Self::identity(key, data);
        let mut seen = self.lock();

        if let Some(first) = seen.first_seen.get(&identity) {
            if now_ms.saturating_sub(*first) < self.retention_ms {
                trace!(key, "Duplicate delivery suppressed");
                return Admission::Reject(RejectReason::Duplicate);
            }
        }

        let incoming = IncomingMessage::from_record(key, data.clone());
        if incoming.from.as_ref().is_some_and(|from| from.is_same(local)) {
            trace!(key, "Self-echo suppressed");
            return Admission::Reject(RejectReason::SelfEcho);
        }

        seen.evict_before(now_ms.saturating_sub(self.retention_ms));
        seen.evict_to_capacity(self.capacity);
        seen.first_seen.insert(identity.clone(), now_ms);
        seen.order.push_back((identity, now_ms));

        Admission::Accept(incoming)
    }

    /// Drop identities first seen before the retention window.
    pub fn evict_expired(&self, now_ms: i64) {
        let cutoff = now_ms.saturating_sub(self.retention_ms);
        self.lock().evict_before(cutoff);
    }

    /// Number of tracked identities.
    pub fn len(&self) -> usize {
        self.lock().first_seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Periodically evict expired identities until the task is aborted.
    pub fn spawn_eviction(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let dedup = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                dedup.evict_expired(crate::now_ms());
            }
        })
    }

    fn lock(&self) -> MutexGuard<'_, SeenSet> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dedup() -> DeliveryDeduplicator {
        DeliveryDeduplicator::new(Duration::from_secs(60), 100)
    }

    fn record(from: &str, date: i64) -> Value {
        json!({"from": from, "to": "0xbb", "encryptedMSG": "abc", "date": date})
    }

    #[test]
    fn test_same_record_admitted_once() {
        let d = dedup();
        let local = Address::new("0xbb");
        let data = record("0xaa", 1);

        assert!(d.admit_at("msg_1", &data, &local, 1_000).is_accepted());
        assert_eq!(
            d.admit_at("msg_1", &data, &local, 1_001),
            Admission::Reject(RejectReason::Duplicate)
        );
    }

    #[test]
    fn test_bookkeeping_and_malformed_records() {
        let d = dedup();
        let local = Address::new("0xbb");

        assert_eq!(
            d.admit_at("_", &record("0xaa", 1), &local, 0),
            Admission::Reject(RejectReason::Bookkeeping)
        );
        assert_eq!(
            d.admit_at("", &record("0xaa", 1), &local, 0),
            Admission::Reject(RejectReason::EmptyKey)
        );
        assert_eq!(
            d.admit_at("msg_1", &Value::Null, &local, 0),
            Admission::Reject(RejectReason::Malformed)
        );
        assert!(d.is_empty());
    }

    #[test]
    fn test_self_echo_is_case_insensitive() {
        let d = dedup();
        let local = Address::new("0xAA");

        assert_eq!(
            d.admit_at("msg_1", &record("0xaa", 1), &local, 0),
            Admission::Reject(RejectReason::SelfEcho)
        );
    }

    #[test]
    fn test_identity_ignores_key_when_dated() {
        let d = dedup();
        let local = Address::new("0xbb");
        let data = record("0xaa", 7);

        assert!(d.admit_at("msg_1", &data, &local, 0).is_accepted());
        // Same logical message replayed under another key.
        assert!(!d.admit_at("msg_2", &data, &local, 0).is_accepted());

        let undated = json!({"from": "0xaa", "text": "x"});
        assert!(d.admit_at("k1", &undated, &local, 0).is_accepted());
        assert!(d.admit_at("k2", &undated, &local, 0).is_accepted());
    }

    #[test]
    fn test_distinct_unencrypted_records_in_same_millisecond() {
        let d = dedup();
        let local = Address::new("0xbb");
        let unencrypted = |text: &str| {
            json!({
                "from": "0xaa",
                "to": "0xbb",
                "encryptedMSG": ENCRYPT_FAILED_MARKER,
                "text": text,
                "date": 1_000,
            })
        };

        assert!(d.admit_at("msg_1000_a", &unencrypted("first"), &local, 0).is_accepted());
        assert!(d.admit_at("msg_1000_b", &unencrypted("second"), &local, 0).is_accepted());
        assert_eq!(
            d.admit_at("msg_1000_c", &unencrypted("first"), &local, 1),
            Admission::Reject(RejectReason::Duplicate)
        );
    }

    #[test]
    fn test_retention_window_expires() {
        let d = DeliveryDeduplicator::new(Duration::from_secs(1), 100);
        let local = Address::new("0xbb");
        let data = record("0xaa", 1);

        assert!(d.admit_at("msg_1", &data, &local, 0).is_accepted());
        assert!(!d.admit_at("msg_1", &data, &local, 999).is_accepted());
        assert!(d.admit_at("msg_1", &data, &local, 1_000).is_accepted());
    }

    #[test]
    fn test_evict_expired() {
        let d = DeliveryDeduplicator::new(Duration::from_secs(1), 100);
        let local = Address::new("0xbb");

        d.admit_at("a", &record("0xaa", 1), &local, 0);
        d.admit_at("b", &record("0xaa", 2), &local, 500);
        assert_eq!(d.len(), 2);

        d.evict_expired(1_200);
        assert_eq!(d.len(), 1);
    }

    #[test]
    fn test_capacity_bound() {
        let d = DeliveryDeduplicator::new(Duration::from_secs(60), 3);
        let local = Address::new("0xbb");

        for i in 0..10 {
            d.admit_at(&format!("m{i}"), &record("0xaa", i), &local, i);
        }
        assert_eq!(d.len(), 3);
        // The oldest identity was evicted and is admitted again.
        assert!(d.admit_at("m0", &record("0xaa", 0), &local, 11).is_accepted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_eviction_can_be_aborted() {
        let d = Arc::new(dedup());
        let task = d.spawn_eviction(Duration::from_secs(30));
        tokio::time::sleep(Duration::from_secs(65)).await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());
    }
}
