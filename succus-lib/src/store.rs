//! Message store: sending into a conversation namespace and consuming its
//! subscription.
//!
//! `send` never returns `Err`: every expected failure is reported as
//! [`SendOutcome::NotSent`], and a missing recipient key degrades to an
//! unencrypted record flagged as a fallback.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::watch;
use tracing::{debug, error, info, trace, warn};

use crate::addressing::namespace_for;
use crate::codec::{Encoded, MessageCodec};
use crate::config::ProtocolConfig;
use crate::dedup::{Admission, DeliveryDeduplicator};
use crate::directory::IdentityDirectory;
use crate::listeners::ListenerHandle;
use crate::message::{
    generate_msg_id, string_field, HistoryEntry, IncomingMessage, Message, MessageEvent,
};
use crate::negotiator::SecretNegotiator;
use crate::session::SessionContext;
use crate::transport::{bounded, GraphStore, GraphStoreExt};
use crate::{Address, Namespace, Result, SuccusError};

/// Details of a stored message.
#[derive(Debug, Clone)]
pub struct SendReceipt {
    /// Message id, the child key under the namespace.
    pub key: String,
    pub namespace: Namespace,
    /// Ciphertext was stored.
    pub encrypted: bool,
    /// Stored unencrypted with a plaintext copy.
    pub fallback: bool,
    /// Encrypted with a non-primary secret, or not encrypted at all.
    pub degraded: bool,
    pub message: Message,
}

/// Structured result of [`MessageStore::send`].
#[derive(Debug)]
pub enum SendOutcome {
    Sent(SendReceipt),
    NotSent(SuccusError),
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent(_))
    }

    pub fn receipt(&self) -> Option<&SendReceipt> {
        match self {
            Self::Sent(receipt) => Some(receipt),
            Self::NotSent(_) => None,
        }
    }

    pub fn error(&self) -> Option<&SuccusError> {
        match self {
            Self::Sent(_) => None,
            Self::NotSent(err) => Some(err),
        }
    }

    /// Whether the message went out unencrypted.
    pub fn is_fallback(&self) -> bool {
        self.receipt().is_some_and(|r| r.fallback)
    }
}

#[derive(Clone)]
pub struct MessageStore {
    store: Arc<dyn GraphStore>,
    directory: IdentityDirectory,
    negotiator: SecretNegotiator,
    codec: MessageCodec,
    config: Arc<ProtocolConfig>,
}

impl MessageStore {
    pub fn new(
        store: Arc<dyn GraphStore>,
        directory: IdentityDirectory,
        negotiator: SecretNegotiator,
        codec: MessageCodec,
        config: Arc<ProtocolConfig>,
    ) -> Self {
        Self {
            store,
            directory,
            negotiator,
            codec,
            config,
        }
    }

    /// Encrypt `payload` for the single recipient and append it to their
    /// shared namespace.
    pub async fn send(
        &self,
        session: &SessionContext,
        payload: &str,
        recipients: &[Address],
    ) -> SendOutcome {
        let recipient = match validate_send(session, payload, recipients) {
            Ok(recipient) => recipient,
            Err(e) => {
                warn!(error = %e, "Rejected send request");
                return SendOutcome::NotSent(e);
            }
        };

        let namespace = namespace_for(&session.address, recipient);
        let now = crate::now_ms();
        let msg_id = generate_msg_id(now);
        let (message, degraded) = self.compose(session, recipient, payload, &msg_id, now).await;
        let message = message.with_sender_name(session.display_name.clone());

        let record = match message.to_value() {
            Ok(record) => record,
            Err(e) => return SendOutcome::NotSent(e),
        };
        if let Err(e) = self.write(&namespace, &msg_id, record).await {
            error!(namespace = %namespace, key = %msg_id, error = %e, "Message not stored");
            return SendOutcome::NotSent(e);
        }

        info!(
            namespace = %namespace,
            key = %msg_id,
            encrypted = message.encrypted,
            degraded,
            "Message stored"
        );
        SendOutcome::Sent(SendReceipt {
            key: msg_id,
            namespace,
            encrypted: message.encrypted,
            fallback: !message.encrypted,
            degraded,
            message,
        })
    }

    /// Build the record: encrypted when the recipient's keys allow it,
    /// otherwise the marker plus a plaintext copy.
    async fn compose(
        &self,
        session: &SessionContext,
        recipient: &Address,
        payload: &str,
        msg_id: &str,
        now: i64,
    ) -> (Message, bool) {
        let unencrypted = || {
            Message::unencrypted(
                session.address.clone(),
                recipient.clone(),
                msg_id,
                now,
                payload,
            )
        };

        let Some(keys) = self.directory.lookup(recipient, Some(session)).await else {
            warn!(recipient = %recipient, "Recipient has no directory entry; sending unencrypted");
            return (unencrypted(), true);
        };

        let derived = match self.negotiator.derive_with_keys(session, recipient, &keys) {
            Ok(derived) => derived,
            Err(e) => {
                warn!(recipient = %recipient, error = %e, "Unusable recipient keys; sending unencrypted");
                return (unencrypted(), true);
            }
        };

        match self.codec.encode(payload, &derived.secret) {
            Encoded::Ciphertext(ciphertext) => (
                Message::encrypted(
                    session.address.clone(),
                    recipient.clone(),
                    msg_id,
                    now,
                    ciphertext,
                ),
                derived.degraded,
            ),
            Encoded::Unencrypted => (unencrypted(), true),
        }
    }

    /// Merge-write the record under `msg_id`; on failure retry once with
    /// the child-append primitive. The id never changes between attempts.
    async fn write(&self, namespace: &Namespace, msg_id: &str, record: Value) -> Result<()> {
        let node = self.store.get(namespace.as_str());

        let mut update = Map::new();
        update.insert(msg_id.to_string(), record.clone());
        let primary = bounded(
            self.config.write_timeout(),
            "message put",
            node.put(Value::Object(update)),
        )
        .await;

        let primary_error = match primary {
            Ok(()) => return Ok(()),
            Err(e) => e,
        };
        warn!(namespace = %namespace, key = msg_id, error = %primary_error, "Put failed; retrying with set");

        bounded(
            self.config.write_timeout(),
            "message set",
            node.set(msg_id, record),
        )
        .await
        .map_err(|retry_error| {
            SuccusError::StorageFailure(format!(
                "put failed ({primary_error}); set failed ({retry_error})"
            ))
        })
    }

    /// Subscribe to backlog and live records of `namespace`.
    ///
    /// Each record passes the deduplicator, is decoded for `session` and
    /// handed to `on_event`. Events are never delivered after the returned
    /// handle is stopped.
    pub async fn subscribe<F>(
        &self,
        namespace: &Namespace,
        session: SessionContext,
        on_event: F,
    ) -> Result<ListenerHandle>
    where
        F: Fn(MessageEvent) + Send + Sync + 'static,
    {
        let mut subscription = bounded(
            self.config.lookup_timeout(),
            "subscribe",
            self.store.get(namespace.as_str()).map_on(),
        )
        .await?;
        let detacher = subscription.detacher();

        let dedup = Arc::new(DeliveryDeduplicator::new(
            self.config.dedup_retention(),
            self.config.dedup_capacity,
        ));
        let eviction = dedup.spawn_eviction(eviction_interval(self.config.dedup_retention()));

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let address = session.address.clone();
        let store = self.clone();
        let ns = namespace.clone();

        tokio::spawn(async move {
            loop {
                let update = tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    update = subscription.next() => update,
                };
                let Some((key, data)) = update else {
                    break;
                };

                match dedup.admit(&key, &data, &session.address) {
                    Admission::Accept(incoming) => {
                        let event = store.to_event(incoming, &session).await;
                        if *stop_rx.borrow() {
                            debug!(namespace = %ns, key = %event.message_key, "Listener stopped; dropping decoded event");
                            break;
                        }
                        on_event(event);
                    }
                    Admission::Reject(reason) => {
                        trace!(namespace = %ns, key = %key, ?reason, "Record not delivered");
                    }
                }
            }
            debug!(namespace = %ns, "Subscription task finished");
        });

        info!(namespace = %namespace, address = %address, "Listening");
        Ok(ListenerHandle::new(address, namespace.clone(), move || {
            let _ = stop_tx.send(true);
            detacher.detach();
            eviction.abort();
        }))
    }

    /// Summaries of the records currently in `namespace`, oldest first.
    ///
    /// Bounded by `history_timeout`; a timeout yields an empty list.
    pub async fn history(&self, namespace: &Namespace) -> Vec<HistoryEntry> {
        let listing = bounded(
            self.config.history_timeout(),
            "history",
            self.store.get(namespace.as_str()).map_once(),
        )
        .await;

        match listing {
            Ok(children) => {
                let mut entries: Vec<HistoryEntry> = children
                    .iter()
                    .filter(|(key, _)| key != "_")
                    .filter_map(|(key, data)| HistoryEntry::from_record(key, data))
                    .collect();
                entries.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.key.cmp(&b.key)));
                entries
            }
            Err(e) => {
                debug!(namespace = %namespace, error = %e, "History read returned nothing");
                Vec::new()
            }
        }
    }

    /// Decode an admitted record into a consumer event.
    pub async fn to_event(&self, incoming: IncomingMessage, session: &SessionContext) -> MessageEvent {
        let is_sent_by_me = incoming
            .from
            .as_ref()
            .is_some_and(|from| session.owns(from));
        let timestamp = incoming.date.unwrap_or_else(crate::now_ms);
        let sender_name = string_field(&incoming.data, "ensFrom").map(str::to_string);

        let (decrypted, encrypted, degraded, error) =
            match self.codec.decode(&incoming.data, session).await {
                Ok(decoded) => (Some(decoded.text), decoded.encrypted, decoded.degraded, None),
                Err(e) => {
                    warn!(key = %incoming.key, error = %e, "Could not decode message");
                    (None, false, false, Some(e.to_string()))
                }
            };

        MessageEvent {
            message_key: incoming.key,
            original_data: incoming.data,
            decrypted,
            is_sent_by_me,
            timestamp,
            sender_name,
            sender: incoming.from,
            encrypted,
            degraded,
            error,
        }
    }
}

fn validate_send<'a>(
    session: &SessionContext,
    payload: &str,
    recipients: &'a [Address],
) -> Result<&'a Address> {
    if payload.trim().is_empty() {
        return Err(SuccusError::invalid_input("payload", "message is empty"));
    }
    let recipient = match recipients {
        [] => return Err(SuccusError::invalid_input("recipients", "no recipient")),
        [recipient] => recipient,
        _ => {
            return Err(SuccusError::invalid_input(
                "recipients",
                "exactly one recipient is supported",
            ))
        }
    };
    if recipient.is_empty() {
        return Err(SuccusError::invalid_input("recipients", "recipient address is empty"));
    }
    session.validate()?;
    Ok(recipient)
}

fn eviction_interval(retention: Duration) -> Duration {
    (retention / 2).max(Duration::from_secs(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CryptoSuite, SeaSuite};
    use crate::transport::MemoryGraph;
    use crate::SuccusErrorCode;

    fn message_store(graph: &MemoryGraph) -> (MessageStore, IdentityDirectory) {
        let config = Arc::new(ProtocolConfig::default());
        let store: Arc<dyn GraphStore> = Arc::new(graph.clone());
        let crypto: Arc<dyn CryptoSuite> = Arc::new(SeaSuite);
        let directory = IdentityDirectory::new(store.clone(), config.clone());
        let negotiator = SecretNegotiator::new(crypto.clone(), directory.clone(), 20);
        let codec = MessageCodec::new(crypto, negotiator.clone(), directory.clone());
        (
            MessageStore::new(store, directory.clone(), negotiator, codec, config),
            directory,
        )
    }

    fn session(address: &str) -> SessionContext {
        SessionContext::new(address, SeaSuite.pair().unwrap())
    }

    #[tokio::test]
    async fn test_send_validation() {
        let graph = MemoryGraph::new();
        let (store, _) = message_store(&graph);
        let alice = session("0xAA");
        let bob = Address::new("0xBB");

        let cases = [
            store.send(&alice, "  ", &[bob.clone()]).await,
            store.send(&alice, "hi", &[]).await,
            store.send(&alice, "hi", &[bob.clone(), "0xCC".into()]).await,
        ];
        for outcome in &cases {
            assert_eq!(outcome.error().map(SuccusError::code), Some(SuccusErrorCode::InvalidInput));
        }

        let keyless = SessionContext::new("0xAA", alice.keypair.public_only());
        let outcome = store.send(&keyless, "hi", &[bob]).await;
        assert_eq!(
            outcome.error().map(SuccusError::code),
            Some(SuccusErrorCode::InvalidKeyMaterial)
        );
        assert_eq!(graph.put_count() + graph.set_count(), 0);
    }

    #[tokio::test]
    async fn test_send_encrypts_for_registered_recipient() {
        let graph = MemoryGraph::new();
        let (store, directory) = message_store(&graph);
        let alice = session("0xAA");
        let bob = session("0xBB");
        directory.register(&bob.address, &bob.keypair.public_keys()).await.unwrap();

        let outcome = store.send(&alice, "hi", &[bob.address.clone()]).await;
        let receipt = outcome.receipt().unwrap();

        assert!(receipt.encrypted && !receipt.fallback && !receipt.degraded);
        assert_eq!(receipt.namespace, namespace_for(&"0xaa".into(), &"0xbb".into()));
        assert!(receipt.key.starts_with("msg_"));

        let stored = graph.snapshot(receipt.namespace.as_str()).unwrap();
        let record = &stored[&receipt.key];
        assert_eq!(record["from"], "0xAA");
        assert_eq!(record["encrypted"], true);
        assert!(record.get("text").is_none());
        assert!(record.get("ensFrom").is_none());
    }

    #[tokio::test]
    async fn test_send_stamps_sender_display_name() {
        let graph = MemoryGraph::new();
        let (store, _) = message_store(&graph);
        let alice = session("0xAA").with_display_name(Some("alice.eth".to_string()));

        let outcome = store.send(&alice, "hi", &["0xBB".into()]).await;
        let receipt = outcome.receipt().unwrap();
        assert_eq!(receipt.message.ens_from.as_deref(), Some("alice.eth"));

        let stored = graph.snapshot(receipt.namespace.as_str()).unwrap();
        assert_eq!(stored[&receipt.key]["ensFrom"], "alice.eth");

        let incoming = IncomingMessage::from_record(&receipt.key, stored[&receipt.key].clone());
        let event = store.to_event(incoming, &session("0xBB")).await;
        assert_eq!(event.sender_name.as_deref(), Some("alice.eth"));
    }

    #[tokio::test]
    async fn test_send_to_unregistered_recipient_falls_back() {
        let graph = MemoryGraph::new();
        let (store, _) = message_store(&graph);

        let outcome = store.send(&session("0xAA"), "hi", &["0xBB".into()]).await;
        let receipt = outcome.receipt().unwrap();

        assert!(outcome.is_fallback());
        assert!(!receipt.encrypted);
        assert_eq!(receipt.message.encrypted_msg, crate::ENCRYPT_FAILED_MARKER);
        assert_eq!(receipt.message.text.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn test_write_retries_with_alternate_primitive() {
        let graph = MemoryGraph::new();
        let (store, _) = message_store(&graph);
        graph.fail_next_puts(1);

        let outcome = store.send(&session("0xAA"), "hi", &["0xBB".into()]).await;
        assert!(outcome.is_sent());
        assert_eq!(graph.set_count(), 1);
    }

    #[tokio::test]
    async fn test_write_failure_is_reported_not_thrown() {
        let graph = MemoryGraph::new();
        let (store, _) = message_store(&graph);
        graph.fail_next_puts(1);
        graph.fail_next_sets(1);

        let outcome = store.send(&session("0xAA"), "hi", &["0xBB".into()]).await;
        assert_eq!(
            outcome.error().map(SuccusError::code),
            Some(SuccusErrorCode::StorageFailure)
        );
    }

    #[tokio::test]
    async fn test_history_is_sorted_by_date() {
        let graph = MemoryGraph::new();
        let (store, _) = message_store(&graph);
        let ns = Namespace::new("ns");
        graph.set("ns", "late", serde_json::json!({"date": 20})).await.unwrap();
        graph.set("ns", "early", serde_json::json!({"date": 10})).await.unwrap();
        graph.set("ns", "gone", Value::Null).await.unwrap();

        let keys: Vec<String> = store.history(&ns).await.into_iter().map(|e| e.key).collect();
        assert_eq!(keys, vec!["early", "late"]);
    }

    #[tokio::test]
    async fn test_stopped_listener_detaches_synchronously() {
        let graph = MemoryGraph::new();
        let (store, _) = message_store(&graph);
        let ns = Namespace::new("ns");

        let handle = store.subscribe(&ns, session("0xAA"), |_| {}).await.unwrap();
        assert_eq!(graph.subscriber_count("ns"), 1);

        handle.stop();
        assert_eq!(graph.subscriber_count("ns"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_decode_in_flight_is_dropped_after_stop() {
        let graph = MemoryGraph::new();
        let (store, _) = message_store(&graph);
        let ns = Namespace::new("ns");
        graph
            .set(
                "ns",
                "msg_1",
                serde_json::json!({
                    "date": 1,
                    "from": "0xAA",
                    "to": "0xBB",
                    "msg_id": "msg_1",
                    "encryptedMSG": "opaque-ciphertext",
                    "encrypted": true,
                }),
            )
            .await
            .unwrap();
        // The unregistered sender's directory read never answers.
        graph.set_silent_missing(true);

        let delivered = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        let handle = store
            .subscribe(&ns, session("0xBB"), move |_| {
                counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            })
            .await
            .unwrap();

        // Let the backlog record reach the suspended sender lookup.
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.stop();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(delivered.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
