//! Simulated multi-party network over one shared [`MemoryGraph`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::{self, UnboundedReceiver};

use super::fixtures::deterministic_keypair;
use crate::config::ProtocolConfig;
use crate::crypto::{CryptoSuite, SeaSuite};
use crate::message::{HistoryEntry, MessageEvent};
use crate::messenger::Messenger;
use crate::session::SessionContext;
use crate::store::SendOutcome;
use crate::transport::{GraphStore, MemoryGraph, StaticWallet};
use crate::{Address, Namespace, Result};

/// A shared graph that any number of parties can join.
pub struct TestNetwork {
    graph: MemoryGraph,
    crypto: Arc<dyn CryptoSuite>,
    config: ProtocolConfig,
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl TestNetwork {
    pub fn new() -> Self {
        Self::with_config(ProtocolConfig::default())
    }

    pub fn with_config(config: ProtocolConfig) -> Self {
        Self {
            graph: MemoryGraph::new(),
            crypto: Arc::new(SeaSuite),
            config,
        }
    }

    /// The underlying graph, for fault injection and inspection.
    pub fn graph(&self) -> &MemoryGraph {
        &self.graph
    }

    /// Join as `address` with a keypair derived from the address and
    /// publish its public keys.
    ///
    /// # Panics
    /// Panics if registration fails.
    pub async fn party(&self, address: &str) -> TestParty {
        let keypair = deterministic_keypair(&address.to_lowercase());
        let messenger = self.messenger();
        let session = messenger
            .authenticate(&StaticWallet::new(address), Some(keypair))
            .await
            .expect("test party should authenticate");
        TestParty { messenger, session }
    }

    /// Join as `address` without publishing any keys.
    pub fn unregistered_party(&self, address: &str) -> TestParty {
        TestParty {
            messenger: self.messenger(),
            session: SessionContext::new(address, deterministic_keypair(&address.to_lowercase())),
        }
    }

    fn messenger(&self) -> Messenger {
        let store: Arc<dyn GraphStore> = Arc::new(self.graph.clone());
        Messenger::from_shared(store, self.crypto.clone(), self.config.clone())
    }
}

/// One participant: its own messenger and session on the shared graph.
pub struct TestParty {
    pub messenger: Messenger,
    pub session: SessionContext,
}

impl TestParty {
    pub fn address(&self) -> Address {
        self.session.address.clone()
    }

    pub async fn send(&self, payload: &str, to: &Address) -> SendOutcome {
        self.messenger
            .send(&self.session, payload, std::slice::from_ref(to))
            .await
    }

    pub async fn listen<F>(&self, peer: &Address, on_event: F) -> Result<Namespace>
    where
        F: Fn(MessageEvent) + Send + Sync + 'static,
    {
        self.messenger.listen(&self.session, peer, on_event).await
    }

    pub async fn history(&self, peer: &Address) -> Vec<HistoryEntry> {
        self.messenger.history(&self.session, peer).await
    }
}

/// Receiving side of [`event_channel`].
pub struct EventSink {
    rx: UnboundedReceiver<MessageEvent>,
}

impl EventSink {
    /// Next event, or `None` if none arrives within `wait`.
    pub async fn next_within(&mut self, wait: Duration) -> Option<MessageEvent> {
        tokio::time::timeout(wait, self.rx.recv()).await.ok().flatten()
    }

    /// Events already delivered.
    pub fn drain(&mut self) -> Vec<MessageEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            events.push(event);
        }
        events
    }
}

/// A listener callback paired with the sink it forwards to.
pub fn event_channel() -> (impl Fn(MessageEvent) + Send + Sync + 'static, EventSink) {
    let (tx, rx) = mpsc::unbounded_channel();
    let on_event = move |event: MessageEvent| {
        let _ = tx.send(event);
    };
    (on_event, EventSink { rx })
}
