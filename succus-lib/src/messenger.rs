//! High-level facade wiring the protocol components together.
//!
//! A [`Messenger`] owns one store, one crypto suite and one listener
//! registry. It holds no notion of a current user; sessions are returned
//! by [`Messenger::authenticate`] and passed back in explicitly.

use std::sync::Arc;

use tracing::{info, warn};

use crate::addressing::{conversation, namespace_for, Conversation};
use crate::backup::KeyBackup;
use crate::codec::MessageCodec;
use crate::config::ProtocolConfig;
use crate::crypto::CryptoSuite;
use crate::diagnostics::{self, ProbeReport};
use crate::directory::IdentityDirectory;
use crate::listeners::ListenerRegistry;
use crate::message::{HistoryEntry, MessageEvent};
use crate::negotiator::SecretNegotiator;
use crate::session::{KeyPair, SessionContext};
use crate::store::{MessageStore, SendOutcome};
use crate::transport::{GraphStore, WalletSigner};
use crate::{Address, Namespace, Result, SuccusError};

pub struct Messenger {
    store: Arc<dyn GraphStore>,
    crypto: Arc<dyn CryptoSuite>,
    config: Arc<ProtocolConfig>,
    directory: IdentityDirectory,
    negotiator: SecretNegotiator,
    messages: MessageStore,
    listeners: ListenerRegistry,
}

impl Messenger {
    pub fn new(
        store: impl GraphStore + 'static,
        crypto: impl CryptoSuite + 'static,
        config: ProtocolConfig,
    ) -> Self {
        Self::from_shared(Arc::new(store), Arc::new(crypto), config)
    }

    /// Build from collaborators that are shared with other owners.
    pub fn from_shared(
        store: Arc<dyn GraphStore>,
        crypto: Arc<dyn CryptoSuite>,
        config: ProtocolConfig,
    ) -> Self {
        let config = Arc::new(config);
        let directory = IdentityDirectory::new(store.clone(), config.clone());
        let negotiator =
            SecretNegotiator::new(crypto.clone(), directory.clone(), config.min_epub_len);
        let codec = MessageCodec::new(crypto.clone(), negotiator.clone(), directory.clone());
        let messages = MessageStore::new(
            store.clone(),
            directory.clone(),
            negotiator.clone(),
            codec,
            config.clone(),
        );

        Self {
            store,
            crypto,
            config,
            directory,
            negotiator,
            messages,
            listeners: ListenerRegistry::new(),
        }
    }

    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    pub fn directory(&self) -> &IdentityDirectory {
        &self.directory
    }

    pub fn negotiator(&self) -> &SecretNegotiator {
        &self.negotiator
    }

    pub fn messages(&self) -> &MessageStore {
        &self.messages
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    /// Establish a session for the wallet's address.
    ///
    /// Uses `keypair` when given, otherwise generates a fresh one, and
    /// publishes its public half. A failed directory write is logged; the
    /// session is still usable for reading.
    pub async fn authenticate(
        &self,
        wallet: &dyn WalletSigner,
        keypair: Option<KeyPair>,
    ) -> Result<SessionContext> {
        let address = wallet.address().await?;
        let keypair = match keypair {
            Some(keypair) => keypair,
            None => self.crypto.pair()?,
        };
        if !keypair.is_complete() {
            return Err(SuccusError::InvalidKeyMaterial(
                "keypair is missing private components".to_string(),
            ));
        }

        let stored = self
            .directory
            .register(&address, &keypair.public_keys())
            .await?;
        if !stored {
            warn!(address = %address, "Public keys not stored; peers may not reach this identity");
        }

        let display_name = wallet.display_name().await;
        info!(address = %address, "Authenticated");
        Ok(SessionContext::new(address, keypair).with_display_name(display_name))
    }

    /// Encrypt the session's keypair under `password`.
    pub fn backup(&self, session: &SessionContext, password: &str) -> Result<KeyBackup> {
        let backup = KeyBackup::export(&session.keypair, Some(&session.address), password)?;
        info!(address = %session.address, "Keypair backup created");
        Ok(backup)
    }

    /// Restore a keypair from `backup` and authenticate with it, publishing
    /// its public half again under the wallet's address.
    pub async fn restore(
        &self,
        wallet: &dyn WalletSigner,
        backup: &KeyBackup,
        password: &str,
    ) -> Result<SessionContext> {
        let keypair = backup.import(password)?;
        let session = self.authenticate(wallet, Some(keypair)).await?;
        if let Some(original) = &backup.address {
            if !original.is_same(&session.address) {
                warn!(backup = %original, address = %session.address, "Restoring a backup made for another address");
            }
        }
        info!(address = %session.address, "Keypair restored");
        Ok(session)
    }

    pub async fn send(
        &self,
        session: &SessionContext,
        payload: &str,
        recipients: &[Address],
    ) -> SendOutcome {
        self.messages.send(session, payload, recipients).await
    }

    /// Listen to the conversation with `peer`, replacing any listener
    /// already active on it.
    pub async fn listen<F>(
        &self,
        session: &SessionContext,
        peer: &Address,
        on_event: F,
    ) -> Result<Namespace>
    where
        F: Fn(MessageEvent) + Send + Sync + 'static,
    {
        let namespace = namespace_for(&session.address, peer);
        self.listeners.stop(&session.address, &namespace);

        let handle = self
            .messages
            .subscribe(&namespace, session.clone(), on_event)
            .await?;
        self.listeners.start(handle);
        Ok(namespace)
    }

    /// Stop listening to the conversation with `peer`.
    pub fn stop_listening(&self, session: &SessionContext, peer: &Address) -> bool {
        self.listeners
            .stop(&session.address, &namespace_for(&session.address, peer))
    }

    /// Stored records of the conversation with `peer`, oldest first.
    pub async fn history(&self, session: &SessionContext, peer: &Address) -> Vec<HistoryEntry> {
        self.messages
            .history(&namespace_for(&session.address, peer))
            .await
    }

    pub fn conversation(&self, session: &SessionContext, peer: &Address) -> Conversation {
        conversation(&session.address, peer)
    }

    /// Check that the store accepts and returns writes.
    pub async fn probe(&self) -> ProbeReport {
        diagnostics::probe(self.store.as_ref(), self.config.probe_timeout()).await
    }

    /// End a session: stop the listeners it started and drop the keypair.
    /// Other sessions on this messenger keep listening.
    pub fn logout(&self, session: SessionContext) -> usize {
        let stopped = self.listeners.stop_owned_by(&session.address);
        info!(address = %session.address, stopped, "Logged out");
        stopped
    }
}
