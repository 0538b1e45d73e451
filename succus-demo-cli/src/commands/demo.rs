//! Demo command - a two-party exchange over one in-memory store

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use succus_lib::{
    Address, CryptoSuite, GraphStore, MemoryGraph, MessageEvent, Messenger, ProtocolConfig,
    SeaSuite, SendOutcome, SessionContext, StaticWallet,
};
use tokio::sync::mpsc;
use tracing::debug;

use crate::ui;

/// How long to wait for the recipient's listener.
const DELIVERY_WAIT: Duration = Duration::from_secs(5);

pub struct DemoOptions {
    pub from: String,
    pub to: String,
    pub message: String,
    /// Encrypted backup written by `keygen`.
    pub keys: Option<PathBuf>,
    pub password: Option<String>,
    pub unregistered: bool,
}

pub async fn run(config: ProtocolConfig, options: DemoOptions, verbose: bool) -> Result<()> {
    let store: Arc<dyn GraphStore> = Arc::new(MemoryGraph::new());
    let crypto: Arc<dyn CryptoSuite> = Arc::new(SeaSuite::new());
    let sender = Messenger::from_shared(store.clone(), crypto.clone(), config.clone());
    let receiver = Messenger::from_shared(store, crypto.clone(), config);

    let sender_keys = match &options.keys {
        Some(path) => Some(super::backup::load(path, options.password.as_deref())?),
        None => None,
    };
    let alice = sender
        .authenticate(&StaticWallet::new(options.from.as_str()), sender_keys)
        .await?;

    let bob = if options.unregistered {
        ui::warning(&format!("{} is not registered; expect a plaintext fallback", options.to));
        SessionContext::new(options.to.as_str(), crypto.pair()?)
    } else {
        receiver
            .authenticate(&StaticWallet::new(options.to.as_str()), None)
            .await?
    };

    ui::header("Participants");
    ui::key_value("Sender", alice.address.as_str());
    ui::key_value("Recipient", bob.address.as_str());
    let conv = sender.conversation(&alice, &bob.address);
    ui::key_value("Namespace", conv.namespace.as_str());

    let (tx, mut rx) = mpsc::unbounded_channel::<MessageEvent>();
    receiver
        .listen(&bob, &alice.address, move |event| {
            let _ = tx.send(event);
        })
        .await?;

    ui::header("Send");
    let outcome = sender
        .send(&alice, &options.message, &[Address::from(options.to.as_str())])
        .await;
    report_send(&outcome);
    if !outcome.is_sent() {
        receiver.logout(bob);
        sender.logout(alice);
        anyhow::bail!("message was not sent");
    }

    ui::header("Receive");
    match tokio::time::timeout(DELIVERY_WAIT, rx.recv()).await {
        Ok(Some(event)) => report_event(&event, verbose)?,
        _ => ui::error("No message delivered to the recipient"),
    }

    ui::header("History");
    for entry in receiver.history(&bob, &alice.address).await {
        ui::key_value(
            &entry.key,
            &format!(
                "{} -> {} ({})",
                entry.from.map(|a| a.to_string()).unwrap_or_default(),
                entry.to.map(|a| a.to_string()).unwrap_or_default(),
                if entry.encrypted { "encrypted" } else { "plaintext" }
            ),
        );
    }

    ui::separator();
    let stopped = receiver.logout(bob);
    sender.logout(alice);
    debug!(stopped, "Demo finished");
    Ok(())
}

fn report_send(outcome: &SendOutcome) {
    match outcome {
        SendOutcome::Sent(receipt) => {
            ui::key_value("Key", &receipt.key);
            if receipt.fallback {
                ui::warning("Message sent unencrypted");
            } else if receipt.degraded {
                ui::warning("Message encrypted with a fallback secret");
            } else {
                ui::success("Message sent encrypted");
            }
        }
        SendOutcome::NotSent(e) => {
            ui::error(&format!("Message not sent: {}", e));
        }
    }
}

fn report_event(event: &MessageEvent, verbose: bool) -> Result<()> {
    match (&event.decrypted, &event.error) {
        (Some(text), _) => {
            ui::success(&format!("Received: {}", text));
            if event.degraded {
                ui::warning("Decoded through a fallback path");
            }
        }
        (None, Some(error)) => ui::error(&format!("Could not decode message: {}", error)),
        (None, None) => ui::error("Could not decode message"),
    }
    if let Some(sender) = &event.sender {
        ui::key_value("From", sender.as_str());
    }
    if let Some(name) = &event.sender_name {
        ui::key_value("Sender name", name);
    }
    ui::key_value("Encrypted", &event.encrypted.to_string());

    if verbose {
        ui::json(&serde_json::to_value(event)?);
    }
    Ok(())
}
