//! Message codec.
//!
//! Encoding never fails: if encryption is impossible the caller receives the
//! plaintext marker and must store a plaintext copy.
//!
//! Decoding is a state machine over the record's shape. Since sender and
//! receiver may each have fallen back independently while negotiating, the
//! decoder rebuilds every candidate secret in [`SecretSource::DECODE_ORDER`]
//! and keeps the first that opens the ciphertext.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::crypto::{CryptoSuite, SharedSecret};
use crate::directory::IdentityDirectory;
use crate::message::{string_field, ENCRYPT_FAILED_MARKER};
use crate::negotiator::{SecretNegotiator, SecretSource};
use crate::session::{PublicKeys, SessionContext};
use crate::strategy::{ChainOutcome, StrategyChain};
use crate::{Address, Result, SuccusError};

/// Fields that may carry a plaintext copy, in preference order.
const PLAINTEXT_FIELDS: [&str; 4] = ["text", "message", "content", "raw_payload"];

/// Output of [`MessageCodec::encode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Encoded {
    Ciphertext(String),
    /// Encryption failed; store [`ENCRYPT_FAILED_MARKER`] plus plaintext.
    Unencrypted,
}

impl Encoded {
    /// Value for the `encryptedMSG` field.
    pub fn as_field(&self) -> &str {
        match self {
            Self::Ciphertext(c) => c,
            Self::Unencrypted => ENCRYPT_FAILED_MARKER,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::Ciphertext(_))
    }
}

/// Shape of a stored record, resolved once at decode entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PayloadVariant {
    /// Ciphertext present, possibly with a plaintext copy.
    Encrypted {
        ciphertext: String,
        plaintext: Option<String>,
    },
    /// The sender stored the failure marker.
    Marked { plaintext: Option<String> },
    /// No `encryptedMSG` at all.
    Plain { plaintext: Option<String> },
}

impl PayloadVariant {
    pub fn resolve(record: &Value) -> Self {
        let plaintext = PLAINTEXT_FIELDS
            .iter()
            .find_map(|field| string_field(record, field))
            .map(str::to_string);

        match string_field(record, "encryptedMSG") {
            Some(ENCRYPT_FAILED_MARKER) => Self::Marked { plaintext },
            Some(ciphertext) => Self::Encrypted {
                ciphertext: ciphertext.to_string(),
                plaintext,
            },
            None => Self::Plain { plaintext },
        }
    }

    pub fn plaintext(&self) -> Option<&str> {
        match self {
            Self::Encrypted { plaintext, .. }
            | Self::Marked { plaintext }
            | Self::Plain { plaintext } => plaintext.as_deref(),
        }
    }
}

/// Result of a successful decode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub text: String,
    /// Source of the secret that opened the ciphertext.
    pub source: Option<SecretSource>,
    /// Whether ciphertext was actually decrypted.
    pub encrypted: bool,
    /// Decoded through a fallback path or a plaintext copy.
    pub degraded: bool,
}

impl Decoded {
    fn plain(text: &str, degraded: bool) -> Self {
        Self {
            text: text.to_string(),
            source: None,
            encrypted: false,
            degraded,
        }
    }
}

#[derive(Clone)]
pub struct MessageCodec {
    crypto: Arc<dyn CryptoSuite>,
    negotiator: SecretNegotiator,
    directory: IdentityDirectory,
}

impl MessageCodec {
    pub fn new(
        crypto: Arc<dyn CryptoSuite>,
        negotiator: SecretNegotiator,
        directory: IdentityDirectory,
    ) -> Self {
        Self {
            crypto,
            negotiator,
            directory,
        }
    }

    /// Encrypt `plaintext`, or report [`Encoded::Unencrypted`].
    pub fn encode(&self, plaintext: &str, secret: &SharedSecret) -> Encoded {
        match self.crypto.encrypt(plaintext, secret) {
            Ok(ciphertext) => Encoded::Ciphertext(ciphertext),
            Err(e) => {
                warn!(error = %e, "Encryption failed; falling back to plaintext marker");
                Encoded::Unencrypted
            }
        }
    }

    /// Recover the text of a stored record for `session`.
    pub async fn decode(&self, record: &Value, session: &SessionContext) -> Result<Decoded> {
        let (ciphertext, plaintext) = match PayloadVariant::resolve(record) {
            PayloadVariant::Plain { plaintext } | PayloadVariant::Marked { plaintext } => {
                return plaintext
                    .map(|text| Decoded::plain(&text, false))
                    .ok_or_else(|| {
                        SuccusError::Undecodable("no ciphertext and no plaintext field".into())
                    });
            }
            PayloadVariant::Encrypted {
                ciphertext,
                plaintext,
            } => (ciphertext, plaintext),
        };

        let peer = counterparty(record, session)?;
        let peer_keys = self.directory.lookup(&peer, Some(session)).await;
        if peer_keys.is_none() {
            debug!(peer = %peer, "No peer keys; only address-based strategies apply");
        }

        let outcome = self.decode_chain(&ciphertext, session, &peer, peer_keys.as_ref());
        match outcome {
            ChainOutcome::Succeeded {
                value: (text, source),
                ..
            } => Ok(Decoded {
                text,
                source: Some(source),
                encrypted: true,
                degraded: source.is_degraded(),
            }),
            ChainOutcome::Exhausted { attempts } => {
                let last_error = attempts
                    .iter()
                    .rev()
                    .find_map(|a| a.error.clone())
                    .unwrap_or_else(|| "no strategy applicable".to_string());
                match plaintext {
                    Some(text) => {
                        warn!(peer = %peer, "All decode strategies failed; using plaintext copy");
                        Ok(Decoded::plain(&text, true))
                    }
                    None => Err(SuccusError::DecryptionExhausted {
                        attempts: attempts.len(),
                        last_error,
                    }),
                }
            }
        }
    }

    fn decode_chain(
        &self,
        ciphertext: &str,
        session: &SessionContext,
        peer: &Address,
        peer_keys: Option<&PublicKeys>,
    ) -> ChainOutcome<(String, SecretSource)> {
        let mut chain = StrategyChain::new("decode");
        for source in SecretSource::DECODE_ORDER {
            let applicable = peer_keys.is_some() || !source.needs_peer_epub();
            chain = chain.with_if(applicable, source.name(), move || {
                let secret = self.negotiator.candidate(source, session, peer, peer_keys)?;
                let text = self
                    .crypto
                    .decrypt(ciphertext, &secret)
                    .map_err(|e| e.to_string())?;
                if text.is_empty() {
                    return Err("empty plaintext".to_string());
                }
                Ok((text, source))
            });
        }
        chain.run()
    }
}

/// The other party of a record from `session`'s point of view.
///
/// A receiver decodes against `from`; a sender reviewing its own message
/// decodes against `to`.
fn counterparty(record: &Value, session: &SessionContext) -> Result<Address> {
    let from = string_field(record, "from")
        .map(Address::new)
        .ok_or_else(|| SuccusError::Undecodable("record has no sender".into()))?;

    if session.owns(&from) {
        return string_field(record, "to")
            .map(Address::new)
            .ok_or_else(|| SuccusError::Undecodable("record has no recipient".into()));
    }

    match string_field(record, "to").map(Address::new) {
        Some(to) if !session.owns(&to) => Err(SuccusError::NotParticipant {
            address: session.address.to_string(),
        }),
        _ => Ok(from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProtocolConfig;
    use crate::crypto::SeaSuite;
    use crate::negotiator::static_fallback_phrase;
    use crate::transport::MemoryGraph;
    use serde_json::json;

    struct Fixture {
        codec: MessageCodec,
        directory: IdentityDirectory,
        negotiator: SecretNegotiator,
    }

    fn fixture() -> Fixture {
        let crypto: Arc<dyn CryptoSuite> = Arc::new(SeaSuite);
        let directory = IdentityDirectory::new(
            Arc::new(MemoryGraph::new()),
            Arc::new(ProtocolConfig::default()),
        );
        let negotiator = SecretNegotiator::new(crypto.clone(), directory.clone(), 20);
        Fixture {
            codec: MessageCodec::new(crypto, negotiator.clone(), directory.clone()),
            directory,
            negotiator,
        }
    }

    fn session(address: &str) -> SessionContext {
        SessionContext::new(address, SeaSuite.pair().unwrap())
    }

    fn record(from: &SessionContext, to: &SessionContext, encrypted_msg: &str) -> Value {
        json!({
            "date": 1,
            "from": from.address,
            "to": to.address,
            "msg_id": "msg_1_0",
            "encryptedMSG": encrypted_msg,
            "encrypted": true,
        })
    }

    #[test]
    fn test_payload_variant_resolution() {
        assert_eq!(
            PayloadVariant::resolve(&json!({"message": "m", "content": "c"})),
            PayloadVariant::Plain {
                plaintext: Some("m".into())
            }
        );
        assert_eq!(
            PayloadVariant::resolve(&json!({"encryptedMSG": ENCRYPT_FAILED_MARKER, "raw_payload": "r"})),
            PayloadVariant::Marked {
                plaintext: Some("r".into())
            }
        );
        assert_eq!(
            PayloadVariant::resolve(&json!({"encryptedMSG": "abc", "text": ""})),
            PayloadVariant::Encrypted {
                ciphertext: "abc".into(),
                plaintext: None
            }
        );
    }

    #[tokio::test]
    async fn test_plaintext_records() {
        let f = fixture();
        let bob = session("0xBB");

        let decoded = f
            .codec
            .decode(&json!({"from": "0xAA", "content": "hello"}), &bob)
            .await
            .unwrap();
        assert_eq!(decoded.text, "hello");
        assert!(!decoded.encrypted);

        let err = f
            .codec
            .decode(&json!({"from": "0xAA", "encryptedMSG": ENCRYPT_FAILED_MARKER}), &bob)
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::SuccusErrorCode::Undecodable);
    }

    #[tokio::test]
    async fn test_receiver_and_sender_decode_standard() {
        let f = fixture();
        let alice = session("0xAA");
        let bob = session("0xBB");
        f.directory.register(&alice.address, &alice.keypair.public_keys()).await.unwrap();
        f.directory.register(&bob.address, &bob.keypair.public_keys()).await.unwrap();

        let secret = f.negotiator.derive(&alice, &bob.address).await.unwrap();
        let encoded = f.codec.encode("hi bob", &secret.secret);
        let rec = record(&alice, &bob, encoded.as_field());

        let at_bob = f.codec.decode(&rec, &bob).await.unwrap();
        assert_eq!(at_bob.text, "hi bob");
        assert_eq!(at_bob.source, Some(SecretSource::Standard));
        assert!(!at_bob.degraded);

        let at_alice = f.codec.decode(&rec, &alice).await.unwrap();
        assert_eq!(at_alice.text, "hi bob");
    }

    #[tokio::test]
    async fn test_static_fallback_decodes_without_directory() {
        let f = fixture();
        let alice = session("0xAA");
        let bob = session("0xBB");
        let secret = SharedSecret::from_passphrase(&static_fallback_phrase(&alice.address, &bob.address));

        let encoded = f.codec.encode("degraded", &secret);
        let decoded = f
            .codec
            .decode(&record(&alice, &bob, encoded.as_field()), &bob)
            .await
            .unwrap();

        assert_eq!(decoded.text, "degraded");
        assert_eq!(decoded.source, Some(SecretSource::StaticFallback));
        assert!(decoded.degraded);
    }

    #[tokio::test]
    async fn test_exhaustion_without_plaintext_is_error() {
        let f = fixture();
        let alice = session("0xAA");
        let bob = session("0xBB");
        let encoded = f.codec.encode("secret", &SharedSecret::from_bytes([9u8; 32]));
        let rec = record(&alice, &bob, encoded.as_field());

        match f.codec.decode(&rec, &bob).await {
            Err(SuccusError::DecryptionExhausted { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("expected exhaustion, got {:?}", other),
        }

        let mut with_copy = rec.clone();
        with_copy["message"] = json!("secret");
        let decoded = f.codec.decode(&with_copy, &bob).await.unwrap();
        assert_eq!(decoded.text, "secret");
        assert!(decoded.degraded);
    }

    #[tokio::test]
    async fn test_outsider_is_not_participant() {
        let f = fixture();
        let rec = record(&session("0xAA"), &session("0xBB"), "AQID");
        let err = f.codec.decode(&rec, &session("0xCC")).await.unwrap_err();
        assert_eq!(err.code(), crate::SuccusErrorCode::NotParticipant);
    }
}
