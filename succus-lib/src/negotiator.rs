//! Pairwise secret negotiation.
//!
//! The primary path is asymmetric key agreement between the local keypair
//! and the counterparty's `epub`. When that fails the negotiator tries the
//! inverse direction, and as a last resort hands out a static key derived
//! from the two addresses. The static key has no forward secrecy and is
//! always flagged as degraded.
//!
//! Each derivation path is also exposed individually as a [`SecretSource`]
//! so the decoder can rebuild every secret the encoder might have used.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::crypto::{CryptoSuite, SharedSecret};
use crate::directory::IdentityDirectory;
use crate::session::{KeyPair, PublicKeys, SessionContext};
use crate::strategy::{ChainOutcome, StrategyChain};
use crate::{truncate_key, Address, Result, SuccusError};

/// The ways a pairwise secret can be obtained, in decode order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecretSource {
    /// Agreement with the counterparty epub after length validation.
    Standard,
    /// Agreement with the counterparty epub, no validation.
    DirectEpub,
    /// Agreement with roles swapped: own epub against a pair made of the
    /// peer epub and own epriv. Only the sender can recompute it.
    Inverse,
    /// `"fallback_key_" + a + "_" + b` over canonical addresses.
    StaticFallback,
    /// Agreement of the local keypair with itself.
    KeypairOnly,
}

impl SecretSource {
    /// Every source, in the order the decoder tries them.
    pub const DECODE_ORDER: [SecretSource; 5] = [
        SecretSource::Standard,
        SecretSource::DirectEpub,
        SecretSource::Inverse,
        SecretSource::StaticFallback,
        SecretSource::KeypairOnly,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::DirectEpub => "direct-epub",
            Self::Inverse => "inverse",
            Self::StaticFallback => "static-fallback",
            Self::KeypairOnly => "keypair-only",
        }
    }

    /// Whether this source needs the counterparty's epub.
    pub fn needs_peer_epub(&self) -> bool {
        matches!(self, Self::Standard | Self::DirectEpub | Self::Inverse)
    }

    /// Anything but the primary agreement is degraded.
    pub fn is_degraded(&self) -> bool {
        !matches!(self, Self::Standard)
    }
}

/// A negotiated secret and how it was obtained.
#[derive(Debug, Clone)]
pub struct DerivedSecret {
    pub secret: SharedSecret,
    pub source: SecretSource,
    pub degraded: bool,
}

/// Passphrase of the static fallback key for a pair of addresses.
pub fn static_fallback_phrase(a: &Address, b: &Address) -> String {
    let mut pair = [a.normalized(), b.normalized()];
    pair.sort();
    format!("fallback_key_{}_{}", pair[0], pair[1])
}

/// Derives pairwise secrets for a session.
#[derive(Clone)]
pub struct SecretNegotiator {
    crypto: Arc<dyn CryptoSuite>,
    directory: IdentityDirectory,
    min_epub_len: usize,
}

impl SecretNegotiator {
    pub fn new(
        crypto: Arc<dyn CryptoSuite>,
        directory: IdentityDirectory,
        min_epub_len: usize,
    ) -> Self {
        Self {
            crypto,
            directory,
            min_epub_len,
        }
    }

    /// Resolve `peer` in the directory and derive a secret with it.
    ///
    /// Fails with [`SuccusError::SecretDerivationFailure`] only when the
    /// directory has no key material for `peer`.
    pub async fn derive(&self, session: &SessionContext, peer: &Address) -> Result<DerivedSecret> {
        let keys = self
            .directory
            .lookup(peer, Some(session))
            .await
            .ok_or_else(|| SuccusError::SecretDerivationFailure {
                peer: peer.to_string(),
            })?;
        self.derive_with_keys(session, peer, &keys)
    }

    /// Derive a secret from already resolved peer keys.
    ///
    /// Validates both epubs, then walks primary, inverse and static
    /// fallback. Never fails once validation passes.
    pub fn derive_with_keys(
        &self,
        session: &SessionContext,
        peer: &Address,
        peer_keys: &PublicKeys,
    ) -> Result<DerivedSecret> {
        self.validate_epub("peer epub", &peer_keys.epub)?;
        self.validate_epub("own epub", &session.keypair.epub)?;

        let chain = StrategyChain::new("negotiate")
            .with(SecretSource::Standard.name(), || {
                self.agree(&peer_keys.epub, &session.keypair)
                    .map(|s| (s, SecretSource::Standard))
            })
            .with(SecretSource::Inverse.name(), || {
                self.inverse(session, peer_keys)
                    .map(|s| (s, SecretSource::Inverse))
            })
            .with(SecretSource::StaticFallback.name(), || {
                Ok((
                    Self::static_fallback(session, peer),
                    SecretSource::StaticFallback,
                ))
            });

        match chain.run() {
            ChainOutcome::Succeeded {
                value: (secret, source),
                ..
            } => {
                if source.is_degraded() {
                    warn!(
                        peer = %peer,
                        source = source.name(),
                        "Primary key agreement failed; using degraded secret"
                    );
                } else {
                    debug!(peer = %peer, epub = %truncate_key(&peer_keys.epub), "Derived shared secret");
                }
                Ok(DerivedSecret {
                    secret,
                    source,
                    degraded: source.is_degraded(),
                })
            }
            // The static fallback cannot fail.
            ChainOutcome::Exhausted { .. } => Ok(DerivedSecret {
                secret: Self::static_fallback(session, peer),
                source: SecretSource::StaticFallback,
                degraded: true,
            }),
        }
    }

    /// Compute the candidate secret of one specific source.
    ///
    /// Sources that need the peer epub fail when `peer_keys` is `None`.
    pub fn candidate(
        &self,
        source: SecretSource,
        session: &SessionContext,
        peer: &Address,
        peer_keys: Option<&PublicKeys>,
    ) -> std::result::Result<SharedSecret, String> {
        let peer_epub = || {
            peer_keys
                .map(|k| k.epub.as_str())
                .ok_or_else(|| format!("no epub for {peer}"))
        };

        match source {
            SecretSource::Standard => {
                let epub = peer_epub()?;
                self.validate_epub("peer epub", epub)
                    .map_err(|e| e.to_string())?;
                self.agree(epub, &session.keypair)
            }
            SecretSource::DirectEpub => self.agree(peer_epub()?, &session.keypair),
            SecretSource::Inverse => {
                let keys = peer_keys.ok_or_else(|| format!("no epub for {peer}"))?;
                self.inverse(session, keys)
            }
            SecretSource::StaticFallback => Ok(Self::static_fallback(session, peer)),
            SecretSource::KeypairOnly => self.agree(&session.keypair.epub, &session.keypair),
        }
    }

    fn agree(&self, peer_epub: &str, own: &KeyPair) -> std::result::Result<SharedSecret, String> {
        self.crypto
            .secret(peer_epub, own)
            .map_err(|e| e.to_string())
    }

    fn inverse(
        &self,
        session: &SessionContext,
        peer_keys: &PublicKeys,
    ) -> std::result::Result<SharedSecret, String> {
        let swapped = KeyPair {
            pub_key: peer_keys.pub_key.clone(),
            priv_key: None,
            epub: peer_keys.epub.clone(),
            epriv: session.keypair.epriv.clone(),
        };
        self.agree(&session.keypair.epub, &swapped)
    }

    fn static_fallback(session: &SessionContext, peer: &Address) -> SharedSecret {
        SharedSecret::from_passphrase(&static_fallback_phrase(&session.address, peer))
    }

    fn validate_epub(&self, field: &str, epub: &str) -> Result<()> {
        if epub.trim().len() < self.min_epub_len {
            return Err(SuccusError::InvalidKeyMaterial(format!(
                "{field} shorter than {} characters",
                self.min_epub_len
            )));
        }
        Ok(())
    }
}
