//! Test fixtures and data generators.

use ed25519_dalek::SigningKey;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::session::KeyPair;

/// Keypair derived from `seed`, stable across runs.
///
/// Uses the same key types and hex encoding as
/// [`SeaSuite`](crate::crypto::SeaSuite), so it interoperates with it.
pub fn deterministic_keypair(seed: &str) -> KeyPair {
    let signing_seed: [u8; 32] = Sha256::digest(format!("sign:{seed}")).into();
    let agreement_seed: [u8; 32] = Sha256::digest(format!("agree:{seed}")).into();

    let signing = SigningKey::from_bytes(&signing_seed);
    let encryption = StaticSecret::from(agreement_seed);
    let epub = PublicKey::from(&encryption);

    KeyPair::new(
        hex::encode(signing.verifying_key().to_bytes()),
        hex::encode(signing.to_bytes()),
        hex::encode(epub.as_bytes()),
        hex::encode(encryption.to_bytes()),
    )
}

/// An unencrypted record as an older client would have written it.
pub fn test_record(from: &str, to: &str, date: i64, text: &str) -> Value {
    json!({
        "date": date,
        "from": from,
        "to": to,
        "msg_id": format!("msg_{date}_00000000"),
        "text": text,
        "encrypted": false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{CryptoSuite, SeaSuite};

    #[test]
    fn test_deterministic_keypair_is_stable() {
        let a = deterministic_keypair("alice");
        let b = deterministic_keypair("alice");
        assert_eq!(a.epub, b.epub);
        assert_eq!(a.pub_key, b.pub_key);
        assert_ne!(a.epub, deterministic_keypair("bob").epub);
    }

    #[test]
    fn test_deterministic_keypairs_agree_under_sea() {
        let alice = deterministic_keypair("alice");
        let bob = deterministic_keypair("bob");
        let ab = SeaSuite.secret(&bob.epub, &alice).unwrap();
        let ba = SeaSuite.secret(&alice.epub, &bob).unwrap();
        assert_eq!(ab.as_bytes(), ba.as_bytes());
    }
}
