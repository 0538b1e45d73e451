//! Property-based tests for succus-lib
//!
//! Uses proptest to verify addressing and codec properties for arbitrary inputs

use std::sync::Arc;

use proptest::prelude::*;
use serde_json::json;
use succus_lib::test_utils::deterministic_keypair;
use succus_lib::{
    namespace_for, Address, CryptoSuite, Encoded, GraphStore, IdentityDirectory, MemoryGraph,
    MessageCodec, ProtocolConfig, SeaSuite, SecretNegotiator, SessionContext,
};

fn address() -> impl Strategy<Value = String> {
    "0x[0-9a-fA-F]{1,40}"
}

proptest! {
    /// Namespaces do not depend on argument order
    #[test]
    fn test_namespace_is_symmetric(a in address(), b in address()) {
        let (a, b) = (Address::from(a), Address::from(b));
        prop_assert_eq!(namespace_for(&a, &b), namespace_for(&b, &a));
        prop_assert_eq!(namespace_for(&a, &b), namespace_for(&a, &b));
    }

    /// Namespaces do not depend on address casing
    #[test]
    fn test_namespace_ignores_case(a in address(), b in address()) {
        let upper = namespace_for(&Address::from(a.to_uppercase()), &Address::from(b.to_uppercase()));
        let lower = namespace_for(&Address::from(a.to_lowercase()), &Address::from(b.to_lowercase()));
        prop_assert_eq!(upper, lower);
    }

    /// Decryption with the pairwise secret recovers any plaintext
    #[test]
    fn test_encrypt_decrypt_round_trip(text in "\\PC{1,200}", seed_a in "[a-z]{1,8}", seed_b in "[a-z]{1,8}") {
        let a = deterministic_keypair(&seed_a);
        let b = deterministic_keypair(&seed_b);
        let sent = SeaSuite.secret(&b.epub, &a).unwrap();
        let received = SeaSuite.secret(&a.epub, &b).unwrap();

        let ciphertext = SeaSuite.encrypt(&text, &sent).unwrap();
        prop_assert_eq!(SeaSuite.decrypt(&ciphertext, &received).unwrap(), text);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// A record encoded by the sender decodes to the same text for the recipient
    #[test]
    fn test_codec_round_trip(text in "\\PC{1,120}") {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let decoded = runtime.block_on(async {
            let store: Arc<dyn GraphStore> = Arc::new(MemoryGraph::new());
            let crypto: Arc<dyn CryptoSuite> = Arc::new(SeaSuite);
            let directory = IdentityDirectory::new(store, Arc::new(ProtocolConfig::default()));
            let negotiator = SecretNegotiator::new(crypto.clone(), directory.clone(), 20);
            let codec = MessageCodec::new(crypto, negotiator.clone(), directory.clone());

            let alice = SessionContext::new("0xAA", deterministic_keypair("alice"));
            let bob = SessionContext::new("0xBB", deterministic_keypair("bob"));
            directory.register(&alice.address, &alice.keypair.public_keys()).await.unwrap();
            directory.register(&bob.address, &bob.keypair.public_keys()).await.unwrap();

            let derived = negotiator.derive(&alice, &bob.address).await.unwrap();
            let Encoded::Ciphertext(ciphertext) = codec.encode(&text, &derived.secret) else {
                panic!("encryption should succeed");
            };
            let record = json!({
                "date": 1,
                "from": "0xAA",
                "to": "0xBB",
                "msg_id": "msg_1_0",
                "encryptedMSG": ciphertext,
                "encrypted": true,
            });
            codec.decode(&record, &bob).await.unwrap()
        });

        prop_assert_eq!(decoded.text, text);
        prop_assert!(decoded.encrypted);
        prop_assert!(!decoded.degraded);
    }
}
