//! Delivery guarantees: duplicate suppression, self-echo filtering and
//! listener teardown.

use std::time::Duration;

use serde_json::json;
use succus_lib::test_utils::{assert_decrypted, assert_sent, event_channel, TestNetwork};
use succus_lib::{Address, Admission, DeliveryDeduplicator, RejectReason};

const WAIT: Duration = Duration::from_secs(2);
const QUIET: Duration = Duration::from_millis(200);

fn dedup() -> DeliveryDeduplicator {
    DeliveryDeduplicator::new(Duration::from_secs(60), 100)
}

#[test]
fn test_same_record_twice_passes_once() {
    let dedup = dedup();
    let local = Address::from("0xBB");
    let record = json!({"from": "0xAA", "to": "0xBB", "date": 10, "encryptedMSG": "x"});

    let admissions: Vec<Admission> = (0..2)
        .map(|_| dedup.admit("msg_10_a", &record, &local))
        .collect();

    assert_eq!(admissions.iter().filter(|a| a.is_accepted()).count(), 1);
    assert_eq!(admissions[1], Admission::Reject(RejectReason::Duplicate));
}

#[test]
fn test_same_message_under_two_keys_passes_once() {
    let dedup = dedup();
    let local = Address::from("0xBB");
    let record = json!({"from": "0xAA", "to": "0xBB", "date": 10, "encryptedMSG": "x"});

    assert!(dedup.admit("msg_10_a", &record, &local).is_accepted());
    assert!(!dedup.admit("msg_10_b", &record, &local).is_accepted());
}

#[test]
fn test_own_messages_are_never_delivered() {
    let dedup = dedup();
    let local = Address::from("0xaa");
    let record = json!({"from": "0xAA", "to": "0xBB", "date": 10, "encryptedMSG": "x"});

    assert_eq!(
        dedup.admit("msg_10_a", &record, &local),
        Admission::Reject(RejectReason::SelfEcho)
    );
    assert_eq!(
        dedup.admit("msg_10_a", &record, &local),
        Admission::Reject(RejectReason::SelfEcho)
    );
}

#[tokio::test]
async fn test_duplicate_live_delivery_yields_one_event() {
    let network = TestNetwork::new();
    let alice = network.party("0xAA").await;
    let bob = network.party("0xBB").await;
    network.graph().set_duplicate_delivery(true);

    let (on_event, mut events) = event_channel();
    bob.listen(&alice.address(), on_event).await.unwrap();
    assert_sent(&alice.send("once", &bob.address()).await);

    assert_decrypted(&events.next_within(WAIT).await.unwrap(), "once");
    assert!(events.next_within(QUIET).await.is_none());
}

#[tokio::test]
async fn test_sender_listening_does_not_hear_itself() {
    let network = TestNetwork::new();
    let alice = network.party("0xAA").await;
    let bob = network.party("0xBB").await;

    let (on_event, mut events) = event_channel();
    alice.listen(&bob.address(), on_event).await.unwrap();
    assert_sent(&alice.send("hi", &bob.address()).await);

    assert!(events.next_within(QUIET).await.is_none());
}

#[tokio::test]
async fn test_stopped_listener_receives_nothing() {
    let network = TestNetwork::new();
    let alice = network.party("0xAA").await;
    let bob = network.party("0xBB").await;

    let (on_event, mut events) = event_channel();
    let namespace = bob.listen(&alice.address(), on_event).await.unwrap();
    assert!(bob.messenger.stop_listening(&bob.session, &alice.address()));
    assert_eq!(network.graph().subscriber_count(namespace.as_str()), 0);
    assert!(!bob.messenger.stop_listening(&bob.session, &alice.address()));

    assert_sent(&alice.send("hi", &bob.address()).await);
    assert!(events.next_within(QUIET).await.is_none());
}

#[tokio::test]
async fn test_new_listener_replays_backlog() {
    let network = TestNetwork::new();
    let alice = network.party("0xAA").await;
    let bob = network.party("0xBB").await;
    assert_sent(&alice.send("earlier", &bob.address()).await);

    let (first, mut first_events) = event_channel();
    bob.listen(&alice.address(), first).await.unwrap();
    assert_decrypted(&first_events.next_within(WAIT).await.unwrap(), "earlier");

    let (second, mut second_events) = event_channel();
    bob.listen(&alice.address(), second).await.unwrap();
    assert_decrypted(&second_events.next_within(WAIT).await.unwrap(), "earlier");
    assert!(second_events.next_within(QUIET).await.is_none());
}

#[tokio::test]
async fn test_logout_stops_every_listener_of_the_session() {
    let network = TestNetwork::new();
    let alice = network.party("0xAA").await;
    let bob = network.party("0xBB").await;
    let carol = network.party("0xCC").await;

    let ns_bob = alice.listen(&bob.address(), |_| {}).await.unwrap();
    let ns_carol = alice.listen(&carol.address(), |_| {}).await.unwrap();
    assert_eq!(alice.messenger.listeners().active_count(), 2);

    assert_eq!(alice.messenger.logout(alice.session.clone()), 2);
    assert_eq!(network.graph().subscriber_count(ns_bob.as_str()), 0);
    assert_eq!(network.graph().subscriber_count(ns_carol.as_str()), 0);
}
