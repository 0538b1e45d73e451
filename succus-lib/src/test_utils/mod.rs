//! Test utilities for Succus.
//!
//! This module provides:
//! - Deterministic keypairs and legacy-shaped records
//! - A shared in-memory network where each party owns its own [`Messenger`]
//! - An event channel for awaiting listener callbacks
//! - Assertion helpers for send outcomes and delivered events
//!
//! ## Usage
//!
//! ```rust,ignore
//! use succus_lib::test_utils::TestNetwork;
//!
//! let network = TestNetwork::new();
//! let alice = network.party("0xAA").await;
//! let bob = network.party("0xBB").await;
//!
//! let (on_event, mut events) = succus_lib::test_utils::event_channel();
//! bob.listen(&alice.address(), on_event).await?;
//! alice.send("hi", &bob.address()).await;
//! let event = events.next_within(Duration::from_secs(1)).await;
//! ```

mod assertions;
mod fixtures;
mod network;

pub use assertions::{assert_decrypted, assert_not_sent, assert_sent};
pub use fixtures::{deterministic_keypair, test_record};
pub use network::{event_channel, EventSink, TestNetwork, TestParty};
