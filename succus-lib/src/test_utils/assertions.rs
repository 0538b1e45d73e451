//! Assertion helpers for send outcomes and delivered events.

use crate::message::MessageEvent;
use crate::store::{SendOutcome, SendReceipt};
use crate::SuccusErrorCode;

/// Assert that a send went through and return its receipt.
///
/// # Panics
/// Panics if the outcome is `NotSent`.
pub fn assert_sent(outcome: &SendOutcome) -> &SendReceipt {
    match outcome {
        SendOutcome::Sent(receipt) => receipt,
        SendOutcome::NotSent(e) => panic!("Send should succeed, failed with: {}", e),
    }
}

/// Assert that a send failed with `code`.
///
/// # Panics
/// Panics if the outcome is `Sent` or carries a different error code.
pub fn assert_not_sent(outcome: &SendOutcome, code: SuccusErrorCode) {
    match outcome {
        SendOutcome::Sent(receipt) => panic!("Send should fail, stored as {}", receipt.key),
        SendOutcome::NotSent(e) => assert_eq!(
            e.code(),
            code,
            "Send failed with {:?}, expected {:?}: {}",
            e.code(),
            code,
            e
        ),
    }
}

/// Assert that an event decoded to `text`.
///
/// # Panics
/// Panics if the event carries a decode error or different text.
pub fn assert_decrypted(event: &MessageEvent, text: &str) {
    assert!(
        event.error.is_none(),
        "Event {} should decode, got error: {:?}",
        event.message_key,
        event.error
    );
    assert_eq!(
        event.decrypted.as_deref(),
        Some(text),
        "Event {} decoded to unexpected text",
        event.message_key
    );
}
