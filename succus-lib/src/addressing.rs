//! Conversation addressing.
//!
//! Both parties must compute the same namespace from the same pair of
//! addresses no matter who calls first, otherwise writes and reads land in
//! different places. The transform is a pure function of the normalized pair.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::{Address, Namespace};

/// Namespace for the conversation between `a` and `b`.
///
/// Addresses are lowercased and sorted, concatenated, then base64 encoded.
///
/// ```
/// use succus_lib::namespace_for;
///
/// let ab = namespace_for(&"0xAA".into(), &"0xbb".into());
/// let ba = namespace_for(&"0xBB".into(), &"0xaa".into());
/// assert_eq!(ab, ba);
/// ```
pub fn namespace_for(a: &Address, b: &Address) -> Namespace {
    let [first, second] = sorted_pair(a, b);
    let joined = format!("{}{}", first.as_str(), second.as_str());
    Namespace(STANDARD.encode(joined.as_bytes()))
}

/// A two-party conversation: its namespace plus sorted, normalized participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub namespace: Namespace,
    pub participants: [Address; 2],
}

impl Conversation {
    /// Whether `address` is one of the two participants.
    pub fn includes(&self, address: &Address) -> bool {
        self.participants.iter().any(|p| p.is_same(address))
    }

    /// The participant that is not `address`.
    pub fn other(&self, address: &Address) -> Option<&Address> {
        if self.participants[0].is_same(address) {
            Some(&self.participants[1])
        } else if self.participants[1].is_same(address) {
            Some(&self.participants[0])
        } else {
            None
        }
    }
}

/// Describe the conversation between `a` and `b`.
pub fn conversation(a: &Address, b: &Address) -> Conversation {
    Conversation {
        namespace: namespace_for(a, b),
        participants: sorted_pair(a, b),
    }
}

fn sorted_pair(a: &Address, b: &Address) -> [Address; 2] {
    let mut pair = [a.normalized(), b.normalized()];
    pair.sort();
    pair
}
