//! Persisted message records and the events delivered to consumers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Address, Result};

/// Stored in `encryptedMSG` when no ciphertext could be produced.
pub const ENCRYPT_FAILED_MARKER: &str = "ENCRYPT_FAILED_USE_PLAINTEXT";

/// A message record as written to the conversation namespace.
///
/// Immutable once written. `text` is only present when the record could
/// not be encrypted and carries the plaintext copy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub date: i64,
    pub from: Address,
    pub to: Address,
    pub msg_id: String,
    #[serde(rename = "encryptedMSG")]
    pub encrypted_msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    pub encrypted: bool,
    /// Sender's display name, when the wallet resolved one.
    #[serde(rename = "ensFrom", default, skip_serializing_if = "Option::is_none")]
    pub ens_from: Option<String>,
}

impl Message {
    /// Record carrying ciphertext only.
    pub fn encrypted(
        from: Address,
        to: Address,
        msg_id: impl Into<String>,
        date: i64,
        ciphertext: impl Into<String>,
    ) -> Self {
        Self {
            date,
            from,
            to,
            msg_id: msg_id.into(),
            encrypted_msg: ciphertext.into(),
            text: None,
            encrypted: true,
            ens_from: None,
        }
    }

    /// Record carrying the failure marker and a plaintext copy.
    pub fn unencrypted(
        from: Address,
        to: Address,
        msg_id: impl Into<String>,
        date: i64,
        plaintext: impl Into<String>,
    ) -> Self {
        Self {
            date,
            from,
            to,
            msg_id: msg_id.into(),
            encrypted_msg: ENCRYPT_FAILED_MARKER.to_string(),
            text: Some(plaintext.into()),
            encrypted: false,
            ens_from: None,
        }
    }

    pub fn with_sender_name(mut self, name: Option<String>) -> Self {
        self.ens_from = name;
        self
    }

    pub fn is_fallback(&self) -> bool {
        self.encrypted_msg == ENCRYPT_FAILED_MARKER
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Fresh message id: `msg_{epoch-ms}_{random}`.
pub fn generate_msg_id(now_ms: i64) -> String {
    format!("msg_{}_{:08x}", now_ms, rand::random::<u32>())
}

/// A raw record admitted by the deduplicator.
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    /// Child key under the namespace.
    pub key: String,
    pub data: Value,
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub date: Option<i64>,
}

impl IncomingMessage {
    pub fn from_record(key: impl Into<String>, data: Value) -> Self {
        let from = string_field(&data, "from").map(Address::new);
        let to = string_field(&data, "to").map(Address::new);
        let date = data.get("date").and_then(Value::as_i64);
        Self {
            key: key.into(),
            data,
            from,
            to,
            date,
        }
    }
}

/// What a listener hands to its consumer for each admitted record.
#[derive(Debug, Clone, Serialize)]
pub struct MessageEvent {
    /// Child key under the namespace.
    pub message_key: String,
    pub original_data: Value,
    /// Decoded text, `None` when decoding failed.
    pub decrypted: Option<String>,
    pub is_sent_by_me: bool,
    pub timestamp: i64,
    pub sender: Option<Address>,
    /// Sender's display name from the record, if present.
    pub sender_name: Option<String>,
    /// Whether ciphertext was actually decrypted.
    pub encrypted: bool,
    /// Decoded through a fallback path.
    pub degraded: bool,
    /// Decode failure, if any.
    pub error: Option<String>,
}

/// Summary of a stored record, as returned by a history read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub key: String,
    pub date: i64,
    pub from: Option<Address>,
    pub to: Option<Address>,
    pub encrypted: bool,
}

impl HistoryEntry {
    pub fn from_record(key: &str, data: &Value) -> Option<Self> {
        if !data.is_object() {
            return None;
        }
        Some(Self {
            key: key.to_string(),
            date: data.get("date").and_then(Value::as_i64).unwrap_or_default(),
            from: string_field(data, "from").map(Address::new),
            to: string_field(data, "to").map(Address::new),
            encrypted: data
                .get("encrypted")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }
}

pub(crate) fn string_field<'a>(data: &'a Value, field: &str) -> Option<&'a str> {
    data.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}
