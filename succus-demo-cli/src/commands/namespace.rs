//! Namespace command - show where a conversation is stored

use succus_lib::{conversation, Address};

use crate::ui;

pub fn run(a: &str, b: &str) {
    let conv = conversation(&Address::from(a), &Address::from(b));

    ui::header("Conversation");
    ui::key_value("Namespace", conv.namespace.as_str());
    ui::key_value(
        "Participants",
        &format!("{}, {}", conv.participants[0], conv.participants[1]),
    );
}
