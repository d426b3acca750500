// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider webhook payload models and their normalization into inbound
//! events. Unknown message types (media, reactions, location) are skipped,
//! not errors: the provider sends whatever the patient sends.

use serde::Deserialize;
use tracing::debug;
use waitline_dispatch::{EventKind, InboundEvent};

#[derive(Debug, Deserialize)]
pub struct WebhookPayload {
    #[serde(default)]
    pub entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
pub struct Change {
    pub value: ChangeValue,
}

#[derive(Debug, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub messages: Vec<InboundMessage>,
}

#[derive(Debug, Deserialize)]
pub struct InboundMessage {
    pub id: String,
    pub from: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub text: Option<TextBody>,
    pub interactive: Option<Interactive>,
}

#[derive(Debug, Deserialize)]
pub struct TextBody {
    pub body: String,
}

#[derive(Debug, Deserialize)]
pub struct Interactive {
    pub button_reply: Option<InteractiveReply>,
    pub list_reply: Option<InteractiveReply>,
}

#[derive(Debug, Deserialize)]
pub struct InteractiveReply {
    pub id: String,
}

/// Flatten a webhook delivery into the events the dispatcher understands.
pub fn extract_events(payload: WebhookPayload) -> Vec<InboundEvent> {
    let mut events = Vec::new();
    for entry in payload.entry {
        for change in entry.changes {
            for message in change.value.messages {
                let kind = match message.kind.as_str() {
                    "text" => match message.text {
                        Some(text) => EventKind::Text(text.body),
                        None => continue,
                    },
                    // Button and list replies both carry an opaque id the
                    // intent parser understands.
                    "interactive" => {
                        match message.interactive.and_then(|i| i.button_reply.or(i.list_reply)) {
                            Some(reply) => EventKind::Button(reply.id),
                            None => continue,
                        }
                    }
                    other => {
                        debug!(kind = other, "unsupported message type skipped");
                        continue;
                    }
                };
                events.push(InboundEvent {
                    message_id: message.id,
                    phone: message.from,
                    kind,
                });
            }
        }
    }
    events
}
