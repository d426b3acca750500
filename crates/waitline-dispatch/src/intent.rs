// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Inbound message normalization: raw text or button taps into intents.
//!
//! Button replies carry opaque ids we minted ourselves (`CONFIRM_<name>`
//! embeds the name so no server-side draft state is needed to honor it).
//! Free text understands exactly one command, `JOIN_<slug>`; everything
//! else is `FreeText`, whose meaning depends on the conversation state.

/// What one inbound message is asking for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    /// `JOIN_<slug>`, usually typed via a QR-code deep link.
    Join { slug: String },
    /// `CONFIRM_<name>` button: join under the name embedded in the id.
    ConfirmJoin { name: String },
    CancelJoin,
    CancelToken,
    ViewStatus,
    RejoinQueue,
    /// `RATE_1`..`RATE_5`.
    Rate(i64),
    FreeText(String),
}

/// Inbound event payload: what the patient typed or tapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Text(String),
    /// Interactive button reply; carries the opaque button id.
    Button(String),
}

/// One normalized inbound message.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Provider message id, the dedup key.
    pub message_id: String,
    /// Sender phone as the provider reports it.
    pub phone: String,
    pub kind: EventKind,
}

/// Button ids the dispatcher mints and therefore accepts back.
pub mod buttons {
    pub const CONFIRM_PREFIX: &str = "CONFIRM_";
    pub const CANCEL_JOIN: &str = "CANCEL_JOIN";
    pub const CANCEL_TOKEN: &str = "CANCEL_TOKEN";
    pub const VIEW_STATUS: &str = "VIEW_STATUS";
    pub const REJOIN_QUEUE: &str = "REJOIN_QUEUE";
    pub const RATE_PREFIX: &str = "RATE_";
}

pub fn parse_intent(kind: &EventKind) -> Intent {
    match kind {
        EventKind::Button(id) => match id.as_str() {
            buttons::CANCEL_JOIN => Intent::CancelJoin,
            buttons::CANCEL_TOKEN => Intent::CancelToken,
            buttons::VIEW_STATUS => Intent::ViewStatus,
            buttons::REJOIN_QUEUE => Intent::RejoinQueue,
            other => {
                if let Some(name) = other.strip_prefix(buttons::CONFIRM_PREFIX) {
                    if !name.is_empty() {
                        return Intent::ConfirmJoin {
                            name: name.to_string(),
                        };
                    }
                }
                if let Some(n) = other.strip_prefix(buttons::RATE_PREFIX) {
                    if let Ok(n) = n.parse::<i64>() {
                        if (1..=5).contains(&n) {
                            return Intent::Rate(n);
                        }
                    }
                }
                parse_text(other)
            }
        },
        EventKind::Text(text) => parse_text(text),
    }
}

fn parse_text(raw: &str) -> Intent {
    let trimmed = raw.trim();
    if let Some(slug) = trimmed.to_uppercase().strip_prefix("JOIN_") {
        if !slug.is_empty() {
            // Slugs compare case-insensitively downstream; normalize here.
            return Intent::Join {
                slug: slug.to_lowercase(),
            };
        }
    }
    Intent::FreeText(trimmed.to_string())
}
