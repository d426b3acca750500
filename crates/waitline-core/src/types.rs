// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types shared across the waitline workspace.
//!
//! Statuses are stored as their SCREAMING_SNAKE_CASE string form in SQLite
//! and on the wire; the strum derives keep Display/FromStr and the stored
//! form in lockstep.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle of one clinic's queue for a single calendar day.
///
/// CLOSED (initial) -> OPEN -> PAUSED <-> OPEN -> CLOSED (terminal).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Open,
    Paused,
    Closed,
}

/// Lifecycle of one ticket.
///
/// SERVED and CANCELLED are terminal; a terminal token is never mutated
/// again except for rating/feedback.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenStatus {
    Waiting,
    WaitingLate,
    Serving,
    Served,
    Skipped,
    Cancelled,
}

impl TokenStatus {
    /// Active statuses count against the one-active-token-per-phone
    /// invariant and the daily limit.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TokenStatus::Waiting | TokenStatus::WaitingLate | TokenStatus::Serving
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TokenStatus::Served | TokenStatus::Cancelled)
    }
}

/// Conversational dispatcher state, one per (clinic, phone).
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConversationState {
    Idle,
    AwaitingName,
    AwaitingConfirmation,
    ActiveToken,
    AwaitingFeedbackRating,
    AwaitingFeedbackText,
}

/// A tenant clinic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Clinic {
    pub id: String,
    /// URL-safe identifier used in `JOIN_<slug>` commands.
    pub slug: String,
    pub name: String,
    /// Maximum active tokens per session.
    pub daily_limit: i64,
    pub created_at: String,
}

/// One clinic's queue instance for a single calendar day.
///
/// Invariant: exactly one session per (clinic_id, date).
/// `now_serving_number` is mutated only inside the atomic promotion
/// transaction; every other reader treats it as derived state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub clinic_id: String,
    /// Calendar date, `YYYY-MM-DD`.
    pub date: String,
    pub status: SessionStatus,
    pub last_normal_number: i64,
    pub last_priority_number: i64,
    pub now_serving_number: i64,
    pub created_at: String,
    pub closed_at: Option<String>,
}

/// One patient's place in the queue.
///
/// Normal and priority tokens are numbered in independent spaces, so `#1`
/// and `E-1` can coexist within a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub id: String,
    pub session_id: String,
    pub clinic_id: String,
    pub token_number: i64,
    pub is_priority: bool,
    pub status: TokenStatus,
    pub customer_name: String,
    /// Vault-sealed phone: `base64(iv) + "." + base64(ciphertext||tag)`.
    pub customer_phone_encrypted: String,
    /// HMAC-SHA256 dedup hash, hex. Never reversible without the pepper.
    pub customer_phone_hash: String,
    pub is_arrived: bool,
    pub department_id: Option<String>,
    pub doctor_id: Option<String>,
    pub rating: Option<i64>,
    pub feedback: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

impl Token {
    /// Display form: `#{n}` for normal, `E-{n}` for priority.
    pub fn display_number(&self) -> String {
        ticket_label(self.is_priority, self.token_number)
    }
}

/// Format a ticket number for display.
pub fn ticket_label(is_priority: bool, number: i64) -> String {
    if is_priority {
        format!("E-{number}")
    } else {
        format!("#{number}")
    }
}

/// Conversational dispatcher row, one per (clinic_id, phone).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub clinic_id: String,
    pub phone: String,
    pub state: ConversationState,
    pub active_token_id: Option<String>,
    /// Name captured in AWAITING_NAME, cleared once confirmed.
    pub pending_name: Option<String>,
    pub last_interaction_at: String,
}

/// Outbound message log + retry record. Append-only except status updates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: i64,
    pub clinic_id: String,
    pub token_id: Option<String>,
    /// Recipient phone in vault-sealed form; decrypted only at send time.
    pub phone_encrypted: String,
    pub body: String,
    /// "text" | "template" | "buttons" -- payload shape for the provider.
    pub kind: String,
    pub status: String,
    pub attempts: i64,
    pub max_attempts: i64,
    pub next_retry_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Public status query result: `{token, tokens_ahead, current_serving}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicStatus {
    pub token: Token,
    pub tokens_ahead: i64,
    pub current_serving: i64,
}

/// Current UTC time in the stored timestamp format
/// (`strftime('%Y-%m-%dT%H:%M:%fZ', 'now')` equivalent).
pub fn now_iso() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Today's UTC calendar date, `YYYY-MM-DD`.
pub fn today_utc() -> String {
    chrono::Utc::now().format("%Y-%m-%d").to_string()
}
