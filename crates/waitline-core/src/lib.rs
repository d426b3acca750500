// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the waitline queue service.
//!
//! Provides the shared error type and the domain model used throughout the
//! workspace: clinics, per-day sessions, queue tokens, conversation rows,
//! and the outbound message log.

pub mod error;
pub mod types;

pub use error::WaitlineError;
pub use types::{
    Clinic, Conversation, ConversationState, OutboxEntry, PublicStatus, Session,
    SessionStatus, Token, TokenStatus,
};
