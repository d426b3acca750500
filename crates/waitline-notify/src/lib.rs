// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound notifications: provider abstraction, outbox delivery, and the
//! retry sweeper.

pub mod provider;
pub mod sender;

pub use provider::{ButtonsPayload, HttpProvider, MessageProvider, ReplyButton};
pub use sender::{Notifier, SweepStats};
