// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversational dispatch: inbound webhook events become intents, intents
//! drive the per-phone conversation state machine.

pub mod dispatcher;
pub mod intent;

pub use dispatcher::{Dispatcher, Handled};
pub use intent::{parse_intent, EventKind, InboundEvent, Intent};
