// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Queue orchestration over storage and the phone vault.

pub mod service;

pub use service::{JoinOutcome, QueueService};
