// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The client-side copy of one clinic's queue, plus the staleness rules
//! that decide whether an incoming authoritative snapshot replaces it.

use serde::{Deserialize, Serialize};
use waitline_core::{Session, Token, TokenStatus};

/// One authoritative fetch result: the full queue picture for a clinic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub session: Session,
    pub tokens: Vec<Token>,
    pub daily_limit: i64,
}

impl Snapshot {
    pub fn served_count(&self) -> i64 {
        self.tokens
            .iter()
            .filter(|t| t.status == TokenStatus::Served)
            .count() as i64
    }
}

/// What observers of the reconciler see: the latest accepted snapshot and
/// whether it came from the durable cache rather than a live fetch.
#[derive(Debug, Clone, Default)]
pub struct ClientView {
    pub snapshot: Option<Snapshot>,
    pub degraded: bool,
}

/// True when `incoming` moves a monotonic counter backward relative to
/// `local`. Service counters only ever grow within a session, so a
/// regression means the fetch hit a stale replica, not a real rollback.
pub fn regresses(local: &Snapshot, incoming: &Snapshot) -> bool {
    if incoming.session.id != local.session.id {
        // A different session (new day, or reopened) is never stale.
        return false;
    }
    incoming.session.now_serving_number < local.session.now_serving_number
        || incoming.served_count() < local.served_count()
}
