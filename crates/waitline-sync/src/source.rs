// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Where snapshots come from.

use async_trait::async_trait;
use waitline_core::WaitlineError;
use waitline_queue::QueueService;

use crate::state::Snapshot;

/// An authoritative source of full queue snapshots.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch(&self, clinic_id: &str) -> Result<Snapshot, WaitlineError>;
}

/// Snapshot source backed directly by the queue service. Used by in-process
/// viewers (the staff board served from the same binary).
pub struct QueueSource {
    queue: QueueService,
}

impl QueueSource {
    pub fn new(queue: QueueService) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl SnapshotSource for QueueSource {
    async fn fetch(&self, clinic_id: &str) -> Result<Snapshot, WaitlineError> {
        let clinic = self
            .queue
            .clinic(clinic_id)
            .await?
            .ok_or_else(|| WaitlineError::Validation(format!("unknown clinic {clinic_id}")))?;
        let session = self
            .queue
            .today_session(clinic_id)
            .await?
            .ok_or_else(|| {
                WaitlineError::State(format!("clinic {clinic_id} has no session today"))
            })?;
        let tokens = self.queue.board(&session.id).await?;
        Ok(Snapshot {
            session,
            tokens,
            daily_limit: clinic.daily_limit,
        })
    }
}
