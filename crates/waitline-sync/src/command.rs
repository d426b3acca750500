// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Optimistic mutation commands.
//!
//! A command applies its expected effect to the local snapshot immediately,
//! then runs the real request; the reconciler restores the prior snapshot
//! if the request fails.

use async_trait::async_trait;
use waitline_core::{TokenStatus, WaitlineError};
use waitline_queue::QueueService;

use crate::state::Snapshot;

#[async_trait]
pub trait SyncCommand: Send + Sync + 'static {
    /// Mutate the local snapshot to what the command is expected to
    /// produce. Must be cheap; runs on the reconciler loop.
    fn optimistic_apply(&self, snapshot: &mut Snapshot);

    /// The real request.
    async fn execute(&self) -> Result<(), WaitlineError>;

    /// Undo a failed command by restoring the snapshot taken before
    /// `optimistic_apply` ran.
    fn rollback(&self, current: &mut Option<Snapshot>, prior: Option<Snapshot>) {
        *current = prior;
    }
}

/// Promote the next patient, optionally scoped to a doctor.
pub struct CallNextCommand {
    queue: QueueService,
    session_id: String,
    doctor_id: Option<String>,
}

impl CallNextCommand {
    pub fn new(queue: QueueService, session_id: String, doctor_id: Option<String>) -> Self {
        Self {
            queue,
            session_id,
            doctor_id,
        }
    }

    fn in_scope(&self, token_doctor: Option<&str>) -> bool {
        match self.doctor_id.as_deref() {
            None => true,
            Some(doctor) => token_doctor.is_none() || token_doctor == Some(doctor),
        }
    }
}

#[async_trait]
impl SyncCommand for CallNextCommand {
    /// Local mirror of the ledger's promotion: current SERVING to SERVED,
    /// best WAITING (priority first, then lowest number) to SERVING.
    fn optimistic_apply(&self, snapshot: &mut Snapshot) {
        for token in snapshot.tokens.iter_mut() {
            if token.status == TokenStatus::Serving
                && self.in_scope(token.doctor_id.as_deref())
            {
                token.status = TokenStatus::Served;
            }
        }

        let mut best: Option<usize> = None;
        for i in 0..snapshot.tokens.len() {
            let token = &snapshot.tokens[i];
            if token.status != TokenStatus::Waiting
                || !self.in_scope(token.doctor_id.as_deref())
            {
                continue;
            }
            let better = match best {
                None => true,
                Some(b) => {
                    let current = &snapshot.tokens[b];
                    (token.is_priority, std::cmp::Reverse(token.token_number))
                        > (current.is_priority, std::cmp::Reverse(current.token_number))
                }
            };
            if better {
                best = Some(i);
            }
        }
        if let Some(i) = best {
            snapshot.tokens[i].status = TokenStatus::Serving;
            snapshot.session.now_serving_number = snapshot.tokens[i].token_number;
        }
    }

    async fn execute(&self) -> Result<(), WaitlineError> {
        self.queue
            .call_next(&self.session_id, self.doctor_id.as_deref())
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use waitline_core::types::now_iso;
    use waitline_core::{Session, SessionStatus, Token};
    use waitline_storage::Database;
    use waitline_vault::PhoneVault;

    fn token(n: i64, is_priority: bool, status: TokenStatus) -> Token {
        Token {
            id: format!("t{n}{}", if is_priority { "p" } else { "" }),
            session_id: "s1".into(),
            clinic_id: "c1".into(),
            token_number: n,
            is_priority,
            status,
            customer_name: "A".into(),
            customer_phone_encrypted: "iv.ct".into(),
            customer_phone_hash: format!("h{n}"),
            is_arrived: false,
            department_id: None,
            doctor_id: None,
            rating: None,
            feedback: None,
            created_at: now_iso(),
            completed_at: None,
        }
    }

    fn snapshot(tokens: Vec<Token>) -> Snapshot {
        Snapshot {
            session: Session {
                id: "s1".into(),
                clinic_id: "c1".into(),
                date: "2026-08-29".into(),
                status: SessionStatus::Open,
                last_normal_number: 0,
                last_priority_number: 0,
                now_serving_number: 0,
                created_at: now_iso(),
                closed_at: None,
            },
            tokens,
            daily_limit: 50,
        }
    }

    async fn command() -> (CallNextCommand, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("t.db").to_str().unwrap())
            .await
            .unwrap();
        let queue = QueueService::new(db, PhoneVault::new([1u8; 32], b"p".to_vec()), 50);
        (CallNextCommand::new(queue, "s1".into(), None), dir)
    }

    #[tokio::test]
    async fn optimistic_promotion_serves_priority_first() {
        let (cmd, _dir) = command().await;
        let mut snap = snapshot(vec![
            token(1, false, TokenStatus::Serving),
            token(2, false, TokenStatus::Waiting),
            token(1, true, TokenStatus::Waiting),
        ]);

        cmd.optimistic_apply(&mut snap);

        assert_eq!(snap.tokens[0].status, TokenStatus::Served);
        assert_eq!(snap.tokens[2].status, TokenStatus::Serving, "E-1 jumps #2");
        assert_eq!(snap.tokens[1].status, TokenStatus::Waiting);
        assert_eq!(snap.session.now_serving_number, 1);
    }

    #[tokio::test]
    async fn optimistic_promotion_on_a_drained_queue_only_serves_out() {
        let (cmd, _dir) = command().await;
        let mut snap = snapshot(vec![token(1, false, TokenStatus::Serving)]);
        cmd.optimistic_apply(&mut snap);
        assert_eq!(snap.tokens[0].status, TokenStatus::Served);
        assert_eq!(snap.session.now_serving_number, 0, "nobody newly serving");
    }
}
