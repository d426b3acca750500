// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The queue service: the one place that combines phone sealing with the
//! storage transactions, so no other crate ever handles a raw phone and a
//! database handle at the same time.

use tracing::{debug, info};
use waitline_core::{
    types::today_utc, Clinic, PublicStatus, Session, SessionStatus, Token, WaitlineError,
};
use waitline_storage::queries::tokens::{IssueOutcome, IssueRequest};
use waitline_storage::{queries, Database};
use waitline_vault::{normalize_phone, PhoneVault};

/// Outcome of a join attempt, ready for the conversational layer to phrase.
#[derive(Debug, Clone)]
pub enum JoinOutcome {
    Joined { token: Token, position: i64 },
    /// The phone already holds an active token; here it is.
    AlreadyQueued { token: Token },
    Full { limit: i64 },
    NotAccepting { status: SessionStatus },
}

#[derive(Clone)]
pub struct QueueService {
    db: Database,
    vault: PhoneVault,
    default_daily_limit: i64,
}

impl QueueService {
    pub fn new(db: Database, vault: PhoneVault, default_daily_limit: i64) -> Self {
        Self {
            db,
            vault,
            default_daily_limit,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn vault(&self) -> &PhoneVault {
        &self.vault
    }

    pub async fn clinic_by_slug(&self, slug: &str) -> Result<Option<Clinic>, WaitlineError> {
        queries::clinics::get_clinic_by_slug(&self.db, slug).await
    }

    pub async fn clinic(&self, id: &str) -> Result<Option<Clinic>, WaitlineError> {
        queries::clinics::get_clinic(&self.db, id).await
    }

    /// Join today's queue. The raw phone is normalized, sealed, and hashed
    /// here; storage only ever sees the sealed and hashed forms.
    pub async fn join(
        &self,
        clinic: &Clinic,
        customer_name: &str,
        phone_raw: &str,
        is_priority: bool,
        department_id: Option<String>,
        doctor_id: Option<String>,
    ) -> Result<JoinOutcome, WaitlineError> {
        let name = customer_name.trim();
        if name.is_empty() {
            return Err(WaitlineError::Validation(
                "customer name must not be empty".into(),
            ));
        }
        let phone = normalize_phone(phone_raw)?;
        let limit = if clinic.daily_limit > 0 {
            clinic.daily_limit
        } else {
            self.default_daily_limit
        };

        let req = IssueRequest {
            clinic_id: clinic.id.clone(),
            date: today_utc(),
            customer_name: name.to_string(),
            phone_encrypted: self.vault.encrypt_phone(&phone)?,
            phone_hash: self.vault.hash_phone(&phone),
            is_priority,
            department_id,
            doctor_id,
            daily_limit: limit,
        };
        match queries::tokens::issue_token(&self.db, req).await? {
            IssueOutcome::Created(token) => {
                let position = queries::tokens::count_ahead(&self.db, &token).await?;
                info!(
                    clinic = %clinic.slug,
                    token = %token.display_number(),
                    position,
                    "token issued"
                );
                Ok(JoinOutcome::Joined { token, position })
            }
            IssueOutcome::Duplicate { existing_token_id } => {
                let token = queries::tokens::get_token(&self.db, &existing_token_id)
                    .await?
                    .ok_or_else(|| {
                        WaitlineError::Internal(format!(
                            "active token {existing_token_id} vanished during join"
                        ))
                    })?;
                debug!(clinic = %clinic.slug, token = %token.display_number(), "duplicate join");
                Ok(JoinOutcome::AlreadyQueued { token })
            }
            IssueOutcome::LimitReached { limit } => Ok(JoinOutcome::Full { limit }),
            IssueOutcome::Refused { status } => Ok(JoinOutcome::NotAccepting { status }),
        }
    }

    /// Cancel the phone's active token, returning it for the confirmation
    /// message. `None` when the phone holds no active token.
    pub async fn leave(
        &self,
        clinic_id: &str,
        phone_raw: &str,
    ) -> Result<Option<Token>, WaitlineError> {
        let phone = normalize_phone(phone_raw)?;
        let hash = self.vault.hash_phone(&phone);
        let Some(token) =
            queries::tokens::active_token_for_phone(&self.db, clinic_id, &hash).await?
        else {
            return Ok(None);
        };
        queries::tokens::cancel_token(&self.db, &token.id).await?;
        info!(clinic_id, token = %token.display_number(), "token cancelled by patient");
        Ok(Some(token))
    }

    /// Public status for a token id: position in line and the number
    /// currently being served.
    pub async fn status_for_token(
        &self,
        token_id: &str,
    ) -> Result<Option<PublicStatus>, WaitlineError> {
        let Some(token) = queries::tokens::get_token(&self.db, token_id).await? else {
            return Ok(None);
        };
        self.public_status(token).await.map(Some)
    }

    /// Public status for whatever active token this phone holds.
    pub async fn status_for_phone(
        &self,
        clinic_id: &str,
        phone_raw: &str,
    ) -> Result<Option<PublicStatus>, WaitlineError> {
        let phone = normalize_phone(phone_raw)?;
        let hash = self.vault.hash_phone(&phone);
        let Some(token) =
            queries::tokens::active_token_for_phone(&self.db, clinic_id, &hash).await?
        else {
            return Ok(None);
        };
        self.public_status(token).await.map(Some)
    }

    async fn public_status(&self, token: Token) -> Result<PublicStatus, WaitlineError> {
        let tokens_ahead = queries::tokens::count_ahead(&self.db, &token).await?;
        let session = queries::sessions::get_session(&self.db, &token.session_id)
            .await?
            .ok_or_else(|| {
                WaitlineError::Internal(format!("token {} has no session", token.id))
            })?;
        Ok(PublicStatus {
            token,
            tokens_ahead,
            current_serving: session.now_serving_number,
        })
    }

    /// Serve out the current visit and promote the next waiting token.
    pub async fn call_next(
        &self,
        session_id: &str,
        doctor_id: Option<&str>,
    ) -> Result<Option<Token>, WaitlineError> {
        let next = queries::tokens::promote_next(&self.db, session_id, doctor_id).await?;
        match &next {
            Some(token) => info!(session_id, token = %token.display_number(), "now serving"),
            None => debug!(session_id, "queue drained"),
        }
        Ok(next)
    }

    /// Open (or resume) today's session for a clinic.
    pub async fn open_today(&self, clinic_id: &str) -> Result<Session, WaitlineError> {
        queries::sessions::start_session(&self.db, clinic_id, &today_utc()).await
    }

    pub async fn today_session(
        &self,
        clinic_id: &str,
    ) -> Result<Option<Session>, WaitlineError> {
        queries::sessions::get_session_by_date(&self.db, clinic_id, &today_utc()).await
    }

    pub async fn pause(&self, session_id: &str) -> Result<(), WaitlineError> {
        queries::sessions::pause_session(&self.db, session_id).await
    }

    pub async fn resume(&self, session_id: &str) -> Result<(), WaitlineError> {
        queries::sessions::resume_session(&self.db, session_id).await
    }

    pub async fn close(&self, session_id: &str) -> Result<(), WaitlineError> {
        queries::sessions::close_session(&self.db, session_id).await
    }

    /// Privileged: cancel all waiting tokens and close in one transaction.
    pub async fn force_close(
        &self,
        session_id: &str,
        reason: &str,
        actor: &str,
    ) -> Result<i64, WaitlineError> {
        let cancelled =
            queries::sessions::force_close_session(&self.db, session_id, reason, actor).await?;
        info!(session_id, cancelled, actor, "session force-closed");
        Ok(cancelled)
    }

    /// Full session board in service order.
    pub async fn board(&self, session_id: &str) -> Result<Vec<Token>, WaitlineError> {
        queries::tokens::tokens_for_session(&self.db, session_id).await
    }

    pub async fn skip(&self, token_id: &str) -> Result<(), WaitlineError> {
        queries::tokens::skip_token(&self.db, token_id).await
    }

    pub async fn recall(&self, token_id: &str) -> Result<(), WaitlineError> {
        queries::tokens::recall_token(&self.db, token_id).await
    }

    pub async fn mark_arrived(&self, token_id: &str) -> Result<(), WaitlineError> {
        queries::tokens::set_arrived(&self.db, token_id).await
    }

    pub async fn mark_late(&self, token_id: &str) -> Result<(), WaitlineError> {
        queries::tokens::mark_late(&self.db, token_id).await
    }

    pub async fn record_feedback(
        &self,
        token_id: &str,
        rating: i64,
        feedback: Option<&str>,
    ) -> Result<(), WaitlineError> {
        queries::tokens::record_feedback(&self.db, token_id, rating, feedback).await
    }
}
