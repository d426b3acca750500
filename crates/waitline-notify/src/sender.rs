// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbox delivery: decrypt-at-send, classify failures, retry with a fixed
//! backoff until attempts run out.
//!
//! Phones live sealed in the outbox; the plaintext exists only on the stack
//! inside [`Notifier::deliver`] for the duration of the provider call.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use waitline_core::{types::now_iso, OutboxEntry, WaitlineError};
use waitline_storage::queries::outbox::{self, NewOutboxMessage};
use waitline_storage::Database;
use waitline_vault::PhoneVault;

use crate::provider::MessageProvider;

/// Per-sweep max of entries pulled from the outbox.
const SWEEP_BATCH: i64 = 50;

/// Pre-approved template sent when the free-form messaging window has
/// lapsed; pulls the patient back into a conversation.
const WINDOW_CLOSED_TEMPLATE: &str = "queue_update";

/// Hours after the last inbound message during which free-form replies
/// are permitted by the provider.
const MESSAGING_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub sent: usize,
    pub retried: usize,
    pub parked: usize,
}

#[derive(Clone)]
pub struct Notifier {
    db: Database,
    vault: PhoneVault,
    provider: Arc<dyn MessageProvider>,
    retry_backoff_secs: i64,
    max_attempts: i64,
}

impl Notifier {
    pub fn new(
        db: Database,
        vault: PhoneVault,
        provider: Arc<dyn MessageProvider>,
        retry_backoff_secs: i64,
        max_attempts: i64,
    ) -> Self {
        Self {
            db,
            vault,
            provider,
            retry_backoff_secs,
            max_attempts,
        }
    }

    /// Queue a message and immediately attempt first delivery. A provider
    /// failure here is not surfaced to the caller: the entry stays in the
    /// outbox for the sweeper.
    pub async fn send_text(
        &self,
        clinic_id: &str,
        token_id: Option<&str>,
        phone_encrypted: &str,
        body: &str,
    ) -> Result<i64, WaitlineError> {
        self.send_kind(clinic_id, token_id, phone_encrypted, body, "text")
            .await
    }

    /// Window-aware send: free text while the recipient's 24-hour messaging
    /// window is open, the pre-approved template once it has lapsed.
    /// `last_inbound_at` is the conversation's `last_interaction_at`;
    /// `None` means no inbound message on record, so template it is.
    pub async fn send_windowed(
        &self,
        clinic_id: &str,
        token_id: Option<&str>,
        phone_encrypted: &str,
        body: &str,
        last_inbound_at: Option<&str>,
    ) -> Result<i64, WaitlineError> {
        if window_open(last_inbound_at) {
            self.send_text(clinic_id, token_id, phone_encrypted, body).await
        } else {
            debug!(clinic_id, "messaging window closed, falling back to template");
            self.send_kind(
                clinic_id,
                token_id,
                phone_encrypted,
                WINDOW_CLOSED_TEMPLATE,
                "template",
            )
            .await
        }
    }

    pub async fn send_kind(
        &self,
        clinic_id: &str,
        token_id: Option<&str>,
        phone_encrypted: &str,
        body: &str,
        kind: &str,
    ) -> Result<i64, WaitlineError> {
        let id = outbox::enqueue(
            &self.db,
            NewOutboxMessage {
                clinic_id: clinic_id.to_string(),
                token_id: token_id.map(|t| t.to_string()),
                phone_encrypted: phone_encrypted.to_string(),
                body: body.to_string(),
                kind: kind.to_string(),
                max_attempts: self.max_attempts,
            },
        )
        .await?;

        if let Some(entry) = outbox::get_entry(&self.db, id).await? {
            self.deliver(&entry).await?;
        }
        Ok(id)
    }

    /// One delivery attempt for an outbox entry, updating its row with the
    /// outcome. Only storage errors propagate.
    async fn deliver(&self, entry: &OutboxEntry) -> Result<DeliveryOutcome, WaitlineError> {
        let phone = match self.vault.decrypt_phone(&entry.phone_encrypted) {
            Ok(phone) => phone,
            Err(e) => {
                // A sealed phone that fails authentication will never
                // succeed; park it and make noise.
                error!(outbox_id = entry.id, error = %e, "sealed phone failed to open; parking entry");
                outbox::park_failed(&self.db, entry.id).await?;
                return Ok(DeliveryOutcome::Parked);
            }
        };

        match self.provider.send(&phone, &entry.body, &entry.kind).await {
            Ok(()) => {
                outbox::mark_sent(&self.db, entry.id).await?;
                debug!(outbox_id = entry.id, kind = %entry.kind, "outbox entry sent");
                Ok(DeliveryOutcome::Sent)
            }
            Err(WaitlineError::Transient { message, .. }) => {
                warn!(
                    outbox_id = entry.id,
                    attempts = entry.attempts + 1,
                    max_attempts = entry.max_attempts,
                    message,
                    "delivery failed, will retry"
                );
                outbox::mark_failed_attempt(&self.db, entry.id, self.retry_backoff_secs).await?;
                Ok(DeliveryOutcome::Retried)
            }
            Err(e) => {
                error!(outbox_id = entry.id, error = %e, "delivery rejected; parking entry");
                outbox::park_failed(&self.db, entry.id).await?;
                Ok(DeliveryOutcome::Parked)
            }
        }
    }

    /// One pass over due PENDING entries.
    pub async fn sweep_once(&self) -> Result<SweepStats, WaitlineError> {
        let due = outbox::due_pending(&self.db, &now_iso(), SWEEP_BATCH).await?;
        let mut stats = SweepStats::default();
        for entry in &due {
            match self.deliver(entry).await? {
                DeliveryOutcome::Sent => stats.sent += 1,
                DeliveryOutcome::Retried => stats.retried += 1,
                DeliveryOutcome::Parked => stats.parked += 1,
            }
        }
        if stats != SweepStats::default() {
            info!(
                sent = stats.sent,
                retried = stats.retried,
                parked = stats.parked,
                "outbox sweep"
            );
        }
        Ok(stats)
    }

    /// Periodic sweep loop; runs until cancelled.
    pub async fn run_sweeper(self, interval_secs: u64, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("outbox sweeper stopping");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!(error = %e, "outbox sweep failed");
                    }
                }
            }
        }
    }
}

enum DeliveryOutcome {
    Sent,
    Retried,
    Parked,
}

/// True when `last_inbound_at` is within the messaging window.
fn window_open(last_inbound_at: Option<&str>) -> bool {
    let Some(at) = last_inbound_at else {
        return false;
    };
    let Ok(at) = chrono::DateTime::parse_from_rfc3339(at) else {
        return false;
    };
    let age = chrono::Utc::now().signed_duration_since(at.with_timezone(&chrono::Utc));
    age < chrono::Duration::hours(MESSAGING_WINDOW_HOURS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Scripted provider: pops the next result per call, records sends.
    struct ScriptedProvider {
        script: Mutex<Vec<Result<(), WaitlineError>>>,
        sent: Mutex<Vec<(String, String)>>,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Result<(), WaitlineError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script),
                sent: Mutex::new(Vec::new()),
            })
        }

        fn sent(&self) -> Vec<(String, String)> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl MessageProvider for ScriptedProvider {
        async fn send(&self, phone: &str, body: &str, _kind: &str) -> Result<(), WaitlineError> {
            let result = self.script.lock().unwrap().pop().unwrap_or(Ok(()));
            if result.is_ok() {
                self.sent
                    .lock()
                    .unwrap()
                    .push((phone.to_string(), body.to_string()));
            }
            result
        }
    }

    fn transient() -> Result<(), WaitlineError> {
        Err(WaitlineError::Transient {
            message: "503".into(),
            source: None,
        })
    }

    async fn setup(provider: Arc<ScriptedProvider>) -> (Notifier, PhoneVault, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("t.db").to_str().unwrap())
            .await
            .unwrap();
        let vault = PhoneVault::new([9u8; 32], b"pepper".to_vec());
        let notifier = Notifier::new(db, vault.clone(), provider, 300, 3);
        (notifier, vault, dir)
    }

    #[tokio::test]
    async fn send_decrypts_at_delivery_time() {
        let provider = ScriptedProvider::new(vec![]);
        let (notifier, vault, _dir) = setup(provider.clone()).await;

        let sealed = vault.encrypt_phone("+15550001111").unwrap();
        notifier
            .send_text("c1", Some("t1"), &sealed, "Your token is #3")
            .await
            .unwrap();

        let sent = provider.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "+15550001111", "provider got the plaintext");
        assert_eq!(sent[0].1, "Your token is #3");
    }

    #[tokio::test]
    async fn transient_failure_is_retried_by_a_later_sweep() {
        let provider = ScriptedProvider::new(vec![transient()]);
        let (notifier, vault, _dir) = setup(provider.clone()).await;

        let sealed = vault.encrypt_phone("+15550001111").unwrap();
        let id = notifier.send_text("c1", None, &sealed, "hello").await.unwrap();

        // First attempt failed transiently; entry is pending with backoff.
        let entry = outbox::get_entry(&notifier.db, id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.status, "PENDING");
        assert_eq!(entry.attempts, 1);
        assert!(provider.sent().is_empty());

        // An immediate sweep finds nothing -- the backoff has not elapsed.
        let stats = notifier.sweep_once().await.unwrap();
        assert_eq!(stats, SweepStats::default());
    }

    #[tokio::test]
    async fn exhausted_retries_park_the_entry() {
        let provider = ScriptedProvider::new(vec![transient(), transient(), transient()]);
        let (mut notifier, vault, _dir) = setup(provider.clone()).await;
        notifier.retry_backoff_secs = 0;

        let sealed = vault.encrypt_phone("+15550001111").unwrap();
        let id = notifier.send_text("c1", None, &sealed, "hello").await.unwrap();

        // Two more sweeps burn the remaining attempts.
        assert_eq!(notifier.sweep_once().await.unwrap().retried, 1);
        assert_eq!(notifier.sweep_once().await.unwrap().retried, 1);

        let entry = outbox::get_entry(&notifier.db, id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.status, "FAILED");
        assert_eq!(entry.attempts, 3);

        // Nothing left to sweep.
        assert_eq!(notifier.sweep_once().await.unwrap(), SweepStats::default());
    }

    #[tokio::test]
    async fn rejected_payload_parks_without_retries() {
        let provider = ScriptedProvider::new(vec![Err(WaitlineError::Channel {
            message: "bad recipient".into(),
            source: None,
        })]);
        let (notifier, vault, _dir) = setup(provider).await;

        let sealed = vault.encrypt_phone("+15550001111").unwrap();
        let id = notifier.send_text("c1", None, &sealed, "hello").await.unwrap();

        let entry = outbox::get_entry(&notifier.db, id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.status, "FAILED");
        assert_eq!(entry.attempts, 0, "no retry budget spent on a 4xx");
    }

    #[tokio::test]
    async fn windowed_send_uses_text_inside_the_window() {
        let provider = ScriptedProvider::new(vec![]);
        let (notifier, vault, _dir) = setup(provider).await;
        let sealed = vault.encrypt_phone("+15550001111").unwrap();

        let recent = waitline_core::types::now_iso();
        let id = notifier
            .send_windowed("c1", None, &sealed, "You're next!", Some(&recent))
            .await
            .unwrap();
        let entry = outbox::get_entry(&notifier.db, id).await.unwrap().unwrap();
        assert_eq!(entry.kind, "text");
        assert_eq!(entry.body, "You're next!");
    }

    #[tokio::test]
    async fn windowed_send_templates_once_the_window_lapses() {
        let provider = ScriptedProvider::new(vec![]);
        let (notifier, vault, _dir) = setup(provider).await;
        let sealed = vault.encrypt_phone("+15550001111").unwrap();

        for last_inbound in [Some("2020-01-01T00:00:00.000Z"), None] {
            let id = notifier
                .send_windowed("c1", None, &sealed, "You're next!", last_inbound)
                .await
                .unwrap();
            let entry = outbox::get_entry(&notifier.db, id).await.unwrap().unwrap();
            assert_eq!(entry.kind, "template");
            assert_eq!(entry.body, "queue_update");
        }
    }

    #[tokio::test]
    async fn tampered_phone_parks_the_entry() {
        let provider = ScriptedProvider::new(vec![]);
        let (notifier, _vault, _dir) = setup(provider.clone()).await;

        let id = notifier
            .send_text("c1", None, "bm90LXJlYWw.Y2lwaGVydGV4dA", "hello")
            .await
            .unwrap();

        let entry = outbox::get_entry(&notifier.db, id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.status, "FAILED");
        assert!(provider.sent().is_empty(), "nothing reached the provider");
    }
}
