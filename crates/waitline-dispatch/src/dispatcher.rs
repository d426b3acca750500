// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The conversational dispatcher: one inbound message in, one conversation
//! transition plus replies out.
//!
//! Every handled message id is recorded first; a provider redelivery is
//! dropped before it can touch conversation state or issue anything twice.
//! Replies to an inbound message are always inside the 24-hour messaging
//! window by definition; only the externally-triggered feedback prompt
//! goes through the window check.

use serde_json::json;
use tracing::{debug, info, warn};
use waitline_core::{
    types::now_iso, Clinic, Conversation, ConversationState, Token, WaitlineError,
};
use waitline_notify::Notifier;
use waitline_queue::{JoinOutcome, QueueService};
use waitline_storage::queries;
use waitline_vault::normalize_phone;

use crate::intent::{buttons, parse_intent, EventKind, InboundEvent, Intent};

/// What became of one inbound event.
#[derive(Debug, PartialEq, Eq)]
pub enum Handled {
    Processed,
    /// Redelivered message id; dropped without side effects.
    Replay,
}

pub struct Dispatcher {
    queue: QueueService,
    notifier: Notifier,
}

impl Dispatcher {
    pub fn new(queue: QueueService, notifier: Notifier) -> Self {
        Self { queue, notifier }
    }

    /// Handle one inbound message for the clinic this webhook is bound to.
    pub async fn handle(
        &self,
        clinic: &Clinic,
        event: InboundEvent,
    ) -> Result<Handled, WaitlineError> {
        let db = self.queue.database();
        if !queries::webhook_dedup::record_if_new(db, &event.message_id).await? {
            debug!(message_id = %event.message_id, "webhook replay dropped");
            return Ok(Handled::Replay);
        }

        let phone = match normalize_phone(&event.phone) {
            Ok(phone) => phone,
            Err(e) => {
                // The provider vouched for this sender; keep the raw form
                // as the conversation key rather than dropping the message.
                warn!(error = %e, "sender phone failed normalization");
                event.phone.clone()
            }
        };

        let convo = queries::conversations::get_conversation(db, &clinic.id, &phone)
            .await?
            .unwrap_or_else(|| Conversation {
                clinic_id: clinic.id.clone(),
                phone: phone.clone(),
                state: ConversationState::Idle,
                active_token_id: None,
                pending_name: None,
                last_interaction_at: now_iso(),
            });

        let intent = parse_intent(&event.kind);
        debug!(state = %convo.state, ?intent, "dispatching");
        self.step(clinic, convo, intent, &event.kind).await?;
        Ok(Handled::Processed)
    }

    /// Apply one intent to the conversation; persists the resulting state
    /// before returning.
    async fn step(
        &self,
        clinic: &Clinic,
        mut convo: Conversation,
        intent: Intent,
        kind: &EventKind,
    ) -> Result<(), WaitlineError> {
        use ConversationState as S;

        convo.last_interaction_at = now_iso();

        match (convo.state, intent) {
            // JOIN_<slug> starts (or restarts) the flow from any state --
            // unless the phone already holds a token, in which case the
            // patient lands straight on the active-token menu.
            (_, Intent::Join { slug }) => {
                if !clinic.slug.eq_ignore_ascii_case(&slug) {
                    self.reply(clinic, &convo.phone, None, &format!(
                        "We don't recognize the code {slug}. Please re-scan the clinic's QR code."
                    ))
                    .await?;
                    return self.save(convo).await;
                }
                match self.queue.status_for_phone(&clinic.id, &convo.phone).await? {
                    Some(status) => {
                        convo.state = S::ActiveToken;
                        convo.active_token_id = Some(status.token.id.clone());
                        self.reply_active_menu(
                            clinic,
                            &convo.phone,
                            &status.token,
                            &format!(
                                "You already hold {} with {} ahead of you.",
                                status.token.display_number(),
                                status.tokens_ahead
                            ),
                        )
                        .await?;
                    }
                    None => {
                        convo.state = S::AwaitingName;
                        convo.pending_name = None;
                        convo.active_token_id = None;
                        self.reply(clinic, &convo.phone, None, &format!(
                            "Welcome to {}! What name should we call out when it's your turn?",
                            clinic.name
                        ))
                        .await?;
                    }
                }
                self.save(convo).await
            }

            (S::AwaitingName, _) => {
                // Whatever arrived is the name, digits and all.
                let name = raw_text(kind).trim().to_string();
                if name.is_empty() || name.len() > 100 {
                    self.reply(clinic, &convo.phone, None,
                        "Please send a name between 1 and 100 characters.")
                        .await?;
                } else {
                    convo.pending_name = Some(name.clone());
                    convo.state = S::AwaitingConfirmation;
                    self.send_confirm_prompt(clinic, &convo.phone, &name).await?;
                }
                self.save(convo).await
            }

            (S::AwaitingConfirmation, Intent::ConfirmJoin { name }) => {
                convo.pending_name = None;
                match self
                    .queue
                    .join(clinic, &name, &convo.phone, false, None, None)
                    .await?
                {
                    JoinOutcome::Joined { token, position } => {
                        info!(token = %token.display_number(), "joined via conversation");
                        convo.state = S::ActiveToken;
                        convo.active_token_id = Some(token.id.clone());
                        self.reply_active_menu(
                            clinic,
                            &convo.phone,
                            &token,
                            &format!(
                                "You're in! Your token is {} with {position} ahead of you.",
                                token.display_number()
                            ),
                        )
                        .await?;
                    }
                    JoinOutcome::AlreadyQueued { token } => {
                        convo.state = S::ActiveToken;
                        convo.active_token_id = Some(token.id.clone());
                        self.reply_active_menu(
                            clinic,
                            &convo.phone,
                            &token,
                            &format!(
                                "This number already holds token {}.",
                                token.display_number()
                            ),
                        )
                        .await?;
                    }
                    JoinOutcome::Full { limit } => {
                        convo.state = S::Idle;
                        self.reply(clinic, &convo.phone, None, &format!(
                            "Sorry, the queue is full today ({limit} patients). Please try again tomorrow."
                        ))
                        .await?;
                    }
                    JoinOutcome::NotAccepting { status } => {
                        convo.state = S::Idle;
                        self.reply(clinic, &convo.phone, None, &format!(
                            "The queue is not taking new patients right now ({status})."
                        ))
                        .await?;
                    }
                }
                self.save(convo).await
            }

            (S::AwaitingConfirmation, Intent::CancelJoin) => {
                convo.state = S::Idle;
                convo.pending_name = None;
                self.reply(clinic, &convo.phone, None,
                    "No problem. Scan the QR code again whenever you're ready.")
                    .await?;
                self.save(convo).await
            }

            // Anything else re-sends the same prompt, state unchanged.
            (S::AwaitingConfirmation, _) => {
                let name = convo.pending_name.clone().unwrap_or_default();
                self.send_confirm_prompt(clinic, &convo.phone, &name).await?;
                self.save(convo).await
            }

            (S::ActiveToken, Intent::CancelToken) => {
                let left = self.queue.leave(&clinic.id, &convo.phone).await?;
                convo.state = S::Idle;
                convo.active_token_id = None;
                match left {
                    Some(token) => {
                        self.reply(clinic, &convo.phone, Some(&token.id), &format!(
                            "Token {} cancelled. See you next time.",
                            token.display_number()
                        ))
                        .await?;
                    }
                    None => {
                        self.reply(clinic, &convo.phone, None,
                            "You don't hold a token right now.")
                            .await?;
                    }
                }
                self.save(convo).await
            }

            (S::ActiveToken, Intent::ViewStatus) => {
                match self.queue.status_for_phone(&clinic.id, &convo.phone).await? {
                    Some(status) => {
                        self.reply_active_menu(
                            clinic,
                            &convo.phone,
                            &status.token,
                            &format!(
                                "Token {}: {} ahead of you, now serving number {}.",
                                status.token.display_number(),
                                status.tokens_ahead,
                                status.current_serving
                            ),
                        )
                        .await?;
                    }
                    None => {
                        convo.state = S::Idle;
                        convo.active_token_id = None;
                        self.reply(clinic, &convo.phone, None,
                            "You don't hold a token right now. Scan the clinic QR code to join.")
                            .await?;
                    }
                }
                self.save(convo).await
            }

            (S::ActiveToken, Intent::RejoinQueue) => {
                convo.state = S::AwaitingName;
                convo.active_token_id = None;
                convo.pending_name = None;
                self.reply(clinic, &convo.phone, None,
                    "What name should we call out when it's your turn?")
                    .await?;
                self.save(convo).await
            }

            (S::AwaitingFeedbackRating, Intent::Rate(rating)) => {
                let token_id = convo.active_token_id.clone().unwrap_or_default();
                match self.queue.record_feedback(&token_id, rating, None).await {
                    Ok(()) if rating <= 3 => {
                        convo.state = S::AwaitingFeedbackText;
                        self.reply(clinic, &convo.phone, Some(&token_id),
                            "We're sorry to hear that. What went wrong?")
                            .await?;
                    }
                    Ok(()) => {
                        convo.state = S::Idle;
                        convo.active_token_id = None;
                        self.reply(clinic, &convo.phone, Some(&token_id), &format!(
                            "Thank you! If you have a minute, we'd love a public review of {}.",
                            clinic.name
                        ))
                        .await?;
                    }
                    Err(e) if e.is_expected() => {
                        // The token is no longer ratable; drop the flow.
                        convo.state = S::Idle;
                        convo.active_token_id = None;
                    }
                    Err(e) => return Err(e),
                }
                self.save(convo).await
            }

            (S::AwaitingFeedbackRating, _) => {
                self.send_rating_prompt(clinic, &convo.phone, convo.active_token_id.as_deref())
                    .await?;
                self.save(convo).await
            }

            (S::AwaitingFeedbackText, _) => {
                let text = raw_text(kind).trim().to_string();
                let token_id = convo.active_token_id.take().unwrap_or_default();
                if !text.is_empty() {
                    // Keep the rating recorded in the previous step.
                    let rating = queries::tokens::get_token(self.queue.database(), &token_id)
                        .await?
                        .and_then(|t| t.rating);
                    if let Some(rating) = rating {
                        self.queue
                            .record_feedback(&token_id, rating, Some(&text))
                            .await?;
                    }
                }
                convo.state = S::Idle;
                self.reply(clinic, &convo.phone, None,
                    "Thank you, we've passed that along.")
                    .await?;
                self.save(convo).await
            }

            // Idle fallthrough: anything unrecognized gets the help text.
            (S::Idle | S::ActiveToken, _) => {
                self.reply(clinic, &convo.phone, None, &format!(
                    "Hi! To join the queue at {}, scan the clinic's QR code or send JOIN_{}.",
                    clinic.name,
                    clinic.slug.to_uppercase()
                ))
                .await?;
                self.save(convo).await
            }
        }
    }

    /// Open the feedback flow for a served token: flips the conversation to
    /// the rating state and prompts the patient. Triggered by staff flows
    /// once a visit completes, so this send is window-checked.
    pub async fn begin_feedback(
        &self,
        clinic: &Clinic,
        token: &Token,
    ) -> Result<(), WaitlineError> {
        let phone = self
            .queue
            .vault()
            .decrypt_phone(&token.customer_phone_encrypted)?;
        let last_inbound = queries::conversations::get_conversation(
            self.queue.database(),
            &clinic.id,
            &phone,
        )
        .await?
        .map(|c| c.last_interaction_at);

        let convo = Conversation {
            clinic_id: clinic.id.clone(),
            phone: phone.clone(),
            state: ConversationState::AwaitingFeedbackRating,
            active_token_id: Some(token.id.clone()),
            pending_name: None,
            last_interaction_at: last_inbound.clone().unwrap_or_else(now_iso),
        };
        self.save(convo).await?;

        let sealed = self.queue.vault().encrypt_phone(&phone)?;
        self.notifier
            .send_windowed(
                &clinic.id,
                Some(&token.id),
                &sealed,
                &format!(
                    "Thanks for visiting {}! How was it? Rate us 1 (poor) to 5 (great).",
                    clinic.name
                ),
                last_inbound.as_deref(),
            )
            .await?;
        Ok(())
    }

    async fn save(&self, convo: Conversation) -> Result<(), WaitlineError> {
        queries::conversations::upsert_conversation(self.queue.database(), &convo).await
    }

    async fn reply(
        &self,
        clinic: &Clinic,
        phone: &str,
        token_id: Option<&str>,
        body: &str,
    ) -> Result<(), WaitlineError> {
        let sealed = self.queue.vault().encrypt_phone(phone)?;
        self.notifier
            .send_text(&clinic.id, token_id, &sealed, body)
            .await?;
        Ok(())
    }

    async fn reply_buttons(
        &self,
        clinic: &Clinic,
        phone: &str,
        token_id: Option<&str>,
        body: &str,
        button_list: &[(String, &str)],
    ) -> Result<(), WaitlineError> {
        let payload = json!({
            "body": body,
            "buttons": button_list
                .iter()
                .map(|(id, title)| json!({ "id": id, "title": title }))
                .collect::<Vec<_>>(),
        })
        .to_string();
        let sealed = self.queue.vault().encrypt_phone(phone)?;
        self.notifier
            .send_kind(&clinic.id, token_id, &sealed, &payload, "buttons")
            .await?;
        Ok(())
    }

    async fn send_confirm_prompt(
        &self,
        clinic: &Clinic,
        phone: &str,
        name: &str,
    ) -> Result<(), WaitlineError> {
        self.reply_buttons(
            clinic,
            phone,
            None,
            &format!("Join the queue at {} as \"{name}\"?", clinic.name),
            &[
                (format!("{}{name}", buttons::CONFIRM_PREFIX), "Yes, join"),
                (buttons::CANCEL_JOIN.to_string(), "No"),
            ],
        )
        .await
    }

    async fn send_rating_prompt(
        &self,
        clinic: &Clinic,
        phone: &str,
        token_id: Option<&str>,
    ) -> Result<(), WaitlineError> {
        let rate_buttons: Vec<(String, &str)> = [
            ("RATE_1", "1"),
            ("RATE_3", "3"),
            ("RATE_5", "5"),
        ]
        .iter()
        .map(|(id, title)| (id.to_string(), *title))
        .collect();
        self.reply_buttons(
            clinic,
            phone,
            token_id,
            "Please rate your visit from 1 (poor) to 5 (great).",
            &rate_buttons,
        )
        .await
    }

    async fn reply_active_menu(
        &self,
        clinic: &Clinic,
        phone: &str,
        token: &Token,
        body: &str,
    ) -> Result<(), WaitlineError> {
        self.reply_buttons(
            clinic,
            phone,
            Some(&token.id),
            body,
            &[
                (buttons::VIEW_STATUS.to_string(), "Check status"),
                (buttons::CANCEL_TOKEN.to_string(), "Cancel token"),
            ],
        )
        .await
    }
}

fn raw_text(kind: &EventKind) -> &str {
    match kind {
        EventKind::Text(text) => text,
        EventKind::Button(id) => id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};
    use tempfile::tempdir;
    use waitline_core::TokenStatus;
    use waitline_notify::MessageProvider;
    use waitline_storage::Database;
    use waitline_vault::PhoneVault;

    struct CaptureProvider {
        sent: Mutex<Vec<(String, String, String)>>,
    }

    impl CaptureProvider {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: Mutex::new(Vec::new()),
            })
        }

        fn last(&self) -> (String, String, String) {
            self.sent.lock().unwrap().last().cloned().expect("a reply was sent")
        }

        fn count(&self) -> usize {
            self.sent.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl MessageProvider for CaptureProvider {
        async fn send(&self, phone: &str, body: &str, kind: &str) -> Result<(), WaitlineError> {
            self.sent
                .lock()
                .unwrap()
                .push((phone.to_string(), body.to_string(), kind.to_string()));
            Ok(())
        }
    }

    struct Fixture {
        dispatcher: Dispatcher,
        provider: Arc<CaptureProvider>,
        clinic: Clinic,
        db: Database,
        _dir: tempfile::TempDir,
    }

    async fn setup() -> Fixture {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("t.db").to_str().unwrap())
            .await
            .unwrap();
        let clinic = Clinic {
            id: "c1".into(),
            slug: "cityclinic".into(),
            name: "City Clinic".into(),
            daily_limit: 50,
            created_at: now_iso(),
        };
        queries::clinics::create_clinic(&db, &clinic).await.unwrap();

        let vault = PhoneVault::new([3u8; 32], b"pepper".to_vec());
        let provider = CaptureProvider::new();
        let queue = QueueService::new(db.clone(), vault.clone(), 50);
        let notifier = Notifier::new(db.clone(), vault, provider.clone(), 300, 3);
        Fixture {
            dispatcher: Dispatcher::new(queue, notifier),
            provider,
            clinic,
            db,
            _dir: dir,
        }
    }

    fn text_event(id: &str, phone: &str, text: &str) -> InboundEvent {
        InboundEvent {
            message_id: id.to_string(),
            phone: phone.to_string(),
            kind: EventKind::Text(text.to_string()),
        }
    }

    fn button_event(id: &str, phone: &str, button: &str) -> InboundEvent {
        InboundEvent {
            message_id: id.to_string(),
            phone: phone.to_string(),
            kind: EventKind::Button(button.to_string()),
        }
    }

    async fn state_of(f: &Fixture, phone: &str) -> ConversationState {
        queries::conversations::get_conversation(&f.db, "c1", phone)
            .await
            .unwrap()
            .unwrap()
            .state
    }

    const PHONE: &str = "+15550001111";

    /// Drive JOIN -> name -> CONFIRM; returns the issued token id.
    async fn join_through(f: &Fixture, name: &str) -> String {
        f.dispatcher
            .handle(&f.clinic, text_event("j1", PHONE, "JOIN_cityclinic"))
            .await
            .unwrap();
        f.dispatcher
            .handle(&f.clinic, text_event("j2", PHONE, name))
            .await
            .unwrap();
        f.dispatcher
            .handle(&f.clinic, button_event("j3", PHONE, &format!("CONFIRM_{name}")))
            .await
            .unwrap();
        queries::conversations::get_conversation(&f.db, "c1", PHONE)
            .await
            .unwrap()
            .unwrap()
            .active_token_id
            .expect("token issued")
    }

    #[tokio::test]
    async fn join_flow_issues_a_token() {
        let f = setup().await;

        f.dispatcher
            .handle(&f.clinic, text_event("m1", PHONE, "JOIN_cityclinic"))
            .await
            .unwrap();
        assert_eq!(state_of(&f, PHONE).await, ConversationState::AwaitingName);
        assert!(f.provider.last().1.contains("What name"));

        f.dispatcher
            .handle(&f.clinic, text_event("m2", PHONE, "Asha Sharma"))
            .await
            .unwrap();
        assert_eq!(
            state_of(&f, PHONE).await,
            ConversationState::AwaitingConfirmation
        );
        let (_, body, kind) = f.provider.last();
        assert_eq!(kind, "buttons");
        // The confirm button id carries the name.
        assert!(body.contains("CONFIRM_Asha Sharma"), "{body}");

        f.dispatcher
            .handle(&f.clinic, button_event("m3", PHONE, "CONFIRM_Asha Sharma"))
            .await
            .unwrap();
        assert_eq!(state_of(&f, PHONE).await, ConversationState::ActiveToken);
        let (to, body, _) = f.provider.last();
        assert_eq!(to, PHONE, "reply goes to the decrypted sender phone");
        assert!(body.contains("#1"), "{body}");

        let convo = queries::conversations::get_conversation(&f.db, "c1", PHONE)
            .await
            .unwrap()
            .unwrap();
        let token = queries::tokens::get_token(&f.db, convo.active_token_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(token.customer_name, "Asha Sharma");
        assert_eq!(token.status, TokenStatus::Waiting);
    }

    #[tokio::test]
    async fn replayed_message_id_is_a_no_op() {
        let f = setup().await;

        let first = f
            .dispatcher
            .handle(&f.clinic, text_event("m1", PHONE, "JOIN_cityclinic"))
            .await
            .unwrap();
        assert_eq!(first, Handled::Processed);
        let replies_before = f.provider.count();

        // Same message id again: dropped before any reply or state change.
        let replay = f
            .dispatcher
            .handle(&f.clinic, text_event("m1", PHONE, "JOIN_cityclinic"))
            .await
            .unwrap();
        assert_eq!(replay, Handled::Replay);
        assert_eq!(f.provider.count(), replies_before);
        assert_eq!(state_of(&f, PHONE).await, ConversationState::AwaitingName);
    }

    #[tokio::test]
    async fn cancel_join_resets_to_idle() {
        let f = setup().await;
        f.dispatcher
            .handle(&f.clinic, text_event("m1", PHONE, "JOIN_cityclinic"))
            .await
            .unwrap();
        f.dispatcher
            .handle(&f.clinic, text_event("m2", PHONE, "Asha"))
            .await
            .unwrap();
        f.dispatcher
            .handle(&f.clinic, button_event("m3", PHONE, "CANCEL_JOIN"))
            .await
            .unwrap();
        assert_eq!(state_of(&f, PHONE).await, ConversationState::Idle);
    }

    #[tokio::test]
    async fn unrelated_text_in_confirmation_resends_the_prompt() {
        let f = setup().await;
        f.dispatcher
            .handle(&f.clinic, text_event("m1", PHONE, "JOIN_cityclinic"))
            .await
            .unwrap();
        f.dispatcher
            .handle(&f.clinic, text_event("m2", PHONE, "Asha"))
            .await
            .unwrap();

        f.dispatcher
            .handle(&f.clinic, text_event("m3", PHONE, "what?"))
            .await
            .unwrap();
        assert_eq!(
            state_of(&f, PHONE).await,
            ConversationState::AwaitingConfirmation
        );
        let (_, body, kind) = f.provider.last();
        assert_eq!(kind, "buttons");
        assert!(body.contains("CONFIRM_Asha"), "prompt resent: {body}");
    }

    #[tokio::test]
    async fn unknown_slug_stays_put() {
        let f = setup().await;
        f.dispatcher
            .handle(&f.clinic, text_event("m1", PHONE, "JOIN_elsewhere"))
            .await
            .unwrap();
        assert_eq!(state_of(&f, PHONE).await, ConversationState::Idle);
        assert!(f.provider.last().1.contains("re-scan"));
    }

    #[tokio::test]
    async fn join_while_queued_reports_existing_token() {
        let f = setup().await;
        join_through(&f, "Asha").await;

        // Scanning the QR again doesn't restart the interview.
        f.dispatcher
            .handle(&f.clinic, text_event("m4", PHONE, "JOIN_cityclinic"))
            .await
            .unwrap();
        assert_eq!(state_of(&f, PHONE).await, ConversationState::ActiveToken);
        assert!(f.provider.last().1.contains("already hold #1"));
    }

    #[tokio::test]
    async fn view_status_and_cancel_from_active_state() {
        let f = setup().await;
        join_through(&f, "Asha").await;

        f.dispatcher
            .handle(&f.clinic, button_event("m4", PHONE, "VIEW_STATUS"))
            .await
            .unwrap();
        assert!(f.provider.last().1.contains("0 ahead of you"));
        assert_eq!(state_of(&f, PHONE).await, ConversationState::ActiveToken);

        f.dispatcher
            .handle(&f.clinic, button_event("m5", PHONE, "CANCEL_TOKEN"))
            .await
            .unwrap();
        assert_eq!(state_of(&f, PHONE).await, ConversationState::Idle);
        assert!(f.provider.last().1.contains("cancelled"));
    }

    #[tokio::test]
    async fn rejoin_restarts_the_name_interview() {
        let f = setup().await;
        join_through(&f, "Asha").await;

        f.dispatcher
            .handle(&f.clinic, button_event("m4", PHONE, "REJOIN_QUEUE"))
            .await
            .unwrap();
        assert_eq!(state_of(&f, PHONE).await, ConversationState::AwaitingName);
    }

    #[tokio::test]
    async fn low_rating_asks_what_went_wrong() {
        let f = setup().await;
        let token_id = join_through(&f, "Asha").await;
        let token = queries::tokens::get_token(&f.db, &token_id).await.unwrap().unwrap();
        queries::tokens::promote_next(&f.db, &token.session_id, None).await.unwrap();
        queries::tokens::promote_next(&f.db, &token.session_id, None).await.unwrap();
        let served = queries::tokens::get_token(&f.db, &token_id).await.unwrap().unwrap();

        f.dispatcher.begin_feedback(&f.clinic, &served).await.unwrap();
        assert_eq!(
            state_of(&f, PHONE).await,
            ConversationState::AwaitingFeedbackRating
        );

        // Free text instead of a rating: re-prompt, state unchanged.
        f.dispatcher
            .handle(&f.clinic, text_event("m4", PHONE, "it was fine"))
            .await
            .unwrap();
        assert_eq!(
            state_of(&f, PHONE).await,
            ConversationState::AwaitingFeedbackRating
        );

        f.dispatcher
            .handle(&f.clinic, button_event("m5", PHONE, "RATE_2"))
            .await
            .unwrap();
        assert_eq!(
            state_of(&f, PHONE).await,
            ConversationState::AwaitingFeedbackText
        );
        assert!(f.provider.last().1.contains("What went wrong"));

        f.dispatcher
            .handle(&f.clinic, text_event("m6", PHONE, "Waited a very long time"))
            .await
            .unwrap();
        assert_eq!(state_of(&f, PHONE).await, ConversationState::Idle);

        let token = queries::tokens::get_token(&f.db, &token_id).await.unwrap().unwrap();
        assert_eq!(token.rating, Some(2));
        assert_eq!(token.feedback.as_deref(), Some("Waited a very long time"));
    }

    #[tokio::test]
    async fn high_rating_closes_the_flow_with_a_review_ask() {
        let f = setup().await;
        let token_id = join_through(&f, "Asha").await;
        let token = queries::tokens::get_token(&f.db, &token_id).await.unwrap().unwrap();
        queries::tokens::promote_next(&f.db, &token.session_id, None).await.unwrap();
        queries::tokens::promote_next(&f.db, &token.session_id, None).await.unwrap();
        let served = queries::tokens::get_token(&f.db, &token_id).await.unwrap().unwrap();

        f.dispatcher.begin_feedback(&f.clinic, &served).await.unwrap();
        f.dispatcher
            .handle(&f.clinic, button_event("m4", PHONE, "RATE_5"))
            .await
            .unwrap();

        assert_eq!(state_of(&f, PHONE).await, ConversationState::Idle);
        assert!(f.provider.last().1.contains("review"));
        let token = queries::tokens::get_token(&f.db, &token_id).await.unwrap().unwrap();
        assert_eq!(token.rating, Some(5));
        assert_eq!(token.feedback, None);
    }

    #[tokio::test]
    async fn feedback_prompt_uses_template_outside_the_window() {
        let f = setup().await;
        let token_id = join_through(&f, "Asha").await;
        let token = queries::tokens::get_token(&f.db, &token_id).await.unwrap().unwrap();
        queries::tokens::promote_next(&f.db, &token.session_id, None).await.unwrap();
        queries::tokens::promote_next(&f.db, &token.session_id, None).await.unwrap();
        let served = queries::tokens::get_token(&f.db, &token_id).await.unwrap().unwrap();

        // Push the last inbound interaction outside the 24h window.
        let mut convo = queries::conversations::get_conversation(&f.db, "c1", PHONE)
            .await
            .unwrap()
            .unwrap();
        convo.last_interaction_at = "2020-01-01T00:00:00.000Z".into();
        queries::conversations::upsert_conversation(&f.db, &convo)
            .await
            .unwrap();

        f.dispatcher.begin_feedback(&f.clinic, &served).await.unwrap();
        let (_, body, kind) = f.provider.last();
        assert_eq!(kind, "template");
        assert_eq!(body, "queue_update");
    }

    #[tokio::test]
    async fn idle_free_text_gets_help() {
        let f = setup().await;
        f.dispatcher
            .handle(&f.clinic, text_event("m1", PHONE, "hello?"))
            .await
            .unwrap();
        assert!(f.provider.last().1.contains("JOIN_CITYCLINIC"));
    }
}
