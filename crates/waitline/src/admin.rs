// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Staff desk commands: clinic registration, session lifecycle, and token
//! operations, run against the local database.

use uuid::Uuid;
use waitline_config::WaitlineConfig;
use waitline_core::types::now_iso;
use waitline_core::{Clinic, Session, TokenStatus, WaitlineError};
use waitline_storage::queries;

use crate::wiring::App;

pub async fn run_add_clinic(
    config: &WaitlineConfig,
    slug: &str,
    name: &str,
    daily_limit: i64,
) -> Result<(), WaitlineError> {
    if daily_limit < 1 {
        return Err(WaitlineError::Validation(
            "daily limit must be at least 1".into(),
        ));
    }
    let app = App::init(config).await?;
    let clinic = Clinic {
        id: Uuid::new_v4().to_string(),
        slug: slug.to_lowercase(),
        name: name.to_string(),
        daily_limit,
        created_at: now_iso(),
    };
    queries::clinics::create_clinic(&app.db, &clinic).await?;
    println!(
        "registered clinic {} (id {}). Patients join with JOIN_{}",
        clinic.name,
        clinic.id,
        clinic.slug.to_uppercase()
    );
    Ok(())
}

pub async fn run_open(config: &WaitlineConfig, clinic_id: &str) -> Result<(), WaitlineError> {
    let app = App::init(config).await?;
    let session = app.queue.open_today(clinic_id).await?;
    println!("session {} is {} for {}", session.id, session.status, session.date);
    Ok(())
}

pub async fn run_pause(config: &WaitlineConfig, clinic_id: &str) -> Result<(), WaitlineError> {
    let app = App::init(config).await?;
    let session = today(&app, clinic_id).await?;
    app.queue.pause(&session.id).await?;
    println!("session {} paused", session.id);
    Ok(())
}

pub async fn run_resume(config: &WaitlineConfig, clinic_id: &str) -> Result<(), WaitlineError> {
    let app = App::init(config).await?;
    let session = today(&app, clinic_id).await?;
    app.queue.resume(&session.id).await?;
    println!("session {} resumed", session.id);
    Ok(())
}

pub async fn run_close(config: &WaitlineConfig, clinic_id: &str) -> Result<(), WaitlineError> {
    let app = App::init(config).await?;
    let session = today(&app, clinic_id).await?;
    app.queue.close(&session.id).await?;
    println!("session {} closed", session.id);
    Ok(())
}

pub async fn run_force_close(
    config: &WaitlineConfig,
    clinic_id: &str,
    reason: &str,
    actor: &str,
) -> Result<(), WaitlineError> {
    let app = App::init(config).await?;
    let session = today(&app, clinic_id).await?;
    let cancelled = app.queue.force_close(&session.id, reason, actor).await?;
    println!(
        "session {} force-closed; {cancelled} waiting token(s) cancelled",
        session.id
    );
    Ok(())
}

/// Promote the next patient. Notifies the called patient and opens the
/// feedback flow for whoever was just served out.
pub async fn run_next(
    config: &WaitlineConfig,
    clinic_id: &str,
    doctor: Option<&str>,
) -> Result<(), WaitlineError> {
    let app = App::init(config).await?;
    let (notifier, dispatcher) = app.messaging(config)?;
    let clinic = app
        .queue
        .clinic(clinic_id)
        .await?
        .ok_or_else(|| WaitlineError::Validation(format!("unknown clinic {clinic_id}")))?;
    let session = today(&app, clinic_id).await?;

    let serving_before = app
        .queue
        .board(&session.id)
        .await?
        .into_iter()
        .find(|t| t.status == TokenStatus::Serving);

    match app.queue.call_next(&session.id, doctor).await? {
        Some(next) => {
            println!("now serving {} ({})", next.display_number(), next.customer_name);
            let phone = app
                .queue
                .vault()
                .decrypt_phone(&next.customer_phone_encrypted)?;
            let last_inbound =
                queries::conversations::get_conversation(&app.db, &clinic.id, &phone)
                    .await?
                    .map(|c| c.last_interaction_at);
            notifier
                .send_windowed(
                    &clinic.id,
                    Some(&next.id),
                    &next.customer_phone_encrypted,
                    &format!(
                        "It's your turn! Token {} is now being served at {}.",
                        next.display_number(),
                        clinic.name
                    ),
                    last_inbound.as_deref(),
                )
                .await?;
        }
        None => println!("queue drained; nobody waiting"),
    }

    // Whoever was serving has just been served out; ask how it went.
    if let Some(previous) = serving_before {
        if let Some(served) = queries::tokens::get_token(&app.db, &previous.id).await? {
            if served.status == TokenStatus::Served {
                dispatcher.begin_feedback(&clinic, &served).await?;
            }
        }
    }
    Ok(())
}

pub async fn run_skip(config: &WaitlineConfig, token_id: &str) -> Result<(), WaitlineError> {
    let app = App::init(config).await?;
    app.queue.skip(token_id).await?;
    println!("token {token_id} skipped");
    Ok(())
}

pub async fn run_recall(config: &WaitlineConfig, token_id: &str) -> Result<(), WaitlineError> {
    let app = App::init(config).await?;
    app.queue.recall(token_id).await?;
    println!("token {token_id} back in the waiting pool");
    Ok(())
}

pub async fn run_arrive(config: &WaitlineConfig, token_id: &str) -> Result<(), WaitlineError> {
    let app = App::init(config).await?;
    app.queue.mark_arrived(token_id).await?;
    println!("token {token_id} marked as arrived");
    Ok(())
}

pub async fn run_late(config: &WaitlineConfig, token_id: &str) -> Result<(), WaitlineError> {
    let app = App::init(config).await?;
    app.queue.mark_late(token_id).await?;
    println!("token {token_id} flagged late");
    Ok(())
}

async fn today(app: &App, clinic_id: &str) -> Result<Session, WaitlineError> {
    app.queue
        .today_session(clinic_id)
        .await?
        .ok_or_else(|| WaitlineError::State(format!("clinic {clinic_id} has no session today")))
}
