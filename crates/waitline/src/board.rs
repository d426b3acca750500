// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `waitline board` command: a desk view of today's queue, optionally kept
//! live through the reconciliation client.

use std::sync::Arc;
use std::time::Duration;

use waitline_config::WaitlineConfig;
use waitline_core::{Token, TokenStatus, WaitlineError};
use waitline_sync::{QueueSource, Reconciler, Snapshot, SnapshotCache, SyncTimings};

use crate::serve::install_signal_handler;
use crate::wiring::App;

pub async fn run_board(
    config: WaitlineConfig,
    clinic_id: String,
    watch: bool,
) -> Result<(), WaitlineError> {
    let app = App::init(&config).await?;

    if !watch {
        let session = app
            .queue
            .today_session(&clinic_id)
            .await?
            .ok_or_else(|| {
                WaitlineError::State(format!("clinic {clinic_id} has no session today"))
            })?;
        let tokens = app.queue.board(&session.id).await?;
        print_board(session.now_serving_number, &tokens);
        return Ok(());
    }

    let cancel = install_signal_handler();
    let handle = Reconciler::spawn(
        Arc::new(QueueSource::new(app.queue.clone())),
        SnapshotCache::new(&config.sync.cache_dir),
        clinic_id,
        timings_from(&config),
        cancel.clone(),
    );
    let mut view = handle.subscribe();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = view.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = view.borrow().clone();
                if let Some(snapshot) = current.snapshot {
                    render(&snapshot, current.degraded);
                }
            }
        }
    }
    Ok(())
}

fn timings_from(config: &WaitlineConfig) -> SyncTimings {
    SyncTimings {
        debounce: Duration::from_millis(config.sync.debounce_ms),
        action_debounce: Duration::from_millis(config.sync.action_debounce_ms),
        heartbeat: Duration::from_secs(config.sync.heartbeat_secs),
        backoff_base: Duration::from_secs(config.sync.backoff_base_secs),
        backoff_cap: Duration::from_secs(config.sync.backoff_cap_secs),
        blackout: Duration::from_millis(config.sync.blackout_ms),
    }
}

fn render(snapshot: &Snapshot, degraded: bool) {
    // Clear and redraw for a terminal dashboard feel.
    print!("\x1b[2J\x1b[H");
    if degraded {
        println!("[offline - showing last known state]");
    }
    println!(
        "session {} ({}) on {}",
        snapshot.session.id, snapshot.session.status, snapshot.session.date
    );
    print_board(snapshot.session.now_serving_number, &snapshot.tokens);
}

fn print_board(now_serving: i64, tokens: &[Token]) {
    println!("now serving: {now_serving}");
    for token in tokens {
        if token.status == TokenStatus::Cancelled {
            continue;
        }
        println!(
            "  {:>6}  {:<13}  {}",
            token.display_number(),
            token.status,
            token.customer_name
        );
    }
    let waiting = tokens
        .iter()
        .filter(|t| matches!(t.status, TokenStatus::Waiting | TokenStatus::WaitingLate))
        .count();
    println!("{waiting} waiting");
}
