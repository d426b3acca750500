// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `waitline serve` command implementation.
//!
//! Runs the webhook gateway bound to one clinic, plus the outbox retry
//! sweeper. Shuts down gracefully on SIGINT/SIGTERM.

use std::net::SocketAddr;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use waitline_config::WaitlineConfig;
use waitline_core::WaitlineError;
use waitline_gateway::GatewayState;

use crate::wiring::App;

pub async fn run_serve(config: WaitlineConfig) -> Result<(), WaitlineError> {
    info!("starting waitline serve");

    let app = App::init(&config).await?;
    let (notifier, dispatcher) = app.messaging(&config)?;

    let clinic_id = config
        .gateway
        .clinic_id
        .clone()
        .ok_or_else(|| WaitlineError::Config("gateway.clinic_id is required".into()))?;
    if app.queue.clinic(&clinic_id).await?.is_none() {
        return Err(WaitlineError::Config(format!(
            "clinic {clinic_id} is not registered; run `waitline add-clinic` first"
        )));
    }

    let cancel = install_signal_handler();

    tokio::spawn(
        notifier
            .clone()
            .run_sweeper(config.notify.sweep_interval_secs, cancel.clone()),
    );
    info!(
        interval_secs = config.notify.sweep_interval_secs,
        "outbox sweeper started"
    );

    if config.gateway.enabled {
        let verify_token = config
            .gateway
            .verify_token
            .clone()
            .ok_or_else(|| WaitlineError::Config("gateway.verify_token is required".into()))?;
        let app_secret = config
            .gateway
            .app_secret
            .clone()
            .ok_or_else(|| WaitlineError::Config("gateway.app_secret is required".into()))?;

        let state = GatewayState::new(
            dispatcher,
            app.queue.clone(),
            clinic_id,
            verify_token,
            app_secret,
            config.gateway.rate_limit_requests,
            Duration::from_secs(config.gateway.rate_limit_window_secs),
        );
        let addr: SocketAddr = format!("{}:{}", config.gateway.host, config.gateway.port)
            .parse()
            .map_err(|e| {
                WaitlineError::Config(format!(
                    "invalid gateway address {}:{}: {e}",
                    config.gateway.host, config.gateway.port
                ))
            })?;
        waitline_gateway::serve(state, addr, cancel.clone()).await?;
    } else {
        info!("gateway disabled; running sweeper only");
        cancel.cancelled().await;
    }

    info!("waitline serve shutdown complete");
    Ok(())
}

/// Install SIGINT/SIGTERM handlers; the returned token cancels on either.
pub fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => {
                    info!("received SIGINT (Ctrl+C), initiating shutdown");
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, initiating shutdown");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received Ctrl+C, initiating shutdown");
        }

        token_clone.cancel();
        debug!("shutdown signal handler completed");
    });

    token
}
