// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Waitline - live walk-in queues for clinics.
//!
//! Binary entry point: the `serve` daemon plus the staff desk commands.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod admin;
mod board;
mod serve;
mod status;
mod wiring;

/// Waitline - live walk-in queues for clinics.
#[derive(Parser, Debug)]
#[command(name = "waitline", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the webhook gateway and the outbox retry sweeper.
    Serve,
    /// Look up a token's public status via the running gateway.
    Status {
        token_id: String,
        /// Emit machine-readable JSON.
        #[arg(long)]
        json: bool,
    },
    /// Register a clinic.
    AddClinic {
        /// URL-safe code patients send as `JOIN_<slug>`.
        slug: String,
        name: String,
        #[arg(long, default_value_t = 50)]
        daily_limit: i64,
    },
    /// Open (or resume) today's session for a clinic.
    Open { clinic_id: String },
    /// Pause intake; waiting patients keep their places.
    Pause { clinic_id: String },
    /// Resume a paused session.
    Resume { clinic_id: String },
    /// Close today's session normally.
    Close { clinic_id: String },
    /// Cancel every waiting token and close today's session.
    ForceClose {
        clinic_id: String,
        #[arg(long)]
        reason: String,
        #[arg(long, default_value = "cli")]
        actor: String,
    },
    /// Serve out the current patient and call the next one.
    Next {
        clinic_id: String,
        /// Restrict promotion to one doctor's patients.
        #[arg(long)]
        doctor: Option<String>,
    },
    /// Print today's queue board.
    Board {
        clinic_id: String,
        /// Keep the board live until interrupted.
        #[arg(long)]
        watch: bool,
    },
    /// Skip the token (recoverable with `recall`).
    Skip { token_id: String },
    /// Return a skipped token to the waiting pool.
    Recall { token_id: String },
    /// Mark a remote-booked token as physically present.
    Arrive { token_id: String },
    /// Flag a no-show-so-far token as late.
    Late { token_id: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match waitline_config::load_and_validate() {
        Ok(config) => config,
        Err(errors) => {
            waitline_config::render_errors(&errors);
            std::process::exit(1);
        }
    };
    init_tracing(&config.service.log_level);

    let result = match cli.command {
        Commands::Serve => serve::run_serve(config).await,
        Commands::Status { token_id, json } => status::run_status(&config, &token_id, json).await,
        Commands::AddClinic {
            slug,
            name,
            daily_limit,
        } => admin::run_add_clinic(&config, &slug, &name, daily_limit).await,
        Commands::Open { clinic_id } => admin::run_open(&config, &clinic_id).await,
        Commands::Pause { clinic_id } => admin::run_pause(&config, &clinic_id).await,
        Commands::Resume { clinic_id } => admin::run_resume(&config, &clinic_id).await,
        Commands::Close { clinic_id } => admin::run_close(&config, &clinic_id).await,
        Commands::ForceClose {
            clinic_id,
            reason,
            actor,
        } => admin::run_force_close(&config, &clinic_id, &reason, &actor).await,
        Commands::Next { clinic_id, doctor } => {
            admin::run_next(&config, &clinic_id, doctor.as_deref()).await
        }
        Commands::Board { clinic_id, watch } => board::run_board(config, clinic_id, watch).await,
        Commands::Skip { token_id } => admin::run_skip(&config, &token_id).await,
        Commands::Recall { token_id } => admin::run_recall(&config, &token_id).await,
        Commands::Arrive { token_id } => admin::run_arrive(&config, &token_id).await,
        Commands::Late { token_id } => admin::run_late(&config, &token_id).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

/// Initialize the tracing subscriber with the configured log level.
fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("waitline={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
