// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Shared service construction for the CLI commands.

use std::sync::Arc;

use waitline_config::WaitlineConfig;
use waitline_core::WaitlineError;
use waitline_dispatch::Dispatcher;
use waitline_notify::{HttpProvider, Notifier};
use waitline_queue::QueueService;
use waitline_storage::Database;
use waitline_vault::PhoneVault;

/// Storage and queue services; enough for the desk commands that never
/// message a patient.
pub struct App {
    pub db: Database,
    pub queue: QueueService,
}

impl App {
    pub async fn init(config: &WaitlineConfig) -> Result<Self, WaitlineError> {
        let key = config
            .vault
            .encryption_key
            .as_deref()
            .ok_or_else(|| WaitlineError::Config("vault.encryption_key is required".into()))?;
        let pepper = config
            .vault
            .pepper
            .as_deref()
            .ok_or_else(|| WaitlineError::Config("vault.pepper is required".into()))?;
        let vault = PhoneVault::from_hex_key(key, pepper)?;

        let db = Database::open(&config.storage.database_path).await?;
        let queue = QueueService::new(db.clone(), vault, config.queue.default_daily_limit);
        Ok(Self { db, queue })
    }

    /// The outbound messaging stack; requires provider credentials.
    pub fn messaging(
        &self,
        config: &WaitlineConfig,
    ) -> Result<(Notifier, Dispatcher), WaitlineError> {
        let access_token = config
            .provider
            .access_token
            .as_deref()
            .ok_or_else(|| WaitlineError::Config("provider.access_token is required".into()))?;
        let sender_id = config
            .provider
            .sender_id
            .as_deref()
            .ok_or_else(|| WaitlineError::Config("provider.sender_id is required".into()))?;

        let provider = Arc::new(HttpProvider::new(
            &config.provider.base_url,
            sender_id,
            access_token,
        ));
        let notifier = Notifier::new(
            self.db.clone(),
            self.queue.vault().clone(),
            provider,
            config.notify.retry_backoff_secs as i64,
            config.notify.max_attempts,
        );
        let dispatcher = Dispatcher::new(self.queue.clone(), notifier.clone());
        Ok((notifier, dispatcher))
    }
}
