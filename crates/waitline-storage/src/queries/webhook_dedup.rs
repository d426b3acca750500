// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Provider message-id dedup. Webhook platforms redeliver; every inbound
//! message id is recorded once and replays are dropped before dispatch.

use rusqlite::params;
use waitline_core::WaitlineError;

use crate::database::Database;

/// Record `message_id` if unseen. Returns `true` the first time, `false`
/// for a replay.
pub async fn record_if_new(db: &Database, message_id: &str) -> Result<bool, WaitlineError> {
    let message_id = message_id.to_string();
    db.connection()
        .call(move |conn| {
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO processed_webhooks (message_id) VALUES (?1)",
                params![message_id],
            )?;
            Ok(inserted == 1)
        })
        .await
        .map_err(crate::database::map_tr_err)
}
