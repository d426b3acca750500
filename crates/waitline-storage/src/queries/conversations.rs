// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Conversation state persistence, keyed by (clinic_id, phone).
//!
//! The phone stored here is the normalized plaintext number: it is the
//! conversation's routing key and arrives on every webhook anyway, unlike
//! the token table where phones are vault-sealed at rest.

use rusqlite::{params, OptionalExtension};
use waitline_core::{Conversation, WaitlineError};

use crate::database::Database;
use crate::queries::parse_enum;

fn conversation_from_row(row: &rusqlite::Row<'_>) -> Result<Conversation, rusqlite::Error> {
    Ok(Conversation {
        clinic_id: row.get(0)?,
        phone: row.get(1)?,
        state: parse_enum(2, row.get::<_, String>(2)?)?,
        active_token_id: row.get(3)?,
        pending_name: row.get(4)?,
        last_interaction_at: row.get(5)?,
    })
}

const CONVERSATION_COLUMNS: &str =
    "clinic_id, phone, state, active_token_id, pending_name, last_interaction_at";

pub async fn get_conversation(
    db: &Database,
    clinic_id: &str,
    phone: &str,
) -> Result<Option<Conversation>, WaitlineError> {
    let clinic_id = clinic_id.to_string();
    let phone = phone.to_string();
    db.connection()
        .call(move |conn| {
            let convo = conn
                .query_row(
                    &format!(
                        "SELECT {CONVERSATION_COLUMNS} FROM conversations
                         WHERE clinic_id = ?1 AND phone = ?2"
                    ),
                    params![clinic_id, phone],
                    conversation_from_row,
                )
                .optional()?;
            Ok(convo)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Insert-or-replace the full conversation row. The dispatcher always writes
/// a complete next state, so upsert semantics are exactly what it needs.
pub async fn upsert_conversation(
    db: &Database,
    convo: &Conversation,
) -> Result<(), WaitlineError> {
    let convo = convo.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO conversations
                 (clinic_id, phone, state, active_token_id, pending_name, last_interaction_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (clinic_id, phone) DO UPDATE SET
                     state = excluded.state,
                     active_token_id = excluded.active_token_id,
                     pending_name = excluded.pending_name,
                     last_interaction_at = excluded.last_interaction_at",
                params![
                    convo.clinic_id,
                    convo.phone,
                    convo.state.to_string(),
                    convo.active_token_id,
                    convo.pending_name,
                    convo.last_interaction_at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}
