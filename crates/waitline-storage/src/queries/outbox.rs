// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound message log with fixed-backoff retry bookkeeping.
//!
//! The outbox is written inside the same request handling that produced the
//! message; actually sending is the notify sweeper's job. A message is
//! retried with a fixed backoff until `attempts` reaches `max_attempts`,
//! then parked as FAILED.

use rusqlite::{params, OptionalExtension};
use waitline_core::{OutboxEntry, WaitlineError};

use crate::database::Database;

fn entry_from_row(row: &rusqlite::Row<'_>) -> Result<OutboxEntry, rusqlite::Error> {
    Ok(OutboxEntry {
        id: row.get(0)?,
        clinic_id: row.get(1)?,
        token_id: row.get(2)?,
        phone_encrypted: row.get(3)?,
        body: row.get(4)?,
        kind: row.get(5)?,
        status: row.get(6)?,
        attempts: row.get(7)?,
        max_attempts: row.get(8)?,
        next_retry_at: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

const ENTRY_COLUMNS: &str =
    "id, clinic_id, token_id, phone_encrypted, body, kind, status, attempts,
     max_attempts, next_retry_at, created_at, updated_at";

/// A message to enqueue; ids and timestamps are assigned by the store.
#[derive(Debug, Clone)]
pub struct NewOutboxMessage {
    pub clinic_id: String,
    pub token_id: Option<String>,
    pub phone_encrypted: String,
    pub body: String,
    /// "text" | "template" | "buttons".
    pub kind: String,
    pub max_attempts: i64,
}

/// Append a PENDING message; returns the row id.
pub async fn enqueue(db: &Database, msg: NewOutboxMessage) -> Result<i64, WaitlineError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO outbox
                 (clinic_id, token_id, phone_encrypted, body, kind, max_attempts)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    msg.clinic_id,
                    msg.token_id,
                    msg.phone_encrypted,
                    msg.body,
                    msg.kind,
                    msg.max_attempts,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// PENDING entries whose retry time has arrived (or that never failed),
/// oldest first, capped at `limit`.
pub async fn due_pending(
    db: &Database,
    now: &str,
    limit: i64,
) -> Result<Vec<OutboxEntry>, WaitlineError> {
    let now = now.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM outbox
                 WHERE status = 'PENDING'
                   AND (next_retry_at IS NULL OR next_retry_at <= ?1)
                 ORDER BY id ASC
                 LIMIT ?2"
            ))?;
            let entries = stmt
                .query_map(params![now, limit], entry_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(entries)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn mark_sent(db: &Database, id: i64) -> Result<(), WaitlineError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE outbox SET status = 'SENT',
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![id],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Record one failed delivery attempt. Stays PENDING with `next_retry_at`
/// pushed out by `backoff_secs` until attempts reach max, then FAILED.
pub async fn mark_failed_attempt(
    db: &Database,
    id: i64,
    backoff_secs: i64,
) -> Result<(), WaitlineError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE outbox SET
                     attempts = attempts + 1,
                     status = CASE WHEN attempts + 1 >= max_attempts
                              THEN 'FAILED' ELSE 'PENDING' END,
                     next_retry_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now', ?2 || ' seconds'),
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![id, backoff_secs],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Park an entry as FAILED regardless of remaining attempts, for
/// non-retryable failures (provider rejected the payload, sealed phone
/// failed authentication).
pub async fn park_failed(db: &Database, id: i64) -> Result<(), WaitlineError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE outbox SET status = 'FAILED',
                 updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![id],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

pub async fn get_entry(db: &Database, id: i64) -> Result<Option<OutboxEntry>, WaitlineError> {
    db.connection()
        .call(move |conn| {
            let entry = conn
                .query_row(
                    &format!("SELECT {ENTRY_COLUMNS} FROM outbox WHERE id = ?1"),
                    params![id],
                    entry_from_row,
                )
                .optional()?;
            Ok(entry)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use waitline_core::types::now_iso;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("t.db").to_str().unwrap())
            .await
            .unwrap();
        (db, dir)
    }

    fn message() -> NewOutboxMessage {
        NewOutboxMessage {
            clinic_id: "c1".into(),
            token_id: Some("t1".into()),
            phone_encrypted: "iv.ct".into(),
            body: "Your token is #3".into(),
            kind: "text".into(),
            max_attempts: 3,
        }
    }

    #[tokio::test]
    async fn enqueue_makes_entry_immediately_due() {
        let (db, _dir) = setup_db().await;
        let id = enqueue(&db, message()).await.unwrap();

        let due = due_pending(&db, &now_iso(), 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, id);
        assert_eq!(due[0].status, "PENDING");
        assert_eq!(due[0].attempts, 0);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn sent_entries_leave_the_due_set() {
        let (db, _dir) = setup_db().await;
        let id = enqueue(&db, message()).await.unwrap();
        mark_sent(&db, id).await.unwrap();

        assert!(due_pending(&db, &now_iso(), 10).await.unwrap().is_empty());
        let entry = get_entry(&db, id).await.unwrap().unwrap();
        assert_eq!(entry.status, "SENT");
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn failed_attempt_defers_retry_until_backoff_elapses() {
        let (db, _dir) = setup_db().await;
        let id = enqueue(&db, message()).await.unwrap();
        mark_failed_attempt(&db, id, 300).await.unwrap();

        let entry = get_entry(&db, id).await.unwrap().unwrap();
        assert_eq!(entry.status, "PENDING");
        assert_eq!(entry.attempts, 1);
        let retry_at = entry.next_retry_at.unwrap();
        assert!(retry_at > now_iso(), "retry time is in the future");

        // Not due now, due once the clock passes next_retry_at.
        assert!(due_pending(&db, &now_iso(), 10).await.unwrap().is_empty());
        let later = due_pending(&db, &retry_at, 10).await.unwrap();
        assert_eq!(later.len(), 1);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn exhausted_attempts_park_entry_as_failed() {
        let (db, _dir) = setup_db().await;
        let id = enqueue(&db, message()).await.unwrap();

        mark_failed_attempt(&db, id, 0).await.unwrap();
        mark_failed_attempt(&db, id, 0).await.unwrap();
        mark_failed_attempt(&db, id, 0).await.unwrap();

        let entry = get_entry(&db, id).await.unwrap().unwrap();
        assert_eq!(entry.status, "FAILED");
        assert_eq!(entry.attempts, 3);

        // FAILED entries are never picked up again.
        assert!(due_pending(&db, "9999-12-31T00:00:00.000Z", 10)
            .await
            .unwrap()
            .is_empty());
        db.close().await.unwrap();
    }
}
