// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session lifecycle operations.
//!
//! Status transitions are guarded inside the SQL itself (`WHERE status = ...`),
//! so an invalid transition is rejected without mutating anything.

use rusqlite::params;
use waitline_core::{Session, SessionStatus, WaitlineError};

use crate::database::Database;
use crate::queries::parse_enum;

pub(crate) fn session_from_row(row: &rusqlite::Row<'_>) -> Result<Session, rusqlite::Error> {
    Ok(Session {
        id: row.get(0)?,
        clinic_id: row.get(1)?,
        date: row.get(2)?,
        status: parse_enum(3, row.get::<_, String>(3)?)?,
        last_normal_number: row.get(4)?,
        last_priority_number: row.get(5)?,
        now_serving_number: row.get(6)?,
        created_at: row.get(7)?,
        closed_at: row.get(8)?,
    })
}

pub(crate) const SESSION_COLUMNS: &str =
    "id, clinic_id, date, status, last_normal_number, last_priority_number,
     now_serving_number, created_at, closed_at";

/// Get a session by id.
pub async fn get_session(db: &Database, id: &str) -> Result<Option<Session>, WaitlineError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let result = conn.query_row(
                &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                params![id],
                session_from_row,
            );
            match result {
                Ok(session) => Ok(Some(session)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Get the session for a clinic and calendar date.
pub async fn get_session_by_date(
    db: &Database,
    clinic_id: &str,
    date: &str,
) -> Result<Option<Session>, WaitlineError> {
    let clinic_id = clinic_id.to_string();
    let date = date.to_string();
    db.connection()
        .call(move |conn| {
            let result = conn.query_row(
                &format!(
                    "SELECT {SESSION_COLUMNS} FROM sessions
                     WHERE clinic_id = ?1 AND date = ?2"
                ),
                params![clinic_id, date],
                session_from_row,
            );
            match result {
                Ok(session) => Ok(Some(session)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Create-or-resume the session for `(clinic_id, date)` in one transaction.
///
/// - no session yet: a fresh OPEN session is inserted;
/// - PAUSED: resumed to OPEN;
/// - OPEN: no-op;
/// - CLOSED: `State` error -- the per-day lifecycle is monotonic.
pub async fn start_session(
    db: &Database,
    clinic_id: &str,
    date: &str,
) -> Result<Session, WaitlineError> {
    let clinic_id = clinic_id.to_string();
    let date = date.to_string();
    let outcome = db
        .connection()
        .call(move |conn| {
            let tx = conn.transaction()?;

            let existing = tx
                .query_row(
                    &format!(
                        "SELECT {SESSION_COLUMNS} FROM sessions
                         WHERE clinic_id = ?1 AND date = ?2"
                    ),
                    params![clinic_id, date],
                    session_from_row,
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;

            let result = match existing {
                None => {
                    let id = uuid::Uuid::new_v4().to_string();
                    tx.execute(
                        "INSERT INTO sessions (id, clinic_id, date, status)
                         VALUES (?1, ?2, ?3, 'OPEN')",
                        params![id, clinic_id, date],
                    )?;
                    let session = tx.query_row(
                        &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                        params![id],
                        session_from_row,
                    )?;
                    Ok(session)
                }
                Some(session) if session.status == SessionStatus::Closed => {
                    Err(WaitlineError::State(format!(
                        "session {} for {} is CLOSED and cannot be restarted",
                        session.id, session.date
                    )))
                }
                Some(mut session) => {
                    if session.status == SessionStatus::Paused {
                        tx.execute(
                            "UPDATE sessions SET status = 'OPEN' WHERE id = ?1",
                            params![session.id],
                        )?;
                        session.status = SessionStatus::Open;
                    }
                    Ok(session)
                }
            };

            tx.commit()?;
            Ok(result)
        })
        .await
        .map_err(crate::database::map_tr_err)?;
    outcome
}

/// Guarded single-status transition. Returns the session's current status
/// when the guard does not match, so callers can build a `State` error.
async fn transition(
    db: &Database,
    id: &str,
    from: &[SessionStatus],
    to: SessionStatus,
    set_closed_at: bool,
) -> Result<(), WaitlineError> {
    let id_owned = id.to_string();
    let from_list: Vec<String> = from.iter().map(|s| s.to_string()).collect();
    let to_str = to.to_string();
    let failed_status: Option<Option<String>> = db
        .connection()
        .call(move |conn| {
            let placeholders = from_list
                .iter()
                .enumerate()
                .map(|(i, _)| format!("?{}", i + 3))
                .collect::<Vec<_>>()
                .join(", ");
            let closed_clause = if set_closed_at {
                ", closed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')"
            } else {
                ""
            };
            let sql = format!(
                "UPDATE sessions SET status = ?1{closed_clause}
                 WHERE id = ?2 AND status IN ({placeholders})"
            );
            let mut args: Vec<&dyn rusqlite::ToSql> = vec![&to_str, &id_owned];
            for s in &from_list {
                args.push(s);
            }
            let changed = conn.execute(&sql, args.as_slice())?;
            if changed == 1 {
                return Ok(None);
            }
            // Guard failed: report the current status (or a missing row).
            let current = conn
                .query_row(
                    "SELECT status FROM sessions WHERE id = ?1",
                    params![id_owned],
                    |row| row.get::<_, String>(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;
            Ok(Some(current))
        })
        .await
        .map_err(crate::database::map_tr_err)?;

    match failed_status {
        None => Ok(()),
        Some(Some(current)) => Err(WaitlineError::State(format!(
            "session {id} is {current}, cannot transition to {to}"
        ))),
        Some(None) => Err(WaitlineError::State(format!("session {id} does not exist"))),
    }
}

/// OPEN -> PAUSED.
pub async fn pause_session(db: &Database, id: &str) -> Result<(), WaitlineError> {
    transition(db, id, &[SessionStatus::Open], SessionStatus::Paused, false).await
}

/// PAUSED -> OPEN.
pub async fn resume_session(db: &Database, id: &str) -> Result<(), WaitlineError> {
    transition(db, id, &[SessionStatus::Paused], SessionStatus::Open, false).await
}

/// OPEN | PAUSED -> CLOSED (terminal).
pub async fn close_session(db: &Database, id: &str) -> Result<(), WaitlineError> {
    transition(
        db,
        id,
        &[SessionStatus::Open, SessionStatus::Paused],
        SessionStatus::Closed,
        true,
    )
    .await
}

/// Privileged force-close: one transaction that cancels every
/// WAITING/WAITING_LATE token, closes the session, and writes one audit
/// record. Partial completion is never observable.
///
/// Returns the number of cancelled tokens.
pub async fn force_close_session(
    db: &Database,
    id: &str,
    reason: &str,
    actor: &str,
) -> Result<i64, WaitlineError> {
    let id_owned = id.to_string();
    let reason = reason.to_string();
    let actor = actor.to_string();
    let outcome = db
        .connection()
        .call(move |conn| {
            let tx = conn.transaction()?;

            let session = tx
                .query_row(
                    &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
                    params![id_owned],
                    session_from_row,
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;

            let result = match session {
                None => Err(WaitlineError::State(format!(
                    "session {id_owned} does not exist"
                ))),
                Some(session) if session.status == SessionStatus::Closed => Err(
                    WaitlineError::State(format!("session {id_owned} is already CLOSED")),
                ),
                Some(session) => {
                    let cancelled = tx.execute(
                        "UPDATE tokens SET status = 'CANCELLED',
                         completed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                         WHERE session_id = ?1
                           AND status IN ('WAITING', 'WAITING_LATE')",
                        params![session.id],
                    )?;
                    tx.execute(
                        "UPDATE sessions SET status = 'CLOSED',
                         closed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                         WHERE id = ?1",
                        params![session.id],
                    )?;
                    tx.execute(
                        "INSERT INTO audit_log (clinic_id, actor, action, detail)
                         VALUES (?1, ?2, 'force_close', ?3)",
                        params![
                            session.clinic_id,
                            actor,
                            format!("session={} cancelled={} reason={}", session.id, cancelled, reason),
                        ],
                    )?;
                    Ok(cancelled as i64)
                }
            };

            tx.commit()?;
            Ok(result)
        })
        .await
        .map_err(crate::database::map_tr_err)?;
    outcome
}
