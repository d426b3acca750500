// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Token issuance, promotion, and the per-token status transitions.
//!
//! Every multi-step operation here runs as a single SQLite transaction on
//! the database's one writer thread, which is what makes issuance numbers
//! linearizable: no two transactions can interleave between the counter
//! increment and the row insert.

use rusqlite::{params, OptionalExtension, Transaction};
use waitline_core::{SessionStatus, Token, TokenStatus, WaitlineError};

use crate::database::Database;
use crate::queries::parse_enum;

pub(crate) fn token_from_row(row: &rusqlite::Row<'_>) -> Result<Token, rusqlite::Error> {
    Ok(Token {
        id: row.get(0)?,
        session_id: row.get(1)?,
        clinic_id: row.get(2)?,
        token_number: row.get(3)?,
        is_priority: row.get(4)?,
        status: parse_enum(5, row.get::<_, String>(5)?)?,
        customer_name: row.get(6)?,
        customer_phone_encrypted: row.get(7)?,
        customer_phone_hash: row.get(8)?,
        is_arrived: row.get(9)?,
        department_id: row.get(10)?,
        doctor_id: row.get(11)?,
        rating: row.get(12)?,
        feedback: row.get(13)?,
        created_at: row.get(14)?,
        completed_at: row.get(15)?,
    })
}

pub(crate) const TOKEN_COLUMNS: &str =
    "id, session_id, clinic_id, token_number, is_priority, status, customer_name,
     customer_phone_encrypted, customer_phone_hash, is_arrived, department_id,
     doctor_id, rating, feedback, created_at, completed_at";

/// Everything issuance needs; the caller resolves clinic config (limit) and
/// seals the phone before we ever touch the database.
#[derive(Debug, Clone)]
pub struct IssueRequest {
    pub clinic_id: String,
    /// Calendar date of the session to issue into, `YYYY-MM-DD`.
    pub date: String,
    pub customer_name: String,
    pub phone_encrypted: String,
    pub phone_hash: String,
    pub is_priority: bool,
    pub department_id: Option<String>,
    pub doctor_id: Option<String>,
    /// Active-token cap for the session; refusals report this back.
    pub daily_limit: i64,
}

/// Outcome of one issuance attempt. Refusals are data, not errors, so the
/// conversational layer can phrase each one differently.
#[derive(Debug, Clone)]
pub enum IssueOutcome {
    Created(Token),
    /// This phone already holds an active token in this clinic.
    Duplicate { existing_token_id: String },
    /// The session's active-token cap is reached.
    LimitReached { limit: i64 },
    /// The session is not accepting tokens (PAUSED or CLOSED).
    Refused { status: SessionStatus },
}

fn get_token_tx(tx: &Transaction<'_>, id: &str) -> Result<Option<Token>, rusqlite::Error> {
    tx.query_row(
        &format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE id = ?1"),
        params![id],
        token_from_row,
    )
    .optional()
}

/// Issue a token inside one transaction: resolve (or create) the day's
/// session, enforce the dedup and daily-limit invariants, post-increment
/// the correct counter, and insert the row.
pub async fn issue_token(db: &Database, req: IssueRequest) -> Result<IssueOutcome, WaitlineError> {
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;

            // Resolve the session, auto-creating an OPEN one for the day.
            let session: Option<(String, String)> = tx
                .query_row(
                    "SELECT id, status FROM sessions WHERE clinic_id = ?1 AND date = ?2",
                    params![req.clinic_id, req.date],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let (session_id, status) = match session {
                Some(pair) => pair,
                None => {
                    let id = uuid::Uuid::new_v4().to_string();
                    tx.execute(
                        "INSERT INTO sessions (id, clinic_id, date, status)
                         VALUES (?1, ?2, ?3, 'OPEN')",
                        params![id, req.clinic_id, req.date],
                    )?;
                    (id, "OPEN".to_string())
                }
            };
            if status != "OPEN" {
                let status = parse_enum::<SessionStatus>(3, status)?;
                tx.commit()?;
                return Ok(IssueOutcome::Refused { status });
            }

            // One active token per phone per clinic.
            let existing: Option<String> = tx
                .query_row(
                    "SELECT id FROM tokens
                     WHERE clinic_id = ?1 AND customer_phone_hash = ?2
                       AND status IN ('WAITING', 'WAITING_LATE', 'SERVING')",
                    params![req.clinic_id, req.phone_hash],
                    |row| row.get(0),
                )
                .optional()?;
            if let Some(existing_token_id) = existing {
                tx.commit()?;
                return Ok(IssueOutcome::Duplicate { existing_token_id });
            }

            // Daily cap counts active tokens only; served and cancelled
            // visits free up capacity.
            let active: i64 = tx.query_row(
                "SELECT COUNT(*) FROM tokens
                 WHERE session_id = ?1
                   AND status IN ('WAITING', 'WAITING_LATE', 'SERVING')",
                params![session_id],
                |row| row.get(0),
            )?;
            if active >= req.daily_limit {
                tx.commit()?;
                return Ok(IssueOutcome::LimitReached {
                    limit: req.daily_limit,
                });
            }

            // Post-increment the counter for this token's number space and
            // read the value back inside the same transaction.
            let counter = if req.is_priority {
                "last_priority_number"
            } else {
                "last_normal_number"
            };
            tx.execute(
                &format!("UPDATE sessions SET {counter} = {counter} + 1 WHERE id = ?1"),
                params![session_id],
            )?;
            let number: i64 = tx.query_row(
                &format!("SELECT {counter} FROM sessions WHERE id = ?1"),
                params![session_id],
                |row| row.get(0),
            )?;

            let token_id = uuid::Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO tokens (id, session_id, clinic_id, token_number, is_priority,
                 status, customer_name, customer_phone_encrypted, customer_phone_hash,
                 department_id, doctor_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'WAITING', ?6, ?7, ?8, ?9, ?10)",
                params![
                    token_id,
                    session_id,
                    req.clinic_id,
                    number,
                    req.is_priority,
                    req.customer_name,
                    req.phone_encrypted,
                    req.phone_hash,
                    req.department_id,
                    req.doctor_id,
                ],
            )?;
            let token = get_token_tx(&tx, &token_id)?.ok_or_else(|| {
                rusqlite::Error::QueryReturnedNoRows
            })?;
            tx.commit()?;
            Ok(IssueOutcome::Created(token))
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Advance the queue: mark the current SERVING token SERVED and promote the
/// next waiting token, priority space first, lowest number first. Both steps
/// share one transaction. Returns the newly serving token, or `None` when
/// the queue is drained.
///
/// With a `doctor_id`, only that doctor's current visit is completed and
/// only tokens routed to that doctor (or unrouted ones) are eligible.
pub async fn promote_next(
    db: &Database,
    session_id: &str,
    doctor_id: Option<&str>,
) -> Result<Option<Token>, WaitlineError> {
    let session_id = session_id.to_string();
    let doctor_id = doctor_id.map(|d| d.to_string());
    let outcome = db
        .connection()
        .call(move |conn| {
            let tx = conn.transaction()?;

            let status: Option<String> = tx
                .query_row(
                    "SELECT status FROM sessions WHERE id = ?1",
                    params![session_id],
                    |row| row.get(0),
                )
                .optional()?;
            let result = match status.as_deref() {
                None => Err(WaitlineError::State(format!(
                    "session {session_id} does not exist"
                ))),
                Some(s) if s != "OPEN" => Err(WaitlineError::State(format!(
                    "session {session_id} is {s}, cannot call next"
                ))),
                Some(_) => {
                    match &doctor_id {
                        Some(doctor) => tx.execute(
                            "UPDATE tokens SET status = 'SERVED',
                             completed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                             WHERE session_id = ?1 AND status = 'SERVING'
                               AND doctor_id = ?2",
                            params![session_id, doctor],
                        )?,
                        None => tx.execute(
                            "UPDATE tokens SET status = 'SERVED',
                             completed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                             WHERE session_id = ?1 AND status = 'SERVING'",
                            params![session_id],
                        )?,
                    };

                    let next: Option<String> = match &doctor_id {
                        Some(doctor) => tx
                            .query_row(
                                "SELECT id FROM tokens
                                 WHERE session_id = ?1 AND status = 'WAITING'
                                   AND (doctor_id = ?2 OR doctor_id IS NULL)
                                 ORDER BY is_priority DESC, token_number ASC
                                 LIMIT 1",
                                params![session_id, doctor],
                                |row| row.get(0),
                            )
                            .optional()?,
                        None => tx
                            .query_row(
                                "SELECT id FROM tokens
                                 WHERE session_id = ?1 AND status = 'WAITING'
                                 ORDER BY is_priority DESC, token_number ASC
                                 LIMIT 1",
                                params![session_id],
                                |row| row.get(0),
                            )
                            .optional()?,
                    };

                    match next {
                        None => Ok(None),
                        Some(id) => {
                            tx.execute(
                                "UPDATE tokens SET status = 'SERVING' WHERE id = ?1",
                                params![id],
                            )?;
                            let token = get_token_tx(&tx, &id)?
                                .ok_or(rusqlite::Error::QueryReturnedNoRows)?;
                            tx.execute(
                                "UPDATE sessions SET now_serving_number = ?1 WHERE id = ?2",
                                params![token.token_number, session_id],
                            )?;
                            Ok(Some(token))
                        }
                    }
                }
            };

            tx.commit()?;
            Ok(result)
        })
        .await
        .map_err(crate::database::map_tr_err)?;
    outcome
}

/// Guarded token transition; `State` error when the token is missing or the
/// `from` guard does not hold, same shape as the session transitions.
async fn transition(
    db: &Database,
    id: &str,
    from: &[TokenStatus],
    set_sql: &'static str,
    to_label: &'static str,
) -> Result<(), WaitlineError> {
    let id_owned = id.to_string();
    let from_list: Vec<String> = from.iter().map(|s| s.to_string()).collect();
    let failed_status: Option<Option<String>> = db
        .connection()
        .call(move |conn| {
            let placeholders = from_list
                .iter()
                .enumerate()
                .map(|(i, _)| format!("?{}", i + 2))
                .collect::<Vec<_>>()
                .join(", ");
            let sql =
                format!("UPDATE tokens {set_sql} WHERE id = ?1 AND status IN ({placeholders})");
            let mut args: Vec<&dyn rusqlite::ToSql> = vec![&id_owned];
            for s in &from_list {
                args.push(s);
            }
            let changed = conn.execute(&sql, args.as_slice())?;
            if changed == 1 {
                return Ok(None);
            }
            let current = conn
                .query_row(
                    "SELECT status FROM tokens WHERE id = ?1",
                    params![id_owned],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            Ok(Some(current))
        })
        .await
        .map_err(crate::database::map_tr_err)?;

    match failed_status {
        None => Ok(()),
        Some(Some(current)) => Err(WaitlineError::State(format!(
            "token {id} is {current}, cannot {to_label}"
        ))),
        Some(None) => Err(WaitlineError::State(format!("token {id} does not exist"))),
    }
}

/// Pull a token out of the queue without serving it. SKIPPED is recallable.
pub async fn skip_token(db: &Database, id: &str) -> Result<(), WaitlineError> {
    transition(
        db,
        id,
        &[
            TokenStatus::Serving,
            TokenStatus::Waiting,
            TokenStatus::WaitingLate,
        ],
        "SET status = 'SKIPPED'",
        "skip",
    )
    .await
}

/// Cancel an active or skipped token. Terminal tokens stay as they are.
pub async fn cancel_token(db: &Database, id: &str) -> Result<(), WaitlineError> {
    transition(
        db,
        id,
        &[
            TokenStatus::Waiting,
            TokenStatus::WaitingLate,
            TokenStatus::Serving,
            TokenStatus::Skipped,
        ],
        "SET status = 'CANCELLED', completed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
        "cancel",
    )
    .await
}

/// Put a SKIPPED token back into the waiting queue; it keeps its original
/// number, so it re-enters at its old position.
pub async fn recall_token(db: &Database, id: &str) -> Result<(), WaitlineError> {
    transition(
        db,
        id,
        &[TokenStatus::Skipped],
        "SET status = 'WAITING'",
        "recall",
    )
    .await
}

/// Patient checked in at the desk. A late token rejoins the normal queue.
pub async fn set_arrived(db: &Database, id: &str) -> Result<(), WaitlineError> {
    transition(
        db,
        id,
        &[TokenStatus::Waiting, TokenStatus::WaitingLate],
        "SET is_arrived = 1, status = 'WAITING'",
        "mark arrived",
    )
    .await
}

/// Flag a not-yet-arrived waiting token as late; it stays promotable but
/// surfaces differently in displays.
pub async fn mark_late(db: &Database, id: &str) -> Result<(), WaitlineError> {
    let id_owned = id.to_string();
    let changed = db
        .connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE tokens SET status = 'WAITING_LATE'
                 WHERE id = ?1 AND status = 'WAITING' AND is_arrived = 0",
                params![id_owned],
            )?;
            Ok(changed)
        })
        .await
        .map_err(crate::database::map_tr_err)?;
    if changed == 1 {
        Ok(())
    } else {
        Err(WaitlineError::State(format!(
            "token {id} is not an unarrived WAITING token"
        )))
    }
}

/// Attach rating (1-5) and optional free text to a SERVED token.
pub async fn record_feedback(
    db: &Database,
    id: &str,
    rating: i64,
    feedback: Option<&str>,
) -> Result<(), WaitlineError> {
    if !(1..=5).contains(&rating) {
        return Err(WaitlineError::Validation(format!(
            "rating must be 1-5, got {rating}"
        )));
    }
    let id_owned = id.to_string();
    let feedback = feedback.map(|f| f.to_string());
    let changed = db
        .connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE tokens SET rating = ?2, feedback = ?3
                 WHERE id = ?1 AND status = 'SERVED'",
                params![id_owned, rating, feedback],
            )?;
            Ok(changed)
        })
        .await
        .map_err(crate::database::map_tr_err)?;
    if changed == 1 {
        Ok(())
    } else {
        Err(WaitlineError::State(format!(
            "token {id} is not SERVED, feedback refused"
        )))
    }
}

pub async fn get_token(db: &Database, id: &str) -> Result<Option<Token>, WaitlineError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let token = conn
                .query_row(
                    &format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE id = ?1"),
                    params![id],
                    token_from_row,
                )
                .optional()?;
            Ok(token)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// The phone's active token in this clinic, if any.
pub async fn active_token_for_phone(
    db: &Database,
    clinic_id: &str,
    phone_hash: &str,
) -> Result<Option<Token>, WaitlineError> {
    let clinic_id = clinic_id.to_string();
    let phone_hash = phone_hash.to_string();
    db.connection()
        .call(move |conn| {
            let token = conn
                .query_row(
                    &format!(
                        "SELECT {TOKEN_COLUMNS} FROM tokens
                         WHERE clinic_id = ?1 AND customer_phone_hash = ?2
                           AND status IN ('WAITING', 'WAITING_LATE', 'SERVING')"
                    ),
                    params![clinic_id, phone_hash],
                    token_from_row,
                )
                .optional()?;
            Ok(token)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Waiting tokens that will be promoted before this one: any waiting
/// priority token when this is normal, plus lower numbers in its own space.
pub async fn count_ahead(db: &Database, token: &Token) -> Result<i64, WaitlineError> {
    let session_id = token.session_id.clone();
    let is_priority = token.is_priority;
    let number = token.token_number;
    db.connection()
        .call(move |conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM tokens
                 WHERE session_id = ?1
                   AND status IN ('WAITING', 'WAITING_LATE')
                   AND (is_priority > ?2
                        OR (is_priority = ?2 AND token_number < ?3))",
                params![session_id, is_priority, number],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// All tokens in a session in service order, for board displays.
pub async fn tokens_for_session(
    db: &Database,
    session_id: &str,
) -> Result<Vec<Token>, WaitlineError> {
    let session_id = session_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TOKEN_COLUMNS} FROM tokens
                 WHERE session_id = ?1
                 ORDER BY is_priority DESC, token_number ASC"
            ))?;
            let tokens = stmt
                .query_map(params![session_id], token_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tokens)
        })
        .await
        .map_err(crate::database::map_tr_err)
}
