// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Typed query modules, one per entity.
//!
//! Every function routes through the single tokio-rusqlite writer thread;
//! the multi-statement operations (issuance, promotion, force-close) run as
//! explicit transactions inside one `call`.

pub mod clinics;
pub mod conversations;
pub mod outbox;
pub mod sessions;
pub mod tokens;
pub mod webhook_dedup;

use std::str::FromStr;

/// Parse a stored enum column, mapping a bad value to a rusqlite conversion
/// error so it surfaces through the normal error path.
pub(crate) fn parse_enum<T>(idx: usize, raw: String) -> Result<T, rusqlite::Error>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    T::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}
