// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence for the waitline workspace.
//!
//! One [`Database`] per process; every access goes through the single
//! background writer thread, and every multi-step invariant (issuance
//! numbering, promotion, force-close) is one SQLite transaction on it.

pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;

pub use database::Database;
