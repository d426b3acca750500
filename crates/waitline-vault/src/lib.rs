// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Phone vault for the waitline queue service.
//!
//! Protects personally identifying contact data while still allowing
//! deduplication (HMAC hash) and messaging (decrypt at send time). Key
//! rotation is an offline batch built on [`PhoneVault::rotate_phone`].

pub mod crypto;
pub mod phone;

pub use phone::{normalize_phone, PhoneVault};
