// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP gateway: webhook receipt (verified and rate limited), the public
//! token status endpoint, and the health probe.

pub mod ratelimit;
pub mod server;
pub mod signature;
pub mod webhook;

pub use server::{router, serve, GatewayState};
