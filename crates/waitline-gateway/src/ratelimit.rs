// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-IP fixed-window rate limiting for the webhook endpoint.
//!
//! Checked before any signature work, so a flood is rejected at the cost
//! of one map lookup rather than an HMAC per request.

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// One prune per this many checks keeps the sweep cost amortized to
/// almost nothing while still evicting one-shot scanners.
const CHECKS_PER_PRUNE: u64 = 64;

struct Window {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    windows: DashMap<IpAddr, Window>,
    max_requests: u32,
    window: Duration,
    checks: AtomicU64,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max_requests,
            window,
            checks: AtomicU64::new(0),
        }
    }

    /// Record one request from `ip`; `false` means over the limit.
    pub fn check(&self, ip: IpAddr) -> bool {
        // Prune before taking the entry guard: retain locks shards and
        // must not run while we hold one.
        if self.checks.fetch_add(1, Ordering::Relaxed) % CHECKS_PER_PRUNE == CHECKS_PER_PRUNE - 1 {
            self.prune();
        }
        let now = Instant::now();
        let mut entry = self.windows.entry(ip).or_insert(Window {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }
        entry.count += 1;
        entry.count <= self.max_requests
    }

    /// Drop windows that lapsed a full period ago.
    fn prune(&self) {
        let now = Instant::now();
        let horizon = self.window * 2;
        self.windows
            .retain(|_, w| now.duration_since(w.started) < horizon);
    }
}
