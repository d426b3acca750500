// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Realtime reconciliation client: keeps a viewer's copy of one clinic's
//! queue consistent through change notifications, adaptive polling,
//! optimistic local mutation, and a durable offline cache.

pub mod cache;
pub mod command;
pub mod reconciler;
pub mod source;
pub mod state;

pub use cache::SnapshotCache;
pub use command::{CallNextCommand, SyncCommand};
pub use reconciler::{Reconciler, ReconcilerHandle, SyncEvent, SyncTimings, Visibility};
pub use source::{QueueSource, SnapshotSource};
pub use state::{ClientView, Snapshot};
