// SPDX-FileCopyrightText: 2026 Waitline Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The reconciliation loop: one task per viewed clinic that merges
//! change-feed events, timer ticks, visibility changes, and optimistic
//! commands into a single event stream feeding one idempotent resync.
//!
//! Scheduling rules:
//! - change events arm a short debounce so a burst costs one fetch;
//! - while connected, a long heartbeat guards against a dropped feed;
//! - while disconnected, polls back off exponentially up to a cap, and
//!   stop entirely when the viewer is also backgrounded;
//! - returning to the foreground resets the backoff and fetches at once.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use waitline_core::WaitlineError;

use crate::cache::SnapshotCache;
use crate::command::SyncCommand;
use crate::source::SnapshotSource;
use crate::state::{regresses, ClientView, Snapshot};

#[derive(Debug, Clone)]
pub struct SyncTimings {
    /// Coalescing window for change-feed events.
    pub debounce: Duration,
    /// Minimum gap between consecutive optimistic commands.
    pub action_debounce: Duration,
    /// Poll interval while the change feed is believed healthy.
    pub heartbeat: Duration,
    /// First reconnect delay after a failed fetch.
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    /// Window after an optimistic mutation during which authoritative
    /// snapshots are ignored to absorb replica lag.
    pub blackout: Duration,
}

impl Default for SyncTimings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(100),
            action_debounce: Duration::from_millis(500),
            heartbeat: Duration::from_secs(45),
            backoff_base: Duration::from_secs(3),
            backoff_cap: Duration::from_secs(30),
            blackout: Duration::from_millis(2500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Foreground,
    Background,
}

pub enum SyncEvent {
    /// Something changed server-side; refetch soon.
    Changed,
    Visibility(Visibility),
    Command(Box<dyn SyncCommand>),
}

/// Cheap cloneable handle for feeding the loop and observing its view.
#[derive(Clone)]
pub struct ReconcilerHandle {
    events: mpsc::Sender<SyncEvent>,
    view: watch::Receiver<ClientView>,
}

impl ReconcilerHandle {
    pub async fn notify_changed(&self) {
        let _ = self.events.send(SyncEvent::Changed).await;
    }

    pub async fn set_visibility(&self, visibility: Visibility) {
        let _ = self.events.send(SyncEvent::Visibility(visibility)).await;
    }

    pub async fn submit(&self, command: Box<dyn SyncCommand>) {
        let _ = self.events.send(SyncEvent::Command(command)).await;
    }

    pub fn view(&self) -> ClientView {
        self.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ClientView> {
        self.view.clone()
    }
}

struct Backoff {
    base: Duration,
    cap: Duration,
    current: Option<Duration>,
}

impl Backoff {
    fn new(base: Duration, cap: Duration) -> Self {
        Self {
            base,
            cap,
            current: None,
        }
    }

    fn next(&mut self) -> Duration {
        let next = match self.current {
            None => self.base,
            Some(d) => (d * 2).min(self.cap),
        };
        self.current = Some(next);
        next
    }

    fn reset(&mut self) {
        self.current = None;
    }
}

type InflightCommand =
    BoxFuture<'static, (Box<dyn SyncCommand>, Option<Snapshot>, Result<(), WaitlineError>)>;

pub struct Reconciler {
    source: Arc<dyn SnapshotSource>,
    cache: SnapshotCache,
    clinic_id: String,
    timings: SyncTimings,

    view: watch::Sender<ClientView>,
    connected: bool,
    foreground: bool,
    backoff: Backoff,
    /// Pending debounced refetch deadline, if armed.
    refetch_at: Option<Instant>,
    /// Next heartbeat or reconnect poll, if any.
    poll_at: Option<Instant>,
    blackout_until: Option<Instant>,
    last_action_at: Option<Instant>,
    inflight: FuturesUnordered<InflightCommand>,
}

impl Reconciler {
    /// Start the loop for one clinic. Runs until cancelled or every handle
    /// is dropped.
    pub fn spawn(
        source: Arc<dyn SnapshotSource>,
        cache: SnapshotCache,
        clinic_id: String,
        timings: SyncTimings,
        cancel: CancellationToken,
    ) -> ReconcilerHandle {
        let (event_tx, event_rx) = mpsc::channel(64);
        let (view_tx, view_rx) = watch::channel(ClientView::default());
        let backoff = Backoff::new(timings.backoff_base, timings.backoff_cap);
        let reconciler = Self {
            source,
            cache,
            clinic_id,
            timings,
            view: view_tx,
            connected: false,
            foreground: true,
            backoff,
            refetch_at: None,
            poll_at: None,
            blackout_until: None,
            last_action_at: None,
            inflight: FuturesUnordered::new(),
        };
        tokio::spawn(reconciler.run(event_rx, cancel));
        ReconcilerHandle {
            events: event_tx,
            view: view_rx,
        }
    }

    async fn run(mut self, mut events: mpsc::Receiver<SyncEvent>, cancel: CancellationToken) {
        // Activation: one full fetch before anything else.
        self.resync().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!(clinic_id = %self.clinic_id, "reconciler stopping");
                    return;
                }
                event = events.recv() => match event {
                    Some(event) => self.on_event(event).await,
                    None => return,
                },
                _ = deadline(self.refetch_at) => {
                    self.refetch_at = None;
                    self.resync().await;
                }
                _ = deadline(self.poll_at) => {
                    self.poll_at = None;
                    self.resync().await;
                }
                Some((command, prior, result)) = self.inflight.next() => {
                    if let Err(e) = result {
                        warn!(error = %e, "optimistic command failed, rolling back");
                        self.view.send_modify(|view| {
                            command.rollback(&mut view.snapshot, prior);
                        });
                    }
                }
            }
        }
    }

    async fn on_event(&mut self, event: SyncEvent) {
        match event {
            SyncEvent::Changed => {
                // An already-armed window absorbs the rest of the burst.
                if self.refetch_at.is_none() {
                    self.refetch_at = Some(Instant::now() + self.timings.debounce);
                }
            }
            SyncEvent::Visibility(Visibility::Foreground) => {
                self.foreground = true;
                self.backoff.reset();
                self.poll_at = None;
                self.resync().await;
            }
            SyncEvent::Visibility(Visibility::Background) => {
                self.foreground = false;
                if !self.connected {
                    debug!("backgrounded while disconnected, polling suspended");
                    self.poll_at = None;
                }
            }
            SyncEvent::Command(command) => self.on_command(command),
        }
    }

    fn on_command(&mut self, command: Box<dyn SyncCommand>) {
        let now = Instant::now();
        if let Some(last) = self.last_action_at {
            if now.duration_since(last) < self.timings.action_debounce {
                debug!("command dropped as a duplicate submission");
                return;
            }
        }
        self.last_action_at = Some(now);
        self.blackout_until = Some(now + self.timings.blackout);

        let prior = self.view.borrow().snapshot.clone();
        self.view.send_modify(|view| {
            if let Some(snapshot) = view.snapshot.as_mut() {
                command.optimistic_apply(snapshot);
            }
        });
        self.inflight.push(
            async move {
                let result = command.execute().await;
                (command, prior, result)
            }
            .boxed(),
        );
    }

    /// One idempotent resync round trip, shared by every trigger.
    async fn resync(&mut self) {
        match self.source.fetch(&self.clinic_id).await {
            Ok(snapshot) => {
                if !self.connected {
                    info!(clinic_id = %self.clinic_id, "reconciler connected");
                }
                self.connected = true;
                self.backoff.reset();
                self.view.send_modify(|view| view.degraded = false);
                self.accept(snapshot);
                self.poll_at = Some(Instant::now() + self.timings.heartbeat);
            }
            Err(e) => {
                warn!(clinic_id = %self.clinic_id, error = %e, "snapshot fetch failed");
                self.connected = false;
                let cached = if self.view.borrow().snapshot.is_none() {
                    self.cache.load(&self.clinic_id)
                } else {
                    None
                };
                self.view.send_modify(|view| {
                    view.degraded = true;
                    if view.snapshot.is_none() {
                        view.snapshot = cached;
                    }
                });
                self.poll_at = if self.foreground {
                    Some(Instant::now() + self.backoff.next())
                } else {
                    None
                };
            }
        }
    }

    fn accept(&mut self, snapshot: Snapshot) {
        if let Some(until) = self.blackout_until {
            if Instant::now() < until {
                debug!("snapshot ignored inside post-mutation blackout");
                return;
            }
            self.blackout_until = None;
        }
        let stale = {
            let view = self.view.borrow();
            view.snapshot
                .as_ref()
                .is_some_and(|local| regresses(local, &snapshot))
        };
        if stale {
            debug!(clinic_id = %self.clinic_id, "stale snapshot discarded");
            return;
        }
        self.cache.store(&self.clinic_id, &snapshot);
        self.view.send_modify(|view| view.snapshot = Some(snapshot));
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
    use tempfile::tempdir;
    use waitline_core::types::now_iso;
    use waitline_core::{Session, SessionStatus};

    fn test_snapshot(now_serving: i64) -> Snapshot {
        Snapshot {
            session: Session {
                id: "s1".into(),
                clinic_id: "c1".into(),
                date: "2026-08-29".into(),
                status: SessionStatus::Open,
                last_normal_number: now_serving,
                last_priority_number: 0,
                now_serving_number: now_serving,
                created_at: now_iso(),
                closed_at: None,
            },
            tokens: Vec::new(),
            daily_limit: 50,
        }
    }

    struct ScriptedSource {
        fetches: AtomicUsize,
        serving: AtomicI64,
        fail: AtomicBool,
    }

    impl ScriptedSource {
        fn new(serving: i64) -> Arc<Self> {
            Arc::new(Self {
                fetches: AtomicUsize::new(0),
                serving: AtomicI64::new(serving),
                fail: AtomicBool::new(false),
            })
        }

        fn fetches(&self) -> usize {
            self.fetches.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SnapshotSource for ScriptedSource {
        async fn fetch(&self, _clinic_id: &str) -> Result<Snapshot, WaitlineError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(WaitlineError::Transient {
                    message: "offline".into(),
                    source: None,
                });
            }
            Ok(test_snapshot(self.serving.load(Ordering::SeqCst)))
        }
    }

    /// Command that bumps the serving number locally; scripted outcome.
    struct BumpCommand {
        applies: Arc<AtomicUsize>,
        outcome: Result<(), ()>,
    }

    #[async_trait]
    impl SyncCommand for BumpCommand {
        fn optimistic_apply(&self, snapshot: &mut Snapshot) {
            self.applies.fetch_add(1, Ordering::SeqCst);
            snapshot.session.now_serving_number += 1;
        }

        async fn execute(&self) -> Result<(), WaitlineError> {
            self.outcome.map_err(|_| WaitlineError::Transient {
                message: "request failed".into(),
                source: None,
            })
        }
    }

    fn bump(applies: &Arc<AtomicUsize>, outcome: Result<(), ()>) -> Box<dyn SyncCommand> {
        Box::new(BumpCommand {
            applies: applies.clone(),
            outcome,
        })
    }

    struct Rig {
        handle: ReconcilerHandle,
        source: Arc<ScriptedSource>,
        cancel: CancellationToken,
        _dir: tempfile::TempDir,
    }

    fn rig_with(source: Arc<ScriptedSource>) -> Rig {
        let dir = tempdir().unwrap();
        let cancel = CancellationToken::new();
        let handle = Reconciler::spawn(
            source.clone(),
            SnapshotCache::new(dir.path()),
            "c1".into(),
            SyncTimings::default(),
            cancel.clone(),
        );
        Rig {
            handle,
            source,
            cancel,
            _dir: dir,
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn activation_fetch_populates_the_view() {
        let rig = rig_with(ScriptedSource::new(3));
        settle().await;

        let view = rig.handle.view();
        assert_eq!(view.snapshot.unwrap().session.now_serving_number, 3);
        assert!(!view.degraded);
        assert_eq!(rig.source.fetches(), 1);
        rig.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn change_bursts_coalesce_into_one_refetch() {
        let rig = rig_with(ScriptedSource::new(0));
        settle().await;
        assert_eq!(rig.source.fetches(), 1);

        for _ in 0..5 {
            rig.handle.notify_changed().await;
        }
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(rig.source.fetches(), 2, "burst cost a single round trip");
        rig.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_refetches_while_connected() {
        let rig = rig_with(ScriptedSource::new(0));
        settle().await;
        assert_eq!(rig.source.fetches(), 1);

        tokio::time::sleep(Duration::from_secs(46)).await;
        assert_eq!(rig.source.fetches(), 2);
        rig.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_failure_serves_the_cache_and_recovers() {
        let source = ScriptedSource::new(9);
        source.fail.store(true, Ordering::SeqCst);

        let dir = tempdir().unwrap();
        let cache = SnapshotCache::new(dir.path());
        cache.store("c1", &test_snapshot(4));

        let cancel = CancellationToken::new();
        let handle = Reconciler::spawn(
            source.clone(),
            cache,
            "c1".into(),
            SyncTimings::default(),
            cancel.clone(),
        );
        settle().await;

        let view = handle.view();
        assert!(view.degraded);
        assert_eq!(
            view.snapshot.unwrap().session.now_serving_number,
            4,
            "served from the durable cache"
        );

        // Connectivity returns; the backoff poll resyncs opportunistically.
        source.fail.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(4)).await;
        let view = handle.view();
        assert!(!view.degraded);
        assert_eq!(view.snapshot.unwrap().session.now_serving_number, 9);
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn background_while_disconnected_suspends_polling() {
        let source = ScriptedSource::new(0);
        source.fail.store(true, Ordering::SeqCst);
        let rig = rig_with(source);
        settle().await;

        rig.handle.set_visibility(Visibility::Background).await;
        settle().await;
        let before = rig.source.fetches();

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(rig.source.fetches(), before, "no polls in the background");

        // Foreground return forces an immediate fetch.
        rig.handle.set_visibility(Visibility::Foreground).await;
        settle().await;
        assert_eq!(rig.source.fetches(), before + 1);
        rig.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_command_rolls_back_the_optimistic_state() {
        let rig = rig_with(ScriptedSource::new(7));
        settle().await;

        let applies = Arc::new(AtomicUsize::new(0));
        rig.handle.submit(bump(&applies, Err(()))).await;
        settle().await;

        assert_eq!(applies.load(Ordering::SeqCst), 1);
        let view = rig.handle.view();
        assert_eq!(
            view.snapshot.unwrap().session.now_serving_number,
            7,
            "rollback restored the prior snapshot"
        );
        rig.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_commands_are_debounced() {
        let rig = rig_with(ScriptedSource::new(7));
        settle().await;

        let applies = Arc::new(AtomicUsize::new(0));
        rig.handle.submit(bump(&applies, Ok(()))).await;
        rig.handle.submit(bump(&applies, Ok(()))).await;
        settle().await;

        assert_eq!(applies.load(Ordering::SeqCst), 1, "double-tap absorbed");
        assert_eq!(
            rig.handle.view().snapshot.unwrap().session.now_serving_number,
            8
        );
        rig.cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn blackout_and_regression_guard_protect_local_state() {
        let rig = rig_with(ScriptedSource::new(7));
        settle().await;

        // Optimistic bump to 8; the authoritative store lags at 5.
        let applies = Arc::new(AtomicUsize::new(0));
        rig.handle.submit(bump(&applies, Ok(()))).await;
        settle().await;
        rig.source.serving.store(5, Ordering::SeqCst);

        // Inside the blackout the fetched snapshot is ignored outright.
        rig.handle.notify_changed().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            rig.handle.view().snapshot.unwrap().session.now_serving_number,
            8
        );

        // After the blackout the snapshot still regresses and is discarded.
        tokio::time::sleep(Duration::from_secs(3)).await;
        rig.handle.notify_changed().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            rig.handle.view().snapshot.unwrap().session.now_serving_number,
            8,
            "stale replica read must not clobber local progress"
        );

        // A genuinely fresher snapshot is accepted.
        rig.source.serving.store(9, Ordering::SeqCst);
        rig.handle.notify_changed().await;
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(
            rig.handle.view().snapshot.unwrap().session.now_serving_number,
            9
        );
        rig.cancel.cancel();
    }

    #[test]
    fn backoff_doubles_to_the_cap_and_resets() {
        let mut backoff = Backoff::new(Duration::from_secs(3), Duration::from_secs(30));
        let steps: Vec<u64> = (0..6).map(|_| backoff.next().as_secs()).collect();
        assert_eq!(steps, vec![3, 6, 12, 24, 30, 30]);
        backoff.reset();
        assert_eq!(backoff.next().as_secs(), 3);
    }
}
