//! Fan-out of snapshots to registered callbacks.
//!
//! Every subscriber owns a mailbox. Sync mailboxes are drained by a fixed
//! pool of OS threads; a subscriber is held by at most one worker at a time
//! (the `scheduled` flag), so its snapshots arrive in order while different
//! subscribers run in parallel. Async mailboxes are drained by one task per
//! subscriber on the runtime given to [`Dispatcher::new`].

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};
use futures::FutureExt;
use gt7_model::Snapshot;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::callback::{AsyncFn, Callback, SyncFn};

/// Invocations a worker runs for one subscriber before yielding to others.
const DRAIN_BATCH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallbackId(Uuid);

impl CallbackId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for CallbackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchStats {
    pub delivered: u64,
    pub failed: u64,
    /// Snapshots dropped from mailboxes by deregistration or shutdown.
    pub abandoned: u64,
}

#[derive(Default)]
struct Shared {
    closed: AtomicBool,
    delivered: AtomicU64,
    failed: AtomicU64,
    abandoned: AtomicU64,
}

impl Shared {
    fn accepting(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn record(&self, id: CallbackId, outcome: std::thread::Result<anyhow::Result<()>>) {
        match outcome {
            Ok(Ok(())) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(err)) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(callback = %id, error = %err, "callback failed");
            }
            Err(payload) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(callback = %id, panic = panic_message(&*payload), "callback panicked");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

struct SyncSubscriber {
    id: CallbackId,
    func: Arc<SyncFn>,
    tx: Sender<Arc<Snapshot>>,
    rx: Receiver<Arc<Snapshot>>,
    scheduled: AtomicBool,
    active: AtomicBool,
}

impl SyncSubscriber {
    fn abandon_queued(&self, shared: &Shared) {
        let dropped = self.rx.try_iter().count() as u64;
        shared.abandoned.fetch_add(dropped, Ordering::Relaxed);
    }

    /// Runs while this worker holds the `scheduled` token.
    fn drain(self: &Arc<Self>, shared: &Shared, jobs: &Sender<Job>) {
        loop {
            let mut ran = 0;
            while let Ok(snapshot) = self.rx.try_recv() {
                if !shared.accepting() || !self.active.load(Ordering::SeqCst) {
                    shared.abandoned.fetch_add(1, Ordering::Relaxed);
                    self.abandon_queued(shared);
                    break;
                }
                let outcome = catch_unwind(AssertUnwindSafe(|| (self.func)(&snapshot)));
                shared.record(self.id, outcome);
                ran += 1;
                if ran == DRAIN_BATCH {
                    ran = 0;
                    if shared.accepting()
                        && !self.rx.is_empty()
                        && jobs.send(Job::Drain(Arc::clone(self))).is_ok()
                    {
                        // still scheduled; the requeued job continues from here
                        return;
                    }
                }
            }
            self.scheduled.store(false, Ordering::SeqCst);
            // A dispatch may have enqueued after the last try_recv but seen
            // the token still taken.
            if self.rx.is_empty() || self.scheduled.swap(true, Ordering::SeqCst) {
                return;
            }
        }
    }
}

enum Job {
    Drain(Arc<SyncSubscriber>),
    Stop,
}

enum Route {
    Sync(Arc<SyncSubscriber>),
    Async {
        tx: mpsc::UnboundedSender<Arc<Snapshot>>,
        active: Arc<AtomicBool>,
    },
}

impl Route {
    fn deactivate(&self) {
        match self {
            Route::Sync(sub) => sub.active.store(false, Ordering::SeqCst),
            Route::Async { active, .. } => active.store(false, Ordering::SeqCst),
        }
    }
}

fn worker_loop(jobs_rx: Receiver<Job>, jobs_tx: Sender<Job>, shared: Arc<Shared>) {
    while let Ok(job) = jobs_rx.recv() {
        match job {
            Job::Drain(sub) => sub.drain(&shared, &jobs_tx),
            Job::Stop => break,
        }
    }
}

async fn drain_async(
    id: CallbackId,
    func: Arc<AsyncFn>,
    mut rx: mpsc::UnboundedReceiver<Arc<Snapshot>>,
    active: Arc<AtomicBool>,
    shared: Arc<Shared>,
) {
    while let Some(snapshot) = rx.recv().await {
        if !shared.accepting() || !active.load(Ordering::SeqCst) {
            shared.abandoned.fetch_add(1, Ordering::Relaxed);
            continue;
        }
        let outcome = match catch_unwind(AssertUnwindSafe(|| func(snapshot))) {
            Ok(fut) => AssertUnwindSafe(fut).catch_unwind().await,
            Err(payload) => Err(payload),
        };
        shared.record(id, outcome);
    }
}

/// Delivers snapshots to callbacks without ever blocking the caller.
///
/// Mailboxes are unbounded: a subscriber slower than the frame rate keeps
/// receiving every snapshot, in order, at the cost of memory.
pub struct Dispatcher {
    shared: Arc<Shared>,
    registry: RwLock<HashMap<CallbackId, Route>>,
    jobs: Sender<Job>,
    /// Drain jobs still queued after the workers stopped.
    leftover: Receiver<Job>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    runtime: Handle,
}

impl Dispatcher {
    /// Spawns `worker_count` (at least one) threads for sync callbacks.
    pub fn new(worker_count: usize, runtime: Handle) -> std::io::Result<Self> {
        let worker_count = worker_count.max(1);
        let (jobs, jobs_rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(Shared::default());

        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let (rx, tx, shared) = (jobs_rx.clone(), jobs.clone(), Arc::clone(&shared));
            let spawned = std::thread::Builder::new()
                .name(format!("gt7-callback-{i}"))
                .spawn(move || worker_loop(rx, tx, shared));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    for _ in 0..workers.len() {
                        let _ = jobs.send(Job::Stop);
                    }
                    return Err(err);
                }
            }
        }
        tracing::debug!(workers = worker_count, "dispatcher started");

        Ok(Self {
            shared,
            registry: RwLock::new(HashMap::new()),
            jobs,
            leftover: jobs_rx,
            workers: Mutex::new(workers),
            tasks: Mutex::new(Vec::new()),
            runtime,
        })
    }

    pub fn register(&self, callback: Callback) -> CallbackId {
        let id = CallbackId::generate();
        self.register_with(id, callback);
        id
    }

    /// Registers under an id minted elsewhere, replacing any callback
    /// already registered under it.
    pub fn register_with(&self, id: CallbackId, callback: Callback) {
        let route = match callback {
            Callback::Sync(func) => {
                let (tx, rx) = crossbeam_channel::unbounded();
                Route::Sync(Arc::new(SyncSubscriber {
                    id,
                    func,
                    tx,
                    rx,
                    scheduled: AtomicBool::new(false),
                    active: AtomicBool::new(true),
                }))
            }
            Callback::Async(func) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let active = Arc::new(AtomicBool::new(true));
                let task = self.runtime.spawn(drain_async(
                    id,
                    func,
                    rx,
                    Arc::clone(&active),
                    Arc::clone(&self.shared),
                ));
                let mut tasks = self.tasks.lock();
                tasks.retain(|t| !t.is_finished());
                tasks.push(task);
                Route::Async { tx, active }
            }
        };

        let mut registry = self.registry.write();
        if self.shared.accepting() {
            if let Some(replaced) = registry.insert(id, route) {
                replaced.deactivate();
            }
            tracing::debug!(callback = %id, "callback registered");
        } else {
            route.deactivate();
        }
    }

    /// Stops delivery to `id`. Snapshots already in its mailbox are dropped;
    /// an invocation already running is not interrupted.
    pub fn deregister(&self, id: CallbackId) -> bool {
        match self.registry.write().remove(&id) {
            Some(route) => {
                route.deactivate();
                tracing::debug!(callback = %id, "callback deregistered");
                true
            }
            None => false,
        }
    }

    pub fn dispatch(&self, snapshot: Arc<Snapshot>) {
        if !self.shared.accepting() {
            return;
        }
        let registry = self.registry.read();
        for route in registry.values() {
            match route {
                Route::Sync(sub) => {
                    if sub.tx.send(Arc::clone(&snapshot)).is_ok()
                        && !sub.scheduled.swap(true, Ordering::SeqCst)
                    {
                        let _ = self.jobs.send(Job::Drain(Arc::clone(sub)));
                    }
                }
                Route::Async { tx, .. } => {
                    let _ = tx.send(Arc::clone(&snapshot));
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.registry.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.read().is_empty()
    }

    pub fn is_closed(&self) -> bool {
        !self.shared.accepting()
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.shared.delivered.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            abandoned: self.shared.abandoned.load(Ordering::Relaxed),
        }
    }

    /// Closes the dispatcher and waits for running invocations.
    ///
    /// Queued snapshots are abandoned. Once this returns no callback is
    /// running and none will be started.
    pub async fn shutdown(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        let routes: Vec<Route> = self.registry.write().drain().map(|(_, r)| r).collect();
        for route in &routes {
            route.deactivate();
        }
        // closes async mailboxes so their tasks finish
        drop(routes);

        let workers = std::mem::take(&mut *self.workers.lock());
        if !workers.is_empty() {
            for _ in 0..workers.len() {
                let _ = self.jobs.send(Job::Stop);
            }
            let joined = tokio::task::spawn_blocking(move || {
                for worker in workers {
                    if worker.join().is_err() {
                        tracing::warn!("callback worker panicked");
                    }
                }
            })
            .await;
            if let Err(err) = joined {
                tracing::warn!(error = %err, "joining callback workers failed");
            }
        }
        for job in self.leftover.try_iter() {
            if let Job::Drain(sub) = job {
                sub.abandon_queued(&self.shared);
            }
        }

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "async callback task failed");
            }
        }

        let stats = self.stats();
        tracing::info!(
            delivered = stats.delivered,
            failed = stats.failed,
            abandoned = stats.abandoned,
            "dispatcher stopped"
        );
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        for _ in 0..self.workers.get_mut().len() {
            let _ = self.jobs.send(Job::Stop);
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("subscribers", &self.len())
            .field("closed", &self.is_closed())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    fn snap(id: i32) -> Arc<Snapshot> {
        Arc::new(Snapshot {
            packet_id: id,
            ..Snapshot::default()
        })
    }

    fn recv_n(rx: &Receiver<i32>, n: usize, timeout: Duration) -> Vec<i32> {
        (0..n).map(|_| rx.recv_timeout(timeout).unwrap()).collect()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn slow_sync_subscriber_does_not_delay_fast_one() {
        let dispatcher = Dispatcher::new(2, Handle::current()).unwrap();
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let (slow_tx, slow_rx) = crossbeam_channel::unbounded();
        let (fast_tx, fast_rx) = crossbeam_channel::unbounded();
        dispatcher.register(Callback::sync(move |s| {
            if s.packet_id == 0 {
                // held until the fast subscriber has seen everything
                let _ = gate_rx.recv();
            }
            std::thread::sleep(Duration::from_micros(50));
            slow_tx.send(s.packet_id)?;
            Ok(())
        }));
        dispatcher.register(Callback::sync(move |s| {
            fast_tx.send(s.packet_id)?;
            Ok(())
        }));

        let started = Instant::now();
        for id in 0..1000 {
            dispatcher.dispatch(snap(id));
        }
        let fast = recv_n(&fast_rx, 1000, Duration::from_secs(2));
        assert_eq!(fast, (0..1000).collect::<Vec<_>>());
        assert!(started.elapsed() < Duration::from_secs(1));
        assert!(slow_rx.is_empty());

        drop(gate_tx);
        let slow = recv_n(&slow_rx, 1000, Duration::from_secs(5));
        assert_eq!(slow, (0..1000).collect::<Vec<_>>());
        dispatcher.shutdown().await;
        assert_eq!(dispatcher.stats().delivered, 2000);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn busy_subscriber_yields_the_worker_between_batches() {
        let dispatcher = Dispatcher::new(1, Handle::current()).unwrap();
        let log = Arc::new(Mutex::new(Vec::new()));
        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(0);
        let (started_tx, started_rx) = crossbeam_channel::unbounded();
        let a = Arc::clone(&log);
        dispatcher.register(Callback::sync(move |s| {
            if s.packet_id == 0 {
                started_tx.send(())?;
                let _ = gate_rx.recv();
            }
            a.lock().push(('a', s.packet_id));
            Ok(())
        }));
        dispatcher.dispatch(snap(0));
        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();

        let b = Arc::clone(&log);
        dispatcher.register(Callback::sync(move |s| {
            b.lock().push(('b', s.packet_id));
            Ok(())
        }));
        for id in 1..=200 {
            dispatcher.dispatch(snap(id));
        }
        drop(gate_tx);

        let deadline = Instant::now() + Duration::from_secs(2);
        while log.lock().len() < 401 && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        dispatcher.shutdown().await;

        let log = log.lock();
        assert_eq!(log.len(), 401);
        let batch = DRAIN_BATCH as i32;
        let expected: Vec<(char, i32)> = (0..batch)
            .map(|id| ('a', id))
            .chain((1..=batch).map(|id| ('b', id)))
            .chain((batch..2 * batch).map(|id| ('a', id)))
            .chain((batch + 1..=2 * batch).map(|id| ('b', id)))
            .collect();
        assert_eq!(log[..expected.len()], expected[..]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_accounts_for_every_dispatched_snapshot() {
        let dispatcher = Dispatcher::new(2, Handle::current()).unwrap();
        for _ in 0..3 {
            dispatcher.register(Callback::sync(|_| {
                std::thread::sleep(Duration::from_millis(1));
                Ok(())
            }));
        }
        for id in 0..200 {
            dispatcher.dispatch(snap(id));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        dispatcher.shutdown().await;

        let stats = dispatcher.stats();
        assert_eq!(stats.failed, 0);
        assert!(stats.abandoned > 0);
        assert_eq!(stats.delivered + stats.abandoned, 600);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_async_subscriber_receives_everything_in_order() {
        let dispatcher = Dispatcher::new(1, Handle::current()).unwrap();
        let slow_seen = Arc::new(Mutex::new(Vec::new()));
        let fast_seen = Arc::new(Mutex::new(Vec::new()));
        dispatcher.register(Callback::async_with(
            Arc::clone(&slow_seen),
            |s, seen| async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                seen.lock().push(s.packet_id);
                Ok(())
            },
        ));
        dispatcher.register(Callback::async_with(
            Arc::clone(&fast_seen),
            |s, seen| async move {
                seen.lock().push(s.packet_id);
                Ok(())
            },
        ));

        let start = tokio::time::Instant::now();
        for id in 0..1000 {
            dispatcher.dispatch(snap(id));
        }
        while fast_seen.lock().len() < 1000 {
            tokio::task::yield_now().await;
        }
        assert!(start.elapsed() < Duration::from_millis(10));
        assert!(slow_seen.lock().len() < 1000);

        while slow_seen.lock().len() < 1000 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert_eq!(*slow_seen.lock(), (0..1000).collect::<Vec<_>>());
        assert_eq!(*fast_seen.lock(), (0..1000).collect::<Vec<_>>());
        dispatcher.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failing_callback_stays_registered() {
        let dispatcher = Dispatcher::new(1, Handle::current()).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        dispatcher.register(Callback::sync(move |s| {
            tx.send(s.packet_id)?;
            match s.packet_id {
                0 => anyhow::bail!("rejected"),
                1 => panic!("callback blew up"),
                _ => Ok(()),
            }
        }));
        for id in 0..3 {
            dispatcher.dispatch(snap(id));
        }
        assert_eq!(recv_n(&rx, 3, Duration::from_secs(2)), vec![0, 1, 2]);
        dispatcher.shutdown().await;
        let stats = dispatcher.stats();
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.delivered, 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn deregistered_callback_receives_nothing_more() {
        let dispatcher = Dispatcher::new(1, Handle::current()).unwrap();
        let (tx, rx) = crossbeam_channel::unbounded();
        let id = dispatcher.register(Callback::sync(move |s| {
            tx.send(s.packet_id)?;
            Ok(())
        }));
        dispatcher.dispatch(snap(1));
        assert_eq!(recv_n(&rx, 1, Duration::from_secs(2)), vec![1]);

        assert!(dispatcher.deregister(id));
        assert!(!dispatcher.deregister(id));
        dispatcher.dispatch(snap(2));
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        assert!(dispatcher.is_empty());
        dispatcher.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_waits_for_in_flight_and_drops_queued() {
        let dispatcher = Dispatcher::new(1, Handle::current()).unwrap();
        let (started_tx, started_rx) = crossbeam_channel::unbounded();
        let calls = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));
        let (c, f) = (Arc::clone(&calls), Arc::clone(&finished));
        dispatcher.register(Callback::sync(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            started_tx.send(())?;
            std::thread::sleep(Duration::from_millis(100));
            f.store(true, Ordering::SeqCst);
            Ok(())
        }));

        dispatcher.dispatch(snap(0));
        started_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        for id in 1..5 {
            dispatcher.dispatch(snap(id));
        }
        dispatcher.shutdown().await;

        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.stats().abandoned, 4);

        dispatcher.dispatch(snap(9));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn register_after_shutdown_is_inert() {
        let dispatcher = Dispatcher::new(1, Handle::current()).unwrap();
        dispatcher.shutdown().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        dispatcher.register(Callback::sync(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));
        dispatcher.dispatch(snap(0));
        assert!(dispatcher.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn zero_subscribers_is_valid() {
        let dispatcher = Dispatcher::new(2, Handle::current()).unwrap();
        for id in 0..10 {
            dispatcher.dispatch(snap(id));
        }
        dispatcher.shutdown().await;
        assert_eq!(dispatcher.stats(), DispatchStats::default());
    }
}
