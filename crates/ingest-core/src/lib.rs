//! Core traits, errors and fan-out shared by the GT7 ingest crates

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gt7_model::Snapshot;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

pub mod callback;
pub mod dispatch;

pub use callback::Callback;
pub use dispatch::{CallbackId, DispatchStats, Dispatcher};

/// Terminal outcome of a telemetry session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("socket: {0}")]
    Socket(#[from] std::io::Error),
    #[error("console unreachable: no telemetry for {missed} x {timeout:?}")]
    Unreachable { missed: u32, timeout: Duration },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Receives every decoded frame, in arrival order, on the receive loop.
///
/// Implementations must return quickly; anything slow belongs behind a
/// [`Dispatcher`].
pub trait SnapshotSink: Send {
    fn on_snapshot(&mut self, snapshot: &Arc<Snapshot>);
}

impl SnapshotSink for Vec<Box<dyn SnapshotSink>> {
    fn on_snapshot(&mut self, snapshot: &Arc<Snapshot>) {
        for sink in self.iter_mut() {
            sink.on_snapshot(snapshot);
        }
    }
}

impl SnapshotSink for Arc<Dispatcher> {
    fn on_snapshot(&mut self, snapshot: &Arc<Snapshot>) {
        self.dispatch(Arc::clone(snapshot));
    }
}

/// Adapts a closure into a [`SnapshotSink`].
pub struct SinkFn<F>(pub F);

impl<F> SnapshotSink for SinkFn<F>
where
    F: FnMut(&Arc<Snapshot>) + Send,
{
    fn on_snapshot(&mut self, snapshot: &Arc<Snapshot>) {
        (self.0)(snapshot)
    }
}

/// Trait for any live source connector
#[async_trait::async_trait]
pub trait TelemetrySource: Send + Sync {
    async fn run(
        &self,
        sink: &mut dyn SnapshotSink,
        cancel: CancellationToken,
    ) -> Result<(), SessionError>;
}

/// Live frame counters, updated by the receive loop.
#[derive(Debug, Default)]
pub struct SessionStats {
    received: AtomicU64,
    dropped: AtomicU64,
    timeouts: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameCounts {
    pub received: u64,
    pub dropped: u64,
    pub timeouts: u64,
}

impl SessionStats {
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn counts(&self) -> FrameCounts {
        FrameCounts {
            received: self.received.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fan_out_reaches_every_sink_in_order() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let a = Arc::clone(&seen);
        let b = Arc::clone(&seen);
        let mut sinks: Vec<Box<dyn SnapshotSink>> = vec![
            Box::new(SinkFn(move |s: &Arc<Snapshot>| a.lock().push(("a", s.packet_id)))),
            Box::new(SinkFn(move |s: &Arc<Snapshot>| b.lock().push(("b", s.packet_id)))),
        ];
        for id in 0..2 {
            let snap = Arc::new(Snapshot {
                packet_id: id,
                ..Snapshot::default()
            });
            sinks.on_snapshot(&snap);
        }
        assert_eq!(*seen.lock(), vec![("a", 0), ("b", 0), ("a", 1), ("b", 1)]);
    }

    #[test]
    fn stats_count_independently() {
        let stats = SessionStats::default();
        stats.record_received();
        stats.record_received();
        stats.record_dropped();
        assert_eq!(
            stats.counts(),
            FrameCounts {
                received: 2,
                dropped: 1,
                timeouts: 0
            }
        );
    }
}
