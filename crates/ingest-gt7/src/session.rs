use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use gt7_ingest_core::{SessionError, SessionStats, SnapshotSink, TelemetrySource};
use gt7_model::{SentinelPolicy, Variant};
use tokio::net::UdpSocket;
use tokio::time::{self, Duration, Instant};
use tokio_util::sync::CancellationToken;

use crate::decode::decode_frame;

/// Console port heartbeats are sent to.
pub const HEARTBEAT_PORT: u16 = 33739;
/// Local port the console sends telemetry to.
pub const RECEIVE_PORT: u16 = 33740;

const RECV_BUF_LEN: usize = 2048;

#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Console address heartbeats go to (port 33739)
    pub console: SocketAddr,
    /// Local bind address for telemetry (default port 33740)
    pub bind: SocketAddr,
    pub variant: Variant,
    pub heartbeat_interval: Duration,
    /// Silence after which one missed timeout is counted
    pub recv_timeout: Duration,
    pub max_missed_timeouts: u32,
    pub sentinels: SentinelPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::LOCALHOST))
    }
}

impl SessionConfig {
    pub fn new(console_ip: IpAddr) -> Self {
        Self {
            console: SocketAddr::new(console_ip, HEARTBEAT_PORT),
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), RECEIVE_PORT),
            variant: Variant::A,
            heartbeat_interval: Duration::from_secs(1),
            recv_timeout: Duration::from_secs(1),
            max_missed_timeouts: 10,
            sentinels: SentinelPolicy::V1,
        }
    }

    pub fn with_console(mut self, console: SocketAddr) -> Self {
        self.console = console;
        self
    }

    pub fn with_bind(mut self, bind: SocketAddr) -> Self {
        self.bind = bind;
        self
    }

    pub fn with_variant(mut self, variant: Variant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_recv_timeout(mut self, timeout: Duration, max_missed: u32) -> Self {
        self.recv_timeout = timeout;
        self.max_missed_timeouts = max_missed.max(1);
        self
    }

    pub fn with_sentinels(mut self, sentinels: SentinelPolicy) -> Self {
        self.sentinels = sentinels;
        self
    }
}

/// Heartbeat + receive loop against one console.
pub struct HeartbeatSession {
    cfg: SessionConfig,
    stats: Arc<SessionStats>,
}

impl HeartbeatSession {
    pub fn new(cfg: SessionConfig) -> Self {
        Self {
            cfg,
            stats: Arc::new(SessionStats::default()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.cfg
    }

    pub fn stats(&self) -> Arc<SessionStats> {
        Arc::clone(&self.stats)
    }

    async fn pump(
        &self,
        socket: &UdpSocket,
        sink: &mut dyn SnapshotSink,
        cancel: &CancellationToken,
    ) -> Result<(), SessionError> {
        let cfg = &self.cfg;
        let heartbeat = [cfg.variant.tag()];
        socket.send_to(&heartbeat, cfg.console).await?;

        let mut hb_interval =
            time::interval_at(Instant::now() + cfg.heartbeat_interval, cfg.heartbeat_interval);
        hb_interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        let mut buf = vec![0u8; RECV_BUF_LEN];
        let mut missed = 0u32;
        let mut deadline = Instant::now() + cfg.recv_timeout;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                _ = hb_interval.tick() => {
                    socket.send_to(&heartbeat, cfg.console).await?;
                }
                _ = time::sleep_until(deadline) => {
                    missed += 1;
                    self.stats.record_timeout();
                    if missed >= cfg.max_missed_timeouts {
                        return Err(SessionError::Unreachable {
                            missed,
                            timeout: cfg.recv_timeout,
                        });
                    }
                    tracing::warn!(missed, max = cfg.max_missed_timeouts, "no telemetry from console");
                    socket.send_to(&heartbeat, cfg.console).await?;
                    deadline = Instant::now() + cfg.recv_timeout;
                }
                received = socket.recv_from(&mut buf) => {
                    let (len, from) = received?;
                    // a dual-stack socket reports IPv4 peers as ::ffff:a.b.c.d
                    if from.ip().to_canonical() != cfg.console.ip().to_canonical() {
                        tracing::debug!(%from, "ignoring datagram from unknown peer");
                        continue;
                    }
                    match decode_frame(&buf[..len], cfg.variant, &cfg.sentinels) {
                        Ok(snapshot) => {
                            missed = 0;
                            deadline = Instant::now() + cfg.recv_timeout;
                            self.stats.record_received();
                            sink.on_snapshot(&Arc::new(snapshot));
                        }
                        Err(err) => {
                            self.stats.record_dropped();
                            tracing::debug!(error = %err, len, "dropping frame");
                        }
                    }
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl TelemetrySource for HeartbeatSession {
    /// Runs until cancelled or a terminal error. The socket is closed before
    /// this returns.
    async fn run(
        &self,
        sink: &mut dyn SnapshotSink,
        cancel: CancellationToken,
    ) -> Result<(), SessionError> {
        if cancel.is_cancelled() {
            return Ok(());
        }
        let socket = UdpSocket::bind(self.cfg.bind)
            .await
            .map_err(|source| SessionError::Bind {
                addr: self.cfg.bind,
                source,
            })?;
        tracing::info!(
            local = %socket.local_addr()?,
            console = %self.cfg.console,
            variant = %self.cfg.variant,
            "telemetry session started"
        );

        let result = self.pump(&socket, sink, &cancel).await;
        drop(socket);

        let counts = self.stats.counts();
        match &result {
            Ok(()) => tracing::info!(
                received = counts.received,
                dropped = counts.dropped,
                "telemetry session stopped"
            ),
            Err(err) => tracing::warn!(
                error = %err,
                received = counts.received,
                dropped = counts.dropped,
                "telemetry session failed"
            ),
        }
        result
    }
}
