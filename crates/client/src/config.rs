use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use gt7_events::ShiftLightBounds;
use gt7_ingest::{SessionConfig, HEARTBEAT_PORT, RECEIVE_PORT};
use gt7_model::{SentinelPolicy, Variant};
use serde::{Deserialize, Serialize};

use crate::ClientError;

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// PlayStation address; discovered on the local network when unset
    pub console_ip: Option<IpAddr>,
    pub variant: Variant,
    /// Threads running sync callbacks
    pub worker_count: usize,
    #[serde(with = "duration_ms", rename = "heartbeat_interval_ms")]
    pub heartbeat_interval: Duration,
    #[serde(with = "duration_ms", rename = "recv_timeout_ms")]
    pub recv_timeout: Duration,
    pub max_missed_timeouts: u32,
    #[serde(with = "duration_ms", rename = "discovery_timeout_ms")]
    pub discovery_timeout: Duration,
    pub receive_port: u16,
    pub heartbeat_port: u16,
    pub bind_ip: IpAddr,
    pub shift_lights: ShiftLightBounds,
    pub sentinels: SentinelPolicy,
    /// CSV of track bounds; track detection is off without it
    pub track_bounds_csv: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            console_ip: None,
            variant: Variant::A,
            worker_count: 4,
            heartbeat_interval: Duration::from_secs(1),
            recv_timeout: Duration::from_secs(1),
            max_missed_timeouts: 10,
            discovery_timeout: Duration::from_secs(1),
            receive_port: RECEIVE_PORT,
            heartbeat_port: HEARTBEAT_PORT,
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            shift_lights: ShiftLightBounds::default(),
            sentinels: SentinelPolicy::V1,
            track_bounds_csv: None,
        }
    }
}

fn parse<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T, ClientError> {
    value
        .trim()
        .parse()
        .map_err(|_| ClientError::Config { var, value })
}

impl ClientConfig {
    /// Defaults overridden by `GT7_CONSOLE_IP`, `GT7_VARIANT`, `GT7_WORKERS`
    /// and `GT7_RECV_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self, ClientError> {
        Self::default().merge_vars(|name| std::env::var(name).ok())
    }

    pub fn merge_vars<F>(mut self, lookup: F) -> Result<Self, ClientError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("GT7_CONSOLE_IP") {
            self.console_ip = Some(parse("GT7_CONSOLE_IP", v)?);
        }
        if let Some(v) = lookup("GT7_VARIANT") {
            self.variant = parse("GT7_VARIANT", v)?;
        }
        if let Some(v) = lookup("GT7_WORKERS") {
            self.worker_count = parse("GT7_WORKERS", v)?;
        }
        if let Some(v) = lookup("GT7_RECV_TIMEOUT_MS") {
            self.recv_timeout = Duration::from_millis(parse("GT7_RECV_TIMEOUT_MS", v)?);
        }
        Ok(self)
    }

    pub fn with_console_ip(mut self, ip: IpAddr) -> Self {
        self.console_ip = Some(ip);
        self
    }

    pub fn with_variant(mut self, variant: Variant) -> Self {
        self.variant = variant;
        self
    }

    pub fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self
    }

    pub fn with_ports(mut self, receive: u16, heartbeat: u16) -> Self {
        self.receive_port = receive;
        self.heartbeat_port = heartbeat;
        self
    }

    pub fn with_bind_ip(mut self, ip: IpAddr) -> Self {
        self.bind_ip = ip;
        self
    }

    pub fn with_recv_timeout(mut self, timeout: Duration, max_missed: u32) -> Self {
        self.recv_timeout = timeout;
        self.max_missed_timeouts = max_missed;
        self
    }

    pub fn with_shift_lights(mut self, bounds: ShiftLightBounds) -> Self {
        self.shift_lights = bounds;
        self
    }

    pub fn with_track_bounds(mut self, csv: PathBuf) -> Self {
        self.track_bounds_csv = Some(csv);
        self
    }

    pub(crate) fn session(&self, console_ip: IpAddr) -> SessionConfig {
        SessionConfig::new(console_ip)
            .with_console(SocketAddr::new(console_ip, self.heartbeat_port))
            .with_bind(SocketAddr::new(self.bind_ip, self.receive_port))
            .with_variant(self.variant)
            .with_heartbeat_interval(self.heartbeat_interval)
            .with_recv_timeout(self.recv_timeout, self.max_missed_timeouts)
            .with_sentinels(self.sentinels)
    }
}
