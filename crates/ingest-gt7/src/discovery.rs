//! PlayStation device discovery over UDP broadcast.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::time::{self, Duration};

use crate::error::DiscoveryError;

pub const DISCOVERY_PORT: u16 = 9302;
pub const STATUS_STANDBY: u16 = 620;

const SEARCH: &[u8] = b"SRCH * HTTP/1.1\ndevice-discovery-protocol-version:00030010";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleInfo {
    pub ip: IpAddr,
    pub status: u16,
    /// e.g. `PS5`
    pub host_type: Option<String>,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Reply {
    status: Option<u16>,
    host_type: Option<String>,
}

fn parse_reply(raw: &[u8]) -> Reply {
    let text = String::from_utf8_lossy(raw);
    let mut reply = Reply::default();
    for line in text.lines().map(str::trim) {
        if line.starts_with("HTTP") {
            reply.status = line.split_whitespace().nth(1).and_then(|c| c.parse().ok());
        } else if let Some((key, value)) = line.split_once(':') {
            if key.trim().eq_ignore_ascii_case("host-type") {
                reply.host_type = Some(value.trim().to_string());
            }
        }
    }
    reply
}

/// Broadcasts a search and waits for the first console to answer.
pub async fn discover(timeout: Duration) -> Result<ConsoleInfo, DiscoveryError> {
    let target = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), DISCOVERY_PORT);
    discover_at(target, timeout).await
}

/// Same as [`discover`] against an explicit address.
pub async fn discover_at(target: SocketAddr, timeout: Duration) -> Result<ConsoleInfo, DiscoveryError> {
    let bind = match target {
        SocketAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        SocketAddr::V6(_) => SocketAddr::new(IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED), 0),
    };
    let socket = UdpSocket::bind(bind).await?;
    socket.set_broadcast(true)?;
    socket.send_to(SEARCH, target).await?;
    tracing::debug!(%target, "searching for console");

    let mut buf = [0u8; 1024];
    let (len, from) = match time::timeout(timeout, socket.recv_from(&mut buf)).await {
        Ok(received) => received?,
        Err(_) => return Err(DiscoveryError::NotFound { timeout }),
    };

    let reply = parse_reply(&buf[..len]);
    let status = reply.status.unwrap_or_default();
    if status == STATUS_STANDBY {
        return Err(DiscoveryError::OnStandby(from.ip()));
    }
    tracing::info!(ip = %from.ip(), status, host_type = ?reply.host_type, "console found");
    Ok(ConsoleInfo {
        ip: from.ip(),
        status,
        host_type: reply.host_type,
    })
}
