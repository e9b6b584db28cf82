//! UDP keepalive from the shell to the backend.
//!
//! Each generation gets a loopback UDP port and a token through
//! `TAU5_HEARTBEAT_PORT`/`TAU5_HEARTBEAT_TOKEN`. The backend listens there
//! and shuts itself down once `HEARTBEAT:<token>` datagrams stop arriving,
//! so it cannot outlive a host that died without running its stop path.

use std::net::{Ipv4Addr, SocketAddrV4, UdpSocket as StdUdpSocket};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;

use crate::error::ShellError;
use crate::session;

pub const INTERVAL_ENV: &str = "TAU5_HB_GUI_INTERVAL_MS";
pub const DEFAULT_INTERVAL_MS: u64 = 5_000;
/// Shorter intervals fall back to the default.
pub const MIN_INTERVAL_MS: u64 = 1_000;

/// Where and with what token one backend generation expects heartbeats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Heartbeat {
    pub port: u16,
    pub token: String,
}

impl Heartbeat {
    /// Find a free loopback UDP port for the backend to listen on and mint
    /// a token for it.
    pub fn reserve() -> Result<Heartbeat, ShellError> {
        let socket = StdUdpSocket::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).map_err(|e| {
            ShellError::InvalidPort(format!("Failed to allocate a heartbeat port: {}", e))
        })?;
        let port = socket
            .local_addr()
            .map_err(|e| ShellError::InvalidPort(format!("Failed to read heartbeat port: {}", e)))?
            .port();
        drop(socket);
        Ok(Heartbeat {
            port,
            token: session::generate_token(),
        })
    }

    pub fn datagram(&self) -> String {
        format!("HEARTBEAT:{}\n", self.token)
    }
}

/// Interval from the `TAU5_HB_GUI_INTERVAL_MS` value, ignoring anything
/// unparsable or below [`MIN_INTERVAL_MS`].
pub fn interval_from_env(value: Option<String>) -> Duration {
    let ms = value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|ms| *ms >= MIN_INTERVAL_MS)
        .unwrap_or(DEFAULT_INTERVAL_MS);
    Duration::from_millis(ms)
}

/// Send a heartbeat every `interval` until `exited` reports the child gone.
pub async fn run(
    heartbeat: Heartbeat,
    interval: Duration,
    mut exited: watch::Receiver<Option<Option<i32>>>,
) {
    let socket = match UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0)).await {
        Ok(socket) => socket,
        Err(e) => {
            log::error!("Failed to open heartbeat socket: {}", e);
            return;
        }
    };
    let target = SocketAddrV4::new(Ipv4Addr::LOCALHOST, heartbeat.port);
    let datagram = heartbeat.datagram();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        if exited.borrow().is_some() {
            break;
        }
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = socket.send_to(datagram.as_bytes(), target).await {
                    log::warn!("Failed to send heartbeat to port {}: {}", heartbeat.port, e);
                }
            }
            changed = exited.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    log::debug!("Heartbeat to port {} stopped", heartbeat.port);
}
