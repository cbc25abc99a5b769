//! One-shot UDP discovery of a board on the local network
//!
//! Sends a single query datagram to the broadcast address and waits for the
//! first reply carrying the identity token. The reply's source address is
//! the board's IP.

use crate::config::DiscoveryConfig;
use crate::error::{AcquisitionError, AcquisitionResult};
use std::net::{IpAddr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub address: SocketAddr,
    pub reply: String,
}

impl DiscoveredDevice {
    pub fn ip(&self) -> IpAddr {
        self.address.ip()
    }
}

/// Broadcast the query and return the first device that answers
pub async fn discover(config: &DiscoveryConfig) -> AcquisitionResult<DiscoveredDevice> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.set_broadcast(true)?;

    let target = format!("{}:{}", config.broadcast_address, config.port);
    info!(%target, "sending discovery query");
    socket.send_to(config.query.as_bytes(), &target).await?;

    let deadline = Instant::now() + config.timeout;
    let mut buffer = [0u8; 1024];
    loop {
        let (len, from) = match timeout_at(deadline, socket.recv_from(&mut buffer)).await {
            Ok(received) => received?,
            Err(_) => return Err(AcquisitionError::DiscoveryTimeout { timeout: config.timeout }),
        };
        let reply = String::from_utf8_lossy(&buffer[..len]).into_owned();
        if reply.contains(&config.identity) {
            info!(%from, "device answered discovery");
            return Ok(DiscoveredDevice { address: from, reply });
        }
        debug!(%from, %reply, "ignoring unrecognised discovery reply");
    }
}
