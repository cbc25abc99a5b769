//! UDP responder standing in for a device answering discovery broadcasts

use crate::error::SimulationResult;
use std::net::SocketAddr;
use tokio::net::{ToSocketAddrs, UdpSocket};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DISCOVERY_QUERY: &str = "WHO_IS_EEG?";
pub const DISCOVERY_IDENTITY: &str = "I_AM_EEG_DEVICE";

/// Answers every datagram containing the query with the identity token
pub struct DiscoveryResponder {
    socket: UdpSocket,
    query: String,
    reply: String,
}

impl DiscoveryResponder {
    pub async fn bind(addr: impl ToSocketAddrs) -> SimulationResult<Self> {
        Ok(Self {
            socket: UdpSocket::bind(addr).await?,
            query: DISCOVERY_QUERY.to_string(),
            reply: DISCOVERY_IDENTITY.to_string(),
        })
    }

    /// Reply with a custom payload, e.g. a token the receiver must reject
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = reply.into();
        self
    }

    pub fn local_addr(&self) -> SimulationResult<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(self, mut shutdown: oneshot::Receiver<()>) -> SimulationResult<()> {
        let mut buffer = [0u8; 1024];
        info!(addr = ?self.socket.local_addr().ok(), "discovery responder listening");
        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buffer) => {
                    let (len, peer) = received?;
                    let text = String::from_utf8_lossy(&buffer[..len]);
                    if !text.contains(&self.query) {
                        debug!(%peer, len, "ignoring unrelated datagram");
                        continue;
                    }
                    if let Err(e) = self.socket.send_to(self.reply.as_bytes(), peer).await {
                        warn!(%peer, error = %e, "discovery reply failed");
                    } else {
                        debug!(%peer, "answered discovery query");
                    }
                }
                _ = &mut shutdown => break,
            }
        }
        Ok(())
    }
}

pub struct DiscoveryResponderHandle {
    pub addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<SimulationResult<()>>,
}

impl DiscoveryResponderHandle {
    pub async fn shutdown(mut self) -> SimulationResult<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "discovery responder ended abnormally");
                Ok(())
            }
        }
    }
}

impl Drop for DiscoveryResponderHandle {
    fn drop(&mut self) {
        if self.shutdown.is_some() {
            self.task.abort();
        }
    }
}

pub fn spawn_discovery_responder(responder: DiscoveryResponder) -> SimulationResult<DiscoveryResponderHandle> {
    let addr = responder.local_addr()?;
    let (tx, rx) = oneshot::channel();
    let task = tokio::spawn(responder.run(rx));
    Ok(DiscoveryResponderHandle {
        addr,
        shutdown: Some(tx),
        task,
    })
}
