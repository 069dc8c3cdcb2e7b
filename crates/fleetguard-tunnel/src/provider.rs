//! Collaborator traits: the broker that creates tunnels, and the check that
//! a new tunnel only listens on loopback.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpStream, UdpSocket};

use crate::error::ProviderError;
use crate::handle::TunnelDescriptor;

/// Creates and tears down brokered tunnels.
///
/// Failures are surfaced to the pool caller as-is; the pool never retries.
#[async_trait]
pub trait TunnelProvider: Send + Sync {
    /// Open a tunnel to `remote_port` on `target_id` through `broker_id`,
    /// listening on `127.0.0.1:local_port`.
    async fn create_tunnel(
        &self,
        broker_id: &str,
        target_id: &str,
        local_port: u16,
        remote_port: u16,
    ) -> Result<TunnelDescriptor, ProviderError>;

    async fn close_tunnel(&self, descriptor: &TunnelDescriptor) -> Result<(), ProviderError>;

    /// Cheap liveness check before a pooled tunnel is reused.
    ///
    /// The default opens and drops a TCP connection to the local endpoint.
    async fn probe(&self, descriptor: &TunnelDescriptor) -> bool {
        TcpStream::connect(descriptor.local_addr).await.is_ok()
    }
}

/// Confirms that a tunnel's local endpoint refuses non-loopback traffic.
///
/// `Err` carries the reason the binding could not be confirmed.
#[async_trait]
pub trait BindingVerifier: Send + Sync {
    async fn verify(&self, local_addr: SocketAddr) -> Result<(), String>;
}

/// Connects to the tunnel's port on this host's non-loopback address and
/// requires the connection to be refused.
///
/// Anything other than an explicit refusal fails closed: a successful
/// connect, a timeout, or a host with no non-loopback address to test from.
#[derive(Debug, Clone)]
pub struct NonLoopbackProbe {
    timeout: Duration,
}

impl NonLoopbackProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl BindingVerifier for NonLoopbackProbe {
    async fn verify(&self, local_addr: SocketAddr) -> Result<(), String> {
        if !local_addr.ip().is_loopback() {
            return Err(format!("{} is not a loopback address", local_addr.ip()));
        }
        let external = external_address(local_addr.is_ipv6())
            .await
            .ok_or_else(|| "no non-loopback address available to test from".to_string())?;
        let target = SocketAddr::new(external, local_addr.port());

        match tokio::time::timeout(self.timeout, TcpStream::connect(target)).await {
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => Ok(()),
            Ok(Err(e)) => Err(format!("could not confirm refusal on {target}: {e}")),
            Ok(Ok(_)) => Err(format!("port {} accepts connections on {external}", target.port())),
            Err(_) => Err(format!("probe of {target} timed out after {:?}", self.timeout)),
        }
    }
}

/// This host's primary non-loopback address, found by routing a UDP socket
/// toward a documentation address. No packets are sent.
async fn external_address(ipv6: bool) -> Option<IpAddr> {
    let (bind, peer) = if ipv6 {
        ("[::]:0", "[2001:db8::1]:9")
    } else {
        ("0.0.0.0:0", "192.0.2.1:9")
    };
    let socket = UdpSocket::bind(bind).await.ok()?;
    socket.connect(peer).await.ok()?;
    let ip = socket.local_addr().ok()?.ip();
    (!ip.is_loopback() && !ip.is_unspecified()).then_some(ip)
}

/// Pick a free loopback port for a new tunnel.
pub(crate) fn free_loopback_port() -> std::io::Result<u16> {
    let listener = std::net::TcpListener::bind((std::net::Ipv4Addr::LOCALHOST, 0))?;
    Ok(listener.local_addr()?.port())
}
