use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Identity of a pooled tunnel: at most one tunnel exists per key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TunnelKey {
    pub broker_id: String,
    pub target_id: String,
    pub remote_port: u16,
}

impl TunnelKey {
    pub fn new(broker_id: impl Into<String>, target_id: impl Into<String>, remote_port: u16) -> Self {
        Self {
            broker_id: broker_id.into(),
            target_id: target_id.into(),
            remote_port,
        }
    }
}

impl fmt::Display for TunnelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.broker_id, self.target_id, self.remote_port)
    }
}

/// What a provider hands back for an established tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelDescriptor {
    /// Provider-assigned identifier used to close the tunnel.
    pub tunnel_id: String,
    pub local_addr: SocketAddr,
}

/// Read-only view of a pooled tunnel, returned by `acquire`.
///
/// Callers connect to `local_addr` and hand the handle back through
/// `release` or `close`. The pool owns the underlying tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelHandle {
    pub id: Uuid,
    pub key: TunnelKey,
    pub local_addr: SocketAddr,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle of a pooled tunnel.
///
/// `Creating -> Active -> Idle -> {Active | Evicted | Expired} -> Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleState {
    Creating,
    Active,
    Idle,
    Evicted,
    Expired,
    Closed,
}

impl fmt::Display for HandleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HandleState::Creating => "creating",
            HandleState::Active => "active",
            HandleState::Idle => "idle",
            HandleState::Evicted => "evicted",
            HandleState::Expired => "expired",
            HandleState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of one pool entry.
#[derive(Debug, Clone)]
pub struct TunnelInfo {
    pub handle: TunnelHandle,
    pub state: HandleState,
    /// Callers currently holding the handle.
    pub leases: usize,
    pub use_count: u64,
    pub idle_for: Duration,
}

/// Pool occupancy, plus lifetime counters since the pool was built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub active: usize,
    pub idle: usize,
    pub creating: usize,
    pub capacity: usize,
    pub created: u64,
    pub reused: u64,
    pub evicted: u64,
    pub expired: u64,
    pub closed: u64,
}

/// Outcome of one idle sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub close_failures: usize,
}
