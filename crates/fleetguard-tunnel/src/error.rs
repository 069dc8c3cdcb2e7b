use std::net::SocketAddr;
use std::time::Duration;

use uuid::Uuid;

/// Error reported by a [`TunnelProvider`](crate::TunnelProvider).
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("broker API returned error: {0}")]
    Api(String),

    #[error("broker unreachable: {0}")]
    Unreachable(String),

    #[error("{0}")]
    Other(String),
}

/// Errors returned by [`TunnelConnectionPool`](crate::TunnelConnectionPool).
///
/// Every variant leaves the pool consistent; nothing is retried internally.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    /// Every slot holds an in-use tunnel. Retry after backoff.
    #[error("tunnel pool exhausted: all {limit} tunnels are in use (max_tunnels = {limit})")]
    ResourceExhausted { limit: usize },

    #[error("tunnel creation failed: {0}")]
    TunnelCreationFailed(#[from] ProviderError),

    /// The new tunnel could not be confirmed loopback-only and was torn down.
    #[error("tunnel at {addr} rejected: {reason}")]
    BindingViolation { addr: SocketAddr, reason: String },

    #[error("acquire timed out after {after:?}")]
    Timeout { after: Duration },

    /// The handle was closed, evicted, or expired.
    #[error("unknown or stale tunnel handle {0}")]
    UnknownHandle(Uuid),

    /// `close_all` ran while this tunnel was being created.
    #[error("tunnel creation cancelled by pool shutdown")]
    Cancelled,

    #[error("tunnel pool internal error: {0}")]
    Internal(String),
}
