//! Pooled, loopback-only tunnels to fleet targets through a broker.
//!
//! [`TunnelConnectionPool`] keeps at most `max_tunnels` tunnels open, one per
//! `(broker, target, remote port)` key, and reuses them across callers.
//! [`CleanupScheduler`] closes tunnels that have sat idle past their timeout.
//! Every new tunnel must prove it listens on loopback only before it is
//! handed out.

pub mod error;
pub mod handle;
pub mod pool;
pub mod provider;
pub mod scheduler;

pub use error::{PoolError, ProviderError};
pub use handle::{
    HandleState, PoolStats, SweepReport, TunnelDescriptor, TunnelHandle, TunnelInfo, TunnelKey,
};
pub use pool::{PoolBuilder, TunnelConnectionPool};
pub use provider::{BindingVerifier, NonLoopbackProbe, TunnelProvider};
pub use scheduler::CleanupScheduler;
