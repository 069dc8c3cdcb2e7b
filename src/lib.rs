//! Network-security core for fleet management.
//!
//! - [`policy`]: ACL template validation against forbidden and required checks.
//! - [`tunnel`]: a bounded pool of reusable, loopback-only brokered tunnels.
//! - [`ledger`]: an append-only audit log with per-record SHA-256 checksums.
//!
//! [`DeploymentGate`] ties them together: templates reach the control plane
//! only after validation, and every attempt is audited.

pub mod gate;

pub use fleetguard_ledger as ledger;
pub use fleetguard_policy as policy;
pub use fleetguard_tunnel as tunnel;
pub use fleetguard_types as types;

pub use gate::{ApplyMode, ApplyOutcome, ControlPlane, DeploymentGate};
