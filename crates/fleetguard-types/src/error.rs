//! Error types shared across all fleetguard crates.

/// Errors that can occur across the fleetguard core.
///
/// Policy violations are deliberately absent: a violated policy is a
/// `critical` [`Finding`](crate::Finding) returned as data, never an error.
#[derive(Debug, thiserror::Error)]
pub enum FleetGuardError {
    #[error("schema error: {0}")]
    Schema(String),

    #[error("audit ledger error: {0}")]
    Ledger(String),

    #[error("integrity violation: {0}")]
    Integrity(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("control plane error: {0}")]
    ControlPlane(String),
}
