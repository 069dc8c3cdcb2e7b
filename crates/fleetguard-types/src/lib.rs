//! Core types shared across all fleetguard crates.
//!
//! Defines access-control rules and templates, policy findings, severity,
//! configuration, and the shared error type used by the policy engine, the
//! audit ledger, the tunnel pool, and the CLI.

pub mod config;
pub mod config_loader;
pub mod error;
pub mod finding;
pub mod rule;

pub use config::{
    AuditConfig, CleanupConfig, FleetGuardConfig, PoolConfig, ValidationConfig,
    AUDIT_LOG_FILENAME, CONFIG_FILENAME,
};
pub use config_loader::ConfigLoader;
pub use error::FleetGuardError;
pub use finding::{Finding, Severity, ValidationResult};
pub use rule::{
    AddressRange, Direction, PortRange, Protocol, RuleAction, RuleSet, RuleSetRef, SecurityRule,
};
