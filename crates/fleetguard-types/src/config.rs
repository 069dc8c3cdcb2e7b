//! Configuration types for the fleetguard core.
//!
//! [`FleetGuardConfig`] is the top-level configuration loaded from
//! `fleetguard.toml`, controlling the tunnel pool, the idle-cleanup
//! schedule, audit log locations, and template validation bounds.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::FleetGuardError;

/// Default configuration file name.
pub const CONFIG_FILENAME: &str = "fleetguard.toml";

/// Default audit log file name.
pub const AUDIT_LOG_FILENAME: &str = "audit.ndjson";

fn default_max_tunnels() -> usize {
    10
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_probe_timeout_secs() -> u64 {
    2
}

fn default_acquire_timeout_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

fn default_stop_timeout_secs() -> u64 {
    10
}

fn default_backup_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_actor() -> String {
    "fleetguard".into()
}

fn default_min_priority() -> u32 {
    100
}

fn default_max_priority() -> u32 {
    4096
}

/// Settings for the tunnel connection pool.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PoolConfig {
    /// Upper bound on pooled tunnels, including ones being created.
    #[serde(default = "default_max_tunnels")]
    pub max_tunnels: usize,
    /// Seconds a tunnel may sit idle before the cleanup sweep closes it.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Seconds allowed for the liveness probe before reusing a tunnel.
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
    /// Default deadline for `acquire` when the caller does not supply one.
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,
    /// Confirm that new tunnels refuse non-loopback connections.
    #[serde(default = "default_true")]
    pub verify_loopback: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_tunnels: default_max_tunnels(),
            idle_timeout_secs: default_idle_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
            acquire_timeout_secs: default_acquire_timeout_secs(),
            verify_loopback: true,
        }
    }
}

impl PoolConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }
}

/// Settings for the background idle-tunnel sweep.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanupConfig {
    #[serde(default = "default_cleanup_interval_secs")]
    pub interval_secs: u64,
    /// How long `stop` waits for an in-flight sweep before aborting it.
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

impl CleanupConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

/// Settings for the append-only audit log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditConfig {
    pub log_path: PathBuf,
    pub backup_dir: PathBuf,
    /// Age in seconds after which the next write triggers a backup.
    #[serde(default = "default_backup_interval_secs")]
    pub backup_interval_secs: u64,
    /// Actor recorded on events emitted by the core itself.
    #[serde(default = "default_actor")]
    pub actor: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from(AUDIT_LOG_FILENAME),
            backup_dir: PathBuf::from("audit-backups"),
            backup_interval_secs: default_backup_interval_secs(),
            actor: default_actor(),
        }
    }
}

impl AuditConfig {
    pub fn backup_interval(&self) -> Duration {
        Duration::from_secs(self.backup_interval_secs)
    }
}

/// Settings for template validation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValidationConfig {
    /// Also require an outbound deny-all rule at the lowest precedence.
    #[serde(default)]
    pub require_outbound_default_deny: bool,
    #[serde(default = "default_min_priority")]
    pub min_priority: u32,
    #[serde(default = "default_max_priority")]
    pub max_priority: u32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            require_outbound_default_deny: false,
            min_priority: default_min_priority(),
            max_priority: default_max_priority(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FleetGuardConfig {
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub cleanup: CleanupConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

impl FleetGuardConfig {
    /// Parse a configuration from a TOML string and validate it.
    pub fn from_toml(content: &str) -> Result<Self, FleetGuardError> {
        let config: Self =
            toml::from_str(content).map_err(|e| FleetGuardError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize the configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String, FleetGuardError> {
        toml::to_string_pretty(self).map_err(|e| FleetGuardError::Config(e.to_string()))
    }

    /// Reject values that would make the pool or scheduler unusable.
    pub fn validate(&self) -> Result<(), FleetGuardError> {
        if self.pool.max_tunnels == 0 {
            return Err(FleetGuardError::Config(
                "pool.max_tunnels must be at least 1".into(),
            ));
        }
        if self.pool.idle_timeout_secs == 0 {
            return Err(FleetGuardError::Config(
                "pool.idle_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.cleanup.interval_secs == 0 {
            return Err(FleetGuardError::Config(
                "cleanup.interval_secs must be greater than zero".into(),
            ));
        }
        if self.validation.min_priority > self.validation.max_priority {
            return Err(FleetGuardError::Config(format!(
                "validation.min_priority ({}) exceeds validation.max_priority ({})",
                self.validation.min_priority, self.validation.max_priority
            )));
        }
        if self.audit.log_path.as_os_str().is_empty() {
            return Err(FleetGuardError::Config("audit.log_path must not be empty".into()));
        }
        Ok(())
    }
}
