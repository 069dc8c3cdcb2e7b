//! Layered configuration loading.
//!
//! Sources are merged in priority order (later overrides earlier):
//! 1. Built-in defaults ([`FleetGuardConfig::default()`])
//! 2. An optional config file (`fleetguard.toml`)
//! 3. `FLEETGUARD_*` environment variables
//!
//! Nested keys use a double underscore, so `FLEETGUARD_POOL__MAX_TUNNELS=4`
//! sets `pool.max_tunnels`.

use std::path::{Path, PathBuf};

use crate::config::FleetGuardConfig;
use crate::FleetGuardError;

/// Config files larger than this are rejected.
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Environment variable to TOML path mapping.
pub struct EnvMapping {
    pub env_var: &'static str,
    pub toml_path: &'static [&'static str],
}

/// All supported `FLEETGUARD_*` overrides.
pub const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        env_var: "FLEETGUARD_POOL__MAX_TUNNELS",
        toml_path: &["pool", "max_tunnels"],
    },
    EnvMapping {
        env_var: "FLEETGUARD_POOL__IDLE_TIMEOUT_SECS",
        toml_path: &["pool", "idle_timeout_secs"],
    },
    EnvMapping {
        env_var: "FLEETGUARD_POOL__VERIFY_LOOPBACK",
        toml_path: &["pool", "verify_loopback"],
    },
    EnvMapping {
        env_var: "FLEETGUARD_CLEANUP__INTERVAL_SECS",
        toml_path: &["cleanup", "interval_secs"],
    },
    EnvMapping {
        env_var: "FLEETGUARD_AUDIT__LOG_PATH",
        toml_path: &["audit", "log_path"],
    },
    EnvMapping {
        env_var: "FLEETGUARD_AUDIT__BACKUP_DIR",
        toml_path: &["audit", "backup_dir"],
    },
    EnvMapping {
        env_var: "FLEETGUARD_AUDIT__ACTOR",
        toml_path: &["audit", "actor"],
    },
];

/// Merges defaults, an optional file, and environment overrides.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    use_env: bool,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            file: None,
            use_env: true,
        }
    }

    /// Read this file as the second layer. A missing file is an error.
    #[must_use]
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// Ignore `FLEETGUARD_*` variables (mostly for tests).
    #[must_use]
    pub fn without_env(mut self) -> Self {
        self.use_env = false;
        self
    }

    pub fn load(&self) -> Result<FleetGuardConfig, FleetGuardError> {
        self.load_with_env(|name| std::env::var(name).ok())
    }

    /// Like [`load`](Self::load), reading variables through `lookup`.
    pub fn load_with_env<F>(&self, lookup: F) -> Result<FleetGuardConfig, FleetGuardError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut merged = toml::Value::try_from(FleetGuardConfig::default())
            .map_err(|e| FleetGuardError::Config(format!("failed to serialize defaults: {e}")))?;

        if let Some(path) = &self.file {
            let content = read_config_file(path)?;
            let overlay: toml::Value = toml::from_str(&content).map_err(|e| {
                FleetGuardError::Config(format!("failed to parse {}: {e}", path.display()))
            })?;
            deep_merge(&mut merged, &overlay);
        }

        if self.use_env {
            for mapping in ENV_MAPPINGS {
                if let Some(raw) = lookup(mapping.env_var) {
                    validate_env_value(mapping.env_var, &raw)?;
                    set_nested_value(&mut merged, mapping.toml_path, parse_toml_literal(&raw));
                }
            }
        }

        let config: FleetGuardConfig = merged
            .try_into()
            .map_err(|e| FleetGuardError::Config(format!("invalid merged config: {e}")))?;
        config.validate()?;
        Ok(config)
    }
}

fn read_config_file(path: &Path) -> Result<String, FleetGuardError> {
    let meta = std::fs::metadata(path).map_err(|e| {
        FleetGuardError::Config(format!("failed to stat {}: {e}", path.display()))
    })?;
    if meta.len() > MAX_CONFIG_FILE_SIZE {
        return Err(FleetGuardError::Config(format!(
            "{} is {} bytes, larger than the {MAX_CONFIG_FILE_SIZE} byte limit",
            path.display(),
            meta.len()
        )));
    }
    std::fs::read_to_string(path)
        .map_err(|e| FleetGuardError::Config(format!("failed to read {}: {e}", path.display())))
}

fn validate_env_value(var_name: &str, value: &str) -> Result<(), FleetGuardError> {
    if value
        .chars()
        .any(|c| c == '\0' || (c.is_control() && !c.is_whitespace()))
    {
        return Err(FleetGuardError::Config(format!(
            "{var_name} contains control characters"
        )));
    }
    Ok(())
}

/// Interpret a raw env value as a bool or integer when it looks like one.
fn parse_toml_literal(raw: &str) -> toml::Value {
    let trimmed = raw.trim();
    if let Ok(b) = trimmed.parse::<bool>() {
        return toml::Value::Boolean(b);
    }
    if let Ok(i) = trimmed.parse::<i64>() {
        return toml::Value::Integer(i);
    }
    toml::Value::String(raw.to_string())
}

fn deep_merge(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_table.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

fn set_nested_value(root: &mut toml::Value, path: &[&str], value: toml::Value) {
    let Some((last, parents)) = path.split_last() else {
        return;
    };
    let mut current = root;
    for segment in parents {
        current = match current {
            toml::Value::Table(table) => table
                .entry(segment.to_string())
                .or_insert_with(|| toml::Value::Table(toml::map::Map::new())),
            _ => return,
        };
    }
    if let toml::Value::Table(table) = current {
        table.insert(last.to_string(), value);
    }
}
