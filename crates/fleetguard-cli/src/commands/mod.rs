//! Command implementations for the `fleetguard` binary.

pub mod audit;
pub mod template;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use fleetguard_types::{ConfigLoader, FleetGuardConfig, CONFIG_FILENAME};

/// Load configuration from `--config`, else `./fleetguard.toml` if present,
/// else built-in defaults. `FLEETGUARD_*` variables apply in every case.
pub fn load_config(explicit: Option<&Path>) -> Result<FleetGuardConfig> {
    let file = match explicit {
        Some(path) => Some(path.to_path_buf()),
        None => Some(PathBuf::from(CONFIG_FILENAME)).filter(|p| p.is_file()),
    };
    let mut loader = ConfigLoader::new();
    if let Some(file) = &file {
        loader = loader.with_file(file);
    }
    loader.load().with_context(|| match &file {
        Some(path) => format!("failed to load config from {}", path.display()),
        None => "failed to load default config".to_string(),
    })
}
