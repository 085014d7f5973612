use std::fs;
use std::path::Path;

use bevy::prelude::*;
use galaxy_core::{IoError, SimConfig};

/// Persist the configuration between runs as bincode
pub fn save_config(config: &SimConfig, path: &Path) -> Result<(), IoError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| IoError::Open {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let data = bincode::serialize(config).map_err(|e| IoError::Write {
        path: path.to_path_buf(),
        source: std::io::Error::other(e.to_string()),
    })?;
    fs::write(path, data).map_err(|source| IoError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Saved settings to {}", path.display());
    Ok(())
}

pub fn load_config(path: &Path) -> Result<SimConfig, IoError> {
    let data = fs::read(path).map_err(|source| IoError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    bincode::deserialize(&data).map_err(|e| IoError::ReadFailure {
        reason: e.to_string(),
    })
}

/// Stored configuration, or the default when there is none yet
pub fn load_config_or_default(path: &Path) -> SimConfig {
    match load_config(path) {
        Ok(config) => config,
        Err(IoError::Open { .. }) => SimConfig::default(),
        Err(e) => {
            warn!("Ignoring unreadable settings {}: {e}", path.display());
            SimConfig::default()
        }
    }
}
