use crate::model::Pool;
use crate::packages::PackageManagerKind;
use anyhow::{Context, Result};
use fsprov_error::ProvisionError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// Declared storage layout read from a TOML or JSON file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionConfig {
    #[serde(default)]
    pub package_manager: PackageManagerKind,
    #[serde(default)]
    pub pools: Vec<Pool>,
}

impl ProvisionConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("failed to parse configuration TOML")
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("failed to parse configuration JSON")
    }

    pub fn validate(&self) -> Result<(), ProvisionError> {
        let mut pool_names = HashSet::new();
        for pool in &self.pools {
            if pool.name.trim().is_empty() {
                return Err(ProvisionError::InvalidConfig(
                    "pool name must not be empty".to_string(),
                ));
            }
            if !pool_names.insert(pool.name.as_str()) {
                return Err(ProvisionError::InvalidConfig(format!(
                    "duplicate pool '{}'",
                    pool.name
                )));
            }

            let mut volume_names = HashSet::new();
            for volume in &pool.volumes {
                if volume.name.trim().is_empty() {
                    return Err(ProvisionError::InvalidConfig(format!(
                        "volume without a name in pool '{}'",
                        pool.name
                    )));
                }
                if !volume_names.insert(volume.name.as_str()) {
                    return Err(ProvisionError::InvalidConfig(format!(
                        "duplicate volume '{}' in pool '{}'",
                        volume.name, pool.name
                    )));
                }
                if volume.device.as_os_str().is_empty() {
                    return Err(ProvisionError::InvalidConfig(format!(
                        "volume '{}' has no device",
                        volume.name
                    )));
                }
                volume.create_args()?;
                volume.destroy_args()?;
            }
        }
        Ok(())
    }

    pub fn volume_count(&self) -> usize {
        self.pools.iter().map(|p| p.volumes.len()).sum()
    }
}

/// Load and validate a configuration; `.json` files are JSON, anything else TOML.
pub fn load_config(path: &Path) -> Result<ProvisionConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let cfg = if is_json {
        ProvisionConfig::from_json(&text)
    } else {
        ProvisionConfig::from_toml(&text)
    }
    .with_context(|| format!("invalid config {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}
