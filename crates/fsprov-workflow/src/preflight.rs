use crate::model::Pool;
use anyhow::{Context, Result};
use log::info;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

const BASE_BINARIES: [&str; 3] = ["wipefs", "blkid", "lsblk"];

#[derive(Clone, Debug)]
pub struct PreflightConfig {
    pub require_root: bool,
    pub required_binaries: Vec<String>,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            require_root: true,
            required_binaries: BASE_BINARIES.iter().map(|b| b.to_string()).collect(),
        }
    }
}

impl PreflightConfig {
    /// Checks needed to apply `pools`. Check mode never needs root.
    pub fn for_pools(pools: &[Pool], check_mode: bool) -> Self {
        let mut cfg = Self {
            require_root: !check_mode,
            ..Self::default()
        };
        for pool in pools {
            for volume in &pool.volumes {
                let Some(fs_type) = volume.fs_type else {
                    continue;
                };
                if !volume.create || volume.removing(pool) {
                    continue;
                }
                let program = fs_type.mkfs_program().to_string();
                if !cfg.required_binaries.contains(&program) {
                    cfg.required_binaries.push(program);
                }
            }
        }
        cfg
    }
}

pub fn run(cfg: &PreflightConfig) -> Result<()> {
    info!("Preflight checks");

    if cfg.require_root {
        check_root()?;
    } else {
        info!("Skipping root check (check mode)");
    }
    check_binaries(&cfg.required_binaries)?;

    info!("Preflight complete");
    Ok(())
}

fn check_root() -> Result<()> {
    // SAFETY: geteuid has no preconditions and cannot fail.
    let euid = unsafe { libc::geteuid() };
    if euid != 0 {
        anyhow::bail!("fsprov must run as root to modify block devices (euid={euid})");
    }
    Ok(())
}

fn check_binaries(bins: &[String]) -> Result<()> {
    let path = env::var_os("PATH").unwrap_or_default();
    let entries = env::split_paths(&path).collect::<Vec<_>>();
    for bin in bins {
        let Some(found) = find_in_paths(bin, &entries) else {
            anyhow::bail!("Required binary '{}' not found in PATH", bin);
        };
        ensure_executable(&found).with_context(|| {
            format!(
                "Required binary '{}' was found at {} but is not executable",
                bin,
                found.display()
            )
        })?;
    }
    Ok(())
}

fn ensure_executable(path: &Path) -> Result<()> {
    let md = fs::metadata(path).with_context(|| format!("failed to stat {}", path.display()))?;
    if !md.is_file() {
        anyhow::bail!("{} is not a regular file", path.display());
    }
    use std::os::unix::fs::PermissionsExt;
    if md.permissions().mode() & 0o111 == 0 {
        anyhow::bail!("{} is not executable", path.display());
    }
    Ok(())
}

fn find_in_paths(binary: &str, paths: &[PathBuf]) -> Option<PathBuf> {
    paths
        .iter()
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.exists())
}
