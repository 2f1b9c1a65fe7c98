//! LUKS container operations (cryptsetup).

use crate::HalResult;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

/// Options for formatting a device as LUKS.
#[derive(Debug, Clone)]
pub struct LuksOptions {
    pub dry_run: bool,
    pub confirmed: bool,
}

impl LuksOptions {
    pub fn new(dry_run: bool, confirmed: bool) -> Self {
        Self { dry_run, confirmed }
    }
}

/// Trait for managing LUKS containers.
///
/// Key arguments are paths to key files, as cryptsetup's `--key-file` expects.
pub trait CryptOps {
    fn is_luks(&self, device: &Path) -> HalResult<bool>;

    fn luks_format(&self, device: &Path, key_file: &Path, opts: &LuksOptions) -> HalResult<()>;

    fn luks_open(&self, device: &Path, key_file: &Path, name: &str, dry_run: bool)
        -> HalResult<()>;

    fn luks_close(&self, name: &str, dry_run: bool) -> HalResult<()>;

    fn luks_add_key(
        &self,
        device: &Path,
        key_file: &Path,
        new_key_file: &Path,
        dry_run: bool,
    ) -> HalResult<()>;

    fn luks_remove_key(&self, device: &Path, key_file: &Path, dry_run: bool) -> HalResult<()>;

    /// Name of the open container on `device`, `None` when it is closed.
    fn container_name_by_device(&self, device: &Path) -> HalResult<Option<String>>;

    /// Backing device of the open container `name`, `None` when it is not open.
    fn container_device_by_name(&self, name: &str) -> HalResult<Option<PathBuf>>;
}

// `crypt <luks-name>` lines of `lsblk -nlo type,name`.
static LUKS_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*crypt\s+(\S*)\s*").expect("valid LUKS name regex"));
// `device: </luks/device>` line of `cryptsetup status`.
static LUKS_DEVICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*device:\s+(\S*)\s*").expect("valid LUKS device regex"));

/// Extract `<name>` from `lsblk -nlo type,name` output lines of the form `crypt <name>`.
pub fn parse_container_name(lsblk_output: &str) -> Option<String> {
    LUKS_NAME_RE
        .captures(lsblk_output)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|s| !s.is_empty())
}

/// Extract the backing device from `cryptsetup status` output (`device: <path>`).
pub fn parse_container_device(status_output: &str) -> Option<PathBuf> {
    LUKS_DEVICE_RE
        .captures(status_output)
        .and_then(|c| c.get(1))
        .map(|m| PathBuf::from(m.as_str()))
        .filter(|p| !p.as_os_str().is_empty())
}
