//! Device probing operations (stat/lsblk/blkid).

use crate::HalResult;
use std::path::Path;

/// Probing operations trait.
pub trait ProbeOps {
    /// Whether the device node exists.
    fn device_exists(&self, device: &Path) -> HalResult<bool>;

    /// Filesystem signature on the device (`blkid -s TYPE`), `None` when blank.
    fn fs_signature(&self, device: &Path) -> HalResult<Option<String>>;

    /// Raw `lsblk -o NAME,FSTYPE,LABEL,UUID,TYPE -p -P -a` output.
    fn lsblk_pairs(&self) -> HalResult<String>;

    /// UUID reported by `lsblk -n <dev> -o UUID`.
    fn lsblk_uuid(&self, device: &Path) -> HalResult<String>;
}
