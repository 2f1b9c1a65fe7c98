//! Declared storage state: pools, volumes and filesystem types.

use fsprov_error::ProvisionError;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

const DEFAULT_DESTROY_OPTIONS: &str = "-af";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FsType {
    Ext2,
    Ext3,
    Ext4,
    Xfs,
    Btrfs,
    Vfat,
    Swap,
}

impl FsType {
    pub const ALL: [FsType; 7] = [
        FsType::Ext2,
        FsType::Ext3,
        FsType::Ext4,
        FsType::Xfs,
        FsType::Btrfs,
        FsType::Vfat,
        FsType::Swap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FsType::Ext2 => "ext2",
            FsType::Ext3 => "ext3",
            FsType::Ext4 => "ext4",
            FsType::Xfs => "xfs",
            FsType::Btrfs => "btrfs",
            FsType::Vfat => "vfat",
            FsType::Swap => "swap",
        }
    }

    /// Tool that writes this filesystem.
    pub fn mkfs_program(&self) -> &'static str {
        match self {
            FsType::Ext2 => "mkfs.ext2",
            FsType::Ext3 => "mkfs.ext3",
            FsType::Ext4 => "mkfs.ext4",
            FsType::Xfs => "mkfs.xfs",
            FsType::Btrfs => "mkfs.btrfs",
            FsType::Vfat => "mkfs.vfat",
            FsType::Swap => "mkswap",
        }
    }

    /// Flag that lets the tool overwrite an existing signature.
    pub fn force_flag(&self) -> Option<&'static str> {
        match self {
            FsType::Ext2 | FsType::Ext3 | FsType::Ext4 => Some("-F"),
            FsType::Xfs | FsType::Btrfs | FsType::Swap => Some("-f"),
            // mkfs.vfat never prompts.
            FsType::Vfat => None,
        }
    }

    pub fn label_flag(&self) -> &'static str {
        match self {
            FsType::Vfat => "-n",
            _ => "-L",
        }
    }

    /// Distribution packages providing the tools for this filesystem.
    pub fn packages(&self) -> &'static [&'static str] {
        match self {
            FsType::Ext2 | FsType::Ext3 | FsType::Ext4 => &["e2fsprogs"],
            FsType::Xfs => &["xfsprogs"],
            FsType::Btrfs => &["btrfs-progs"],
            FsType::Vfat => &["dosfstools"],
            FsType::Swap => &["util-linux"],
        }
    }

    pub fn is_mountable(&self) -> bool {
        !matches!(self, FsType::Swap)
    }
}

impl fmt::Display for FsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FsType {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        FsType::ALL
            .into_iter()
            .find(|t| t.as_str() == wanted)
            .ok_or_else(|| ProvisionError::InvalidConfig(format!("unknown fs_type '{s}'")))
    }
}

// Automation inputs use an empty string for "no filesystem".
fn empty_fs_type_as_none<'de, D>(deserializer: D) -> Result<Option<FsType>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(serde::de::Error::custom),
    }
}

fn default_destroy_options() -> String {
    DEFAULT_DESTROY_OPTIONS.to_string()
}

/// A block device with its desired filesystem attributes.
///
/// `wipe`, `create` and `remove` are computed by whoever produced the
/// declaration; they are only branched on here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    #[serde(alias = "_device")]
    pub device: PathBuf,
    #[serde(default, deserialize_with = "empty_fs_type_as_none")]
    pub fs_type: Option<FsType>,
    #[serde(default)]
    pub fs_create_options: String,
    #[serde(default = "default_destroy_options")]
    pub fs_destroy_options: String,
    #[serde(default)]
    pub fs_label: Option<String>,
    #[serde(default)]
    pub mount_point: Option<PathBuf>,
    #[serde(default)]
    pub mount_options: Option<String>,
    #[serde(default, alias = "_wipe")]
    pub wipe: bool,
    #[serde(default, alias = "_create")]
    pub create: bool,
    #[serde(default, alias = "_remove")]
    pub remove: bool,
}

impl Volume {
    pub fn new(name: impl Into<String>, device: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            device: device.into(),
            fs_type: None,
            fs_create_options: String::new(),
            fs_destroy_options: default_destroy_options(),
            fs_label: None,
            mount_point: None,
            mount_options: None,
            wipe: false,
            create: false,
            remove: false,
        }
    }

    /// Removal requested by the volume itself or inherited from its pool.
    pub fn removing(&self, pool: &Pool) -> bool {
        self.remove || pool.state == PoolState::Absent
    }

    pub fn create_args(&self) -> Result<Vec<String>, ProvisionError> {
        split_options(&self.fs_create_options)
    }

    pub fn destroy_args(&self) -> Result<Vec<String>, ProvisionError> {
        split_options(&self.fs_destroy_options)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolState {
    #[default]
    Present,
    Absent,
}

/// Parent grouping of volumes, e.g. an LVM volume group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pool {
    pub name: String,
    #[serde(default)]
    pub state: PoolState,
    #[serde(default)]
    pub volumes: Vec<Volume>,
}

impl Pool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: PoolState::Present,
            volumes: Vec::new(),
        }
    }

    pub fn with_volume(mut self, volume: Volume) -> Self {
        self.volumes.push(volume);
        self
    }
}

/// Split an option string into words using POSIX shell quoting rules.
///
/// Only quoting is interpreted; there is no expansion of any kind.
pub fn split_options(input: &str) -> Result<Vec<String>, ProvisionError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(ch) => current.push(ch),
                        None => return Err(unterminated(input, '\'')),
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(ch @ ('"' | '\\' | '$' | '`')) => current.push(ch),
                            Some(ch) => {
                                current.push('\\');
                                current.push(ch);
                            }
                            None => return Err(unterminated(input, '"')),
                        },
                        Some(ch) => current.push(ch),
                        None => return Err(unterminated(input, '"')),
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(ch) => current.push(ch),
                    None => {
                        return Err(ProvisionError::InvalidConfig(format!(
                            "trailing backslash in options '{input}'"
                        )))
                    }
                }
            }
            c => {
                in_word = true;
                current.push(c);
            }
        }
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

fn unterminated(input: &str, quote: char) -> ProvisionError {
    ProvisionError::InvalidConfig(format!("unterminated {quote} in options '{input}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fs_type_parses_case_insensitively() {
        assert_eq!("XFS".parse::<FsType>().unwrap(), FsType::Xfs);
        assert_eq!(" ext4 ".parse::<FsType>().unwrap(), FsType::Ext4);
        assert!("ntfs".parse::<FsType>().is_err());
    }

    #[test]
    fn fs_type_tooling() {
        assert_eq!(FsType::Swap.mkfs_program(), "mkswap");
        assert_eq!(FsType::Ext3.force_flag(), Some("-F"));
        assert_eq!(FsType::Vfat.force_flag(), None);
        assert_eq!(FsType::Vfat.label_flag(), "-n");
        assert_eq!(FsType::Btrfs.packages(), &["btrfs-progs"]);
        assert!(!FsType::Swap.is_mountable());
    }

    #[test]
    fn pool_absent_propagates_removal() {
        let volume = Volume::new("data", "/dev/vg0/data");
        let mut pool = Pool::new("vg0");
        assert!(!volume.removing(&pool));
        pool.state = PoolState::Absent;
        assert!(volume.removing(&pool));
    }

    #[test]
    fn volume_accepts_underscore_flags() {
        let json = r#"{
            "name": "data",
            "_device": "/dev/vg0/data",
            "fs_type": "xfs",
            "_wipe": true,
            "_create": true
        }"#;
        let volume: Volume = serde_json::from_str(json).unwrap();
        assert_eq!(volume.device, PathBuf::from("/dev/vg0/data"));
        assert_eq!(volume.fs_type, Some(FsType::Xfs));
        assert!(volume.wipe && volume.create && !volume.remove);
        assert_eq!(volume.fs_destroy_options, "-af");
    }

    #[test]
    fn empty_fs_type_means_none() {
        let json = r#"{"name": "raw", "device": "/dev/vdb", "fs_type": ""}"#;
        let volume: Volume = serde_json::from_str(json).unwrap();
        assert_eq!(volume.fs_type, None);
    }

    #[test]
    fn unknown_fs_type_is_rejected() {
        let json = r#"{"name": "raw", "device": "/dev/vdb", "fs_type": "zfs"}"#;
        let err = serde_json::from_str::<Volume>(json).unwrap_err();
        assert!(err.to_string().contains("unknown fs_type"));
    }

    #[test]
    fn split_options_honours_quotes() {
        assert_eq!(
            split_options(r#"-m 0 -E "lazy_itable_init=0,root_owner=0:0" -O 'a b'"#).unwrap(),
            vec!["-m", "0", "-E", "lazy_itable_init=0,root_owner=0:0", "-O", "a b"]
        );
        assert_eq!(split_options(r"a\ b c").unwrap(), vec!["a b", "c"]);
        assert_eq!(split_options(r#""""#).unwrap(), vec![""]);
        assert!(split_options("   ").unwrap().is_empty());
    }

    #[test]
    fn split_options_rejects_unterminated_quotes() {
        assert!(split_options("-L 'data").is_err());
        assert!(split_options("-L \"data").is_err());
    }

    #[test]
    fn split_options_rejects_trailing_backslash() {
        let err = split_options(r"-L data\").unwrap_err();
        assert!(err.to_string().contains("trailing backslash"));
        assert_eq!(split_options(r"-L data\\").unwrap(), vec!["-L", "data\\"]);
    }
}
