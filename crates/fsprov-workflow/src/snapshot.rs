//! Block device snapshots for idempotency checks.
//!
//! A snapshot is the `lsblk` view of every block device, keyed by device
//! path. Running a provisioning pass twice and comparing the snapshots taken
//! after each pass shows whether the second pass changed anything.

use crate::persist::{read_json, write_json_atomic};
use anyhow::{bail, Context, Result};
use fsprov_error::ProvisionError;
use fsprov_hal::ProbeOps;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub type DeviceInfo = BTreeMap<String, String>;
pub type BlockState = BTreeMap<String, DeviceInfo>;

/// Parse `lsblk -P` output into per-device field maps.
///
/// Keys are lowercased, a `type` of `part` becomes `partition`, and lines
/// without a `NAME` are ignored.
pub fn parse_lsblk_pairs(output: &str) -> Result<BlockState> {
    let mut state = BlockState::new();
    for (lineno, line) in output.lines().enumerate() {
        let pairs = parse_pairs(line)
            .with_context(|| format!("malformed lsblk output on line {}", lineno + 1))?;
        let mut device = DeviceInfo::new();
        for (key, value) in pairs {
            let key = key.to_ascii_lowercase();
            let value = if key == "type" && value == "part" {
                "partition".to_string()
            } else {
                value
            };
            device.insert(key, value);
        }
        if let Some(name) = device.get("name").cloned() {
            state.insert(name, device);
        }
    }
    Ok(state)
}

fn parse_pairs(line: &str) -> Result<Vec<(String, String)>> {
    let mut pairs = Vec::new();
    let mut rest = line.trim_start();
    while !rest.is_empty() {
        let eq = match rest.find('=') {
            Some(idx) => idx,
            None => bail!("expected KEY=\"value\" in '{line}'"),
        };
        let key = &rest[..eq];
        if key.is_empty() || key.contains(char::is_whitespace) {
            bail!("bad key '{key}' in '{line}'");
        }
        let after = &rest[eq + 1..];
        let Some(quoted) = after.strip_prefix('"') else {
            bail!("unquoted value for {key} in '{line}'");
        };
        let Some(end) = quoted.find('"') else {
            bail!("unterminated value for {key} in '{line}'");
        };
        pairs.push((key.to_string(), unescape_lsblk(&quoted[..end])));
        rest = quoted[end + 1..].trim_start();
    }
    Ok(pairs)
}

// lsblk writes unsafe bytes as `\xNN`.
fn unescape_lsblk(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && bytes[i + 1] == b'x' {
            let decoded = std::str::from_utf8(&bytes[i + 2..i + 4])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(byte) = decoded {
                out.push(byte);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

pub fn gather(hal: &dyn ProbeOps) -> Result<BlockState> {
    let output = hal.lsblk_pairs().context("failed to list block devices")?;
    parse_lsblk_pairs(&output)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldChange {
    pub before: Option<String>,
    pub after: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: BTreeMap<String, BTreeMap<String, FieldChange>>,
}

impl SnapshotDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

pub fn compare(before: &BlockState, after: &BlockState) -> SnapshotDiff {
    let mut diff = SnapshotDiff::default();
    for (name, old) in before {
        let Some(new) = after.get(name) else {
            diff.removed.push(name.clone());
            continue;
        };
        let mut fields = BTreeMap::new();
        for key in old.keys().chain(new.keys()) {
            let (a, b) = (old.get(key), new.get(key));
            if a != b {
                fields.insert(
                    key.clone(),
                    FieldChange {
                        before: a.cloned(),
                        after: b.cloned(),
                    },
                );
            }
        }
        if !fields.is_empty() {
            diff.changed.insert(name.clone(), fields);
        }
    }
    diff.added = after
        .keys()
        .filter(|name| !before.contains_key(*name))
        .cloned()
        .collect();
    diff
}

/// Named snapshots persisted as a JSON map.
#[derive(Debug)]
pub struct SnapshotStore {
    path: PathBuf,
    snapshots: BTreeMap<String, BlockState>,
}

impl SnapshotStore {
    pub fn load(path: &Path) -> Result<Self> {
        let snapshots = read_json(path)
            .with_context(|| format!("failed to load snapshots from {}", path.display()))?
            .unwrap_or_default();
        Ok(Self {
            path: path.to_path_buf(),
            snapshots,
        })
    }

    pub fn save(&self) -> Result<()> {
        write_json_atomic(&self.path, &self.snapshots)
    }

    pub fn insert(&mut self, name: impl Into<String>, state: BlockState) {
        self.snapshots.insert(name.into(), state);
    }

    pub fn get(&self, name: &str) -> Result<&BlockState> {
        self.snapshots
            .get(name)
            .with_context(|| format!("no snapshot named '{name}' in {}", self.path.display()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.snapshots.keys().map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotRequest {
    pub gather: Option<String>,
    pub compare_1: Option<String>,
    pub compare_2: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompareResult {
    pub diff: bool,
    pub diff_details: SnapshotDiff,
}

impl SnapshotRequest {
    pub fn validate(&self) -> Result<(), ProvisionError> {
        if self.compare_1.is_some() != self.compare_2.is_some() {
            return Err(ProvisionError::InvalidConfig(
                "both or none of compare_1/compare_2 must be given".to_string(),
            ));
        }
        Ok(())
    }

    /// Gather first (when asked), then compare (when asked).
    pub fn run(&self, hal: &dyn ProbeOps, store: &mut SnapshotStore) -> Result<Option<CompareResult>> {
        self.validate()?;

        if let Some(name) = &self.gather {
            let state = gather(hal)?;
            log::info!("Gathered {} block devices as '{}'", state.len(), name);
            store.insert(name.clone(), state);
            store.save()?;
        }

        match (&self.compare_1, &self.compare_2) {
            (Some(a), Some(b)) => {
                let diff_details = compare(store.get(a)?, store.get(b)?);
                Ok(Some(CompareResult {
                    diff: !diff_details.is_empty(),
                    diff_details,
                }))
            }
            _ => Ok(None),
        }
    }
}
