//! Parsing helpers for `/proc/self/mountinfo` (and similar mountinfo files).

use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountInfo {
    pub mount_point: PathBuf,
    pub fstype: String,
    pub source: String,
}

pub fn parse_mountinfo(content: &str) -> Vec<MountInfo> {
    content
        .lines()
        .filter_map(|line| {
            // mountinfo format:
            //   <pre fields...> <mount point> <...> - <fstype> <source> <superopts>
            let (pre, post) = line.split_once(" - ")?;
            let pre_fields: Vec<&str> = pre.split_whitespace().collect();
            if pre_fields.len() < 5 {
                return None;
            }
            let mut post_fields = post.split_whitespace();
            let fstype = post_fields.next()?.to_string();
            let source = unescape_mount_path(post_fields.next()?);
            Some(MountInfo {
                mount_point: PathBuf::from(unescape_mount_path(pre_fields[4])),
                fstype,
                source,
            })
        })
        .collect()
}

pub fn is_mounted_from_info(path: &Path, entries: &[MountInfo]) -> bool {
    let target = normalize_path(path);
    entries
        .iter()
        .any(|entry| normalize_path(&entry.mount_point) == target)
}

/// Mount points backed by exactly `device`, deepest first.
///
/// Unlike a prefix match, `/dev/sda1` does not match `/dev/sda10`. Symlinks
/// are resolved on both sides, so `/dev/vg0/data` matches a mount recorded
/// as `/dev/mapper/vg0-data` or `/dev/dm-3`.
pub fn mount_points_of_device(device: &Path, entries: &[MountInfo]) -> Vec<PathBuf> {
    let wanted = canonical_source(device);
    let mut mounts: Vec<PathBuf> = entries
        .iter()
        .filter(|e| canonical_source(Path::new(&e.source)) == wanted)
        .map(|e| e.mount_point.clone())
        .collect();
    mounts.sort_by_key(|p| std::cmp::Reverse(p.components().count()));
    mounts.dedup();
    mounts
}

pub fn unescape_mount_path(raw: &str) -> String {
    raw.replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

// Sources such as `tmpfs` or `server:/export` are compared verbatim.
fn canonical_source(path: &Path) -> String {
    if !path.is_absolute() {
        return normalize_path(path);
    }
    fs::canonicalize(path)
        .map(|p| normalize_path(&p))
        .unwrap_or_else(|_| normalize_path(path))
}

fn normalize_path(path: &Path) -> String {
    let s = path.to_string_lossy();
    if s.len() > 1 && s.ends_with('/') {
        s.trim_end_matches('/').to_string()
    } else {
        s.to_string()
    }
}
