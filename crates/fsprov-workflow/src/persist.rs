use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(value))
}

/// Write `value` as pretty JSON through a temp file and rename.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let tmp_path = temp_path(path);
    let payload = serde_json::to_string_pretty(value).context("Failed to serialize JSON")?;

    let mut file = File::create(&tmp_path)
        .with_context(|| format!("Failed to create temp file: {}", tmp_path.display()))?;
    file.write_all(payload.as_bytes())
        .with_context(|| format!("Failed to write {}", tmp_path.display()))?;
    file.sync_all().context("Failed to flush temp file")?;

    fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to atomically replace {}", path.display()))?;

    if let Some(parent) = parent {
        let dir = File::open(parent)
            .with_context(|| format!("Failed to open directory: {}", parent.display()))?;
        dir.sync_all().ok();
    }

    Ok(())
}

fn temp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("fsprov.json");
    path.with_file_name(format!("{}.tmp", file_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    #[test]
    fn write_creates_parent_and_leaves_no_temp_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/report.json");
        let mut value = BTreeMap::new();
        value.insert("changed".to_string(), true);

        write_json_atomic(&path, &value).unwrap();

        let loaded: BTreeMap<String, bool> = read_json(&path).unwrap().unwrap();
        assert_eq!(loaded, value);
        assert!(!dir.path().join("nested/report.json.tmp").exists());
    }

    #[test]
    fn read_missing_file_is_none() {
        let dir = tempdir().unwrap();
        let loaded: Option<BTreeMap<String, bool>> =
            read_json(&dir.path().join("absent.json")).unwrap();
        assert!(loaded.is_none());
    }
}
