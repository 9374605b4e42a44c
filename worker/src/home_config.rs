//! Home-config: the small on-disk file holding the worker's assigned
//! identity (`worker_id`, `worker_secret`), persisted separately from the
//! main TOML config so that re-registration never requires hand-editing the
//! operator's config file.
//!
//! Written atomically (temp file + rename) so a crash mid-write can never
//! leave a half-written identity file behind.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HomeConfig {
    pub worker_id: String,
    pub worker_secret: String,
}

impl HomeConfig {
    pub fn is_registered(&self) -> bool {
        !self.worker_id.is_empty() && !self.worker_secret.is_empty()
    }
}

/// Load the home-config file, returning an empty (unregistered) `HomeConfig`
/// if it does not exist yet.
pub fn load(path: &Path) -> anyhow::Result<HomeConfig> {
    if !path.exists() {
        return Ok(HomeConfig::default());
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&raw)?)
}

/// Persist `config` to `path`, writing to a sibling temp file first and
/// renaming it into place so readers never observe a partial write.
pub fn save(path: &Path, config: &HomeConfig) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(config)?;

    let tmp_path = tmp_path_for(path);
    {
        let mut tmp_file = std::fs::File::create(&tmp_path)?;
        tmp_file.write_all(toml_str.as_bytes())?;
        tmp_file.sync_all()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Clear a persisted identity, forcing the next startup to register fresh.
/// Used by `--reregister`.
pub fn clear(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.toml");

        let config = HomeConfig {
            worker_id: "w-1".to_string(),
            worker_secret: "s3cret".to_string(),
        };
        save(&path, &config).unwrap();

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.worker_id, "w-1");
        assert!(loaded.is_registered());
    }

    #[test]
    fn missing_file_is_unregistered() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.toml");
        let loaded = load(&path).unwrap();
        assert!(!loaded.is_registered());
    }

    #[test]
    fn clear_removes_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("identity.toml");
        save(&path, &HomeConfig { worker_id: "w-1".to_string(), worker_secret: "s".to_string() }).unwrap();
        clear(&path).unwrap();
        assert!(!load(&path).unwrap().is_registered());
    }
}
