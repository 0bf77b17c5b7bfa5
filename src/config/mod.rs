//! Persistent configuration for randr-layoutd
//!
//! - **store**: fingerprint keyed layout records with schema migration
//! - **migrate**: readers for older on-disk shapes
//! - **settings**: scalar session preferences

pub mod migrate;
pub mod settings;
pub mod store;

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::config::{APP_DIR, BUILTIN_FILE, DATA_FILE, SETTINGS_FILE, VERSION_FILE};

pub use settings::Settings;
pub use store::{ConfigStore, LoadStatus, MonitorConfig, ScreenConfig};

/// File locations under one config directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigPaths {
    dir: PathBuf,
}

impl ConfigPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `$XDG_CONFIG_HOME/randr-layoutd`, or the working directory as a last resort
    pub fn default_dir() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(APP_DIR);
        path
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn data(&self) -> PathBuf {
        self.dir.join(DATA_FILE)
    }

    pub fn version(&self) -> PathBuf {
        self.dir.join(VERSION_FILE)
    }

    pub fn builtin(&self) -> PathBuf {
        self.dir.join(BUILTIN_FILE)
    }

    pub fn settings(&self) -> PathBuf {
        self.dir.join(SETTINGS_FILE)
    }

    /// Saved builtin monitor name, `None` if never recorded
    pub fn load_builtin(&self) -> Option<String> {
        let content = fs::read_to_string(self.builtin()).ok()?;
        let name = content.trim();
        if name.is_empty() { None } else { Some(name.to_string()) }
    }

    pub fn save_builtin(&self, name: &str) -> Result<()> {
        write_file(&self.builtin(), name.as_bytes())
    }
}

impl Default for ConfigPaths {
    fn default() -> Self {
        Self::new(Self::default_dir())
    }
}

/// Write through a sibling temp file and rename over the target
pub(crate) fn write_file(path: &Path, contents: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .context(format!("Failed to create config directory: {}", parent.display()))?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, contents)
        .context(format!("Failed to write temporary file {}", tmp.display()))?;
    fs::rename(&tmp, path)
        .context(format!("Failed to move {} into place", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ConfigPaths::new(dir.path());
        assert_eq!(paths.load_builtin(), None);
        paths.save_builtin("eDP-1").unwrap();
        assert_eq!(paths.load_builtin(), Some("eDP-1".to_string()));
    }

    #[test]
    fn test_write_file_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/dir/file.json");
        write_file(&path, b"{}").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "{}");
        assert!(!path.with_extension("tmp").exists());
    }
}
