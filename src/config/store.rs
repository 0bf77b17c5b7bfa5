//! Fingerprint keyed layout store
//!
//! One [`ScreenConfig`] per monitor-set fingerprint, holding a config list per
//! layout policy plus named custom profiles. The record on disk is
//! `{"ConfigV5": {fingerprint: ScreenConfig}, "FillMode": {"FillModeMap": {..}}}`
//! next to a `config.version` marker.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use tracing::{debug, error, info, warn};

use super::migrate::{self, DiskConfig};
use super::{write_file, ConfigPaths};
use crate::constants::{brightness, config::CURRENT_VERSION};
use crate::error::{DisplayError, Result};
use crate::types::{ColorTemperatureMode, DisplayMode, Reflect, Rotation};

fn default_brightness() -> f64 {
    brightness::DEFAULT
}

fn default_temperature() -> i32 {
    brightness::NEUTRAL_TEMPERATURE
}

/// Persisted geometry of one monitor within a layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MonitorConfig {
    #[serde(rename = "UUID")]
    pub uuid: String,
    pub name: String,
    pub enabled: bool,
    pub x: i16,
    pub y: i16,
    /// On-screen width, already swapped for 90/270 rotation
    pub width: u16,
    pub height: u16,
    #[serde(default)]
    pub rotation: Rotation,
    #[serde(default)]
    pub reflect: Reflect,
    pub refresh_rate: f64,
    #[serde(default = "default_brightness")]
    pub brightness: f64,
    pub primary: bool,
    #[serde(default)]
    pub color_temperature_mode: ColorTemperatureMode,
    #[serde(default = "default_temperature")]
    pub color_temperature_manual: i32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            uuid: String::new(),
            name: String::new(),
            enabled: false,
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            rotation: Rotation::Normal,
            reflect: Reflect::None,
            refresh_rate: 0.0,
            brightness: brightness::DEFAULT,
            primary: false,
            color_temperature_mode: ColorTemperatureMode::Normal,
            color_temperature_manual: brightness::NEUTRAL_TEMPERATURE,
        }
    }
}

pub fn config_by_uuid<'a>(configs: &'a [MonitorConfig], uuid: &str) -> Option<&'a MonitorConfig> {
    configs.iter().find(|c| c.uuid == uuid)
}

/// Mark exactly the entry with `uuid` as primary
pub fn set_configs_primary(configs: &mut [MonitorConfig], uuid: &str) {
    for c in configs.iter_mut() {
        c.primary = c.uuid == uuid;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ModeConfigs {
    #[serde(default)]
    pub monitors: Vec<MonitorConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CustomModeConfig {
    pub name: String,
    #[serde(default)]
    pub monitors: Vec<MonitorConfig>,
}

/// Layout used when exactly one monitor is connected
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SingleModeConfig {
    #[serde(rename = "Monitors")]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub color_temperature_mode: ColorTemperatureMode,
    #[serde(default = "default_temperature")]
    pub color_temperature_manual: i32,
}

/// Everything saved for one monitor-set fingerprint
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScreenConfig {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom: Vec<CustomModeConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mirror: Option<ModeConfigs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extend: Option<ModeConfigs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only_one: Option<ModeConfigs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub single: Option<SingleModeConfig>,
}

impl ScreenConfig {
    /// Stored list for a policy, empty when absent
    pub fn get_monitor_configs(&self, mode: DisplayMode, custom_name: &str) -> Vec<MonitorConfig> {
        match mode {
            DisplayMode::Mirror => self.mirror.as_ref().map(|c| c.monitors.clone()),
            DisplayMode::Extend => self.extend.as_ref().map(|c| c.monitors.clone()),
            DisplayMode::OnlyOne => self.only_one.as_ref().map(|c| c.monitors.clone()),
            DisplayMode::Custom => self.custom(custom_name).map(|c| c.monitors.clone()),
            DisplayMode::Unknown => None,
        }
        .unwrap_or_default()
    }

    pub fn custom(&self, name: &str) -> Option<&CustomModeConfig> {
        self.custom.iter().find(|c| c.name == name)
    }

    /// Replace the list stored for a policy
    ///
    /// Only-one lists keep the last enabled geometry of entries that are now
    /// disabled, and drop disabled entries that were never enabled.
    pub fn set_monitor_configs(
        &mut self,
        mode: DisplayMode,
        custom_name: &str,
        configs: Vec<MonitorConfig>,
    ) {
        match mode {
            DisplayMode::Mirror => {
                self.mirror.get_or_insert_with(Default::default).monitors = configs
            }
            DisplayMode::Extend => {
                self.extend.get_or_insert_with(Default::default).monitors = configs
            }
            DisplayMode::OnlyOne => self.set_only_one(configs),
            DisplayMode::Custom => match self.custom.iter_mut().find(|c| c.name == custom_name) {
                Some(existing) => existing.monitors = configs,
                None => self.custom.push(CustomModeConfig {
                    name: custom_name.to_string(),
                    monitors: configs,
                }),
            },
            DisplayMode::Unknown => {}
        }
    }

    /// Like [`Self::set_monitor_configs`], then stamp the colour temperature
    /// onto every enabled entry
    pub fn set_mode_configs(
        &mut self,
        mode: DisplayMode,
        custom_name: &str,
        temperature_mode: ColorTemperatureMode,
        temperature_manual: i32,
        configs: Vec<MonitorConfig>,
    ) {
        self.set_monitor_configs(mode, custom_name, configs);
        let stored = match mode {
            DisplayMode::Mirror => self.mirror.as_mut().map(|c| &mut c.monitors),
            DisplayMode::Extend => self.extend.as_mut().map(|c| &mut c.monitors),
            DisplayMode::OnlyOne => self.only_one.as_mut().map(|c| &mut c.monitors),
            DisplayMode::Custom => self
                .custom
                .iter_mut()
                .find(|c| c.name == custom_name)
                .map(|c| &mut c.monitors),
            DisplayMode::Unknown => None,
        };
        for cfg in stored.into_iter().flatten().filter(|c| c.enabled) {
            cfg.color_temperature_mode = temperature_mode;
            cfg.color_temperature_manual = temperature_manual;
        }
    }

    fn set_only_one(&mut self, configs: Vec<MonitorConfig>) {
        let slot = self.only_one.get_or_insert_with(Default::default);
        let old = std::mem::take(&mut slot.monitors);
        slot.monitors = configs
            .into_iter()
            .filter_map(|mut cfg| {
                if cfg.enabled {
                    return Some(cfg);
                }
                let prev = config_by_uuid(&old, &cfg.uuid)?;
                // x and y are always zero in this policy
                cfg.x = 0;
                cfg.y = 0;
                cfg.width = prev.width;
                cfg.height = prev.height;
                cfg.refresh_rate = prev.refresh_rate;
                cfg.rotation = prev.rotation;
                cfg.reflect = prev.reflect;
                Some(cfg)
            })
            .collect();
    }

    pub fn set_single(
        &mut self,
        monitor: MonitorConfig,
        temperature_mode: ColorTemperatureMode,
        temperature_manual: i32,
    ) {
        self.single = Some(SingleModeConfig {
            monitor,
            color_temperature_mode: temperature_mode,
            color_temperature_manual: temperature_manual,
        });
    }

    /// Names of the custom profiles, sorted
    pub fn custom_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.custom.iter().map(|c| c.name.clone()).collect();
        names.sort();
        names
    }

    pub fn rename_custom(&mut self, old: &str, new: &str) -> Result<()> {
        if self.custom(new).is_some() {
            return Err(DisplayError::DuplicateProfile(new.to_string()));
        }
        let profile = self
            .custom
            .iter_mut()
            .find(|c| c.name == old)
            .ok_or_else(|| DisplayError::ProfileNotFound(old.to_string()))?;
        profile.name = new.to_string();
        Ok(())
    }

    /// Remove a custom profile, returning whether it existed
    pub fn delete_custom(&mut self, name: &str) -> bool {
        let before = self.custom.len();
        self.custom.retain(|c| c.name != name);
        self.custom.len() != before
    }
}

/// Outcome of reading the store from disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadStatus {
    /// Current schema read as-is
    Loaded,
    /// Older schema converted in memory
    Migrated { from: String },
    /// No data file yet
    Missing,
    /// Data unreadable; store starts empty
    Corrupt,
}

impl LoadStatus {
    /// Saved layouts are unavailable and the default policy must be used
    pub fn needs_fallback(&self) -> bool {
        matches!(self, LoadStatus::Missing | LoadStatus::Corrupt)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigStore {
    pub screens: BTreeMap<String, ScreenConfig>,
    /// `fingerprint/output` → fill mode
    pub fill_modes: BTreeMap<String, String>,
}

pub fn fill_mode_key(fingerprint: &str, output: &str) -> String {
    format!("{fingerprint}/{output}")
}

impl ConfigStore {
    /// Read and migrate; any failure yields an empty store
    pub fn load(paths: &ConfigPaths) -> (Self, LoadStatus) {
        match Self::try_load(paths) {
            Ok((store, status)) => {
                info!(
                    screens = store.screens.len(),
                    status = ?status,
                    path = %paths.data().display(),
                    "config store loaded"
                );
                (store, status)
            }
            Err(e) => {
                error!(path = %paths.data().display(), error = %e, "discarding unreadable config store");
                (Self::default(), LoadStatus::Corrupt)
            }
        }
    }

    pub fn try_load(paths: &ConfigPaths) -> Result<(Self, LoadStatus)> {
        let data = match fs::read(paths.data()) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %paths.data().display(), "no config store on disk");
                return Ok((Self::default(), LoadStatus::Missing));
            }
            Err(e) => return Err(DisplayError::SchemaMigration(e.to_string())),
        };
        let version = fs::read_to_string(paths.version())
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let (disk, from) = migrate::decode(version.as_deref(), &data)?;
        let store = Self {
            screens: disk.screens,
            fill_modes: disk.fill_mode.fill_mode_map,
        };
        let status = match from {
            Some(from) => {
                info!(from = %from, to = CURRENT_VERSION, "migrated config store");
                LoadStatus::Migrated { from }
            }
            None => LoadStatus::Loaded,
        };
        Ok((store, status))
    }

    /// Write the version marker, then the data file
    ///
    /// The two writes are independent; a crash between them leaves a new
    /// marker beside old data, which the loader tolerates by sniffing.
    pub fn save(&self, paths: &ConfigPaths) -> Result<()> {
        write_file(&paths.version(), CURRENT_VERSION.as_bytes())
            .map_err(|e| DisplayError::ConfigPersist(format!("{e:#}")))?;

        let disk = DiskConfig::from_parts(self.screens.clone(), self.fill_modes.clone());
        let data = serde_json::to_vec_pretty(&disk)
            .map_err(|e| DisplayError::ConfigPersist(e.to_string()))?;
        write_file(&paths.data(), &data)
            .map_err(|e| DisplayError::ConfigPersist(format!("{e:#}")))?;
        debug!(path = %paths.data().display(), screens = self.screens.len(), "config store saved");
        Ok(())
    }

    pub fn screen_config(&self, fingerprint: &str) -> Option<&ScreenConfig> {
        self.screens.get(fingerprint)
    }

    /// Existing record for `fingerprint`, created empty if absent
    pub fn get_screen_config(&mut self, fingerprint: &str) -> &mut ScreenConfig {
        if !self.screens.contains_key(fingerprint) {
            debug!(fingerprint = %fingerprint, "creating screen config");
        }
        self.screens.entry(fingerprint.to_string()).or_default()
    }

    pub fn get_monitor_configs(
        &self,
        fingerprint: &str,
        mode: DisplayMode,
        custom_name: &str,
    ) -> Vec<MonitorConfig> {
        self.screens
            .get(fingerprint)
            .map(|s| s.get_monitor_configs(mode, custom_name))
            .unwrap_or_default()
    }

    pub fn fill_mode(&self, fingerprint: &str, output: &str) -> Option<&str> {
        self.fill_modes
            .get(&fill_mode_key(fingerprint, output))
            .map(String::as_str)
    }

    pub fn set_fill_mode(&mut self, fingerprint: &str, output: &str, mode: &str) {
        if mode.is_empty() {
            warn!(output = %output, "ignoring empty fill mode");
            return;
        }
        self.fill_modes
            .insert(fill_mode_key(fingerprint, output), mode.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(uuid: &str, enabled: bool, w: u16, h: u16, rate: f64) -> MonitorConfig {
        MonitorConfig {
            uuid: uuid.into(),
            name: uuid.into(),
            enabled,
            width: w,
            height: h,
            refresh_rate: rate,
            ..Default::default()
        }
    }

    #[test]
    fn test_only_one_disable_preserves_geometry() {
        let mut screen = ScreenConfig::default();
        screen.set_monitor_configs(
            DisplayMode::OnlyOne,
            "",
            vec![cfg("A", true, 2560, 1440, 144.0), cfg("B", false, 0, 0, 0.0)],
        );
        // B was never enabled, so it is not stored
        assert_eq!(screen.get_monitor_configs(DisplayMode::OnlyOne, "").len(), 1);

        screen.set_monitor_configs(
            DisplayMode::OnlyOne,
            "",
            vec![cfg("A", false, 0, 0, 0.0), cfg("B", true, 1920, 1080, 60.0)],
        );
        let stored = screen.get_monitor_configs(DisplayMode::OnlyOne, "");
        let a = config_by_uuid(&stored, "A").unwrap();
        assert!(!a.enabled);
        assert_eq!((a.width, a.height, a.refresh_rate), (2560, 1440, 144.0));
        assert_eq!((a.x, a.y), (0, 0));
    }

    #[test]
    fn test_custom_profiles() {
        let mut screen = ScreenConfig::default();
        screen.set_monitor_configs(DisplayMode::Custom, "work", vec![cfg("A", true, 1920, 1080, 60.0)]);
        screen.set_monitor_configs(DisplayMode::Custom, "home", vec![]);
        assert_eq!(screen.custom_names(), vec!["home", "work"]);
        assert_eq!(screen.get_monitor_configs(DisplayMode::Custom, "work").len(), 1);
        assert!(screen.get_monitor_configs(DisplayMode::Custom, "missing").is_empty());

        assert!(matches!(
            screen.rename_custom("work", "home"),
            Err(DisplayError::DuplicateProfile(_))
        ));
        screen.rename_custom("work", "office").unwrap();
        assert!(screen.delete_custom("office"));
        assert!(!screen.delete_custom("office"));
    }

    #[test]
    fn test_color_temperature_stamped_on_enabled_only() {
        let mut screen = ScreenConfig::default();
        screen.set_mode_configs(
            DisplayMode::Extend,
            "",
            ColorTemperatureMode::Manual,
            4500,
            vec![cfg("A", true, 1920, 1080, 60.0), cfg("B", false, 1920, 1080, 60.0)],
        );
        let stored = screen.get_monitor_configs(DisplayMode::Extend, "");
        assert_eq!(stored[0].color_temperature_manual, 4500);
        assert_eq!(stored[1].color_temperature_mode, ColorTemperatureMode::Normal);
    }

    #[test]
    fn test_get_screen_config_creates() {
        let mut store = ConfigStore::default();
        assert!(store.screen_config("A,B").is_none());
        store.get_screen_config("A,B");
        assert!(store.screen_config("A,B").is_some());
    }

    #[test]
    fn test_round_trip_persistence() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ConfigPaths::new(dir.path());
        let mut store = ConfigStore::default();
        let screen = store.get_screen_config("A,B");
        let mut rotated = cfg("A", true, 1080, 1920, 59.95);
        rotated.rotation = Rotation::Left;
        rotated.reflect = Reflect::X;
        rotated.primary = true;
        screen.set_monitor_configs(DisplayMode::Extend, "", vec![rotated, cfg("B", true, 2560, 1440, 144.0)]);
        screen.set_monitor_configs(DisplayMode::Custom, "desk", vec![cfg("B", true, 1280, 720, 60.0)]);
        screen.set_single(cfg("A", true, 1920, 1080, 60.0), ColorTemperatureMode::Auto, 6500);
        store.set_fill_mode("A,B", "HDMI-1", "Full aspect");
        store.save(&paths).unwrap();

        let (loaded, status) = ConfigStore::try_load(&paths).unwrap();
        assert_eq!(status, LoadStatus::Loaded);
        assert_eq!(loaded, store);
        for mode in [DisplayMode::Extend, DisplayMode::Mirror, DisplayMode::OnlyOne] {
            assert_eq!(
                loaded.get_monitor_configs("A,B", mode, ""),
                store.get_monitor_configs("A,B", mode, "")
            );
        }
        assert_eq!(
            fs::read_to_string(paths.version()).unwrap(),
            CURRENT_VERSION
        );
    }

    #[test]
    fn test_missing_file_signals_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let (store, status) = ConfigStore::load(&ConfigPaths::new(dir.path()));
        assert!(store.screens.is_empty());
        assert!(status.needs_fallback());
    }

    #[test]
    fn test_corrupt_file_yields_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ConfigPaths::new(dir.path());
        fs::write(paths.data(), b"{not json").unwrap();
        assert!(matches!(
            ConfigStore::try_load(&paths),
            Err(DisplayError::SchemaMigration(_))
        ));
        let (store, status) = ConfigStore::load(&paths);
        assert!(store.screens.is_empty());
        assert_eq!(status, LoadStatus::Corrupt);
    }
}
