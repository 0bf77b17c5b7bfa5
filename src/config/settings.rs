//! Scalar session preferences that survive restarts

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use tracing::{debug, error};

use super::{write_file, ConfigPaths};
use crate::constants::brightness;
use crate::types::{ColorTemperatureMode, DisplayMode};

fn default_temperature() -> i32 {
    brightness::NEUTRAL_TEMPERATURE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub display_mode: DisplayMode,

    /// Active custom profile name
    #[serde(default)]
    pub current_custom_id: String,

    #[serde(default)]
    pub color_temperature_mode: ColorTemperatureMode,

    #[serde(default = "default_temperature")]
    pub color_temperature_manual: i32,

    /// Output name → saved brightness
    #[serde(default)]
    pub brightness: BTreeMap<String, f64>,

    /// Touchscreen uuid → output name
    #[serde(default)]
    pub touch_map: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            display_mode: DisplayMode::Extend,
            current_custom_id: String::new(),
            color_temperature_mode: ColorTemperatureMode::Normal,
            color_temperature_manual: brightness::NEUTRAL_TEMPERATURE,
            brightness: BTreeMap::new(),
            touch_map: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Read settings, falling back to defaults on any error
    pub fn load(paths: &ConfigPaths) -> Self {
        let path = paths.settings();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<Settings>(&contents) {
                Ok(settings) => settings,
                Err(e) => {
                    error!(path = %path.display(), error = %e, "Failed to parse settings, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                debug!(path = %path.display(), "no settings file, using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self, paths: &ConfigPaths) -> Result<()> {
        let contents =
            serde_json::to_vec_pretty(self).context("Failed to serialize settings to JSON")?;
        write_file(&paths.settings(), &contents)
    }
}
