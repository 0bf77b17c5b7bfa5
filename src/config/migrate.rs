//! Readers for every on-disk schema the store has used
//!
//! | marker | shape                                                         |
//! |--------|---------------------------------------------------------------|
//! | `4.0`  | fingerprint → screen config, rotation and reflect in one field |
//! | `5.0`  | fingerprint → screen config                                   |
//! | `6.0`  | `{ConfigV5: {..}, FillMode: {FillModeMap: {..}}}`             |
//!
//! Without a marker the data file shape is sniffed.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::store::{CustomModeConfig, ModeConfigs, MonitorConfig, ScreenConfig};
use crate::constants::brightness;
use crate::error::{DisplayError, Result};
use crate::types::{split_rotation, ColorTemperatureMode};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FillModeConfigs {
    #[serde(rename = "FillModeMap", default)]
    pub fill_mode_map: BTreeMap<String, String>,
}

/// Current on-disk record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DiskConfig {
    #[serde(rename = "ConfigV5", default)]
    pub screens: BTreeMap<String, ScreenConfig>,
    #[serde(rename = "FillMode", default)]
    pub fill_mode: FillModeConfigs,
}

impl DiskConfig {
    pub fn from_parts(
        screens: BTreeMap<String, ScreenConfig>,
        fill_mode_map: BTreeMap<String, String>,
    ) -> Self {
        Self {
            screens,
            fill_mode: FillModeConfigs { fill_mode_map },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct MonitorConfigV4 {
    #[serde(rename = "UUID")]
    uuid: String,
    #[serde(default)]
    name: String,
    enabled: bool,
    x: i16,
    y: i16,
    width: u16,
    height: u16,
    /// Rotation and reflection bits combined
    #[serde(default)]
    rotation: u16,
    #[serde(default)]
    refresh_rate: f64,
    #[serde(default)]
    brightness: Option<f64>,
    #[serde(default)]
    primary: bool,
}

impl From<MonitorConfigV4> for MonitorConfig {
    fn from(old: MonitorConfigV4) -> Self {
        let (rotation, reflect) = split_rotation(old.rotation);
        MonitorConfig {
            uuid: old.uuid,
            name: old.name,
            enabled: old.enabled,
            x: old.x,
            y: old.y,
            width: old.width,
            height: old.height,
            rotation,
            reflect,
            refresh_rate: old.refresh_rate,
            brightness: old.brightness.unwrap_or(brightness::DEFAULT),
            primary: old.primary,
            color_temperature_mode: ColorTemperatureMode::Normal,
            color_temperature_manual: brightness::NEUTRAL_TEMPERATURE,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ModeConfigsV4 {
    #[serde(default)]
    monitors: Vec<MonitorConfigV4>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CustomModeConfigV4 {
    name: String,
    #[serde(default)]
    monitors: Vec<MonitorConfigV4>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ScreenConfigV4 {
    #[serde(default)]
    custom: Vec<CustomModeConfigV4>,
    #[serde(default)]
    mirror: Option<ModeConfigsV4>,
    #[serde(default)]
    extend: Option<ModeConfigsV4>,
    #[serde(default)]
    only_one: Option<ModeConfigsV4>,
}

fn convert_list(list: Vec<MonitorConfigV4>) -> Vec<MonitorConfig> {
    list.into_iter().map(MonitorConfig::from).collect()
}

fn convert_mode(mode: Option<ModeConfigsV4>) -> Option<ModeConfigs> {
    mode.map(|m| ModeConfigs {
        monitors: convert_list(m.monitors),
    })
}

impl From<ScreenConfigV4> for ScreenConfig {
    fn from(old: ScreenConfigV4) -> Self {
        ScreenConfig {
            custom: old
                .custom
                .into_iter()
                .map(|c| CustomModeConfig {
                    name: c.name,
                    monitors: convert_list(c.monitors),
                })
                .collect(),
            mirror: convert_mode(old.mirror),
            extend: convert_mode(old.extend),
            only_one: convert_mode(old.only_one),
            single: None,
        }
    }
}

fn corrupt(version: &str, e: serde_json::Error) -> DisplayError {
    DisplayError::SchemaMigration(format!("schema {version}: {e}"))
}

/// Parse `data` according to `version`
///
/// Returns the record in the current shape plus the version it was migrated
/// from, `None` when it already was current.
pub fn decode(version: Option<&str>, data: &[u8]) -> Result<(DiskConfig, Option<String>)> {
    match version {
        Some("4.0") => {
            let old: BTreeMap<String, ScreenConfigV4> =
                serde_json::from_slice(data).map_err(|e| corrupt("4.0", e))?;
            let screens = old.into_iter().map(|(k, v)| (k, v.into())).collect();
            Ok((DiskConfig::from_parts(screens, BTreeMap::new()), Some("4.0".into())))
        }
        Some("5.0") => {
            let screens: BTreeMap<String, ScreenConfig> =
                serde_json::from_slice(data).map_err(|e| corrupt("5.0", e))?;
            Ok((DiskConfig::from_parts(screens, BTreeMap::new()), Some("5.0".into())))
        }
        Some("6.0") => decode_current(data).map(|(disk, wrapped)| {
            // a bare map under a 6.0 marker is a save interrupted after the marker
            (disk, if wrapped { None } else { Some("5.0".into()) })
        }),
        Some(other) => Err(DisplayError::SchemaMigration(format!(
            "unknown schema version {other:?}"
        ))),
        None => decode_current(data).map(|(disk, wrapped)| {
            (disk, if wrapped { None } else { Some("5.0".into()) })
        }),
    }
}

/// Wrapped record if the `ConfigV5` key is present, else a bare map
fn decode_current(data: &[u8]) -> Result<(DiskConfig, bool)> {
    let value: serde_json::Value = serde_json::from_slice(data).map_err(|e| corrupt("6.0", e))?;
    let wrapped = value
        .as_object()
        .map(|o| o.contains_key("ConfigV5"))
        .unwrap_or(false);
    if wrapped {
        let disk: DiskConfig = serde_json::from_value(value).map_err(|e| corrupt("6.0", e))?;
        Ok((disk, true))
    } else {
        let screens: BTreeMap<String, ScreenConfig> =
            serde_json::from_value(value).map_err(|e| corrupt("5.0", e))?;
        Ok((DiskConfig::from_parts(screens, BTreeMap::new()), false))
    }
}
