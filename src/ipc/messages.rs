//! IPC message types for session tools ↔ daemon communication

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{DisplayError, FailureReason};
use crate::monitor::Monitor;
use crate::touchscreen::Touchscreen;
use crate::types::{
    ColorTemperatureMode, DisplayMode, ModeId, ModeInfo, OutputId, Rect, Reflect, Rotation, Size,
};

/// Requests sent to the daemon
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum DisplayRequest {
    /// Health check
    Ping,

    // Queries, answered without waiting for the dispatcher
    GetMonitors,
    ListOutputNames,
    ListCommonModes,
    GetDisplayMode,
    GetRealDisplayMode,
    GetCurrentCustomId,
    GetCustomIdList,
    GetPrimary,
    GetBuiltin,
    GetBrightness,
    GetColorTemperature,
    GetScaleFactor,
    GetScreenSize,
    GetFillMode { output: String },
    GetTouchscreens,
    HasChanged,

    // Commands, run in order by the dispatcher
    ApplyDisplayMode,
    /// `name` is the custom profile, or the only-one target
    SwitchMode { mode: DisplayMode, name: String },
    SetPrimary { name: String },
    SetMonitorMode { output: String, mode: ModeId },
    SetMonitorPosition { output: String, x: i16, y: i16 },
    SetMonitorRotation { output: String, rotation: Rotation },
    SetMonitorReflect { output: String, reflect: Reflect },
    EnableMonitor { output: String, enabled: bool },
    ApplyChanges,
    ResetChanges,
    Save,
    SetBrightness { output: String, value: f64 },
    SetAndSaveBrightness { output: String, value: f64 },
    SaveBrightness,
    RefreshBrightness,
    SetColorTemperatureMode { mode: ColorTemperatureMode },
    SetColorTemperature { value: i32 },
    RenameCustom { old: String, new: String },
    DeleteCustom { name: String },
    SetFillMode { output: String, mode: String },
    RegisterTouchscreen(Touchscreen),
    UnregisterTouchscreen { uuid: String },
    AssociateTouchscreen { uuid: String, output: String },

    /// Request graceful shutdown
    Shutdown,
}

impl DisplayRequest {
    /// Read-only requests that never touch the hardware
    pub fn is_query(&self) -> bool {
        matches!(
            self,
            DisplayRequest::Ping
                | DisplayRequest::GetMonitors
                | DisplayRequest::ListOutputNames
                | DisplayRequest::ListCommonModes
                | DisplayRequest::GetDisplayMode
                | DisplayRequest::GetRealDisplayMode
                | DisplayRequest::GetCurrentCustomId
                | DisplayRequest::GetCustomIdList
                | DisplayRequest::GetPrimary
                | DisplayRequest::GetBuiltin
                | DisplayRequest::GetBrightness
                | DisplayRequest::GetColorTemperature
                | DisplayRequest::GetScaleFactor
                | DisplayRequest::GetScreenSize
                | DisplayRequest::GetFillMode { .. }
                | DisplayRequest::GetTouchscreens
                | DisplayRequest::HasChanged
        )
    }
}

/// Monitor as shown to session tools
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MonitorView {
    pub id: OutputId,
    pub name: String,
    pub uuid: String,
    pub manufacturer: String,
    pub model: String,
    pub connected: bool,
    pub enabled: bool,
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
    pub mm_width: u32,
    pub mm_height: u32,
    pub current_mode: ModeInfo,
    pub rotation: Rotation,
    pub reflect: Reflect,
    pub brightness: f64,
    pub modes: Vec<ModeInfo>,
    pub rotations: Vec<Rotation>,
    pub reflects: Vec<Reflect>,
    pub changed: bool,
}

impl From<&Monitor> for MonitorView {
    fn from(m: &Monitor) -> Self {
        Self {
            id: m.id,
            name: m.name.clone(),
            uuid: m.uuid.clone(),
            manufacturer: m.manufacturer.clone(),
            model: m.model.clone(),
            connected: m.connected,
            enabled: m.enabled,
            x: m.x,
            y: m.y,
            width: m.width,
            height: m.height,
            mm_width: m.mm_width,
            mm_height: m.mm_height,
            current_mode: m.current_mode.clone(),
            rotation: m.rotation,
            reflect: m.reflect,
            brightness: m.brightness,
            modes: m.modes.clone(),
            rotations: m.rotations.clone(),
            reflects: m.reflects.clone(),
            changed: m.has_changed(),
        }
    }
}

/// Responses sent back by the daemon
#[derive(Serialize, Deserialize, Debug, Clone)]
pub enum DisplayResponse {
    /// Command succeeded
    Ok,

    /// Health check response
    Pong,

    /// Command failed; nothing was partially applied
    Error {
        reason: FailureReason,
        message: String,
    },

    Monitors(Vec<MonitorView>),
    Names(Vec<String>),
    Sizes(Vec<Size>),
    Mode(DisplayMode),
    /// Optional name: current custom profile, builtin, fill mode
    Name(Option<String>),
    Primary { name: String, rect: Rect },
    Brightness(BTreeMap<String, f64>),
    ColorTemperature {
        mode: ColorTemperatureMode,
        manual: i32,
    },
    ScaleFactor(f64),
    ScreenSize(Size),
    Touchscreens(Vec<Touchscreen>),
    Flag(bool),
}

impl From<DisplayError> for DisplayResponse {
    fn from(e: DisplayError) -> Self {
        DisplayResponse::Error {
            reason: e.reason(),
            message: e.to_string(),
        }
    }
}

impl From<crate::error::Result<()>> for DisplayResponse {
    fn from(result: crate::error::Result<()>) -> Self {
        match result {
            Ok(()) => DisplayResponse::Ok,
            Err(e) => e.into(),
        }
    }
}
