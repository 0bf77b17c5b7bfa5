//! Touchscreen to output mapping
//!
//! Touch devices report coordinates normalized to the whole screen. Mapping
//! a device to one output means writing an xinput coordinate transformation
//! matrix that squeezes those coordinates into the output's rectangle.

use serde::{Deserialize, Serialize};
use std::process::Command;
use std::thread;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::monitor::Monitor;
use crate::server::DisplayServer;
use crate::types::{OutputId, Rect, Reflect, Rotation, Size};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusType {
    #[default]
    Unknown,
    Usb,
}

/// A touch device as registered by the session layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Touchscreen {
    /// xinput device id
    pub id: u16,
    pub name: String,
    pub device_node: String,
    pub serial: String,
    pub uuid: String,
    /// Output the device itself claims to belong to, may be empty
    #[serde(default)]
    pub output_hint: String,
    /// Physical size in millimetres
    #[serde(default)]
    pub width_mm: f64,
    #[serde(default)]
    pub height_mm: f64,
    #[serde(default)]
    pub bus: BusType,
}

/// Why a touchscreen ended up on an output
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Association {
    Saved(OutputId),
    Hint(OutputId),
    PhysicalSize(OutputId),
    Builtin(OutputId),
    /// Nothing matched; mapped to the primary if there is one, and the user
    /// is asked
    Fallback(Option<OutputId>),
}

impl Association {
    pub fn output(&self) -> Option<OutputId> {
        match *self {
            Association::Saved(id)
            | Association::Hint(id)
            | Association::PhysicalSize(id)
            | Association::Builtin(id) => Some(id),
            Association::Fallback(id) => id,
        }
    }

    /// Whether the choice should be written to the touch map
    pub fn remember(&self) -> bool {
        matches!(
            self,
            Association::Hint(_) | Association::PhysicalSize(_) | Association::Builtin(_)
        )
    }
}

/// Pick an output for `touch` among the connected monitors
pub fn resolve(
    touch: &Touchscreen,
    saved: Option<&str>,
    connected: &[Monitor],
    builtin: Option<OutputId>,
    primary: &str,
) -> Association {
    let by_name = |name: &str| connected.iter().find(|m| m.name == name).map(|m| m.id);

    if let Some(id) = saved.and_then(by_name) {
        return Association::Saved(id);
    }
    if !touch.output_hint.is_empty() {
        match by_name(&touch.output_hint) {
            Some(id) => return Association::Hint(id),
            None => warn!(touch = %touch.uuid, hint = %touch.output_hint, "hinted output not connected"),
        }
    }
    let (w, h) = (touch.width_mm.round() as u32, touch.height_mm.round() as u32);
    if let Some(m) = connected
        .iter()
        .filter(|_| w > 0 && h > 0)
        .find(|m| m.mm_width == w && m.mm_height == h)
    {
        return Association::PhysicalSize(m.id);
    }
    if let Some(id) = builtin
        && touch.bus != BusType::Usb
        && connected.iter().any(|m| m.id == id)
    {
        return Association::Builtin(id);
    }
    Association::Fallback(by_name(primary))
}

type Matrix = [f32; 9];

const IDENTITY: Matrix = [1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];

fn multiply(a: &Matrix, b: &Matrix) -> Matrix {
    let mut out = [0.0; 9];
    for row in 0..3 {
        for col in 0..3 {
            out[row * 3 + col] = (0..3).map(|k| a[row * 3 + k] * b[k * 3 + col]).sum();
        }
    }
    out
}

fn rotation_matrix(rotation: Rotation) -> Matrix {
    match rotation {
        Rotation::Normal => IDENTITY,
        Rotation::Left => [0.0, -1.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0],
        Rotation::Inverted => [-1.0, 0.0, 1.0, 0.0, -1.0, 1.0, 0.0, 0.0, 1.0],
        Rotation::Right => [0.0, 1.0, 0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 1.0],
    }
}

fn reflect_matrix(reflect: Reflect) -> Matrix {
    match reflect {
        Reflect::None => IDENTITY,
        Reflect::X => [-1.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        Reflect::Y => [1.0, 0.0, 0.0, 0.0, -1.0, 1.0, 0.0, 0.0, 1.0],
        Reflect::XY => [-1.0, 0.0, 1.0, 0.0, -1.0, 1.0, 0.0, 0.0, 1.0],
    }
}

/// Row-major matrix mapping whole-screen touch coordinates onto `rect`
pub fn transformation_matrix(rect: Rect, screen: Size, rotation: Rotation, reflect: Reflect) -> Matrix {
    if screen.width == 0 || screen.height == 0 {
        return IDENTITY;
    }
    let (sw, sh) = (screen.width as f32, screen.height as f32);
    let place: Matrix = [
        rect.width as f32 / sw,
        0.0,
        rect.x as f32 / sw,
        0.0,
        rect.height as f32 / sh,
        rect.y as f32 / sh,
        0.0,
        0.0,
        1.0,
    ];
    multiply(&multiply(&place, &rotation_matrix(rotation)), &reflect_matrix(reflect))
}

/// Point `device` at `monitor`, or switch it off when the monitor is dark
pub fn apply_mapping(
    server: &dyn DisplayServer,
    device: u16,
    monitor: &Monitor,
    screen: Size,
) -> Result<()> {
    if !monitor.enabled {
        debug!(device = device, output = %monitor.name, "output disabled, disabling touchscreen");
        return server.set_touch_enabled(device, false);
    }
    let matrix = transformation_matrix(monitor.rect(), screen, monitor.rotation, monitor.reflect);
    debug!(device = device, output = %monitor.name, matrix = ?matrix, "mapping touchscreen");
    server.set_touch_enabled(device, true)?;
    server.set_touch_matrix(device, &matrix)
}

/// External program asking the user which output a touchscreen belongs to
#[derive(Debug, Clone, Default)]
pub struct TouchscreenDialog {
    command: Option<String>,
}

impl TouchscreenDialog {
    pub fn new(command: Option<String>) -> Self {
        Self { command }
    }

    /// Launch the dialog for `serial`; a helper thread reaps it
    pub fn show(&self, serial: &str) {
        let Some(cmd) = self.command.as_deref() else {
            debug!(serial = %serial, "no touchscreen dialog configured");
            return;
        };
        match Command::new(cmd).arg(serial).spawn() {
            Ok(mut child) => {
                info!(serial = %serial, pid = child.id(), "touchscreen dialog launched");
                thread::spawn(move || {
                    if let Err(e) = child.wait() {
                        debug!(error = %e, "touchscreen dialog wait failed");
                    }
                });
            }
            Err(e) => warn!(command = %cmd, error = %e, "failed to launch touchscreen dialog"),
        }
    }
}
