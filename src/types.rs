//! Domain value types shared by every component

use serde::{Deserialize, Serialize};
use std::fmt;

/// Server-assigned output handle
pub type OutputId = u32;
/// Server-assigned crtc handle
pub type CrtcId = u32;
/// Server-assigned mode handle
pub type ModeId = u32;

/// A supported (width, height, refresh rate) combination
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModeInfo {
    pub id: ModeId,
    pub name: String,
    pub width: u16,
    pub height: u16,
    pub rate: f64,
}

impl ModeInfo {
    pub fn is_empty(&self) -> bool {
        self.id == 0
    }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn area(&self) -> u32 {
        self.width as u32 * self.height as u32
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Size {
    pub width: u16,
    pub height: u16,
}

impl Size {
    pub fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> u32 {
        self.width as u32 * self.height as u32
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
}

impl Rect {
    pub fn new(x: i16, y: i16, width: u16, height: u16) -> Self {
        Self { x, y, width, height }
    }

    /// Right edge as a wide integer, never overflows
    pub fn right(&self) -> i32 {
        self.x as i32 + self.width as i32
    }

    pub fn bottom(&self) -> i32 {
        self.y as i32 + self.height as i32
    }
}

// Hardware bit layout (RandR Rotation field)
const ROTATE_0: u16 = 1 << 0;
const ROTATE_90: u16 = 1 << 1;
const ROTATE_180: u16 = 1 << 2;
const ROTATE_270: u16 = 1 << 3;
const REFLECT_X: u16 = 1 << 4;
const REFLECT_Y: u16 = 1 << 5;
const ROTATION_MASK: u16 = 0x0f;
const REFLECT_MASK: u16 = 0xf0;

/// Counter-clockwise rotation of an output
///
/// Persisted as the RandR bit value so existing records stay readable.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum Rotation {
    #[default]
    Normal,
    Left,
    Inverted,
    Right,
}

impl Rotation {
    pub fn bits(self) -> u16 {
        match self {
            Rotation::Normal => ROTATE_0,
            Rotation::Left => ROTATE_90,
            Rotation::Inverted => ROTATE_180,
            Rotation::Right => ROTATE_270,
        }
    }

    /// Width and height trade places on screen
    pub fn swaps_axes(self) -> bool {
        matches!(self, Rotation::Left | Rotation::Right)
    }

    /// Every rotation advertised in a capability bitmask
    pub fn all_in(mask: u16) -> Vec<Rotation> {
        [Rotation::Normal, Rotation::Left, Rotation::Inverted, Rotation::Right]
            .into_iter()
            .filter(|r| mask & r.bits() != 0)
            .collect()
    }
}

impl From<Rotation> for u16 {
    fn from(r: Rotation) -> u16 {
        r.bits()
    }
}

impl TryFrom<u16> for Rotation {
    type Error = String;

    fn try_from(v: u16) -> Result<Self, Self::Error> {
        match v {
            ROTATE_0 => Ok(Rotation::Normal),
            ROTATE_90 => Ok(Rotation::Left),
            ROTATE_180 => Ok(Rotation::Inverted),
            ROTATE_270 => Ok(Rotation::Right),
            // records written before rotation was stored leave it at zero
            0 => Ok(Rotation::Normal),
            other => Err(format!("invalid rotation value {other}")),
        }
    }
}

/// Mirroring applied on top of the rotation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum Reflect {
    #[default]
    None,
    X,
    Y,
    XY,
}

impl Reflect {
    pub fn bits(self) -> u16 {
        match self {
            Reflect::None => 0,
            Reflect::X => REFLECT_X,
            Reflect::Y => REFLECT_Y,
            Reflect::XY => REFLECT_X | REFLECT_Y,
        }
    }

    /// Reflections available for a capability bitmask; `None` is always listed
    pub fn all_in(mask: u16) -> Vec<Reflect> {
        let mut out = vec![Reflect::None];
        if mask & REFLECT_X != 0 {
            out.push(Reflect::X);
        }
        if mask & REFLECT_Y != 0 {
            out.push(Reflect::Y);
        }
        if out.len() == 3 {
            out.push(Reflect::XY);
        }
        out
    }
}

impl From<Reflect> for u16 {
    fn from(r: Reflect) -> u16 {
        r.bits()
    }
}

impl TryFrom<u16> for Reflect {
    type Error = String;

    fn try_from(v: u16) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Reflect::None),
            REFLECT_X => Ok(Reflect::X),
            REFLECT_Y => Ok(Reflect::Y),
            x if x == REFLECT_X | REFLECT_Y => Ok(Reflect::XY),
            other => Err(format!("invalid reflect value {other}")),
        }
    }
}

/// Combine the two domain enums into the single hardware field
pub fn combine_rotation(rotation: Rotation, reflect: Reflect) -> u16 {
    rotation.bits() | reflect.bits()
}

/// Split the hardware field; invalid parts fall back to normal / none
pub fn split_rotation(bits: u16) -> (Rotation, Reflect) {
    let rotation = match bits & ROTATION_MASK {
        ROTATE_90 => Rotation::Left,
        ROTATE_180 => Rotation::Inverted,
        ROTATE_270 => Rotation::Right,
        _ => Rotation::Normal,
    };
    let reflect = Reflect::try_from(bits & REFLECT_MASK).unwrap_or_default();
    (rotation, reflect)
}

/// Named layout policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisplayMode {
    Custom,
    Mirror,
    #[default]
    Extend,
    OnlyOne,
    Unknown,
}

impl fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DisplayMode::Custom => "custom",
            DisplayMode::Mirror => "mirror",
            DisplayMode::Extend => "extend",
            DisplayMode::OnlyOne => "only-one",
            DisplayMode::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for DisplayMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "custom" => Ok(DisplayMode::Custom),
            "mirror" => Ok(DisplayMode::Mirror),
            "extend" => Ok(DisplayMode::Extend),
            "only-one" | "onlyone" | "only_one" => Ok(DisplayMode::OnlyOne),
            other => Err(format!("unknown display mode {other:?}")),
        }
    }
}

/// How colour temperature is driven
///
/// Stored numerically (0 normal, 1 auto, 2 manual).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ColorTemperatureMode {
    #[default]
    Normal,
    Auto,
    Manual,
}

impl From<ColorTemperatureMode> for i32 {
    fn from(m: ColorTemperatureMode) -> i32 {
        match m {
            ColorTemperatureMode::Normal => 0,
            ColorTemperatureMode::Auto => 1,
            ColorTemperatureMode::Manual => 2,
        }
    }
}

impl TryFrom<i32> for ColorTemperatureMode {
    type Error = String;

    fn try_from(v: i32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(ColorTemperatureMode::Normal),
            1 => Ok(ColorTemperatureMode::Auto),
            2 => Ok(ColorTemperatureMode::Manual),
            other => Err(format!("invalid colour temperature mode {other}")),
        }
    }
}
