//! Display server collaborator interface
//!
//! Everything the layout engine needs from the X server goes through
//! [`DisplayServer`]. The RandR backend lives in `x11_utils`; tests drive the
//! engine with an in-memory fake.

use crate::error::Result;
use crate::types::{CrtcId, ModeId, ModeInfo, OutputId, Size};

/// Snapshot of `GetScreenResourcesCurrent`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScreenResources {
    pub config_timestamp: u32,
    pub crtcs: Vec<CrtcId>,
    pub outputs: Vec<OutputId>,
    pub modes: Vec<ModeInfo>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutputInfo {
    pub name: String,
    pub connected: bool,
    /// Crtc currently driving the output, 0 when none
    pub crtc: CrtcId,
    pub mm_width: u32,
    pub mm_height: u32,
    /// Crtcs able to drive this output
    pub crtcs: Vec<CrtcId>,
    pub modes: Vec<ModeId>,
    /// The first `num_preferred` entries of `modes` are preferred
    pub num_preferred: u16,
    pub clones: Vec<OutputId>,
}

impl OutputInfo {
    pub fn preferred_modes(&self) -> &[ModeId] {
        let n = (self.num_preferred as usize).min(self.modes.len());
        &self.modes[..n]
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrtcInfo {
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
    pub mode: ModeId,
    /// Combined rotation and reflection bits
    pub rotation: u16,
    /// Supported rotation and reflection bits
    pub rotations: u16,
    pub outputs: Vec<OutputId>,
    pub possible: Vec<OutputId>,
}

impl CrtcInfo {
    pub fn is_free(&self) -> bool {
        self.outputs.is_empty()
    }
}

/// Screen description from the pre-1.2 `GetScreenInfo` request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LegacyScreen {
    pub width: u16,
    pub height: u16,
    pub mm_width: u32,
    pub mm_height: u32,
    pub config_timestamp: u32,
}

/// One `SetCrtcConfig` request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CrtcConfig {
    pub crtc: CrtcId,
    pub x: i16,
    pub y: i16,
    /// 0 disables the crtc
    pub mode: ModeId,
    pub rotation: u16,
    pub outputs: Vec<OutputId>,
    pub config_timestamp: u32,
}

impl CrtcConfig {
    /// Request that turns a crtc off
    pub fn disable(crtc: CrtcId, config_timestamp: u32) -> Self {
        Self {
            crtc,
            x: 0,
            y: 0,
            mode: 0,
            rotation: 1,
            outputs: Vec::new(),
            config_timestamp,
        }
    }

    pub fn is_disable(&self) -> bool {
        self.mode == 0 && self.outputs.is_empty()
    }
}

/// Per-channel gamma ramp for one crtc
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GammaRamp {
    pub red: Vec<u16>,
    pub green: Vec<u16>,
    pub blue: Vec<u16>,
}

/// Hardware notifications the dispatcher reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum RandrEvent {
    OutputChange { output: OutputId },
    OutputProperty { output: OutputId, atom: u32 },
    CrtcChange { crtc: CrtcId },
    ScreenChange {
        width: u16,
        height: u16,
        config_timestamp: u32,
    },
}

/// Query and command surface of the display server
///
/// Every call reports failure distinctly; commands that carry a hardware
/// status map non-success to an error.
pub trait DisplayServer: Send + Sync {
    fn randr_version(&self) -> Result<(u32, u32)>;
    fn screen_resources(&self) -> Result<ScreenResources>;
    fn output_info(&self, output: OutputId, config_timestamp: u32) -> Result<OutputInfo>;
    fn crtc_info(&self, crtc: CrtcId, config_timestamp: u32) -> Result<CrtcInfo>;
    /// Raw EDID bytes, empty when the output exposes none
    fn output_edid(&self, output: OutputId) -> Result<Vec<u8>>;
    fn screen_size(&self) -> Result<Size>;
    fn legacy_screen(&self) -> Result<LegacyScreen>;

    fn set_crtc_config(&self, config: &CrtcConfig) -> Result<()>;
    fn set_screen_size(&self, width: u16, height: u16, mm_width: u32, mm_height: u32)
        -> Result<()>;
    fn set_output_primary(&self, output: OutputId) -> Result<()>;
    fn output_primary(&self) -> Result<OutputId>;
    fn grab(&self) -> Result<()>;
    fn ungrab(&self) -> Result<()>;
    fn select_input(&self) -> Result<()>;

    fn crtc_gamma_size(&self, crtc: CrtcId) -> Result<u16>;
    fn set_crtc_gamma(&self, crtc: CrtcId, ramp: &GammaRamp) -> Result<()>;

    fn set_touch_matrix(&self, device: u16, matrix: &[f32; 9]) -> Result<()>;
    fn set_touch_enabled(&self, device: u16, enabled: bool) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preferred_modes_clamped() {
        let info = OutputInfo {
            modes: vec![10, 11],
            num_preferred: 5,
            ..Default::default()
        };
        assert_eq!(info.preferred_modes(), &[10, 11]);
    }

    #[test]
    fn test_disable_request() {
        let req = CrtcConfig::disable(63, 9);
        assert!(req.is_disable());
        assert_eq!(req.config_timestamp, 9);
    }
}
