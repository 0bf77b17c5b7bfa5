//! In-memory display server for tests
//!
//! Emulates enough of RandR for the engine: crtc and output binding,
//! screen bounds checks on `SetCrtcConfig` and `SetScreenSize`, hotplug,
//! EDID, gamma and xinput property writes. Every command is recorded.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::error::{DisplayError, Result};
use crate::mirror::lock;
use crate::server::{
    CrtcConfig, CrtcInfo, DisplayServer, GammaRamp, LegacyScreen, OutputInfo, ScreenResources,
};
use crate::types::{CrtcId, ModeInfo, OutputId, Size};

const ALL_ROTATIONS: u16 = 0x3f;
const GAMMA_SIZE: u16 = 256;

/// Command observed by the fake, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SelectInput,
    Grab,
    Ungrab,
    Disable(CrtcId),
    Crtc(CrtcId, Vec<OutputId>),
    Screen(u16, u16),
    Primary(OutputId),
    Gamma(CrtcId),
    TouchMatrix(u16),
    TouchEnabled(u16, bool),
}

#[derive(Debug, Default)]
struct State {
    version: (u32, u32),
    config_timestamp: u32,
    outputs: BTreeMap<OutputId, OutputInfo>,
    crtcs: BTreeMap<CrtcId, CrtcInfo>,
    modes: Vec<ModeInfo>,
    edids: BTreeMap<OutputId, Vec<u8>>,
    screen: Size,
    primary: OutputId,
    fail_output_queries: bool,
    rejected: BTreeMap<CrtcId, u8>,
    gamma: BTreeMap<CrtcId, GammaRamp>,
    touch_matrices: BTreeMap<u16, [f32; 9]>,
    calls: Vec<Call>,
}

pub struct FakeServer {
    state: Mutex<State>,
}

pub struct FakeServerBuilder {
    state: State,
    lit: Vec<(OutputId, CrtcId, i16)>,
}

impl FakeServer {
    pub fn builder() -> FakeServerBuilder {
        FakeServerBuilder {
            state: State {
                version: (1, 5),
                config_timestamp: 1,
                ..Default::default()
            },
            lit: Vec::new(),
        }
    }

    pub fn config_timestamp(&self) -> u32 {
        lock(&self.state).config_timestamp
    }

    pub fn fail_output_queries(&self, fail: bool) {
        lock(&self.state).fail_output_queries = fail;
    }

    pub fn set_edid(&self, output: OutputId, edid: Vec<u8>) {
        lock(&self.state).edids.insert(output, edid);
    }

    /// Connect or disconnect an output; the crtc stays bound like on real hardware
    pub fn plug(&self, output: OutputId, connected: bool) {
        let mut state = lock(&self.state);
        if let Some(info) = state.outputs.get_mut(&output) {
            info.connected = connected;
        }
        state.config_timestamp += 1;
    }

    /// Drop an output from the resource list, like an MST branch going away
    pub fn remove_output(&self, output: OutputId) {
        let mut state = lock(&self.state);
        state.outputs.remove(&output);
        for crtc in state.crtcs.values_mut() {
            crtc.outputs.retain(|o| *o != output);
            crtc.possible.retain(|o| *o != output);
        }
        state.config_timestamp += 1;
    }

    /// Make `SetCrtcConfig` on `crtc` fail with `status`
    pub fn reject_crtc(&self, crtc: CrtcId, status: u8) {
        lock(&self.state).rejected.insert(crtc, status);
    }

    pub fn calls(&self) -> Vec<Call> {
        lock(&self.state).calls.clone()
    }

    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    pub fn primary(&self) -> OutputId {
        lock(&self.state).primary
    }

    pub fn screen(&self) -> Size {
        lock(&self.state).screen
    }

    pub fn gamma(&self, crtc: CrtcId) -> Option<GammaRamp> {
        lock(&self.state).gamma.get(&crtc).cloned()
    }

    pub fn touch_matrix(&self, device: u16) -> Option<[f32; 9]> {
        lock(&self.state).touch_matrices.get(&device).copied()
    }
}

impl FakeServerBuilder {
    /// Connected output; identical modes share one mode id, the first is preferred
    pub fn output(mut self, id: OutputId, name: &str, modes: &[(u16, u16, f64)]) -> Self {
        let mut ids = Vec::new();
        for &(width, height, rate) in modes {
            let existing = self
                .state
                .modes
                .iter()
                .find(|m| m.width == width && m.height == height && m.rate == rate)
                .map(|m| m.id);
            let mode_id = existing.unwrap_or_else(|| {
                let id = 0x200 + self.state.modes.len() as u32;
                self.state.modes.push(ModeInfo {
                    id,
                    name: format!("{width}x{height}"),
                    width,
                    height,
                    rate,
                });
                id
            });
            ids.push(mode_id);
        }
        self.state.outputs.insert(
            id,
            OutputInfo {
                name: name.to_string(),
                connected: true,
                mm_width: 520,
                mm_height: 290,
                num_preferred: 1,
                modes: ids,
                ..Default::default()
            },
        );
        self
    }

    pub fn disconnected(mut self, id: OutputId) -> Self {
        if let Some(info) = self.state.outputs.get_mut(&id) {
            info.connected = false;
        }
        self
    }

    pub fn physical_size(mut self, id: OutputId, mm_width: u32, mm_height: u32) -> Self {
        if let Some(info) = self.state.outputs.get_mut(&id) {
            info.mm_width = mm_width;
            info.mm_height = mm_height;
        }
        self
    }

    /// Crtcs able to drive every output
    pub fn crtcs(mut self, ids: &[CrtcId]) -> Self {
        for id in ids {
            self.state.crtcs.insert(
                *id,
                CrtcInfo {
                    rotation: 1,
                    rotations: ALL_ROTATIONS,
                    ..Default::default()
                },
            );
        }
        self
    }

    pub fn edid(mut self, output: OutputId, edid: Vec<u8>) -> Self {
        self.state.edids.insert(output, edid);
        self
    }

    pub fn version(mut self, major: u32, minor: u32) -> Self {
        self.state.version = (major, minor);
        self
    }

    /// Drive `output` from `crtc` with its first mode at (`x`, 0)
    pub fn lit(mut self, output: OutputId, crtc: CrtcId, x: i16) -> Self {
        self.lit.push((output, crtc, x));
        self
    }

    pub fn build(mut self) -> FakeServer {
        let outputs: Vec<OutputId> = self.state.outputs.keys().copied().collect();
        let crtcs: Vec<CrtcId> = self.state.crtcs.keys().copied().collect();
        for info in self.state.crtcs.values_mut() {
            info.possible = outputs.clone();
        }
        for info in self.state.outputs.values_mut() {
            info.crtcs = crtcs.clone();
        }

        for (output, crtc, x) in std::mem::take(&mut self.lit) {
            let Some(mode) = self
                .state
                .outputs
                .get(&output)
                .and_then(|o| o.modes.first().copied())
            else {
                continue;
            };
            let Some(info) = self.state.modes.iter().find(|m| m.id == mode).cloned() else {
                continue;
            };
            if let Some(c) = self.state.crtcs.get_mut(&crtc) {
                c.x = x;
                c.y = 0;
                c.width = info.width;
                c.height = info.height;
                c.mode = mode;
                c.outputs = vec![output];
            }
            if let Some(o) = self.state.outputs.get_mut(&output) {
                o.crtc = crtc;
            }
            let screen = &mut self.state.screen;
            screen.width = screen.width.max((x as i32 + info.width as i32) as u16);
            screen.height = screen.height.max(info.height);
        }

        FakeServer {
            state: Mutex::new(self.state),
        }
    }
}

fn swaps_axes(rotation: u16) -> bool {
    rotation & (2 | 8) != 0
}

impl DisplayServer for FakeServer {
    fn randr_version(&self) -> Result<(u32, u32)> {
        Ok(lock(&self.state).version)
    }

    fn screen_resources(&self) -> Result<ScreenResources> {
        let state = lock(&self.state);
        Ok(ScreenResources {
            config_timestamp: state.config_timestamp,
            crtcs: state.crtcs.keys().copied().collect(),
            outputs: state.outputs.keys().copied().collect(),
            modes: state.modes.clone(),
        })
    }

    fn output_info(&self, output: OutputId, _config_timestamp: u32) -> Result<OutputInfo> {
        let state = lock(&self.state);
        if state.fail_output_queries {
            return Err(DisplayError::query(format!("output {output}"), "injected failure"));
        }
        state
            .outputs
            .get(&output)
            .cloned()
            .ok_or_else(|| DisplayError::query(format!("output {output}"), "BadOutput"))
    }

    fn crtc_info(&self, crtc: CrtcId, _config_timestamp: u32) -> Result<CrtcInfo> {
        lock(&self.state)
            .crtcs
            .get(&crtc)
            .cloned()
            .ok_or_else(|| DisplayError::query(format!("crtc {crtc}"), "BadCrtc"))
    }

    fn output_edid(&self, output: OutputId) -> Result<Vec<u8>> {
        Ok(lock(&self.state).edids.get(&output).cloned().unwrap_or_default())
    }

    fn screen_size(&self) -> Result<Size> {
        Ok(lock(&self.state).screen)
    }

    fn legacy_screen(&self) -> Result<LegacyScreen> {
        let state = lock(&self.state);
        Ok(LegacyScreen {
            width: state.screen.width,
            height: state.screen.height,
            mm_width: 520,
            mm_height: 290,
            config_timestamp: state.config_timestamp,
        })
    }

    fn set_crtc_config(&self, config: &CrtcConfig) -> Result<()> {
        let mut state = lock(&self.state);
        if let Some(status) = state.rejected.get(&config.crtc) {
            return Err(DisplayError::CrtcApply {
                crtc: config.crtc,
                status: *status,
            });
        }
        let Some(previous) = state.crtcs.get(&config.crtc).map(|c| c.outputs.clone()) else {
            return Err(DisplayError::query(format!("crtc {}", config.crtc), "BadCrtc"));
        };

        let geometry = if config.mode == 0 {
            (0, 0)
        } else {
            let mode = state
                .modes
                .iter()
                .find(|m| m.id == config.mode)
                .ok_or_else(|| DisplayError::InvalidMode(format!("mode {}", config.mode)))?;
            let (w, h) = if swaps_axes(config.rotation) {
                (mode.height, mode.width)
            } else {
                (mode.width, mode.height)
            };
            if config.x as i32 + w as i32 > state.screen.width as i32
                || config.y as i32 + h as i32 > state.screen.height as i32
            {
                return Err(DisplayError::CrtcApply {
                    crtc: config.crtc,
                    status: 3,
                });
            }
            (w, h)
        };

        for output in previous {
            if let Some(o) = state.outputs.get_mut(&output) {
                o.crtc = 0;
            }
        }
        for output in &config.outputs {
            if let Some(o) = state.outputs.get_mut(output) {
                o.crtc = config.crtc;
            }
        }
        if let Some(c) = state.crtcs.get_mut(&config.crtc) {
            c.x = config.x;
            c.y = config.y;
            c.width = geometry.0;
            c.height = geometry.1;
            c.mode = config.mode;
            c.rotation = config.rotation;
            c.outputs = config.outputs.clone();
        }

        let call = if config.is_disable() {
            Call::Disable(config.crtc)
        } else {
            Call::Crtc(config.crtc, config.outputs.clone())
        };
        state.calls.push(call);
        Ok(())
    }

    fn set_screen_size(&self, width: u16, height: u16, _mm_width: u32, _mm_height: u32) -> Result<()> {
        let mut state = lock(&self.state);
        let blocked = state.crtcs.values().any(|c| {
            c.mode != 0
                && (c.x as i32 + c.width as i32 > width as i32
                    || c.y as i32 + c.height as i32 > height as i32)
        });
        if blocked {
            return Err(DisplayError::Protocol("BadMatch".into()));
        }
        state.screen = Size::new(width, height);
        state.calls.push(Call::Screen(width, height));
        Ok(())
    }

    fn set_output_primary(&self, output: OutputId) -> Result<()> {
        let mut state = lock(&self.state);
        state.primary = output;
        state.calls.push(Call::Primary(output));
        Ok(())
    }

    fn output_primary(&self) -> Result<OutputId> {
        Ok(lock(&self.state).primary)
    }

    fn grab(&self) -> Result<()> {
        lock(&self.state).calls.push(Call::Grab);
        Ok(())
    }

    fn ungrab(&self) -> Result<()> {
        lock(&self.state).calls.push(Call::Ungrab);
        Ok(())
    }

    fn select_input(&self) -> Result<()> {
        lock(&self.state).calls.push(Call::SelectInput);
        Ok(())
    }

    fn crtc_gamma_size(&self, _crtc: CrtcId) -> Result<u16> {
        Ok(GAMMA_SIZE)
    }

    fn set_crtc_gamma(&self, crtc: CrtcId, ramp: &GammaRamp) -> Result<()> {
        let mut state = lock(&self.state);
        state.gamma.insert(crtc, ramp.clone());
        state.calls.push(Call::Gamma(crtc));
        Ok(())
    }

    fn set_touch_matrix(&self, device: u16, matrix: &[f32; 9]) -> Result<()> {
        let mut state = lock(&self.state);
        state.touch_matrices.insert(device, *matrix);
        state.calls.push(Call::TouchMatrix(device));
        Ok(())
    }

    fn set_touch_enabled(&self, device: u16, enabled: bool) -> Result<()> {
        lock(&self.state).calls.push(Call::TouchEnabled(device, enabled));
        Ok(())
    }
}
