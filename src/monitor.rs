//! Logical monitor entity

use std::time::Instant;

use crate::config::store::MonitorConfig;
use crate::constants::{brightness, modes as mode_consts};
use crate::layout::Placement;
use crate::server::{CrtcInfo, OutputInfo};
use crate::types::{
    split_rotation, ColorTemperatureMode, CrtcId, ModeId, ModeInfo, OutputId, Rect, Reflect,
    Rotation,
};

/// Values restored by `reset changes`
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorBackup {
    pub enabled: bool,
    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
    pub mode: ModeInfo,
    pub rotation: Rotation,
    pub reflect: Reflect,
}

/// One physical or logical output
#[derive(Debug, Clone)]
pub struct Monitor {
    pub id: OutputId,
    pub name: String,
    pub uuid: String,
    pub manufacturer: String,
    pub model: String,

    pub connected: bool,
    pub enabled: bool,
    pub crtc: CrtcId,

    pub x: i16,
    pub y: i16,
    pub width: u16,
    pub height: u16,
    pub mm_width: u32,
    pub mm_height: u32,

    pub modes: Vec<ModeInfo>,
    pub preferred_modes: Vec<ModeId>,
    pub current_mode: ModeInfo,
    pub rotation: Rotation,
    pub reflect: Reflect,
    pub rotations: Vec<Rotation>,
    pub reflects: Vec<Reflect>,

    /// Rotation at the last successful apply
    pub old_rotation: Rotation,
    pub brightness: f64,
    pub color_temperature_mode: ColorTemperatureMode,
    pub color_temperature_manual: i32,
    pub last_connected: Option<Instant>,

    pub backup: Option<MonitorBackup>,
}

impl Monitor {
    /// Build from fresh server records; `modes` must already be resolved
    pub fn new(
        id: OutputId,
        output: &OutputInfo,
        crtc: Option<&CrtcInfo>,
        modes: Vec<ModeInfo>,
        uuid: String,
        manufacturer: String,
        model: String,
    ) -> Self {
        let mut monitor = Self {
            id,
            name: output.name.clone(),
            uuid,
            manufacturer,
            model,
            connected: false,
            enabled: false,
            crtc: 0,
            x: 0,
            y: 0,
            width: 0,
            height: 0,
            mm_width: 0,
            mm_height: 0,
            modes: Vec::new(),
            preferred_modes: Vec::new(),
            current_mode: ModeInfo::default(),
            rotation: Rotation::Normal,
            reflect: Reflect::None,
            rotations: vec![Rotation::Normal],
            reflects: vec![Reflect::None],
            old_rotation: Rotation::Normal,
            brightness: brightness::DEFAULT,
            color_temperature_mode: ColorTemperatureMode::Normal,
            color_temperature_manual: brightness::NEUTRAL_TEMPERATURE,
            last_connected: None,
            backup: None,
        };
        monitor.update(output, crtc, modes);
        monitor.old_rotation = monitor.rotation;
        monitor
    }

    /// Refresh connection, capability and geometry from server records
    pub fn update(&mut self, output: &OutputInfo, crtc: Option<&CrtcInfo>, modes: Vec<ModeInfo>) {
        if output.connected && !self.connected {
            self.last_connected = Some(Instant::now());
        }
        self.connected = output.connected;
        self.name = output.name.clone();
        self.mm_width = output.mm_width;
        self.mm_height = output.mm_height;
        self.preferred_modes = output.preferred_modes().to_vec();
        let current = crtc.and_then(|info| modes.iter().find(|m| m.id == info.mode).cloned());
        self.modes = filter_modes(modes);
        self.crtc = output.crtc;

        match crtc {
            Some(info) if output.crtc != 0 => {
                self.update_geometry(info, current.unwrap_or_default())
            }
            _ => self.switch_off(),
        }
    }

    /// Mark unlit at the origin; size and rate of the last mode survive
    fn switch_off(&mut self) {
        self.enabled = false;
        self.x = 0;
        self.y = 0;
        let last = self.current_mode.clone();
        if !last.is_empty() && !self.modes.is_empty() && !self.modes.iter().any(|m| m.id == last.id) {
            self.current_mode = self.select_mode(last.width, last.height, last.rate);
        }
        self.sync_size_to_mode();
    }

    /// Push a crtc record and its resolved mode into geometry fields
    pub fn update_geometry(&mut self, info: &CrtcInfo, mode: ModeInfo) {
        if info.mode == 0 {
            self.switch_off();
            return;
        }
        self.enabled = true;
        self.x = info.x;
        self.y = info.y;
        self.width = info.width;
        self.height = info.height;
        let (rotation, reflect) = split_rotation(info.rotation);
        self.rotation = rotation;
        self.reflect = reflect;
        self.rotations = Rotation::all_in(info.rotations);
        if self.rotations.is_empty() {
            self.rotations = vec![Rotation::Normal];
        }
        self.reflects = Reflect::all_in(info.rotations);
        self.current_mode = mode;
    }

    pub fn rect(&self) -> Rect {
        Rect::new(self.x, self.y, self.width, self.height)
    }

    pub fn refresh_rate(&self) -> f64 {
        self.current_mode.rate
    }

    /// First preferred mode, else largest area then highest rate
    pub fn best_mode(&self) -> ModeInfo {
        if let Some(m) = self
            .preferred_modes
            .iter()
            .find_map(|id| self.modes.iter().find(|m| m.id == *id))
        {
            return m.clone();
        }
        self.modes
            .iter()
            .max_by(|a, b| {
                a.area()
                    .cmp(&b.area())
                    .then(a.rate.total_cmp(&b.rate))
            })
            .cloned()
            .unwrap_or_default()
    }

    /// Exact size and rate, else the first of that size, else the best mode
    pub fn select_mode(&self, width: u16, height: u16, rate: f64) -> ModeInfo {
        if let Some(m) = self.modes.iter().find(|m| {
            m.width == width && m.height == height && (m.rate - rate).abs() < mode_consts::RATE_EPSILON
        }) {
            return m.clone();
        }
        self.first_mode_by_size(width, height)
            .unwrap_or_else(|| self.best_mode())
    }

    pub fn first_mode_by_size(&self, width: u16, height: u16) -> Option<ModeInfo> {
        self.modes
            .iter()
            .find(|m| m.width == width && m.height == height)
            .cloned()
    }

    pub fn has_mode_size(&self, width: u16, height: u16) -> bool {
        self.modes.iter().any(|m| m.width == width && m.height == height)
    }

    pub fn has_changed(&self) -> bool {
        self.backup.is_some()
    }

    fn mark_changed(&mut self) {
        if self.backup.is_none() {
            self.backup = Some(MonitorBackup {
                enabled: self.enabled,
                x: self.x,
                y: self.y,
                width: self.width,
                height: self.height,
                mode: self.current_mode.clone(),
                rotation: self.rotation,
                reflect: self.reflect,
            });
        }
    }

    pub fn set_mode(&mut self, mode: ModeInfo) {
        self.mark_changed();
        self.current_mode = mode;
        self.sync_size_to_mode();
    }

    pub fn set_position(&mut self, x: i16, y: i16) {
        self.mark_changed();
        self.x = x;
        self.y = y;
    }

    pub fn set_rotation(&mut self, rotation: Rotation) {
        self.mark_changed();
        self.rotation = rotation;
        self.sync_size_to_mode();
    }

    pub fn set_reflect(&mut self, reflect: Reflect) {
        self.mark_changed();
        self.reflect = reflect;
    }

    pub fn enable(&mut self, enabled: bool) {
        self.mark_changed();
        self.enabled = enabled;
    }

    /// Put back the values captured before the first pending edit
    pub fn reset_changes(&mut self) {
        if let Some(b) = self.backup.take() {
            self.enabled = b.enabled;
            self.x = b.x;
            self.y = b.y;
            self.width = b.width;
            self.height = b.height;
            self.current_mode = b.mode;
            self.rotation = b.rotation;
            self.reflect = b.reflect;
        }
    }

    /// Take a planned placement, `None` disables; the backup is left alone
    pub fn apply_placement(&mut self, placement: Option<&Placement>) {
        match placement {
            Some(p) => {
                self.enabled = true;
                self.x = p.x;
                self.y = p.y;
                self.rotation = p.rotation;
                self.reflect = p.reflect;
                self.current_mode = p.mode.clone();
                self.sync_size_to_mode();
            }
            None => self.enabled = false,
        }
    }

    /// On-screen size implied by the current mode and rotation
    pub fn sync_size_to_mode(&mut self) {
        let (w, h) = (self.current_mode.width, self.current_mode.height);
        if self.rotation.swaps_axes() {
            self.width = h;
            self.height = w;
        } else {
            self.width = w;
            self.height = h;
        }
    }

    /// Geometry as a persisted config entry
    pub fn to_config(&self, primary: bool) -> MonitorConfig {
        MonitorConfig {
            uuid: self.uuid.clone(),
            name: self.name.clone(),
            enabled: self.enabled,
            x: self.x,
            y: self.y,
            width: self.width,
            height: self.height,
            rotation: self.rotation,
            reflect: self.reflect,
            refresh_rate: self.refresh_rate(),
            brightness: self.brightness,
            primary,
            color_temperature_mode: self.color_temperature_mode,
            color_temperature_manual: self.color_temperature_manual,
        }
    }
}

/// Drop repeated rates of one size and modes too small to be useful
///
/// If the size filter would remove everything the full list is kept.
pub fn filter_modes(modes: Vec<ModeInfo>) -> Vec<ModeInfo> {
    let mut deduped: Vec<ModeInfo> = Vec::with_capacity(modes.len());
    for mode in modes {
        let dup = deduped.iter().any(|m| {
            m.width == mode.width
                && m.height == mode.height
                && (m.rate - mode.rate).abs() < mode_consts::RATE_EPSILON
        });
        if !dup {
            deduped.push(mode);
        }
    }

    let usable: Vec<ModeInfo> = deduped
        .iter()
        .filter(|m| m.width >= mode_consts::MIN_WIDTH && m.height >= mode_consts::MIN_HEIGHT)
        .cloned()
        .collect();
    if usable.is_empty() { deduped } else { usable }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mode(id: u32, w: u16, h: u16, rate: f64) -> ModeInfo {
        ModeInfo {
            id,
            name: format!("{w}x{h}"),
            width: w,
            height: h,
            rate,
        }
    }

    fn monitor_with(modes: Vec<ModeInfo>, preferred: Vec<u32>) -> Monitor {
        let output = OutputInfo {
            name: "DP-1".into(),
            connected: true,
            modes: preferred.clone(),
            num_preferred: preferred.len() as u16,
            ..Default::default()
        };
        Monitor::new(1, &output, None, modes, "DP-1".into(), String::new(), String::new())
    }

    #[test]
    fn test_filter_modes_drops_duplicate_rates() {
        let out = filter_modes(vec![
            mode(1, 1920, 1080, 60.0),
            mode(2, 1920, 1080, 60.001),
            mode(3, 1920, 1080, 59.94),
        ]);
        assert_eq!(out.iter().map(|m| m.id).collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn test_filter_modes_drops_small_unless_empty() {
        let out = filter_modes(vec![mode(1, 1920, 1080, 60.0), mode(2, 800, 600, 60.0)]);
        assert_eq!(out.len(), 1);
        let only_small = filter_modes(vec![mode(2, 800, 600, 60.0), mode(3, 640, 480, 60.0)]);
        assert_eq!(only_small.len(), 2);
    }

    #[test]
    fn test_best_mode_prefers_preferred() {
        let m = monitor_with(
            vec![mode(1, 2560, 1440, 60.0), mode(2, 1920, 1080, 60.0)],
            vec![2],
        );
        assert_eq!(m.best_mode().id, 2);
    }

    #[test]
    fn test_best_mode_by_area_then_rate() {
        let m = monitor_with(
            vec![
                mode(1, 1920, 1080, 60.0),
                mode(2, 2560, 1440, 60.0),
                mode(3, 2560, 1440, 144.0),
            ],
            vec![],
        );
        assert_eq!(m.best_mode().id, 3);
    }

    #[test]
    fn test_select_mode_fallbacks() {
        let m = monitor_with(
            vec![mode(1, 2560, 1440, 144.0), mode(2, 2560, 1440, 60.0), mode(3, 1920, 1080, 60.0)],
            vec![1],
        );
        assert_eq!(m.select_mode(2560, 1440, 60.0).id, 2);
        assert_eq!(m.select_mode(1920, 1080, 75.0).id, 3);
        assert_eq!(m.select_mode(3840, 2160, 60.0).id, 1);
    }

    #[test]
    fn test_losing_crtc_keeps_last_rate() {
        let modes = vec![mode(1, 2560, 1440, 60.0), mode(2, 2560, 1440, 144.0)];
        let lit = OutputInfo {
            name: "DP-1".into(),
            connected: true,
            crtc: 63,
            modes: vec![1, 2],
            ..Default::default()
        };
        let crtc = CrtcInfo {
            x: 1920,
            width: 2560,
            height: 1440,
            mode: 2,
            rotation: 1,
            rotations: 1,
            outputs: vec![1],
            ..Default::default()
        };
        let mut m = Monitor::new(1, &lit, Some(&crtc), modes.clone(), "DP-1".into(), String::new(), String::new());
        assert!(m.enabled);
        assert_eq!((m.x, m.refresh_rate()), (1920, 144.0));

        let unlit = OutputInfo { crtc: 0, ..lit.clone() };
        m.update(&unlit, None, modes.clone());
        assert!(!m.enabled);
        let cfg = m.to_config(false);
        assert_eq!((cfg.x, cfg.y), (0, 0));
        assert_eq!((cfg.width, cfg.height, cfg.refresh_rate), (2560, 1440, 144.0));
        assert_eq!(m.select_mode(cfg.width, cfg.height, cfg.refresh_rate).id, 2);

        // a bound but blanked crtc behaves the same
        let mut m = Monitor::new(1, &lit, Some(&crtc), modes, "DP-1".into(), String::new(), String::new());
        m.update_geometry(&CrtcInfo { mode: 0, ..crtc }, ModeInfo::default());
        assert!(!m.enabled);
        assert_eq!((m.x, m.current_mode.id), (0, 2));
    }

    #[test]
    fn test_pending_changes_reset() {
        let mut m = monitor_with(vec![mode(1, 1920, 1080, 60.0)], vec![1]);
        m.enabled = true;
        assert!(!m.has_changed());
        m.set_position(100, 0);
        m.set_rotation(Rotation::Left);
        assert!(m.has_changed());
        m.reset_changes();
        assert!(!m.has_changed());
        assert_eq!((m.x, m.rotation), (0, Rotation::Normal));
    }
}
