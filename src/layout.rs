//! Layout policies
//!
//! Every planner is a pure function over a snapshot of the monitors and the
//! configs saved for the current fingerprint. The result is a [`LayoutPlan`]
//! that the manager pushes into the registry before committing it.

use std::collections::BTreeMap;

use crate::config::store::{config_by_uuid, MonitorConfig, SingleModeConfig};
use crate::error::{DisplayError, Result};
use crate::monitor::Monitor;
use crate::types::{DisplayMode, ModeInfo, OutputId, Reflect, Rotation, Size};

/// Where and how one monitor should be driven
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub mode: ModeInfo,
    pub x: i16,
    pub y: i16,
    pub rotation: Rotation,
    pub reflect: Reflect,
}

impl Placement {
    fn origin(mode: ModeInfo) -> Self {
        Self {
            mode,
            x: 0,
            y: 0,
            rotation: Rotation::Normal,
            reflect: Reflect::None,
        }
    }
}

/// Target state for every known monitor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayoutPlan {
    /// `None` disables the monitor
    pub targets: BTreeMap<OutputId, Option<Placement>>,
    pub primary: Option<OutputId>,
    /// Snapshot the result into the store once applied
    pub save: bool,
}

impl LayoutPlan {
    pub fn placement(&self, id: OutputId) -> Option<&Placement> {
        self.targets.get(&id).and_then(Option::as_ref)
    }
}

/// Inputs to primary selection that live outside the monitor list
#[derive(Debug, Clone, Copy, Default)]
pub struct PrimaryHint<'a> {
    pub builtin: Option<OutputId>,
    /// Name of the output that is primary right now
    pub current: &'a str,
}

/// Lower-cased connector family, `eDP-1` → `edp`
pub fn port_type(name: &str) -> String {
    let family = name.split('-').next().unwrap_or(name);
    family.to_lowercase()
}

fn port_priority(port: &str) -> Option<u8> {
    match port {
        "edp" => Some(0),
        "dp" => Some(1),
        "hdmi" => Some(2),
        "dvi" => Some(3),
        "vga" => Some(4),
        _ => None,
    }
}

const PRIORITY_OTHER: u8 = 5;

/// Builtin panel, else best port type, else the longest connected
///
/// Among outputs of the same port type the first one wins, unless a later
/// one is the current primary.
pub fn default_primary(connected: &[Monitor], hint: PrimaryHint<'_>) -> Option<OutputId> {
    if connected.is_empty() {
        return None;
    }
    if let Some(builtin) = hint.builtin
        && connected.iter().any(|m| m.id == builtin)
    {
        return Some(builtin);
    }

    let mut chosen = None;
    let mut priority = PRIORITY_OTHER;
    for m in connected {
        let Some(p) = port_priority(&port_type(&m.name)) else {
            continue;
        };
        if p < priority || (p == priority && m.name == hint.current) {
            chosen = Some(m.id);
            priority = p;
        }
    }
    if chosen.is_some() {
        return chosen;
    }

    connected
        .iter()
        .min_by_key(|m| m.last_connected)
        .map(|m| m.id)
}

/// Sizes every connected monitor can show, in the first monitor's mode order
pub fn common_sizes(connected: &[Monitor]) -> Vec<Size> {
    let Some((first, rest)) = connected.split_first() else {
        return Vec::new();
    };
    let mut sizes: Vec<Size> = Vec::new();
    for mode in &first.modes {
        let size = mode.size();
        if sizes.contains(&size) {
            continue;
        }
        if rest.iter().all(|m| m.has_mode_size(size.width, size.height)) {
            sizes.push(size);
        }
    }
    sizes
}

/// Largest area, first wins on ties
fn max_area(sizes: &[Size]) -> Option<Size> {
    sizes.iter().copied().reduce(|best, s| if s.area() > best.area() { s } else { best })
}

fn saved_mode(monitor: &Monitor, cfg: &MonitorConfig) -> ModeInfo {
    let (w, h) = if cfg.rotation.swaps_axes() {
        (cfg.height, cfg.width)
    } else {
        (cfg.width, cfg.height)
    };
    monitor.select_mode(w, h, cfg.refresh_rate)
}

/// Geometry for the lone connected monitor
pub fn single_config(monitor: &Monitor, saved: Option<&SingleModeConfig>) -> MonitorConfig {
    let mut cfg = match saved {
        Some(single) => single.monitor.clone(),
        None => {
            let mode = monitor.best_mode();
            let mut cfg = monitor.to_config(true);
            cfg.width = mode.width;
            cfg.height = mode.height;
            cfg.refresh_rate = mode.rate;
            cfg.rotation = Rotation::Normal;
            cfg.reflect = Reflect::None;
            cfg
        }
    };
    cfg.uuid = monitor.uuid.clone();
    cfg.name = monitor.name.clone();
    cfg.enabled = true;
    cfg.primary = true;
    cfg.x = 0;
    cfg.y = 0;
    cfg
}

/// Apply stored configs verbatim; monitors without an entry are disabled
pub fn plan_from_configs(
    monitors: &[Monitor],
    configs: &[MonitorConfig],
    hint: PrimaryHint<'_>,
) -> LayoutPlan {
    let mut plan = LayoutPlan::default();
    for m in monitors {
        let target = config_by_uuid(configs, &m.uuid)
            .filter(|cfg| cfg.enabled && m.connected)
            .map(|cfg| {
                if cfg.primary && plan.primary.is_none() {
                    plan.primary = Some(m.id);
                }
                Placement {
                    mode: saved_mode(m, cfg),
                    x: cfg.x,
                    y: cfg.y,
                    rotation: cfg.rotation,
                    reflect: cfg.reflect,
                }
            });
        plan.targets.insert(m.id, target);
    }
    if plan.primary.is_none() {
        plan.primary = default_primary(&connected_of(monitors), hint);
    }
    plan
}

fn connected_of(monitors: &[Monitor]) -> Vec<Monitor> {
    monitors.iter().filter(|m| m.connected).cloned().collect()
}

/// Every connected monitor at the origin showing the same size
pub fn plan_mirror(
    monitors: &[Monitor],
    configs: &[MonitorConfig],
    hint: PrimaryHint<'_>,
) -> Result<LayoutPlan> {
    let connected = connected_of(monitors);
    let size = max_area(&common_sizes(&connected)).ok_or(DisplayError::NoCommonMode)?;

    let mut plan = LayoutPlan {
        save: true,
        ..Default::default()
    };
    for m in monitors {
        let target = m.connected.then(|| {
            let mode = match config_by_uuid(configs, &m.uuid) {
                Some(cfg) => m.select_mode(cfg.width, cfg.height, cfg.refresh_rate),
                None => m
                    .first_mode_by_size(size.width, size.height)
                    .unwrap_or_else(|| m.best_mode()),
            };
            Placement::origin(mode)
        });
        plan.targets.insert(m.id, target);
    }
    plan.primary = default_primary(&connected, hint);
    Ok(plan)
}

/// Connected monitors side by side in ascending id order
pub fn plan_extend(
    monitors: &[Monitor],
    configs: &[MonitorConfig],
    hint: PrimaryHint<'_>,
) -> LayoutPlan {
    let mut sorted: Vec<&Monitor> = monitors.iter().collect();
    sorted.sort_by_key(|m| m.id);

    let mut plan = LayoutPlan {
        save: true,
        ..Default::default()
    };
    let mut x_offset: i32 = 0;
    for m in sorted {
        if !m.connected {
            plan.targets.insert(m.id, None);
            continue;
        }
        let mode = match config_by_uuid(configs, &m.uuid) {
            Some(cfg) => {
                if cfg.primary && plan.primary.is_none() {
                    plan.primary = Some(m.id);
                }
                m.select_mode(cfg.width, cfg.height, cfg.refresh_rate)
            }
            None => m.best_mode(),
        };
        let x = x_offset.min(i16::MAX as i32) as i16;
        x_offset += mode.width as i32;
        plan.targets.insert(
            m.id,
            Some(Placement {
                x,
                ..Placement::origin(mode)
            }),
        );
    }
    if plan.primary.is_none() {
        plan.primary = default_primary(&connected_of(monitors), hint);
    }
    plan
}

/// Exactly one monitor on, the rest off
///
/// The target is `name` when given, else the monitor enabled in the saved
/// configs, else the lowest connected id. The snapshot is saved only when
/// the target did not come from the saved configs.
pub fn plan_only_one(
    monitors: &[Monitor],
    configs: &[MonitorConfig],
    name: Option<&str>,
) -> Result<LayoutPlan> {
    let (target, save) = match name.filter(|n| !n.is_empty()) {
        Some(name) => {
            let m = monitors
                .iter()
                .find(|m| m.name == name && m.connected)
                .ok_or_else(|| DisplayError::MonitorNotFound(name.to_string()))?;
            (m, true)
        }
        None => {
            let saved = configs
                .iter()
                .filter(|c| c.enabled)
                .find_map(|c| monitors.iter().find(|m| m.connected && m.uuid == c.uuid));
            match saved {
                Some(m) => (m, false),
                None => {
                    let m = monitors
                        .iter()
                        .filter(|m| m.connected)
                        .min_by_key(|m| m.id)
                        .ok_or(DisplayError::NoOutputConnected)?;
                    (m, true)
                }
            }
        }
    };

    let placement = match config_by_uuid(configs, &target.uuid) {
        Some(cfg) => Placement {
            mode: saved_mode(target, cfg),
            x: 0,
            y: 0,
            rotation: cfg.rotation,
            reflect: cfg.reflect,
        },
        None => Placement::origin(target.best_mode()),
    };

    let mut plan = LayoutPlan {
        primary: Some(target.id),
        save,
        ..Default::default()
    };
    for m in monitors {
        let t = (m.id == target.id).then(|| placement.clone());
        plan.targets.insert(m.id, t);
    }
    Ok(plan)
}

/// Policy inferred from the live geometry
pub fn real_display_mode(connected: &[Monitor]) -> DisplayMode {
    let corners: Vec<(i16, i16)> = connected
        .iter()
        .filter(|m| m.enabled)
        .map(|m| (m.x, m.y))
        .collect();
    let shared = corners
        .iter()
        .enumerate()
        .any(|(i, c)| corners[..i].contains(c));
    match corners.len() {
        _ if shared => DisplayMode::Mirror,
        0 => DisplayMode::Unknown,
        1 => DisplayMode::OnlyOne,
        _ => DisplayMode::Extend,
    }
}

/// Live layout as config entries, `primary` marking one by name
pub fn to_monitor_configs(monitors: &[Monitor], primary: &str) -> Vec<MonitorConfig> {
    monitors
        .iter()
        .map(|m| m.to_config(m.name == primary))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::server::OutputInfo;
    use std::time::{Duration, Instant};

    /// Connected monitor whose first mode is preferred
    pub(crate) fn monitor(id: OutputId, name: &str, modes: &[(u16, u16, f64)]) -> Monitor {
        let modes: Vec<ModeInfo> = modes
            .iter()
            .enumerate()
            .map(|(i, &(width, height, rate))| ModeInfo {
                id: id * 100 + i as u32,
                name: format!("{width}x{height}"),
                width,
                height,
                rate,
            })
            .collect();
        let output = OutputInfo {
            name: name.into(),
            connected: true,
            modes: modes.iter().map(|m| m.id).collect(),
            num_preferred: 1,
            ..Default::default()
        };
        Monitor::new(id, &output, None, modes, format!("{name}-uuid"), String::new(), String::new())
    }

    fn cfg_for(m: &Monitor, enabled: bool, size: (u16, u16, f64)) -> MonitorConfig {
        MonitorConfig {
            uuid: m.uuid.clone(),
            name: m.name.clone(),
            enabled,
            width: size.0,
            height: size.1,
            refresh_rate: size.2,
            ..Default::default()
        }
    }

    #[test]
    fn test_port_type() {
        assert_eq!(port_type("eDP-1"), "edp");
        assert_eq!(port_type("HDMI-A-0"), "hdmi");
        assert_eq!(port_type("Virtual1"), "virtual1");
    }

    #[test]
    fn test_single_synthesized_from_best_mode() {
        let m = monitor(65, "HDMI-1", &[(1920, 1080, 60.0), (1280, 720, 60.0)]);
        let cfg = single_config(&m, None);
        assert!(cfg.enabled && cfg.primary);
        assert_eq!((cfg.x, cfg.y, cfg.width, cfg.height), (0, 0, 1920, 1080));
        assert_eq!(cfg.rotation, Rotation::Normal);

        let plan = plan_from_configs(&[m], &[cfg], PrimaryHint::default());
        assert_eq!(plan.primary, Some(65));
        assert_eq!(plan.placement(65).unwrap().mode.width, 1920);
    }

    #[test]
    fn test_single_reuses_saved() {
        let m = monitor(65, "HDMI-1", &[(1920, 1080, 60.0), (1280, 720, 60.0)]);
        let saved = SingleModeConfig {
            monitor: cfg_for(&m, false, (1280, 720, 60.0)),
            ..Default::default()
        };
        let cfg = single_config(&m, Some(&saved));
        assert!(cfg.enabled && cfg.primary);
        assert_eq!((cfg.width, cfg.height), (1280, 720));
    }

    #[test]
    fn test_mirror_picks_common_size() {
        let a = monitor(65, "eDP-1", &[(1920, 1080, 60.0), (1280, 720, 60.0)]);
        let b = monitor(66, "HDMI-1", &[(1280, 720, 60.0)]);
        let plan = plan_mirror(&[a, b], &[], PrimaryHint::default()).unwrap();
        for id in [65, 66] {
            let p = plan.placement(id).unwrap();
            assert_eq!((p.mode.width, p.mode.height), (1280, 720));
            assert_eq!((p.x, p.y), (0, 0));
        }
        assert_eq!(plan.primary, Some(65));
        assert!(plan.save);
    }

    #[test]
    fn test_mirror_without_common_size_fails() {
        let a = monitor(65, "eDP-1", &[(1920, 1080, 60.0)]);
        let b = monitor(66, "HDMI-1", &[(1280, 720, 60.0)]);
        assert!(matches!(
            plan_mirror(&[a, b], &[], PrimaryHint::default()),
            Err(DisplayError::NoCommonMode)
        ));
    }

    #[test]
    fn test_extend_offsets() {
        let monitors = [
            monitor(67, "DP-2", &[(2560, 1440, 60.0)]),
            monitor(65, "DP-1", &[(1920, 1080, 60.0)]),
            monitor(66, "HDMI-1", &[(1600, 900, 60.0)]),
        ];
        let plan = plan_extend(&monitors, &[], PrimaryHint::default());
        let xs: Vec<i16> = [65, 66, 67].iter().map(|id| plan.placement(*id).unwrap().x).collect();
        assert_eq!(xs, vec![0, 1920, 3520]);
        assert_eq!(plan.primary, Some(65));
    }

    #[test]
    fn test_extend_offset_clamped() {
        let monitors: Vec<Monitor> = (0..6)
            .map(|i| monitor(65 + i, &format!("DP-{i}"), &[(7680, 4320, 60.0)]))
            .collect();
        let plan = plan_extend(&monitors, &[], PrimaryHint::default());
        assert_eq!(plan.placement(70).unwrap().x, i16::MAX);
    }

    #[test]
    fn test_extend_saved_primary_and_mode() {
        let a = monitor(65, "eDP-1", &[(1920, 1080, 60.0)]);
        let b = monitor(66, "HDMI-1", &[(2560, 1440, 60.0), (1920, 1080, 60.0)]);
        let mut cb = cfg_for(&b, true, (1920, 1080, 60.0));
        cb.primary = true;
        let plan = plan_extend(&[a, b], &[cb], PrimaryHint::default());
        assert_eq!(plan.primary, Some(66));
        assert_eq!(plan.placement(66).unwrap().mode.width, 1920);
    }

    #[test]
    fn test_only_one_choices() {
        let a = monitor(65, "DP-1", &[(2560, 1440, 144.0), (1920, 1080, 60.0)]);
        let b = monitor(66, "HDMI-1", &[(1920, 1080, 60.0)]);
        let monitors = [a.clone(), b.clone()];

        let plan = plan_only_one(&monitors, &[], None).unwrap();
        assert_eq!(plan.primary, Some(65));
        assert!(plan.save);
        assert!(plan.placement(66).is_none());

        let saved = [cfg_for(&a, false, (2560, 1440, 144.0)), cfg_for(&b, true, (1920, 1080, 60.0))];
        let plan = plan_only_one(&monitors, &saved, None).unwrap();
        assert_eq!(plan.primary, Some(66));
        assert!(!plan.save);

        assert!(matches!(
            plan_only_one(&monitors, &saved, Some("VGA-1")),
            Err(DisplayError::MonitorNotFound(_))
        ));
    }

    #[test]
    fn test_only_one_restores_disabled_geometry() {
        let a = monitor(65, "DP-1", &[(1920, 1080, 60.0), (2560, 1440, 144.0)]);
        let b = monitor(66, "HDMI-1", &[(1920, 1080, 60.0)]);
        let saved = [cfg_for(&a, false, (2560, 1440, 144.0)), cfg_for(&b, true, (1920, 1080, 60.0))];
        let plan = plan_only_one(&[a, b], &saved, Some("DP-1")).unwrap();
        let p = plan.placement(65).unwrap();
        assert_eq!((p.mode.width, p.mode.height, p.mode.rate), (2560, 1440, 144.0));
        assert_eq!((p.x, p.y), (0, 0));
    }

    #[test]
    fn test_from_configs_disables_unknown() {
        let a = monitor(65, "DP-1", &[(1920, 1080, 60.0)]);
        let b = monitor(66, "HDMI-1", &[(1920, 1080, 60.0)]);
        let mut ca = cfg_for(&a, true, (1080, 1920, 60.0));
        ca.rotation = Rotation::Left;
        ca.x = 100;
        let plan = plan_from_configs(&[a, b], &[ca], PrimaryHint::default());
        let p = plan.placement(65).unwrap();
        assert_eq!((p.mode.width, p.x, p.rotation), (1920, 100, Rotation::Left));
        assert!(plan.placement(66).is_none());
        assert_eq!(plan.primary, Some(65));
    }

    #[test]
    fn test_default_primary_order() {
        let hdmi = monitor(65, "HDMI-1", &[(1920, 1080, 60.0)]);
        let dp = monitor(66, "DP-1", &[(1920, 1080, 60.0)]);
        let dp2 = monitor(67, "DP-2", &[(1920, 1080, 60.0)]);
        let all = [hdmi.clone(), dp.clone(), dp2.clone()];

        assert_eq!(default_primary(&all, PrimaryHint::default()), Some(66));
        let hint = PrimaryHint { builtin: None, current: "DP-2" };
        assert_eq!(default_primary(&all, hint), Some(67));
        let hint = PrimaryHint { builtin: Some(65), current: "" };
        assert_eq!(default_primary(&all, hint), Some(65));
        assert_eq!(default_primary(&[], PrimaryHint::default()), None);
    }

    #[test]
    fn test_default_primary_oldest_connection() {
        let now = Instant::now();
        let mut a = monitor(65, "Virtual-1", &[(1920, 1080, 60.0)]);
        let mut b = monitor(66, "Virtual-2", &[(1920, 1080, 60.0)]);
        a.last_connected = Some(now);
        b.last_connected = now.checked_sub(Duration::from_secs(10));
        assert_eq!(default_primary(&[a, b], PrimaryHint::default()), Some(66));
    }

    #[test]
    fn test_real_display_mode() {
        let mut a = monitor(65, "DP-1", &[(1920, 1080, 60.0)]);
        let mut b = monitor(66, "HDMI-1", &[(1920, 1080, 60.0)]);
        assert_eq!(real_display_mode(&[a.clone(), b.clone()]), DisplayMode::Unknown);
        a.enabled = true;
        assert_eq!(real_display_mode(&[a.clone(), b.clone()]), DisplayMode::OnlyOne);
        b.enabled = true;
        assert_eq!(real_display_mode(&[a.clone(), b.clone()]), DisplayMode::Mirror);
        b.x = 1920;
        assert_eq!(real_display_mode(&[a, b]), DisplayMode::Extend);
    }
}
