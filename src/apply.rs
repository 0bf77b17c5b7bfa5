//! Apply/commit engine
//!
//! Turns the desired state held in the registry into RandR requests:
//! crtc allocation, screen size, pre-disable of crtcs that would block the
//! resize, then one `SetCrtcConfig` per output. The request list is planned
//! without touching the server so allocation failures leave hardware alone.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, warn};

use crate::constants::screen::ASSUMED_PX_PER_MM;
use crate::error::{DisplayError, Result};
use crate::mirror::ResourceMirror;
use crate::monitor::Monitor;
use crate::registry::MonitorRegistry;
use crate::server::{CrtcConfig, CrtcInfo, DisplayServer};
use crate::types::{combine_rotation, CrtcId, OutputId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScreenSize {
    pub width: u16,
    pub height: u16,
    pub mm_width: u32,
    pub mm_height: u32,
}

impl ScreenSize {
    fn fits(&self, crtc: &CrtcInfo) -> bool {
        crtc.x as i32 + crtc.width as i32 <= self.width as i32
            && crtc.y as i32 + crtc.height as i32 <= self.height as i32
    }
}

/// Extra freedom granted to one apply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    /// A policy switch happened since the last apply
    pub mode_changed: bool,
    /// The connected count dropped; crtcs of unplugged outputs go dark first
    pub disable_orphans: bool,
}

/// Everything one apply will send, in order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitPlan {
    /// Crtcs switched off before the screen is resized
    pub disable: Vec<CrtcId>,
    pub screen: ScreenSize,
    /// Per-output requests, disables for outputs being turned off included
    pub configs: Vec<CrtcConfig>,
}

/// An output left lit by a successful apply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedOutput {
    pub output: OutputId,
    pub name: String,
    pub crtc: CrtcId,
}

/// Crtc for every enabled monitor
///
/// A monitor keeps the crtc it is bound to. Otherwise the lowest free crtc
/// that lists the output as possible is claimed.
pub fn allocate_crtcs(
    monitors: &[Monitor],
    crtcs: &BTreeMap<CrtcId, CrtcInfo>,
) -> Result<BTreeMap<OutputId, CrtcId>> {
    let mut claimed: BTreeSet<CrtcId> = monitors
        .iter()
        .filter(|m| m.enabled && m.crtc != 0)
        .map(|m| m.crtc)
        .collect();
    let mut out = BTreeMap::new();

    for m in monitors.iter().filter(|m| m.enabled) {
        if m.crtc != 0 {
            out.insert(m.id, m.crtc);
            continue;
        }
        let free = crtcs
            .iter()
            .find(|(id, info)| {
                info.is_free() && info.possible.contains(&m.id) && !claimed.contains(id)
            })
            .map(|(id, _)| *id)
            .ok_or(DisplayError::NoFreeCrtc { output: m.id })?;
        debug!(output = m.id, crtc = free, "claimed free crtc");
        claimed.insert(free);
        out.insert(m.id, free);
    }
    Ok(out)
}

/// Bounding box of every enabled monitor, clamped to the protocol maximum
pub fn screen_size(monitors: &[Monitor]) -> ScreenSize {
    let (mut width, mut height) = (0i32, 0i32);
    for m in monitors.iter().filter(|m| m.enabled) {
        let (mut w, mut h) = (m.current_mode.width as i32, m.current_mode.height as i32);
        if m.rotation.swaps_axes() {
            std::mem::swap(&mut w, &mut h);
        }
        width = width.max(m.x as i32 + w);
        height = height.max(m.y as i32 + h);
    }
    let width = width.clamp(0, u16::MAX as i32) as u16;
    let height = height.clamp(0, u16::MAX as i32) as u16;
    ScreenSize {
        width,
        height,
        mm_width: (width as f64 / ASSUMED_PX_PER_MM) as u32,
        mm_height: (height as f64 / ASSUMED_PX_PER_MM) as u32,
    }
}

/// In-use crtcs that must go dark before the resize
///
/// That is every crtc outside the new screen, and every crtc whose connected
/// monitor rotated since the last apply. After a policy switch every in-use
/// crtc is reprogrammed from scratch.
pub fn crtcs_to_disable(
    crtcs: &BTreeMap<CrtcId, CrtcInfo>,
    screen: ScreenSize,
    monitors: &[Monitor],
    options: ApplyOptions,
) -> Vec<CrtcId> {
    crtcs
        .iter()
        .filter(|(_, info)| !info.is_free())
        .filter(|(id, info)| {
            if !screen.fits(info) {
                return true;
            }
            monitors.iter().find(|m| m.crtc == **id).is_some_and(|m| {
                if m.connected {
                    options.mode_changed || m.old_rotation != m.rotation
                } else {
                    options.disable_orphans
                }
            })
        })
        .map(|(id, _)| *id)
        .collect()
}

/// Plan every request of an apply; nothing is sent
pub fn plan_commit(
    monitors: &[Monitor],
    crtcs: &BTreeMap<CrtcId, CrtcInfo>,
    config_timestamp: u32,
    options: ApplyOptions,
) -> Result<CommitPlan> {
    let allocation = allocate_crtcs(monitors, crtcs)?;
    let screen = screen_size(monitors);
    let disable = crtcs_to_disable(crtcs, screen, monitors, options);

    let mut configs = Vec::new();
    for m in monitors {
        if m.enabled {
            if m.current_mode.is_empty() {
                return Err(DisplayError::InvalidMode(format!("{} has no mode set", m.name)));
            }
            let Some(&crtc) = allocation.get(&m.id) else {
                continue;
            };
            configs.push(CrtcConfig {
                crtc,
                x: m.x,
                y: m.y,
                mode: m.current_mode.id,
                rotation: combine_rotation(m.rotation, m.reflect),
                outputs: vec![m.id],
                config_timestamp,
            });
        } else if m.crtc != 0 && !disable.contains(&m.crtc) {
            configs.push(CrtcConfig::disable(m.crtc, config_timestamp));
        }
    }

    Ok(CommitPlan {
        disable,
        screen,
        configs,
    })
}

/// Commit the registry's desired state to the server
///
/// Runs under a server grab that is released on every path. On success the
/// touched outputs and crtcs are re-read into the mirror and pushed back
/// into their monitors, since the server may coerce requested values.
pub fn apply(
    server: &dyn DisplayServer,
    mirror: &ResourceMirror,
    registry: &MonitorRegistry,
    options: ApplyOptions,
) -> Result<Vec<AppliedOutput>> {
    let monitors = registry.snapshot();
    let plan = plan_commit(
        &monitors,
        &mirror.crtcs(),
        mirror.config_timestamp(),
        options,
    )?;
    debug!(
        disable = ?plan.disable,
        width = plan.screen.width,
        height = plan.screen.height,
        requests = plan.configs.len(),
        "applying layout"
    );

    server.grab()?;
    let sent = send(server, mirror.config_timestamp(), &plan);
    if let Err(e) = server.ungrab() {
        warn!(error = %e, "failed to ungrab server");
    }
    sent?;

    resync(server, mirror, registry, &plan);
    registry.for_each(|m| m.old_rotation = m.rotation);

    let applied: Vec<AppliedOutput> = plan
        .configs
        .iter()
        .filter(|c| !c.is_disable())
        .flat_map(|c| c.outputs.iter().map(move |o| (*o, c.crtc)))
        .map(|(output, crtc)| AppliedOutput {
            output,
            name: monitors
                .iter()
                .find(|m| m.id == output)
                .map(|m| m.name.clone())
                .unwrap_or_default(),
            crtc,
        })
        .collect();
    info!(
        outputs = applied.len(),
        width = plan.screen.width,
        height = plan.screen.height,
        "layout applied"
    );
    Ok(applied)
}

fn send(server: &dyn DisplayServer, config_timestamp: u32, plan: &CommitPlan) -> Result<()> {
    for crtc in &plan.disable {
        debug!(crtc = crtc, "disabling crtc before resize");
        server.set_crtc_config(&CrtcConfig::disable(*crtc, config_timestamp))?;
    }
    let s = plan.screen;
    server.set_screen_size(s.width, s.height, s.mm_width, s.mm_height)?;
    for config in &plan.configs {
        debug!(
            crtc = config.crtc,
            outputs = ?config.outputs,
            x = config.x,
            y = config.y,
            mode = config.mode,
            "set crtc config"
        );
        server.set_crtc_config(config)?;
    }
    Ok(())
}

fn resync(
    server: &dyn DisplayServer,
    mirror: &ResourceMirror,
    registry: &MonitorRegistry,
    plan: &CommitPlan,
) {
    let crtcs: BTreeSet<CrtcId> = plan
        .disable
        .iter()
        .copied()
        .chain(plan.configs.iter().map(|c| c.crtc))
        .collect();
    for crtc in crtcs {
        if let Err(e) = mirror.refresh_crtc(server, crtc) {
            warn!(crtc = crtc, error = %e, "failed to refresh crtc after apply");
        }
    }

    for m in registry.snapshot() {
        let info = match mirror.refresh_output(server, m.id) {
            Ok(info) => info,
            Err(e) => {
                warn!(output = m.id, error = %e, "failed to refresh output after apply");
                continue;
            }
        };
        let crtc = (info.crtc != 0).then(|| mirror.crtc(info.crtc)).flatten();
        let modes = mirror.modes_of(&info.modes);
        registry.with_monitor(m.id, |monitor| monitor.update(&info, crtc.as_ref(), modes));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::tests::monitor;
    use crate::mirror::lock;
    use crate::testing::{Call, FakeServer};
    use crate::types::Rotation;

    fn crtc(possible: &[OutputId]) -> CrtcInfo {
        CrtcInfo {
            possible: possible.to_vec(),
            rotations: 0x3f,
            ..Default::default()
        }
    }

    fn lit(mut m: Monitor, crtc: CrtcId, x: i16) -> Monitor {
        m.enabled = true;
        m.crtc = crtc;
        m.x = x;
        m.current_mode = m.best_mode();
        m.sync_size_to_mode();
        m
    }

    #[test]
    fn test_allocation_reuses_and_claims_in_order() {
        let a = lit(monitor(65, "DP-1", &[(1920, 1080, 60.0)]), 63, 0);
        let b = lit(monitor(66, "DP-2", &[(1920, 1080, 60.0)]), 0, 1920);
        let c = lit(monitor(67, "DP-3", &[(1920, 1080, 60.0)]), 0, 3840);
        let mut crtcs = BTreeMap::new();
        crtcs.insert(63, CrtcInfo { outputs: vec![65], ..crtc(&[65, 66, 67]) });
        crtcs.insert(64, crtc(&[66, 67]));
        crtcs.insert(62, crtc(&[67]));

        let alloc = allocate_crtcs(&[a, b, c], &crtcs).unwrap();
        assert_eq!(alloc[&65], 63);
        assert_eq!(alloc[&66], 64);
        assert_eq!(alloc[&67], 62);
    }

    #[test]
    fn test_allocation_exhausted() {
        let a = lit(monitor(65, "DP-1", &[(1920, 1080, 60.0)]), 0, 0);
        let b = lit(monitor(66, "DP-2", &[(1920, 1080, 60.0)]), 0, 1920);
        let mut crtcs = BTreeMap::new();
        crtcs.insert(63, crtc(&[65, 66]));
        assert!(matches!(
            allocate_crtcs(&[a, b], &crtcs),
            Err(DisplayError::NoFreeCrtc { output: 66 })
        ));
    }

    #[test]
    fn test_screen_size_swaps_rotated() {
        let a = lit(monitor(65, "DP-1", &[(1920, 1080, 60.0)]), 63, 0);
        let mut b = lit(monitor(66, "DP-2", &[(2560, 1440, 60.0)]), 64, 1920);
        b.rotation = Rotation::Right;
        let s = screen_size(&[a, b]);
        assert_eq!((s.width, s.height), (1920 + 1440, 2560));
        assert_eq!(s.mm_width, (3360.0 / ASSUMED_PX_PER_MM) as u32);
    }

    #[test]
    fn test_disable_outside_or_rotated() {
        let screen = ScreenSize { width: 1920, height: 1080, ..Default::default() };
        let mut a = lit(monitor(65, "DP-1", &[(1920, 1080, 60.0)]), 63, 0);
        let b = lit(monitor(66, "DP-2", &[(1920, 1080, 60.0)]), 64, 1920);
        let mut crtcs = BTreeMap::new();
        crtcs.insert(63, CrtcInfo { width: 1920, height: 1080, outputs: vec![65], ..crtc(&[65]) });
        crtcs.insert(64, CrtcInfo { x: 1920, width: 1920, height: 1080, outputs: vec![66], ..crtc(&[66]) });
        crtcs.insert(62, crtc(&[65, 66]));

        assert_eq!(crtcs_to_disable(&crtcs, screen, &[a.clone(), b.clone()], ApplyOptions::default()), vec![64]);
        a.rotation = Rotation::Left;
        assert_eq!(crtcs_to_disable(&crtcs, screen, &[a.clone(), b.clone()], ApplyOptions::default()), vec![63, 64]);
        a.rotation = Rotation::Normal;
        let changed = ApplyOptions { mode_changed: true, ..Default::default() };
        assert_eq!(crtcs_to_disable(&crtcs, screen, &[a, b], changed), vec![63, 64]);
    }

    #[test]
    fn test_apply_order_and_resync() {
        let fake = FakeServer::builder()
            .output(65, "DP-1", &[(1920, 1080, 60.0)])
            .output(66, "HDMI-1", &[(1280, 720, 60.0)])
            .crtcs(&[63, 64])
            .build();
        let mirror = ResourceMirror::new();
        mirror.refresh_all(&fake).unwrap();
        let registry = MonitorRegistry::new();
        registry.load_from_mirror(&fake, &mirror).unwrap();
        registry.for_each(|m| {
            let mode = m.best_mode();
            m.enabled = true;
            m.current_mode = mode;
            m.sync_size_to_mode();
        });
        registry.with_monitor(66, |m| m.x = 1920);

        let applied = apply(&fake, &mirror, &registry, ApplyOptions::default()).unwrap();
        assert_eq!(applied.len(), 2);
        assert_eq!(
            fake.calls(),
            vec![
                Call::Grab,
                Call::Screen(3200, 1080),
                Call::Crtc(63, vec![65]),
                Call::Crtc(64, vec![66]),
                Call::Ungrab,
            ]
        );
        let m = registry.get(66).unwrap();
        let m = lock(&m);
        assert_eq!((m.crtc, m.x, m.width), (64, 1920, 1280));
        assert!(m.enabled);
    }

    #[test]
    fn test_apply_failure_releases_grab() {
        let fake = FakeServer::builder()
            .output(65, "DP-1", &[(1920, 1080, 60.0)])
            .crtcs(&[63])
            .build();
        fake.reject_crtc(63, 2);
        let mirror = ResourceMirror::new();
        mirror.refresh_all(&fake).unwrap();
        let registry = MonitorRegistry::new();
        registry.load_from_mirror(&fake, &mirror).unwrap();
        registry.for_each(|m| {
            m.enabled = true;
            m.current_mode = m.best_mode();
            m.sync_size_to_mode();
        });

        let err = apply(&fake, &mirror, &registry, ApplyOptions::default()).unwrap_err();
        assert!(matches!(err, DisplayError::CrtcApply { crtc: 63, status: 2 }));
        assert_eq!(fake.calls().last(), Some(&Call::Ungrab));
    }

    #[test]
    fn test_apply_without_free_crtc_touches_nothing() {
        let fake = FakeServer::builder()
            .output(65, "DP-1", &[(1920, 1080, 60.0)])
            .output(66, "DP-2", &[(1920, 1080, 60.0)])
            .crtcs(&[63])
            .build();
        let mirror = ResourceMirror::new();
        mirror.refresh_all(&fake).unwrap();
        let registry = MonitorRegistry::new();
        registry.load_from_mirror(&fake, &mirror).unwrap();
        registry.for_each(|m| {
            m.enabled = true;
            m.current_mode = m.best_mode();
            m.sync_size_to_mode();
        });

        assert!(matches!(
            apply(&fake, &mirror, &registry, ApplyOptions::default()),
            Err(DisplayError::NoFreeCrtc { output: 66 })
        ));
        assert!(fake.calls().is_empty());
    }

    #[test]
    fn test_shrink_disables_before_resize() {
        let fake = FakeServer::builder()
            .output(65, "DP-1", &[(1920, 1080, 60.0)])
            .output(66, "DP-2", &[(1920, 1080, 60.0)])
            .crtcs(&[63, 64])
            .lit(65, 63, 0)
            .lit(66, 64, 1920)
            .build();
        let mirror = ResourceMirror::new();
        mirror.refresh_all(&fake).unwrap();
        let registry = MonitorRegistry::new();
        registry.load_from_mirror(&fake, &mirror).unwrap();
        registry.with_monitor(66, |m| m.enabled = false);

        apply(&fake, &mirror, &registry, ApplyOptions::default()).unwrap();
        let calls = fake.calls();
        assert_eq!(calls[1], Call::Disable(64));
        assert_eq!(calls[2], Call::Screen(1920, 1080));
        assert!(!calls.contains(&Call::Disable(63)));
        assert!(!lock(&registry.get(66).unwrap()).enabled);
    }
}
