//! RandR backend for the [`DisplayServer`] trait

use anyhow::Context;
use std::sync::Arc;
use tracing::{debug, trace};
use x11rb::connection::Connection;
use x11rb::protocol::randr::{self, ConnectionExt as RandrExt};
use x11rb::protocol::xinput::{ConnectionExt as XInputExt, XIChangePropertyAux};
use x11rb::protocol::xproto::{AtomEnum, ConnectionExt as _, PropMode, Window};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;

use crate::constants::{randr as randr_consts, touch};
use crate::error::{DisplayError, Result};
use crate::server::{
    CrtcConfig, CrtcInfo, DisplayServer, GammaRamp, LegacyScreen, OutputInfo, RandrEvent,
    ScreenResources,
};
use crate::types::{CrtcId, ModeInfo, OutputId, Size};

/// Pre-cached X11 atoms to avoid repeated roundtrips
pub struct CachedAtoms {
    pub edid: u32,
    pub float: u32,
    pub touch_matrix: u32,
    pub device_enabled: u32,
}

impl CachedAtoms {
    pub fn new(conn: &RustConnection) -> anyhow::Result<Self> {
        // Do all intern_atom roundtrips once at startup
        Ok(Self {
            edid: intern(conn, randr_consts::EDID_ATOM)?,
            float: intern(conn, touch::FLOAT_ATOM)?,
            touch_matrix: intern(conn, touch::MATRIX_PROPERTY)?,
            device_enabled: intern(conn, touch::ENABLED_PROPERTY)?,
        })
    }
}

fn intern(conn: &RustConnection, name: &[u8]) -> anyhow::Result<u32> {
    let label = String::from_utf8_lossy(name);
    Ok(conn
        .intern_atom(false, name)
        .context(format!("Failed to intern {} atom", label))?
        .reply()
        .context(format!("Failed to get reply for {} atom", label))?
        .atom)
}

/// Display server reached over an x11rb connection
pub struct X11Server {
    conn: Arc<RustConnection>,
    root: Window,
    atoms: CachedAtoms,
}

impl X11Server {
    pub fn new(conn: Arc<RustConnection>, screen_num: usize) -> anyhow::Result<Self> {
        let root = conn
            .setup()
            .roots
            .get(screen_num)
            .context(format!("Screen {} not present in X11 setup", screen_num))?
            .root;
        let atoms = CachedAtoms::new(&conn)?;
        Ok(Self { conn, root, atoms })
    }

    pub fn connection(&self) -> &Arc<RustConnection> {
        &self.conn
    }

    /// Block until the next RandR notification; other events are skipped
    pub fn wait_for_randr_event(&self) -> Result<RandrEvent> {
        loop {
            let event = self.conn.wait_for_event()?;
            if let Some(ev) = translate_event(&event) {
                return Ok(ev);
            }
            trace!(event = ?event, "ignoring non-randr event");
        }
    }

    fn flush(&self) -> Result<()> {
        self.conn.flush()?;
        Ok(())
    }
}

/// Map an x11rb event onto the notifications the dispatcher handles
pub fn translate_event(event: &Event) -> Option<RandrEvent> {
    match event {
        Event::RandrNotify(ev) => match ev.sub_code {
            randr::Notify::OUTPUT_CHANGE => Some(RandrEvent::OutputChange {
                output: ev.u.as_oc().output,
            }),
            randr::Notify::CRTC_CHANGE => Some(RandrEvent::CrtcChange {
                crtc: ev.u.as_cc().crtc,
            }),
            randr::Notify::OUTPUT_PROPERTY => {
                let op = ev.u.as_op();
                Some(RandrEvent::OutputProperty {
                    output: op.output,
                    atom: op.atom,
                })
            }
            _ => None,
        },
        Event::RandrScreenChangeNotify(ev) => Some(RandrEvent::ScreenChange {
            width: ev.width,
            height: ev.height,
            config_timestamp: ev.config_timestamp,
        }),
        _ => None,
    }
}

/// Vertical refresh of a mode line in Hz
pub fn mode_rate(info: &randr::ModeInfo) -> f64 {
    let mut vtotal = info.vtotal as f64;
    if info.mode_flags.contains(randr::ModeFlag::DOUBLE_SCAN) {
        vtotal *= 2.0;
    }
    if info.mode_flags.contains(randr::ModeFlag::INTERLACE) {
        vtotal /= 2.0;
    }
    if info.htotal == 0 || vtotal == 0.0 {
        return 0.0;
    }
    info.dot_clock as f64 / (info.htotal as f64 * vtotal)
}

/// Convert the wire mode list; names are packed back to back in `names`
pub fn convert_modes(modes: &[randr::ModeInfo], names: &[u8]) -> Vec<ModeInfo> {
    let mut offset = 0usize;
    modes
        .iter()
        .map(|m| {
            let end = (offset + m.name_len as usize).min(names.len());
            let name = String::from_utf8_lossy(&names[offset.min(end)..end]).into_owned();
            offset = end;
            ModeInfo {
                id: m.id,
                name,
                width: m.width,
                height: m.height,
                rate: mode_rate(m),
            }
        })
        .collect()
}

fn status_ok(status: randr::SetConfig) -> bool {
    status == randr::SetConfig::SUCCESS
}

impl DisplayServer for X11Server {
    fn randr_version(&self) -> Result<(u32, u32)> {
        let reply = self
            .conn
            .randr_query_version(randr_consts::WANT_MAJOR, randr_consts::WANT_MINOR)?
            .reply()?;
        Ok((reply.major_version, reply.minor_version))
    }

    fn screen_resources(&self) -> Result<ScreenResources> {
        let reply = self
            .conn
            .randr_get_screen_resources_current(self.root)?
            .reply()
            .map_err(|e| DisplayError::query("screen resources", e))?;
        Ok(ScreenResources {
            config_timestamp: reply.config_timestamp,
            crtcs: reply.crtcs,
            outputs: reply.outputs,
            modes: convert_modes(&reply.modes, &reply.names),
        })
    }

    fn output_info(&self, output: OutputId, config_timestamp: u32) -> Result<OutputInfo> {
        let reply = self
            .conn
            .randr_get_output_info(output, config_timestamp)?
            .reply()
            .map_err(|e| DisplayError::query(format!("output {output}"), e))?;
        if !status_ok(reply.status) {
            return Err(DisplayError::query(
                format!("output {output}"),
                format!("status {}", u8::from(reply.status)),
            ));
        }
        Ok(OutputInfo {
            name: String::from_utf8_lossy(&reply.name).into_owned(),
            connected: reply.connection == randr::Connection::CONNECTED,
            crtc: reply.crtc,
            mm_width: reply.mm_width,
            mm_height: reply.mm_height,
            crtcs: reply.crtcs,
            modes: reply.modes,
            num_preferred: reply.num_preferred,
            clones: reply.clones,
        })
    }

    fn crtc_info(&self, crtc: CrtcId, config_timestamp: u32) -> Result<CrtcInfo> {
        let reply = self
            .conn
            .randr_get_crtc_info(crtc, config_timestamp)?
            .reply()
            .map_err(|e| DisplayError::query(format!("crtc {crtc}"), e))?;
        if !status_ok(reply.status) {
            return Err(DisplayError::query(
                format!("crtc {crtc}"),
                format!("status {}", u8::from(reply.status)),
            ));
        }
        Ok(CrtcInfo {
            x: reply.x,
            y: reply.y,
            width: reply.width,
            height: reply.height,
            mode: reply.mode,
            rotation: u16::from(reply.rotation),
            rotations: u16::from(reply.rotations),
            outputs: reply.outputs,
            possible: reply.possible,
        })
    }

    fn output_edid(&self, output: OutputId) -> Result<Vec<u8>> {
        let reply = self
            .conn
            .randr_get_output_property(output, self.atoms.edid, AtomEnum::INTEGER, 0, 32, false, false)?
            .reply()
            .map_err(|e| DisplayError::query(format!("edid of output {output}"), e))?;
        Ok(reply.data)
    }

    fn screen_size(&self) -> Result<Size> {
        let geom = self.conn.get_geometry(self.root)?.reply()?;
        Ok(Size::new(geom.width, geom.height))
    }

    fn legacy_screen(&self) -> Result<LegacyScreen> {
        let reply = self
            .conn
            .randr_get_screen_info(self.root)?
            .reply()
            .map_err(|e| DisplayError::query("screen info", e))?;
        let size = reply
            .sizes
            .get(reply.size_id as usize)
            .ok_or_else(|| DisplayError::query("screen info", "size id out of range"))?;
        Ok(LegacyScreen {
            width: size.width,
            height: size.height,
            mm_width: size.mwidth as u32,
            mm_height: size.mheight as u32,
            config_timestamp: reply.config_timestamp,
        })
    }

    fn set_crtc_config(&self, config: &CrtcConfig) -> Result<()> {
        debug!(
            crtc = config.crtc,
            x = config.x,
            y = config.y,
            mode = config.mode,
            rotation = config.rotation,
            outputs = ?config.outputs,
            "set crtc config"
        );
        let reply = self
            .conn
            .randr_set_crtc_config(
                config.crtc,
                x11rb::CURRENT_TIME,
                config.config_timestamp,
                config.x,
                config.y,
                config.mode,
                randr::Rotation::from(config.rotation),
                &config.outputs,
            )?
            .reply()?;
        if !status_ok(reply.status) {
            return Err(DisplayError::CrtcApply {
                crtc: config.crtc,
                status: u8::from(reply.status),
            });
        }
        Ok(())
    }

    fn set_screen_size(
        &self,
        width: u16,
        height: u16,
        mm_width: u32,
        mm_height: u32,
    ) -> Result<()> {
        debug!(width, height, mm_width, mm_height, "set screen size");
        self.conn
            .randr_set_screen_size(self.root, width, height, mm_width, mm_height)?
            .check()?;
        Ok(())
    }

    fn set_output_primary(&self, output: OutputId) -> Result<()> {
        self.conn
            .randr_set_output_primary(self.root, output)?
            .check()?;
        Ok(())
    }

    fn output_primary(&self) -> Result<OutputId> {
        Ok(self.conn.randr_get_output_primary(self.root)?.reply()?.output)
    }

    fn grab(&self) -> Result<()> {
        self.conn.grab_server()?;
        self.flush()
    }

    fn ungrab(&self) -> Result<()> {
        self.conn.ungrab_server()?;
        self.flush()
    }

    fn select_input(&self) -> Result<()> {
        let mask = randr::NotifyMask::SCREEN_CHANGE
            | randr::NotifyMask::CRTC_CHANGE
            | randr::NotifyMask::OUTPUT_CHANGE
            | randr::NotifyMask::OUTPUT_PROPERTY;
        self.conn.randr_select_input(self.root, mask)?.check()?;
        Ok(())
    }

    fn crtc_gamma_size(&self, crtc: CrtcId) -> Result<u16> {
        Ok(self.conn.randr_get_crtc_gamma_size(crtc)?.reply()?.size)
    }

    fn set_crtc_gamma(&self, crtc: CrtcId, ramp: &GammaRamp) -> Result<()> {
        self.conn
            .randr_set_crtc_gamma(crtc, &ramp.red, &ramp.green, &ramp.blue)?
            .check()?;
        Ok(())
    }

    fn set_touch_matrix(&self, device: u16, matrix: &[f32; 9]) -> Result<()> {
        let items: Vec<u32> = matrix.iter().map(|v| v.to_bits()).collect();
        self.conn
            .xinput_xi_change_property(
                device,
                PropMode::REPLACE,
                self.atoms.touch_matrix,
                self.atoms.float,
                items.len() as u32,
                &XIChangePropertyAux::Data32(items),
            )?
            .check()?;
        Ok(())
    }

    fn set_touch_enabled(&self, device: u16, enabled: bool) -> Result<()> {
        self.conn
            .xinput_xi_change_property(
                device,
                PropMode::REPLACE,
                self.atoms.device_enabled,
                AtomEnum::INTEGER.into(),
                1,
                &XIChangePropertyAux::Data8(vec![enabled as u8]),
            )?
            .check()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wire_mode(id: u32, w: u16, h: u16, clock: u32, ht: u16, vt: u16, name_len: u16) -> randr::ModeInfo {
        randr::ModeInfo {
            id,
            width: w,
            height: h,
            dot_clock: clock,
            hsync_start: 0,
            hsync_end: 0,
            htotal: ht,
            hskew: 0,
            vsync_start: 0,
            vsync_end: 0,
            vtotal: vt,
            name_len,
            mode_flags: randr::ModeFlag::from(0u32),
        }
    }

    #[test]
    fn test_mode_rate() {
        let m = wire_mode(1, 1920, 1080, 148_500_000, 2200, 1125, 0);
        assert!((mode_rate(&m) - 60.0).abs() < 0.001);
        let zero = wire_mode(2, 1, 1, 100, 0, 0, 0);
        assert_eq!(mode_rate(&zero), 0.0);
    }

    #[test]
    fn test_mode_rate_interlace_doubles() {
        let mut m = wire_mode(1, 1920, 1080, 74_250_000, 2200, 1125, 0);
        m.mode_flags = randr::ModeFlag::INTERLACE;
        assert!((mode_rate(&m) - 60.0).abs() < 0.001);
    }

    #[test]
    fn test_convert_modes_splits_names() {
        let modes = vec![
            wire_mode(70, 1920, 1080, 148_500_000, 2200, 1125, 9),
            wire_mode(71, 1280, 720, 74_250_000, 1650, 750, 8),
        ];
        let out = convert_modes(&modes, b"1920x10801280x720");
        assert_eq!(out[0].name, "1920x1080");
        assert_eq!(out[1].name, "1280x720");
        assert_eq!(out[1].id, 71);
    }
}
