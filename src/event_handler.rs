//! Serialized handling of hardware events and forwarded IPC commands

use std::sync::mpsc::{Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::ipc::{DisplayRequest, DisplayResponse};
use crate::ipc_handler;
use crate::manager::Manager;
use crate::mirror::lock;
use crate::server::RandrEvent;
use crate::types::{CrtcId, OutputId, Size};

/// Work for the dispatcher thread, handled strictly in order
pub enum Job {
    Event(RandrEvent),
    Command(DisplayRequest, Sender<DisplayResponse>),
    Shutdown,
}

/// Consume jobs until shutdown or until every sender is gone
pub fn run_dispatcher(manager: &Manager, jobs: Receiver<Job>) {
    info!("dispatcher started");
    for job in jobs {
        match job {
            Job::Event(event) => {
                if let Err(e) = handle_event(manager, event) {
                    error!(error = %e, "failed to handle display event");
                }
            }
            Job::Command(request, reply) => {
                let response = ipc_handler::respond(manager, request);
                if reply.send(response).is_err() {
                    debug!("IPC client went away before the reply");
                }
            }
            Job::Shutdown => {
                info!("dispatcher shutting down");
                break;
            }
        }
    }
}

pub fn handle_event(manager: &Manager, event: RandrEvent) -> Result<()> {
    match event {
        RandrEvent::OutputChange { output } => output_changed(manager, output),
        // EDID may have been rewritten, which changes the monitor identity
        RandrEvent::OutputProperty { output, atom } => {
            debug!(output = output, atom = atom, "output property changed");
            output_changed(manager, output)
        }
        RandrEvent::CrtcChange { crtc } => crtc_changed(manager, crtc),
        RandrEvent::ScreenChange {
            width,
            height,
            config_timestamp,
        } => screen_changed(manager, width, height, config_timestamp),
    }
}

fn output_changed(manager: &Manager, id: OutputId) -> Result<()> {
    if manager.session().legacy {
        return Ok(());
    }
    let server = manager.server();
    let mirror = manager.mirror();
    let registry = manager.registry();

    let before = registry.connected_count();
    let info = match mirror.refresh_output(server, id) {
        Ok(info) => info,
        Err(e) => {
            warn!(output = id, error = %e, "failed to refresh output");
            return Ok(());
        }
    };
    if info.modes.iter().any(|m| mirror.mode(*m).is_none())
        && let Err(e) = mirror.refresh_modes(server)
    {
        warn!(output = id, error = %e, "failed to refresh mode table");
    }

    let was_connected = registry
        .get(id)
        .map(|h| lock(&h).connected)
        .unwrap_or(false);
    if was_connected && !info.connected && manager.primary_name() == info.name {
        let next = registry.connected().into_iter().find(|m| m.id != id);
        if let Some(next) = next {
            info!(old = %info.name, new = %next.name, "primary output unplugged");
            if let Err(e) = manager.set_output_primary(next.id) {
                warn!(output = next.id, error = %e, "failed to move primary output");
            }
        }
    }

    registry.update_monitor(server, mirror, id, &info);
    if !info.connected {
        registry.on_disconnected(id, manager.paths());
    }

    let after = registry.connected_count();
    debug!(output = id, connected = info.connected, before = before, after = after, "output changed");
    if after < before && after >= 1 {
        manager.session().disable_orphans = true;
    }

    let fingerprint = registry.fingerprint();
    let previous = manager.session().fingerprint.clone();
    if fingerprint != previous && !fingerprint.is_empty() {
        info!(old = %previous, new = %fingerprint, "monitor set changed");
        manager.mark_clean();
        if let Err(e) = manager.apply_display_mode() {
            warn!(error = %e, "failed to apply layout for new monitor set");
        }
        manager.session().fingerprint = fingerprint;
    }
    Ok(())
}

fn crtc_changed(manager: &Manager, crtc: CrtcId) -> Result<()> {
    let server = manager.server();
    let mirror = manager.mirror();
    let info = match mirror.refresh_crtc(server, crtc) {
        Ok(info) => info,
        Err(e) => {
            warn!(crtc = crtc, error = %e, "failed to refresh crtc");
            return Ok(());
        }
    };
    let Some(output) = mirror
        .outputs()
        .into_iter()
        .find(|(_, o)| o.crtc == crtc)
        .map(|(id, _)| id)
    else {
        debug!(crtc = crtc, "crtc drives no known output");
        return Ok(());
    };

    let mode = mirror.mode(info.mode).unwrap_or_default();
    let updated = manager.registry().with_monitor(output, |m| {
        m.update_geometry(&info, mode);
        (m.name.clone(), m.rect())
    });
    if let Some((name, rect)) = updated {
        let mut session = manager.session();
        if session.primary == name {
            session.primary_rect = rect;
        }
    }
    Ok(())
}

fn screen_changed(manager: &Manager, width: u16, height: u16, config_timestamp: u32) -> Result<()> {
    let (legacy, advanced) = {
        let mut session = manager.session();
        session.screen = Size::new(width, height);
        let advanced = config_timestamp > session.config_timestamp;
        if advanced {
            session.config_timestamp = config_timestamp;
        }
        (session.legacy, advanced)
    };
    debug!(width = width, height = height, timestamp = config_timestamp, "screen changed");

    if advanced {
        if legacy {
            let screen = manager.server().legacy_screen()?;
            manager.registry().with_monitor(crate::constants::randr::FALLBACK_OUTPUT, |m| {
                m.current_mode.width = screen.width;
                m.current_mode.height = screen.height;
                m.mm_width = screen.mm_width;
                m.mm_height = screen.mm_height;
                m.sync_size_to_mode();
            });
        } else if let Err(e) = manager.mirror().refresh_modes(manager.server()) {
            warn!(error = %e, "failed to refresh mode table");
        }
    }

    if !legacy {
        manager.update_primary();
        manager.map_touchscreens();
    }
    Ok(())
}
