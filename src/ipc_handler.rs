//! IPC listener for session tools

use anyhow::{Context, Result};
use std::sync::mpsc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::event_handler::Job;
use crate::ipc::{DisplayRequest, DisplayResponse, DisplaySocket, MonitorView, SessionPeer};
use crate::manager::Manager;

/// Spawn IPC listener thread; clients are served one at a time
pub fn spawn_ipc_listener(
    socket: DisplaySocket,
    manager: Arc<Manager>,
    jobs: mpsc::Sender<Job>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        if let Err(e) = run_ipc_loop(&socket, &manager, &jobs) {
            error!(error = ?e, "IPC listener thread crashed");
        }
    })
}

fn run_ipc_loop(socket: &DisplaySocket, manager: &Manager, jobs: &mpsc::Sender<Job>) -> Result<()> {
    info!(socket = ?socket.path(), "IPC listener started");

    loop {
        let mut client = socket
            .accept()
            .context("Failed to accept IPC connection")?;
        debug!("IPC client connected");

        if serve_client(&mut client, manager, jobs)? {
            info!("IPC listener stopping");
            return Ok(());
        }
        debug!("IPC client disconnected");
    }
}

/// Handle requests until the client hangs up; true once shutdown was requested
fn serve_client(
    client: &mut SessionPeer,
    manager: &Manager,
    jobs: &mpsc::Sender<Job>,
) -> Result<bool> {
    loop {
        let request = match client.recv() {
            Ok(Some(req)) => req,
            Ok(None) => return Ok(false),
            Err(e) => {
                warn!(error = ?e, "dropping IPC client after a bad frame");
                return Ok(false);
            }
        };

        if let DisplayRequest::Shutdown = request {
            info!("Received shutdown request via IPC");
            client.send(&DisplayResponse::Ok).ok();
            jobs.send(Job::Shutdown).ok();
            return Ok(true);
        }

        let response = if request.is_query() {
            respond(manager, request)
        } else {
            let (reply_tx, reply_rx) = mpsc::channel();
            if jobs.send(Job::Command(request, reply_tx)).is_err() {
                warn!("Dispatcher is gone, dropping IPC command");
                return Ok(true);
            }
            reply_rx
                .recv()
                .context("Dispatcher dropped the reply channel")?
        };
        if let Err(e) = client.send(&response) {
            debug!(error = ?e, "IPC client left before the reply");
            return Ok(false);
        }
    }
}

/// Run one request against the manager
pub fn respond(manager: &Manager, request: DisplayRequest) -> DisplayResponse {
    debug!(request = ?request, "handling IPC request");
    match request {
        DisplayRequest::Ping => DisplayResponse::Pong,

        DisplayRequest::GetMonitors => DisplayResponse::Monitors(
            manager.monitors().iter().map(MonitorView::from).collect(),
        ),
        DisplayRequest::ListOutputNames => DisplayResponse::Names(manager.list_output_names()),
        DisplayRequest::ListCommonModes => DisplayResponse::Sizes(manager.list_common_modes()),
        DisplayRequest::GetDisplayMode => DisplayResponse::Mode(manager.display_mode()),
        DisplayRequest::GetRealDisplayMode => DisplayResponse::Mode(manager.real_display_mode()),
        DisplayRequest::GetCurrentCustomId => {
            let id = manager.current_custom_id();
            DisplayResponse::Name((!id.is_empty()).then_some(id))
        }
        DisplayRequest::GetCustomIdList => DisplayResponse::Names(manager.custom_id_list()),
        DisplayRequest::GetPrimary => {
            let (name, rect) = manager.primary();
            DisplayResponse::Primary { name, rect }
        }
        DisplayRequest::GetBuiltin => DisplayResponse::Name(manager.builtin()),
        DisplayRequest::GetBrightness => DisplayResponse::Brightness(manager.brightness_map()),
        DisplayRequest::GetColorTemperature => {
            let (mode, manual) = manager.color_temperature();
            DisplayResponse::ColorTemperature { mode, manual }
        }
        DisplayRequest::GetScaleFactor => {
            DisplayResponse::ScaleFactor(manager.recommended_scale_factor())
        }
        DisplayRequest::GetScreenSize => DisplayResponse::ScreenSize(manager.screen_size()),
        DisplayRequest::GetFillMode { output } => DisplayResponse::Name(manager.fill_mode(&output)),
        DisplayRequest::GetTouchscreens => DisplayResponse::Touchscreens(manager.touchscreens()),
        DisplayRequest::HasChanged => DisplayResponse::Flag(manager.has_changed()),

        DisplayRequest::ApplyDisplayMode => manager.apply_display_mode().into(),
        DisplayRequest::SwitchMode { mode, name } => manager.switch_mode(mode, &name).into(),
        DisplayRequest::SetPrimary { name } => manager.set_primary(&name).into(),
        DisplayRequest::SetMonitorMode { output, mode } => {
            manager.set_monitor_mode(&output, mode).into()
        }
        DisplayRequest::SetMonitorPosition { output, x, y } => {
            manager.set_monitor_position(&output, x, y).into()
        }
        DisplayRequest::SetMonitorRotation { output, rotation } => {
            manager.set_monitor_rotation(&output, rotation).into()
        }
        DisplayRequest::SetMonitorReflect { output, reflect } => {
            manager.set_monitor_reflect(&output, reflect).into()
        }
        DisplayRequest::EnableMonitor { output, enabled } => {
            manager.enable_monitor(&output, enabled).into()
        }
        DisplayRequest::ApplyChanges => manager.apply_changes().into(),
        DisplayRequest::ResetChanges => manager.reset_changes().into(),
        DisplayRequest::Save => manager.save().into(),
        DisplayRequest::SetBrightness { output, value } => {
            manager.set_brightness(&output, value).into()
        }
        DisplayRequest::SetAndSaveBrightness { output, value } => {
            manager.set_and_save_brightness(&output, value).into()
        }
        DisplayRequest::SaveBrightness => manager.save_brightness().into(),
        DisplayRequest::RefreshBrightness => {
            manager.refresh_brightness();
            DisplayResponse::Ok
        }
        DisplayRequest::SetColorTemperatureMode { mode } => {
            manager.set_color_temperature_mode(mode).into()
        }
        DisplayRequest::SetColorTemperature { value } => {
            manager.set_color_temperature(value).into()
        }
        DisplayRequest::RenameCustom { old, new } => manager.rename_custom(&old, &new).into(),
        DisplayRequest::DeleteCustom { name } => manager.delete_custom(&name).into(),
        DisplayRequest::SetFillMode { output, mode } => {
            manager.set_fill_mode(&output, &mode).into()
        }
        DisplayRequest::RegisterTouchscreen(touch) => {
            manager.register_touchscreen(touch);
            DisplayResponse::Ok
        }
        DisplayRequest::UnregisterTouchscreen { uuid } => {
            manager.unregister_touchscreen(&uuid);
            DisplayResponse::Ok
        }
        DisplayRequest::AssociateTouchscreen { uuid, output } => {
            manager.associate_touchscreen(&uuid, &output).into()
        }

        // Listener handles this before forwarding
        DisplayRequest::Shutdown => DisplayResponse::Ok,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FailureReason;
    use crate::ipc::DisplayClient;
    use crate::manager::tests::start;
    use crate::testing::FakeServer;
    use crate::types::DisplayMode;

    fn two_outputs() -> FakeServer {
        FakeServer::builder()
            .output(65, "DP-1", &[(1920, 1080, 60.0)])
            .output(66, "HDMI-1", &[(1920, 1080, 60.0), (1280, 720, 60.0)])
            .crtcs(&[63, 64])
            .build()
    }

    #[test]
    fn test_queries() {
        let (_fake, manager, _dir) = start(two_outputs());
        manager.apply_display_mode().unwrap();

        assert!(matches!(respond(&manager, DisplayRequest::Ping), DisplayResponse::Pong));
        match respond(&manager, DisplayRequest::ListOutputNames) {
            DisplayResponse::Names(names) => assert_eq!(names.len(), 2),
            other => panic!("unexpected response: {other:?}"),
        }
        match respond(&manager, DisplayRequest::GetMonitors) {
            DisplayResponse::Monitors(views) => {
                assert!(views.iter().all(|v| v.connected && v.enabled));
            }
            other => panic!("unexpected response: {other:?}"),
        }
        assert!(matches!(
            respond(&manager, DisplayRequest::GetDisplayMode),
            DisplayResponse::Mode(DisplayMode::Extend)
        ));
        assert!(matches!(
            respond(&manager, DisplayRequest::GetCurrentCustomId),
            DisplayResponse::Name(None)
        ));
        assert!(matches!(
            respond(&manager, DisplayRequest::HasChanged),
            DisplayResponse::Flag(false)
        ));
    }

    #[test]
    fn test_command_errors_carry_reason() {
        let (_fake, manager, _dir) = start(two_outputs());
        manager.apply_display_mode().unwrap();

        match respond(&manager, DisplayRequest::SetPrimary { name: "VGA-9".into() }) {
            DisplayResponse::Error { reason, message } => {
                assert_eq!(reason, FailureReason::MonitorNotFound);
                assert!(message.contains("VGA-9"));
            }
            other => panic!("unexpected response: {other:?}"),
        }
        assert!(matches!(
            respond(&manager, DisplayRequest::SetPrimary { name: "HDMI-1".into() }),
            DisplayResponse::Ok
        ));
    }

    #[test]
    fn test_listener_forwards_commands() {
        let (_fake, manager, dir) = start(two_outputs());
        let manager = Arc::new(manager);
        let path = dir.path().join("display.sock");
        let socket = DisplaySocket::bind_to(path.clone()).unwrap();

        let (jobs_tx, jobs_rx) = mpsc::channel();
        let listener = spawn_ipc_listener(socket, manager.clone(), jobs_tx);

        let dispatcher = {
            let manager = manager.clone();
            std::thread::spawn(move || crate::event_handler::run_dispatcher(&manager, jobs_rx))
        };

        let mut client = DisplayClient::connect_to(&path).unwrap();
        let resp = client
            .request(DisplayRequest::SwitchMode {
                mode: DisplayMode::Mirror,
                name: String::new(),
            })
            .unwrap();
        assert!(matches!(resp, DisplayResponse::Ok));
        assert!(matches!(
            client.request(DisplayRequest::GetDisplayMode).unwrap(),
            DisplayResponse::Mode(DisplayMode::Mirror)
        ));

        assert!(matches!(
            client.request(DisplayRequest::Shutdown).unwrap(),
            DisplayResponse::Ok
        ));
        listener.join().unwrap();
        dispatcher.join().unwrap();
    }
}
