//! Display manager
//!
//! Owns the resource mirror, the monitor registry, the config store and the
//! session settings, and exposes every command and query of the daemon.
//! Commands are expected to arrive one at a time from the dispatcher; queries
//! may run concurrently from the IPC thread and only take short-lived locks.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::apply::{self, ApplyOptions, AppliedOutput};
use crate::brightness::{self, BrightnessJob, BrightnessWorker};
use crate::config::{ConfigPaths, ConfigStore, LoadStatus, MonitorConfig, Settings};
use crate::config::store::set_configs_primary;
use crate::constants::{brightness as brightness_consts, chassis, randr};
use crate::error::{DisplayError, Result};
use crate::layout::{self, LayoutPlan, PrimaryHint};
use crate::mirror::{lock, ResourceMirror};
use crate::monitor::Monitor;
use crate::registry::MonitorRegistry;
use crate::scale;
use crate::server::{DisplayServer, LegacyScreen, OutputInfo};
use crate::touchscreen::{self, Association, Touchscreen, TouchscreenDialog};
use crate::types::{
    ColorTemperatureMode, DisplayMode, ModeId, ModeInfo, OutputId, Rect, Reflect, Rotation, Size,
};

/// Startup knobs for [`Manager::new`]
#[derive(Debug, Clone, Default)]
pub struct ManagerOptions {
    pub paths: ConfigPaths,
    /// Force laptop or desktop behaviour, detected from DMI when `None`
    pub laptop: Option<bool>,
    /// Program asked which output an unmatched touchscreen belongs to
    pub touchscreen_dialog: Option<String>,
}

/// Volatile per-session state
#[derive(Debug, Default)]
pub(crate) struct Session {
    pub primary: String,
    pub primary_rect: Rect,
    pub screen: Size,
    /// Fingerprint the current layout was resolved for
    pub fingerprint: String,
    pub config_timestamp: u32,
    pub mode_changed: bool,
    pub disable_orphans: bool,
    pub legacy: bool,
    /// Touchscreens the dialog was already shown for
    pub prompted: BTreeSet<String>,
}

pub struct Manager {
    server: Arc<dyn DisplayServer>,
    mirror: ResourceMirror,
    registry: MonitorRegistry,
    store: Mutex<ConfigStore>,
    settings: Mutex<Settings>,
    paths: ConfigPaths,
    brightness: BrightnessWorker,
    dialog: TouchscreenDialog,
    touchscreens: Mutex<Vec<Touchscreen>>,
    session: Mutex<Session>,
    apply_lock: Mutex<()>,
}

/// Whether DMI reports a portable chassis
fn is_laptop() -> bool {
    match fs::read_to_string(chassis::CHASSIS_TYPE_PATH) {
        Ok(kind) => chassis::PORTABLE_TYPES.contains(&kind.trim()),
        Err(e) => {
            debug!(error = %e, "chassis type unavailable, assuming desktop");
            false
        }
    }
}

/// Whole-screen monitor standing in for outputs on pre-1.2 servers
fn fallback_monitor(screen: &LegacyScreen) -> Monitor {
    let mode = ModeInfo {
        id: 0,
        name: format!("{}x{}", screen.width, screen.height),
        width: screen.width,
        height: screen.height,
        rate: 0.0,
    };
    let info = OutputInfo {
        name: randr::FALLBACK_NAME.to_string(),
        connected: true,
        mm_width: screen.mm_width,
        mm_height: screen.mm_height,
        ..Default::default()
    };
    let mut monitor = Monitor::new(
        randr::FALLBACK_OUTPUT,
        &info,
        None,
        vec![mode.clone()],
        randr::FALLBACK_NAME.to_string(),
        String::new(),
        String::new(),
    );
    monitor.enabled = true;
    monitor.current_mode = mode;
    monitor.sync_size_to_mode();
    monitor
}

fn persist_error(e: anyhow::Error) -> DisplayError {
    DisplayError::ConfigPersist(format!("{e:#}"))
}

impl Manager {
    /// Read the server inventory and the saved configuration
    ///
    /// Nothing is applied; call [`Manager::start`] afterwards.
    pub fn new(server: Arc<dyn DisplayServer>, options: ManagerOptions) -> Result<Self> {
        let (major, minor) = server.randr_version()?;
        let legacy = (major, minor) < (randr::MIN_MAJOR, randr::MIN_MINOR);
        info!(major = major, minor = minor, legacy = legacy, "RandR version");

        let mirror = ResourceMirror::new();
        let registry = MonitorRegistry::new();
        let mut session = Session {
            legacy,
            ..Default::default()
        };

        if legacy {
            let screen = server.legacy_screen()?;
            session.screen = Size::new(screen.width, screen.height);
            session.config_timestamp = screen.config_timestamp;
            registry.insert(fallback_monitor(&screen));
        } else {
            mirror.refresh_all(server.as_ref())?;
            registry.load_from_mirror(server.as_ref(), &mirror)?;
            session.screen = server.screen_size()?;
            session.config_timestamp = mirror.config_timestamp();

            match server.output_primary() {
                Ok(0) => {}
                Ok(id) => {
                    if let Some(handle) = registry.get(id) {
                        let m = lock(&handle);
                        session.primary = m.name.clone();
                        session.primary_rect = m.rect();
                    }
                }
                Err(e) => warn!(error = %e, "failed to query primary output"),
            }

            let laptop = options.laptop.unwrap_or_else(is_laptop);
            if laptop {
                registry.init_builtin(&options.paths);
            }
        }

        let (store, status) = ConfigStore::load(&options.paths);
        let mut settings = Settings::load(&options.paths);
        if status.needs_fallback() && settings.display_mode == DisplayMode::Custom {
            info!(status = ?status, "no saved layouts, falling back to mirror mode");
            settings.display_mode = DisplayMode::Mirror;
        }
        if let LoadStatus::Migrated { from } = &status
            && let Err(e) = store.save(&options.paths)
        {
            warn!(from = %from, error = %e, "failed to write migrated config store");
        }
        session.fingerprint = registry.fingerprint();

        info!(
            fingerprint = %session.fingerprint,
            mode = %settings.display_mode,
            primary = %session.primary,
            "display manager initialized"
        );

        Ok(Self {
            brightness: BrightnessWorker::spawn(server.clone()),
            server,
            mirror,
            registry,
            store: Mutex::new(store),
            settings: Mutex::new(settings),
            paths: options.paths,
            dialog: TouchscreenDialog::new(options.touchscreen_dialog),
            touchscreens: Mutex::new(Vec::new()),
            session: Mutex::new(session),
            apply_lock: Mutex::new(()),
        })
    }

    /// Subscribe to RandR notifications, then lay out the monitors
    ///
    /// Resources are re-read after subscribing so an output plugged in since
    /// [`Manager::new`] is not missed.
    pub fn start(&self) -> Result<()> {
        self.server.select_input()?;
        if !self.is_legacy() {
            let reloaded = self
                .mirror
                .refresh_all(self.server())
                .and_then(|()| self.registry.load_from_mirror(self.server(), &self.mirror));
            if let Err(e) = reloaded {
                warn!(error = %e, "failed to re-read resources after subscribing");
            }
            self.session().fingerprint = self.registry.fingerprint();
        }
        if let Err(e) = self.apply_display_mode() {
            warn!(error = %e, "failed to apply initial layout");
        }
        Ok(())
    }

    pub(crate) fn server(&self) -> &dyn DisplayServer {
        self.server.as_ref()
    }

    pub(crate) fn mirror(&self) -> &ResourceMirror {
        &self.mirror
    }

    pub(crate) fn registry(&self) -> &MonitorRegistry {
        &self.registry
    }

    pub(crate) fn paths(&self) -> &ConfigPaths {
        &self.paths
    }

    pub(crate) fn session(&self) -> MutexGuard<'_, Session> {
        lock(&self.session)
    }

    fn settings(&self) -> MutexGuard<'_, Settings> {
        lock(&self.settings)
    }

    fn save_settings(&self, settings: &Settings) -> Result<()> {
        settings.save(&self.paths).map_err(persist_error)
    }

    /// Fingerprint of the monitors connected right now
    pub fn fingerprint(&self) -> String {
        self.registry.fingerprint()
    }

    pub(crate) fn primary_name(&self) -> String {
        self.session().primary.clone()
    }

    fn is_legacy(&self) -> bool {
        self.session().legacy
    }

    // ---- commit path ----

    /// Push a plan into the registry and commit it
    fn commit(&self, plan: &LayoutPlan) -> Result<()> {
        let _guard = lock(&self.apply_lock);
        for (id, target) in &plan.targets {
            self.registry
                .with_monitor(*id, |m| m.apply_placement(target.as_ref()));
        }
        self.commit_locked(plan.primary)
    }

    /// Commit the registry as it stands; the caller holds `apply_lock`
    fn commit_locked(&self, primary: Option<OutputId>) -> Result<()> {
        let options = {
            let s = self.session();
            ApplyOptions {
                mode_changed: s.mode_changed,
                disable_orphans: s.disable_orphans,
            }
        };
        let applied = match apply::apply(self.server(), &self.mirror, &self.registry, options) {
            Ok(applied) => applied,
            Err(e) => {
                warn!(error = %e, "apply failed, resyncing from server");
                self.resync();
                return Err(e);
            }
        };

        let screen = apply::screen_size(&self.registry.snapshot());
        {
            let mut s = self.session();
            s.mode_changed = false;
            s.disable_orphans = false;
            s.screen = Size::new(screen.width, screen.height);
        }
        self.submit_brightness(&applied);
        if let Some(id) = primary {
            self.set_output_primary(id)?;
        }
        Ok(())
    }

    /// Throw away desired state that never reached the hardware
    fn resync(&self) {
        if let Err(e) = self.mirror.refresh_all(self.server()) {
            warn!(error = %e, "failed to refresh resources");
            return;
        }
        if let Err(e) = self.registry.load_from_mirror(self.server(), &self.mirror) {
            warn!(error = %e, "failed to reload monitors");
        }
    }

    fn submit_brightness(&self, applied: &[AppliedOutput]) {
        let mut settings = self.settings();
        let temperature = brightness::effective_temperature(
            settings.color_temperature_mode,
            settings.color_temperature_manual,
        );
        for out in applied {
            let value = *settings
                .brightness
                .entry(out.name.clone())
                .or_insert(brightness_consts::DEFAULT);
            self.registry.with_monitor(out.output, |m| m.brightness = value);
            self.brightness.submit(BrightnessJob {
                output: out.name.clone(),
                crtc: out.crtc,
                brightness: value,
                temperature,
            });
        }
    }

    /// Make `id` the primary output
    pub(crate) fn set_output_primary(&self, id: OutputId) -> Result<()> {
        let info = self
            .mirror
            .output(id)
            .ok_or_else(|| DisplayError::InvalidMode(format!("output {id} is unknown to the server")))?;
        self.server.set_output_primary(id)?;
        let rect = self
            .registry
            .get(id)
            .map(|h| lock(&h).rect())
            .unwrap_or_default();
        let mut s = self.session();
        s.primary = info.name.clone();
        s.primary_rect = rect;
        debug!(output = id, name = %info.name, "primary output set");
        Ok(())
    }

    /// Re-read the primary output from the server
    pub fn update_primary(&self) {
        let id = match self.server.output_primary() {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "failed to query primary output");
                return;
            }
        };
        let found = (id != 0)
            .then(|| self.registry.get(id))
            .flatten()
            .map(|h| {
                let m = lock(&h);
                (m.name.clone(), m.rect())
            });
        let mut s = self.session();
        match found {
            Some((name, rect)) => {
                s.primary = name;
                s.primary_rect = rect;
            }
            None => {
                s.primary.clear();
                s.primary_rect = Rect::default();
            }
        }
    }

    // ---- layout policies ----

    /// Resolve and apply the layout for the connected monitor set
    pub fn apply_display_mode(&self) -> Result<()> {
        if self.is_legacy() {
            debug!("legacy server, layout left to the X server");
            return Ok(());
        }
        let connected = self.registry.connected();
        match connected.as_slice() {
            [] => {
                warn!("no monitor connected, nothing to apply");
                return Ok(());
            }
            [only] => return self.apply_single(only),
            _ => {}
        }

        let (mode, custom) = {
            let s = self.settings();
            (s.display_mode, s.current_custom_id.clone())
        };
        debug!(mode = %mode, custom = %custom, "applying display mode");
        match mode {
            DisplayMode::Custom => self.switch_mode_custom(&custom),
            DisplayMode::Mirror => self.switch_mode_mirror(),
            DisplayMode::Extend => self.switch_mode_extend(),
            DisplayMode::OnlyOne => self.switch_mode_only_one(None),
            DisplayMode::Unknown => Err(DisplayError::InvalidRequest(
                "display mode is unknown".to_string(),
            )),
        }
    }

    fn apply_single(&self, monitor: &Monitor) -> Result<()> {
        let fingerprint = self.fingerprint();
        let saved = lock(&self.store)
            .screen_config(&fingerprint)
            .and_then(|s| s.single.clone());
        let cfg = layout::single_config(monitor, saved.as_ref());
        info!(output = %monitor.name, width = cfg.width, height = cfg.height, "single monitor layout");

        let current = self.primary_name();
        let hint = PrimaryHint {
            builtin: self.registry.builtin(),
            current: &current,
        };
        let plan = layout::plan_from_configs(&self.registry.snapshot(), &[cfg], hint);
        self.commit(&plan)
    }

    fn saved_configs(&self, mode: DisplayMode, custom: &str) -> Vec<MonitorConfig> {
        lock(&self.store).get_monitor_configs(&self.fingerprint(), mode, custom)
    }

    fn switch_mode_mirror(&self) -> Result<()> {
        let configs = self.saved_configs(DisplayMode::Mirror, "");
        let current = self.primary_name();
        let hint = PrimaryHint {
            builtin: self.registry.builtin(),
            current: &current,
        };
        let plan = layout::plan_mirror(&self.registry.snapshot(), &configs, hint)?;
        self.commit(&plan)?;
        if plan.save {
            self.store_layout(DisplayMode::Mirror, "")?;
        }
        Ok(())
    }

    fn switch_mode_extend(&self) -> Result<()> {
        let configs = self.saved_configs(DisplayMode::Extend, "");
        let current = self.primary_name();
        let hint = PrimaryHint {
            builtin: self.registry.builtin(),
            current: &current,
        };
        let plan = layout::plan_extend(&self.registry.snapshot(), &configs, hint);
        self.commit(&plan)?;
        if plan.save {
            self.store_layout(DisplayMode::Extend, "")?;
        }
        Ok(())
    }

    fn switch_mode_only_one(&self, name: Option<&str>) -> Result<()> {
        let configs = self.saved_configs(DisplayMode::OnlyOne, "");
        let plan = layout::plan_only_one(&self.registry.snapshot(), &configs, name)?;
        self.commit(&plan)?;
        if plan.save {
            self.store_layout(DisplayMode::OnlyOne, "")?;
        }
        Ok(())
    }

    /// Apply a named profile, synthesizing it from mirror on first use
    fn switch_mode_custom(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(DisplayError::InvalidRequest(
                "custom profile name is empty".to_string(),
            ));
        }
        let fingerprint = self.fingerprint();
        let existing = lock(&self.store)
            .screen_config(&fingerprint)
            .and_then(|s| s.custom(name).cloned());

        let current = self.primary_name();
        let hint = PrimaryHint {
            builtin: self.registry.builtin(),
            current: &current,
        };
        match existing {
            Some(profile) if profile.monitors.is_empty() => {
                Err(DisplayError::EmptyCustomProfile(name.to_string()))
            }
            Some(profile) => {
                let plan =
                    layout::plan_from_configs(&self.registry.snapshot(), &profile.monitors, hint);
                self.commit(&plan)
            }
            None => {
                info!(profile = %name, "creating custom profile from mirror layout");
                let mirror_configs = self.saved_configs(DisplayMode::Mirror, "");
                let plan = layout::plan_mirror(&self.registry.snapshot(), &mirror_configs, hint)?;
                self.commit(&plan)?;
                self.store_layout(DisplayMode::Custom, name)
            }
        }
    }

    /// Switch policy and remember it
    ///
    /// `name` selects the custom profile, or the target for only-one.
    pub fn switch_mode(&self, mode: DisplayMode, name: &str) -> Result<()> {
        if self.is_legacy() {
            debug!(mode = %mode, "legacy server, ignoring mode switch");
            return Ok(());
        }
        info!(mode = %mode, name = %name, "switching display mode");
        self.session().mode_changed = true;
        let result = match mode {
            DisplayMode::Custom => self.switch_mode_custom(name),
            DisplayMode::Mirror => self.switch_mode_mirror(),
            DisplayMode::Extend => self.switch_mode_extend(),
            DisplayMode::OnlyOne => {
                self.switch_mode_only_one(Some(name).filter(|n| !n.is_empty()))
            }
            DisplayMode::Unknown => Err(DisplayError::InvalidRequest(
                "cannot switch to the unknown mode".to_string(),
            )),
        };
        if let Err(e) = result {
            self.session().mode_changed = false;
            return Err(e);
        }

        let mut settings = self.settings();
        settings.display_mode = mode;
        if mode == DisplayMode::Custom {
            settings.current_custom_id = name.to_string();
        }
        self.save_settings(&settings)
    }

    /// Designate `name` primary and remember it for the current policy
    pub fn set_primary(&self, name: &str) -> Result<()> {
        let (mode, custom) = {
            let s = self.settings();
            (s.display_mode, s.current_custom_id.clone())
        };
        match mode {
            DisplayMode::Mirror => Err(DisplayError::InvalidRequest(
                "primary cannot be changed in mirror mode".to_string(),
            )),
            DisplayMode::OnlyOne => self.switch_mode_only_one(Some(name)),
            DisplayMode::Extend | DisplayMode::Custom => {
                let (id, uuid) = self
                    .registry
                    .by_name(name)
                    .map(|h| {
                        let m = lock(&h);
                        (m.id, m.uuid.clone(), m.connected)
                    })
                    .filter(|(_, _, connected)| *connected)
                    .map(|(id, uuid, _)| (id, uuid))
                    .ok_or_else(|| DisplayError::MonitorNotFound(name.to_string()))?;

                let fingerprint = self.fingerprint();
                let mut configs = self.saved_configs(mode, &custom);
                if configs.is_empty() {
                    if mode == DisplayMode::Custom {
                        return Err(DisplayError::EmptyCustomProfile(custom));
                    }
                    configs = layout::to_monitor_configs(&self.registry.connected(), name);
                } else {
                    let monitors = self.registry.snapshot();
                    for cfg in configs.iter_mut() {
                        if let Some(m) = monitors.iter().find(|m| m.uuid == cfg.uuid) {
                            cfg.name = m.name.clone();
                        }
                    }
                    set_configs_primary(&mut configs, &uuid);
                }

                self.set_output_primary(id)?;
                let mut store = lock(&self.store);
                store
                    .get_screen_config(&fingerprint)
                    .set_monitor_configs(mode, &custom, configs);
                store.save(&self.paths)
            }
            DisplayMode::Unknown => Err(DisplayError::InvalidRequest(
                "display mode is unknown".to_string(),
            )),
        }
    }

    // ---- pending changes ----

    /// Snapshot the live layout under `mode`, or the single slot
    fn store_layout(&self, mode: DisplayMode, custom: &str) -> Result<()> {
        let fingerprint = self.fingerprint();
        if fingerprint.is_empty() {
            return Err(DisplayError::NoOutputConnected);
        }
        let connected = self.registry.connected();
        let primary = self.primary_name();
        let (temperature_mode, temperature_manual) = {
            let s = self.settings();
            (s.color_temperature_mode, s.color_temperature_manual)
        };

        let mut store = lock(&self.store);
        let screen = store.get_screen_config(&fingerprint);
        if let [only] = connected.as_slice() {
            screen.set_single(only.to_config(true), temperature_mode, temperature_manual);
        } else {
            screen.set_mode_configs(
                mode,
                custom,
                temperature_mode,
                temperature_manual,
                layout::to_monitor_configs(&connected, &primary),
            );
        }
        store.save(&self.paths)
    }

    /// Persist the live layout for the active policy and clear pending edits
    pub fn save(&self) -> Result<()> {
        let (mode, custom) = {
            let s = self.settings();
            (s.display_mode, s.current_custom_id.clone())
        };
        if mode == DisplayMode::Custom
            && custom.is_empty()
            && self.registry.connected_count() > 1
        {
            return Err(DisplayError::InvalidRequest(
                "no custom profile is active".to_string(),
            ));
        }
        self.store_layout(mode, &custom)?;
        self.mark_clean();
        info!(mode = %mode, custom = %custom, "layout saved");
        Ok(())
    }

    /// Forget every pending edit without touching the hardware
    pub fn mark_clean(&self) {
        self.registry.for_each(|m| m.backup = None);
    }

    pub fn has_changed(&self) -> bool {
        self.registry.snapshot().iter().any(Monitor::has_changed)
    }

    fn edit(&self, output: &str, f: impl FnOnce(&mut Monitor) -> Result<()>) -> Result<()> {
        let handle = self
            .registry
            .by_name(output)
            .ok_or_else(|| DisplayError::MonitorNotFound(output.to_string()))?;
        let mut monitor = lock(&handle);
        if !monitor.connected {
            return Err(DisplayError::MonitorNotFound(output.to_string()));
        }
        f(&mut monitor)
    }

    pub fn set_monitor_mode(&self, output: &str, mode: ModeId) -> Result<()> {
        self.edit(output, |m| {
            let info = m
                .modes
                .iter()
                .find(|x| x.id == mode)
                .cloned()
                .ok_or_else(|| {
                    DisplayError::InvalidRequest(format!("mode {mode} not supported by {}", m.name))
                })?;
            m.set_mode(info);
            Ok(())
        })
    }

    pub fn set_monitor_position(&self, output: &str, x: i16, y: i16) -> Result<()> {
        self.edit(output, |m| {
            m.set_position(x, y);
            Ok(())
        })
    }

    pub fn set_monitor_rotation(&self, output: &str, rotation: Rotation) -> Result<()> {
        self.edit(output, |m| {
            if !m.rotations.contains(&rotation) {
                return Err(DisplayError::InvalidRequest(format!(
                    "{} cannot rotate to {rotation:?}",
                    m.name
                )));
            }
            m.set_rotation(rotation);
            Ok(())
        })
    }

    pub fn set_monitor_reflect(&self, output: &str, reflect: Reflect) -> Result<()> {
        self.edit(output, |m| {
            if !m.reflects.contains(&reflect) {
                return Err(DisplayError::InvalidRequest(format!(
                    "{} cannot reflect {reflect:?}",
                    m.name
                )));
            }
            m.set_reflect(reflect);
            Ok(())
        })
    }

    pub fn enable_monitor(&self, output: &str, enabled: bool) -> Result<()> {
        self.edit(output, |m| {
            m.enable(enabled);
            if enabled && m.current_mode.is_empty() {
                let best = m.best_mode();
                m.set_mode(best);
            }
            Ok(())
        })
    }

    /// Primary to keep after an edit: the current one if still lit
    fn lit_primary(&self) -> Option<OutputId> {
        let current = self.primary_name();
        let lit: Vec<Monitor> = self
            .registry
            .connected()
            .into_iter()
            .filter(|m| m.enabled)
            .collect();
        lit.iter()
            .find(|m| m.name == current)
            .map(|m| m.id)
            .or_else(|| {
                let hint = PrimaryHint {
                    builtin: self.registry.builtin(),
                    current: &current,
                };
                layout::default_primary(&lit, hint)
            })
    }

    /// Commit pending edits; they stay revertible until saved
    pub fn apply_changes(&self) -> Result<()> {
        let _guard = lock(&self.apply_lock);
        let primary = self.lit_primary();
        self.commit_locked(primary)
    }

    /// Restore the values captured before the first edit and commit them
    pub fn reset_changes(&self) -> Result<()> {
        if !self.has_changed() {
            return Ok(());
        }
        let _guard = lock(&self.apply_lock);
        self.registry.for_each(Monitor::reset_changes);
        let primary = self.lit_primary();
        self.commit_locked(primary)
    }

    // ---- brightness and colour temperature ----

    fn lit_crtc(&self, output: &str) -> Result<Option<u32>> {
        let handle = self
            .registry
            .by_name(output)
            .ok_or_else(|| DisplayError::MonitorNotFound(output.to_string()))?;
        let m = lock(&handle);
        if !m.connected {
            return Err(DisplayError::MonitorNotFound(output.to_string()));
        }
        Ok((m.enabled && m.crtc != 0).then_some(m.crtc))
    }

    /// Change brightness for this session only
    pub fn set_brightness(&self, output: &str, value: f64) -> Result<()> {
        let value = brightness::validate(value)?;
        let crtc = self.lit_crtc(output)?;
        let temperature = {
            let mut settings = self.settings();
            settings.brightness.insert(output.to_string(), value);
            brightness::effective_temperature(
                settings.color_temperature_mode,
                settings.color_temperature_manual,
            )
        };
        if let Some(handle) = self.registry.by_name(output) {
            lock(&handle).brightness = value;
        }
        if let Some(crtc) = crtc {
            self.brightness.submit(BrightnessJob {
                output: output.to_string(),
                crtc,
                brightness: value,
                temperature,
            });
        }
        Ok(())
    }

    pub fn set_and_save_brightness(&self, output: &str, value: f64) -> Result<()> {
        self.set_brightness(output, value)?;
        self.save_brightness()
    }

    pub fn save_brightness(&self) -> Result<()> {
        let settings = self.settings();
        self.save_settings(&settings)
    }

    /// Re-send every stored brightness to the hardware
    pub fn refresh_brightness(&self) {
        let applied: Vec<AppliedOutput> = self
            .registry
            .connected()
            .into_iter()
            .filter(|m| m.enabled && m.crtc != 0)
            .map(|m| AppliedOutput {
                output: m.id,
                name: m.name,
                crtc: m.crtc,
            })
            .collect();
        self.submit_brightness(&applied);
    }

    pub fn brightness_map(&self) -> BTreeMap<String, f64> {
        self.settings().brightness.clone()
    }

    pub fn color_temperature(&self) -> (ColorTemperatureMode, i32) {
        let s = self.settings();
        (s.color_temperature_mode, s.color_temperature_manual)
    }

    pub fn set_color_temperature_mode(&self, mode: ColorTemperatureMode) -> Result<()> {
        {
            let mut settings = self.settings();
            settings.color_temperature_mode = mode;
            self.save_settings(&settings)?;
        }
        info!(mode = ?mode, "colour temperature mode changed");
        self.refresh_brightness();
        Ok(())
    }

    /// Manual white point; only accepted in manual mode
    pub fn set_color_temperature(&self, kelvin: i32) -> Result<()> {
        {
            let mut settings = self.settings();
            if settings.color_temperature_mode != ColorTemperatureMode::Manual {
                return Err(DisplayError::InvalidRequest(
                    "colour temperature can only be set in manual mode".to_string(),
                ));
            }
            if !(brightness_consts::MIN_TEMPERATURE..=brightness_consts::MAX_TEMPERATURE)
                .contains(&kelvin)
            {
                return Err(DisplayError::InvalidRequest(format!(
                    "colour temperature {kelvin} outside {}..={}",
                    brightness_consts::MIN_TEMPERATURE,
                    brightness_consts::MAX_TEMPERATURE
                )));
            }
            settings.color_temperature_manual = kelvin;
            self.save_settings(&settings)?;
        }
        self.refresh_brightness();
        Ok(())
    }

    // ---- custom profiles and fill modes ----

    pub fn rename_custom(&self, old: &str, new: &str) -> Result<()> {
        if old.is_empty() || new.is_empty() {
            return Err(DisplayError::InvalidRequest(
                "custom profile name is empty".to_string(),
            ));
        }
        let fingerprint = self.fingerprint();
        if fingerprint.is_empty() {
            return Err(DisplayError::NoOutputConnected);
        }
        {
            let mut store = lock(&self.store);
            let screen = store
                .screens
                .get_mut(&fingerprint)
                .filter(|s| s.custom(old).is_some())
                .ok_or_else(|| DisplayError::ProfileNotFound(old.to_string()))?;
            if old == new {
                return Ok(());
            }
            screen.rename_custom(old, new)?;
            store.save(&self.paths)?;
        }

        let mut settings = self.settings();
        if settings.current_custom_id == old {
            settings.current_custom_id = new.to_string();
            self.save_settings(&settings)?;
        }
        info!(old = %old, new = %new, "custom profile renamed");
        Ok(())
    }

    /// Remove a profile; the active one is refused
    pub fn delete_custom(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(DisplayError::InvalidRequest(
                "custom profile name is empty".to_string(),
            ));
        }
        let fingerprint = self.fingerprint();
        if fingerprint.is_empty() {
            return Err(DisplayError::NoOutputConnected);
        }
        let (mode, current) = {
            let s = self.settings();
            (s.display_mode, s.current_custom_id.clone())
        };
        if mode == DisplayMode::Custom && current == name {
            return Err(DisplayError::ProfileInUse(name.to_string()));
        }

        {
            let mut store = lock(&self.store);
            let removed = store
                .screens
                .get_mut(&fingerprint)
                .is_some_and(|s| s.delete_custom(name));
            if !removed {
                warn!(profile = %name, "custom profile not found, nothing to delete");
                return Ok(());
            }
            store.save(&self.paths)?;
        }

        if current == name {
            let mut settings = self.settings();
            settings.current_custom_id.clear();
            self.save_settings(&settings)?;
        }
        info!(profile = %name, "custom profile deleted");
        Ok(())
    }

    pub fn custom_id_list(&self) -> Vec<String> {
        lock(&self.store)
            .screen_config(&self.fingerprint())
            .map(|s| s.custom_names())
            .unwrap_or_default()
    }

    pub fn set_fill_mode(&self, output: &str, mode: &str) -> Result<()> {
        let fingerprint = self.fingerprint();
        if fingerprint.is_empty() {
            return Err(DisplayError::NoOutputConnected);
        }
        if self.registry.by_name(output).is_none() {
            return Err(DisplayError::MonitorNotFound(output.to_string()));
        }
        if mode.is_empty() {
            return Err(DisplayError::InvalidRequest("fill mode is empty".to_string()));
        }
        let mut store = lock(&self.store);
        store.set_fill_mode(&fingerprint, output, mode);
        store.save(&self.paths)
    }

    pub fn fill_mode(&self, output: &str) -> Option<String> {
        lock(&self.store)
            .fill_mode(&self.fingerprint(), output)
            .map(str::to_string)
    }

    // ---- touchscreens ----

    pub fn register_touchscreen(&self, touch: Touchscreen) {
        info!(id = touch.id, uuid = %touch.uuid, name = %touch.name, "touchscreen registered");
        {
            let mut list = lock(&self.touchscreens);
            list.retain(|t| t.uuid != touch.uuid);
            list.push(touch);
        }
        self.map_touchscreens();
    }

    pub fn unregister_touchscreen(&self, uuid: &str) {
        let removed = {
            let mut list = lock(&self.touchscreens);
            let before = list.len();
            list.retain(|t| t.uuid != uuid);
            list.len() != before
        };
        if removed {
            info!(uuid = %uuid, "touchscreen unregistered");
            self.session().prompted.remove(uuid);
        } else {
            debug!(uuid = %uuid, "unregistering unknown touchscreen");
        }
    }

    pub fn touchscreens(&self) -> Vec<Touchscreen> {
        lock(&self.touchscreens).clone()
    }

    /// Pin a touchscreen to an output and remember the choice
    pub fn associate_touchscreen(&self, uuid: &str, output: &str) -> Result<()> {
        if !lock(&self.touchscreens).iter().any(|t| t.uuid == uuid) {
            return Err(DisplayError::InvalidRequest(format!(
                "touchscreen {uuid} is not registered"
            )));
        }
        if !self.registry.connected().iter().any(|m| m.name == output) {
            return Err(DisplayError::MonitorNotFound(output.to_string()));
        }
        {
            let mut settings = self.settings();
            settings
                .touch_map
                .insert(uuid.to_string(), output.to_string());
            self.save_settings(&settings)?;
        }
        self.map_touchscreens();
        Ok(())
    }

    /// Resolve and write the mapping of every registered touchscreen
    pub fn map_touchscreens(&self) {
        let touches = self.touchscreens();
        if touches.is_empty() || self.is_legacy() {
            return;
        }
        let connected = self.registry.connected();
        let builtin = self.registry.builtin();
        let (primary, screen) = {
            let s = self.session();
            (s.primary.clone(), s.screen)
        };

        let saved_map = self.settings().touch_map.clone();
        let mut forget = Vec::new();
        let mut remember = Vec::new();
        let mut work = Vec::new();
        for touch in &touches {
            let saved = saved_map.get(&touch.uuid).map(String::as_str);
            let assoc = touchscreen::resolve(touch, saved, &connected, builtin, &primary);
            debug!(uuid = %touch.uuid, association = ?assoc, "touchscreen resolved");

            if saved.is_some() && !matches!(assoc, Association::Saved(_)) {
                forget.push(touch.uuid.clone());
            }
            let target = assoc
                .output()
                .and_then(|id| connected.iter().find(|m| m.id == id));
            if assoc.remember()
                && let Some(m) = target
            {
                remember.push((touch.uuid.clone(), m.name.clone()));
            }
            let prompt = matches!(assoc, Association::Fallback(_))
                && self.session().prompted.insert(touch.uuid.clone());
            work.push((touch, target, prompt));
        }

        if !forget.is_empty() || !remember.is_empty() {
            let mut settings = self.settings();
            for uuid in &forget {
                settings.touch_map.remove(uuid);
            }
            settings.touch_map.extend(remember);
            if let Err(e) = self.save_settings(&settings) {
                warn!(error = %e, "failed to save touchscreen map");
            }
        }

        for (touch, target, prompt) in work {
            if prompt {
                self.dialog.show(&touch.serial);
            }
            if let Some(m) = target
                && let Err(e) = touchscreen::apply_mapping(self.server(), touch.id, m, screen)
            {
                warn!(uuid = %touch.uuid, output = %m.name, error = %e, "failed to map touchscreen");
            }
        }
    }

    // ---- queries ----

    pub fn monitors(&self) -> Vec<Monitor> {
        self.registry.snapshot()
    }

    pub fn list_output_names(&self) -> Vec<String> {
        self.registry.connected().into_iter().map(|m| m.name).collect()
    }

    pub fn list_common_modes(&self) -> Vec<Size> {
        layout::common_sizes(&self.registry.connected())
    }

    pub fn display_mode(&self) -> DisplayMode {
        self.settings().display_mode
    }

    pub fn real_display_mode(&self) -> DisplayMode {
        layout::real_display_mode(&self.registry.connected())
    }

    pub fn current_custom_id(&self) -> String {
        self.settings().current_custom_id.clone()
    }

    pub fn builtin(&self) -> Option<String> {
        let id = self.registry.builtin()?;
        self.registry.get(id).map(|h| lock(&h).name.clone())
    }

    pub fn primary(&self) -> (String, Rect) {
        let s = self.session();
        (s.primary.clone(), s.primary_rect)
    }

    pub fn screen_size(&self) -> Size {
        self.session().screen
    }

    pub fn recommended_scale_factor(&self) -> f64 {
        scale::recommended(&self.registry.connected())
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> ConfigStore {
        lock(&self.store).clone()
    }

    #[cfg(test)]
    pub(crate) fn flush_brightness(&self) {
        self.brightness.flush();
    }
}
