//! Monitor entity registry
//!
//! The map lock is only held to look up or insert; individual monitors have
//! their own lock, taken after the map lock is released.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::config::ConfigPaths;
use crate::constants::fingerprint::DELIMITER;
use crate::edid::{output_uuid, parse_edid};
use crate::error::Result;
use crate::mirror::{lock, ResourceMirror};
use crate::monitor::Monitor;
use crate::server::{DisplayServer, OutputInfo};
use crate::types::OutputId;

pub type MonitorHandle = Arc<Mutex<Monitor>>;

/// Builtin panel choice on laptops
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuiltinState {
    pub monitor: Option<OutputId>,
    /// Provisional candidates while the choice is ambiguous
    pub candidates: Vec<OutputId>,
}

#[derive(Default)]
pub struct MonitorRegistry {
    monitors: Mutex<BTreeMap<OutputId, MonitorHandle>>,
    builtin: Mutex<BuiltinState>,
}

/// Sorted connected UUIDs joined by the delimiter
pub fn fingerprint<'a>(uuids: impl IntoIterator<Item = &'a str>) -> String {
    let mut ids: Vec<&str> = uuids.into_iter().collect();
    ids.sort_unstable();
    ids.join(DELIMITER)
}

/// Identity read from the output's EDID property
fn identify(server: &dyn DisplayServer, id: OutputId, name: &str) -> (String, String, String) {
    let edid = server.output_edid(id).unwrap_or_else(|e| {
        warn!(output = id, error = %e, "failed to read EDID");
        Vec::new()
    });
    let (manufacturer, model) = parse_edid(&edid);
    (output_uuid(name, &edid), manufacturer, model)
}

impl MonitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: OutputId) -> Option<MonitorHandle> {
        lock(&self.monitors).get(&id).cloned()
    }

    pub fn contains(&self, id: OutputId) -> bool {
        lock(&self.monitors).contains_key(&id)
    }

    fn handles(&self) -> Vec<MonitorHandle> {
        lock(&self.monitors).values().cloned().collect()
    }

    /// Create a monitor if none exists for `id`; no-op otherwise
    pub fn add_monitor(
        &self,
        server: &dyn DisplayServer,
        mirror: &ResourceMirror,
        id: OutputId,
        info: &OutputInfo,
    ) -> MonitorHandle {
        if let Some(existing) = self.get(id) {
            return existing;
        }

        let crtc = if info.crtc != 0 {
            mirror.crtc(info.crtc).or_else(|| {
                mirror
                    .refresh_crtc(server, info.crtc)
                    .inspect_err(|e| warn!(crtc = info.crtc, error = %e, "failed to query crtc"))
                    .ok()
            })
        } else {
            None
        };
        let (uuid, manufacturer, model) = if info.connected {
            identify(server, id, &info.name)
        } else {
            (info.name.clone(), String::new(), String::new())
        };
        let monitor = Monitor::new(
            id,
            info,
            crtc.as_ref(),
            mirror.modes_of(&info.modes),
            uuid,
            manufacturer,
            model,
        );
        debug!(output = id, name = %monitor.name, uuid = %monitor.uuid, "adding monitor");

        lock(&self.monitors)
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(monitor)))
            .clone()
    }

    /// Refresh an existing monitor, or add it
    pub fn update_monitor(
        &self,
        server: &dyn DisplayServer,
        mirror: &ResourceMirror,
        id: OutputId,
        info: &OutputInfo,
    ) -> MonitorHandle {
        let Some(handle) = self.get(id) else {
            return self.add_monitor(server, mirror, id, info);
        };

        let crtc = if info.crtc != 0 {
            mirror.crtc(info.crtc).or_else(|| mirror.refresh_crtc(server, info.crtc).ok())
        } else {
            None
        };
        let identity = info.connected.then(|| identify(server, id, &info.name));
        let modes = mirror.modes_of(&info.modes);

        let mut monitor = lock(&handle);
        if let Some((uuid, manufacturer, model)) = identity {
            if monitor.uuid != uuid {
                info!(output = id, old = %monitor.uuid, new = %uuid, "monitor identity changed");
            }
            monitor.uuid = uuid;
            monitor.manufacturer = manufacturer;
            monitor.model = model;
        }
        monitor.update(info, crtc.as_ref(), modes);
        drop(monitor);
        handle
    }

    /// Insert a fully built monitor, replacing any previous entry
    pub fn insert(&self, monitor: Monitor) -> MonitorHandle {
        let id = monitor.id;
        let handle = Arc::new(Mutex::new(monitor));
        lock(&self.monitors).insert(id, handle.clone());
        handle
    }

    /// Clones of every monitor, ascending id
    pub fn snapshot(&self) -> Vec<Monitor> {
        self.handles().iter().map(|h| lock(h).clone()).collect()
    }

    /// Clones of the connected monitors, ascending id
    pub fn connected(&self) -> Vec<Monitor> {
        self.snapshot().into_iter().filter(|m| m.connected).collect()
    }

    pub fn connected_count(&self) -> usize {
        self.handles().iter().filter(|h| lock(h).connected).count()
    }

    pub fn by_name(&self, name: &str) -> Option<MonitorHandle> {
        self.handles().into_iter().find(|h| lock(h).name == name)
    }

    pub fn fingerprint(&self) -> String {
        let connected = self.connected();
        fingerprint(connected.iter().map(|m| m.uuid.as_str()))
    }

    pub fn builtin(&self) -> Option<OutputId> {
        lock(&self.builtin).monitor
    }

    pub fn builtin_state(&self) -> BuiltinState {
        lock(&self.builtin).clone()
    }

    /// Pick the internal panel among the connected monitors
    ///
    /// A saved name that is still connected wins. Otherwise `edp*` outputs are
    /// taken outright, `vga*` outputs are skipped, and any other single
    /// candidate is chosen. With several candidates the lowest id is used
    /// provisionally and nothing is saved.
    pub fn init_builtin(&self, paths: &ConfigPaths) {
        let connected = self.connected();
        let mut state = lock(&self.builtin);

        if let Some(saved) = paths.load_builtin()
            && let Some(m) = connected.iter().find(|m| m.name == saved)
        {
            state.monitor = Some(m.id);
            state.candidates.clear();
            info!(output = m.id, name = %m.name, "builtin monitor restored");
            return;
        }

        let mut rest: Vec<&Monitor> = Vec::new();
        for m in &connected {
            let name = m.name.to_lowercase();
            if name.starts_with("vga") {
                continue;
            }
            if name.starts_with("edp") {
                rest = vec![m];
                break;
            }
            rest.push(m);
        }

        let mut save_name = String::new();
        match rest.as_slice() {
            [] => {
                state.monitor = None;
                state.candidates.clear();
            }
            [only] => {
                state.monitor = Some(only.id);
                state.candidates.clear();
                save_name = only.name.clone();
            }
            many => {
                state.monitor = many.iter().map(|m| m.id).min();
                state.candidates = many.iter().map(|m| m.id).collect();
            }
        }
        info!(builtin = ?state.monitor, candidates = ?state.candidates, "builtin monitor detected");
        drop(state);

        if let Err(e) = paths.save_builtin(&save_name) {
            warn!(error = %e, "failed to save builtin monitor config");
        }
    }

    /// Narrow the candidate list when a candidate goes away
    pub fn on_disconnected(&self, id: OutputId, paths: &ConfigPaths) {
        let mut state = lock(&self.builtin);
        if state.candidates.len() < 2 {
            return;
        }
        state.candidates.retain(|c| *c != id);
        if let [only] = state.candidates.as_slice() {
            let only = *only;
            state.monitor = Some(only);
            state.candidates.clear();
            drop(state);

            let name = self.get(only).map(|h| lock(&h).name.clone());
            info!(output = only, name = ?name, "builtin monitor promoted");
            if let Some(name) = name
                && let Err(e) = paths.save_builtin(&name)
            {
                warn!(error = %e, "failed to save builtin monitor config");
            }
        }
    }

    /// Apply a closure to one monitor under its lock
    pub fn with_monitor<R>(&self, id: OutputId, f: impl FnOnce(&mut Monitor) -> R) -> Option<R> {
        let handle = self.get(id)?;
        let mut monitor = lock(&handle);
        Some(f(&mut monitor))
    }

    /// Apply a closure to every monitor, ascending id
    pub fn for_each(&self, mut f: impl FnMut(&mut Monitor)) {
        for handle in self.handles() {
            f(&mut lock(&handle));
        }
    }

    /// Populate from the mirror; failures of single outputs are logged
    pub fn load_from_mirror(&self, server: &dyn DisplayServer, mirror: &ResourceMirror) -> Result<()> {
        for (id, info) in mirror.outputs() {
            self.update_monitor(server, mirror, id, &info);
        }
        Ok(())
    }
}
