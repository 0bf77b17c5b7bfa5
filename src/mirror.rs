//! In-memory mirror of the server's output, crtc and mode inventory
//!
//! Each table has its own lock. Refresh methods replace one record at a time
//! and never notify anyone; on failure the previous record is kept.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

use crate::error::Result;
use crate::server::{CrtcInfo, DisplayServer, OutputInfo};
use crate::types::{CrtcId, ModeId, ModeInfo, OutputId};

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct ResourceMirror {
    outputs: Mutex<BTreeMap<OutputId, OutputInfo>>,
    crtcs: Mutex<BTreeMap<CrtcId, CrtcInfo>>,
    modes: Mutex<Vec<ModeInfo>>,
    config_timestamp: Mutex<u32>,
}

impl ResourceMirror {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config_timestamp(&self) -> u32 {
        *lock(&self.config_timestamp)
    }

    /// Re-read the resource lists and replace every cached record
    ///
    /// Ids missing from the fresh lists are dropped. Individual output or crtc failures are logged and the stale record is
    /// kept; only a failure of the resource query itself is returned.
    pub fn refresh_all(&self, server: &dyn DisplayServer) -> Result<()> {
        let res = server.screen_resources()?;
        *lock(&self.config_timestamp) = res.config_timestamp;
        *lock(&self.modes) = res.modes;
        lock(&self.outputs).retain(|id, _| res.outputs.contains(id));
        lock(&self.crtcs).retain(|id, _| res.crtcs.contains(id));

        for output in &res.outputs {
            if let Err(e) = self.refresh_output(server, *output) {
                warn!(output = output, error = %e, "keeping stale output info");
            }
        }
        for crtc in &res.crtcs {
            if let Err(e) = self.refresh_crtc(server, *crtc) {
                warn!(crtc = crtc, error = %e, "keeping stale crtc info");
            }
        }
        debug!(
            outputs = res.outputs.len(),
            crtcs = res.crtcs.len(),
            timestamp = res.config_timestamp,
            "resource mirror refreshed"
        );
        Ok(())
    }

    pub fn refresh_all_outputs(&self, server: &dyn DisplayServer) -> Result<()> {
        let ids: Vec<OutputId> = lock(&self.outputs).keys().copied().collect();
        for id in ids {
            if let Err(e) = self.refresh_output(server, id) {
                warn!(output = id, error = %e, "keeping stale output info");
            }
        }
        Ok(())
    }

    pub fn refresh_all_crtcs(&self, server: &dyn DisplayServer) -> Result<()> {
        let ids: Vec<CrtcId> = lock(&self.crtcs).keys().copied().collect();
        for id in ids {
            if let Err(e) = self.refresh_crtc(server, id) {
                warn!(crtc = id, error = %e, "keeping stale crtc info");
            }
        }
        Ok(())
    }

    pub fn refresh_output(&self, server: &dyn DisplayServer, id: OutputId) -> Result<OutputInfo> {
        let info = server.output_info(id, self.config_timestamp())?;
        lock(&self.outputs).insert(id, info.clone());
        Ok(info)
    }

    pub fn refresh_crtc(&self, server: &dyn DisplayServer, id: CrtcId) -> Result<CrtcInfo> {
        let info = server.crtc_info(id, self.config_timestamp())?;
        lock(&self.crtcs).insert(id, info.clone());
        Ok(info)
    }

    /// Re-read only the mode table and timestamp
    pub fn refresh_modes(&self, server: &dyn DisplayServer) -> Result<()> {
        let res = server.screen_resources()?;
        *lock(&self.config_timestamp) = res.config_timestamp;
        *lock(&self.modes) = res.modes;
        Ok(())
    }

    pub fn output(&self, id: OutputId) -> Option<OutputInfo> {
        lock(&self.outputs).get(&id).cloned()
    }

    pub fn crtc(&self, id: CrtcId) -> Option<CrtcInfo> {
        lock(&self.crtcs).get(&id).cloned()
    }

    pub fn outputs(&self) -> BTreeMap<OutputId, OutputInfo> {
        lock(&self.outputs).clone()
    }

    pub fn crtcs(&self) -> BTreeMap<CrtcId, CrtcInfo> {
        lock(&self.crtcs).clone()
    }

    pub fn mode(&self, id: ModeId) -> Option<ModeInfo> {
        lock(&self.modes).iter().find(|m| m.id == id).cloned()
    }

    pub fn modes_of(&self, ids: &[ModeId]) -> Vec<ModeInfo> {
        let table = lock(&self.modes);
        ids.iter()
            .filter_map(|id| table.iter().find(|m| m.id == *id).cloned())
            .collect()
    }

    pub fn contains_output(&self, id: OutputId) -> bool {
        lock(&self.outputs).contains_key(&id)
    }

    /// Crtc currently listing `output` among its driven outputs
    pub fn crtc_driving(&self, output: OutputId) -> Option<CrtcId> {
        lock(&self.crtcs)
            .iter()
            .find(|(_, info)| info.outputs.contains(&output))
            .map(|(id, _)| *id)
    }
}
