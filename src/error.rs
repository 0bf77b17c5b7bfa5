//! Error taxonomy for the layout engine
//!
//! Hardware query failures on best-effort paths are logged and swallowed by
//! the caller; everything else propagates to whoever issued the command.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type Result<T, E = DisplayError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum DisplayError {
    /// A query against the display server failed or reported a bad status
    #[error("failed to query {resource}: {reason}")]
    ResourceQuery { resource: String, reason: String },

    /// No unbound crtc can drive this output
    #[error("no free crtc for output {output}")]
    NoFreeCrtc { output: u32 },

    /// The server rejected a crtc configuration
    #[error("failed to configure crtc {crtc}: status {status}")]
    CrtcApply { crtc: u32, status: u8 },

    /// Mirror requested but the connected monitors share no mode size
    #[error("connected monitors have no common mode size")]
    NoCommonMode,

    /// Named monitor is absent or disconnected
    #[error("monitor {0:?} not found or not connected")]
    MonitorNotFound(String),

    /// Custom profile exists but holds no monitor configs
    #[error("custom profile {0:?} is empty")]
    EmptyCustomProfile(String),

    /// Referenced output is not present in the resource mirror
    #[error("invalid mode: {0}")]
    InvalidMode(String),

    /// Writing the config store failed
    #[error("failed to persist configuration: {0}")]
    ConfigPersist(String),

    /// On-disk record could not be read or migrated
    #[error("failed to migrate configuration: {0}")]
    SchemaMigration(String),

    #[error("custom profile {0:?} is in use")]
    ProfileInUse(String),

    #[error("custom profile {0:?} not found")]
    ProfileNotFound(String),

    #[error("custom profile {0:?} already exists")]
    DuplicateProfile(String),

    #[error("no output connected")]
    NoOutputConnected,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Transport level failure talking to the display server
    #[error("display server protocol error: {0}")]
    Protocol(String),
}

/// Machine readable failure reason carried over IPC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureReason {
    ResourceQuery,
    NoFreeCrtc,
    CrtcApply,
    NoCommonMode,
    MonitorNotFound,
    EmptyCustomProfile,
    InvalidMode,
    ConfigPersist,
    SchemaMigration,
    ProfileInUse,
    ProfileNotFound,
    DuplicateProfile,
    NoOutputConnected,
    InvalidRequest,
    Protocol,
}

impl DisplayError {
    pub fn reason(&self) -> FailureReason {
        match self {
            DisplayError::ResourceQuery { .. } => FailureReason::ResourceQuery,
            DisplayError::NoFreeCrtc { .. } => FailureReason::NoFreeCrtc,
            DisplayError::CrtcApply { .. } => FailureReason::CrtcApply,
            DisplayError::NoCommonMode => FailureReason::NoCommonMode,
            DisplayError::MonitorNotFound(_) => FailureReason::MonitorNotFound,
            DisplayError::EmptyCustomProfile(_) => FailureReason::EmptyCustomProfile,
            DisplayError::InvalidMode(_) => FailureReason::InvalidMode,
            DisplayError::ConfigPersist(_) => FailureReason::ConfigPersist,
            DisplayError::SchemaMigration(_) => FailureReason::SchemaMigration,
            DisplayError::ProfileInUse(_) => FailureReason::ProfileInUse,
            DisplayError::ProfileNotFound(_) => FailureReason::ProfileNotFound,
            DisplayError::DuplicateProfile(_) => FailureReason::DuplicateProfile,
            DisplayError::NoOutputConnected => FailureReason::NoOutputConnected,
            DisplayError::InvalidRequest(_) => FailureReason::InvalidRequest,
            DisplayError::Protocol(_) => FailureReason::Protocol,
        }
    }

    pub(crate) fn query(resource: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        DisplayError::ResourceQuery {
            resource: resource.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<x11rb::errors::ConnectionError> for DisplayError {
    fn from(e: x11rb::errors::ConnectionError) -> Self {
        DisplayError::Protocol(e.to_string())
    }
}

impl From<x11rb::errors::ReplyError> for DisplayError {
    fn from(e: x11rb::errors::ReplyError) -> Self {
        DisplayError::Protocol(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_matches_variant() {
        assert_eq!(DisplayError::NoCommonMode.reason(), FailureReason::NoCommonMode);
        assert_eq!(
            DisplayError::CrtcApply { crtc: 63, status: 2 }.reason(),
            FailureReason::CrtcApply
        );
        assert_eq!(
            DisplayError::ProfileInUse("work".into()).reason(),
            FailureReason::ProfileInUse
        );
    }

    #[test]
    fn test_crtc_apply_message_carries_status() {
        let err = DisplayError::CrtcApply { crtc: 63, status: 3 };
        assert_eq!(err.to_string(), "failed to configure crtc 63: status 3");
    }
}
