//! Application-wide constants
//!
//! This module contains the magic numbers and string literals used throughout
//! the daemon, providing a single source of truth for constant values.

/// RandR protocol constants
pub mod randr {
    /// Oldest RandR version with per-output crtc addressing
    pub const MIN_MAJOR: u32 = 1;
    pub const MIN_MINOR: u32 = 2;

    /// Version requested from the server during startup
    pub const WANT_MAJOR: u32 = 1;
    pub const WANT_MINOR: u32 = 5;

    /// Output property holding the raw EDID block
    pub const EDID_ATOM: &[u8] = b"EDID";

    /// Handle used for the synthetic monitor on servers older than 1.2
    pub const FALLBACK_OUTPUT: u32 = 1;

    /// Name used for the synthetic monitor on servers older than 1.2
    pub const FALLBACK_NAME: &str = "Default";
}

/// Screen geometry constants
pub mod screen {
    /// Pixels per millimetre assumed when the physical size is unknown (96 DPI)
    pub const ASSUMED_PX_PER_MM: f64 = 3.792;
}

/// Mode list filtering
pub mod modes {
    /// Refresh rates closer than this are treated as duplicates (Hz)
    pub const RATE_EPSILON: f64 = 0.005;

    /// Modes narrower than this are not offered
    pub const MIN_WIDTH: u16 = 1024;

    /// Modes shorter than this are not offered
    pub const MIN_HEIGHT: u16 = 720;
}

/// Fingerprint and profile naming
pub mod fingerprint {
    /// Separator between sorted monitor UUIDs
    pub const DELIMITER: &str = ",";
}

/// EDID layout used for identification
pub mod edid {
    /// Bytes hashed into the monitor UUID
    pub const BLOCK_LEN: usize = 128;

    /// Minimum length for manufacturer decoding
    pub const HEADER_LEN: usize = 16;

    /// Manufacturer reported when the EDID is missing or malformed
    pub const UNKNOWN_MANUFACTURER: &str = "DEFAULT";
}

/// Brightness and colour temperature ranges
pub mod brightness {
    pub const MIN: f64 = 0.0;
    pub const MAX: f64 = 1.0;
    pub const DEFAULT: f64 = 1.0;

    /// Manual colour temperature bounds (Kelvin)
    pub const MIN_TEMPERATURE: i32 = 1000;
    pub const MAX_TEMPERATURE: i32 = 25000;

    /// Neutral white point, no tint applied
    pub const NEUTRAL_TEMPERATURE: i32 = 6500;
}

/// Recommended scale factor computation
pub mod scale {
    pub const MIN: f64 = 1.0;
    pub const MAX: f64 = 3.0;
    pub const STEP: f64 = 0.25;

    /// Reference panel: 1920x1080 at 477x268 mm
    pub const REF_WIDTH_PX: f64 = 1920.0;
    pub const REF_HEIGHT_PX: f64 = 1080.0;
    pub const REF_WIDTH_MM: f64 = 477.0;
    pub const REF_HEIGHT_MM: f64 = 268.0;

    /// Empirical correction for large panels
    pub const SIZE_CORRECTION: f64 = 0.00158;
}

/// Touchscreen mapping
pub mod touch {
    /// xinput property receiving the 3x3 matrix
    pub const MATRIX_PROPERTY: &[u8] = b"Coordinate Transformation Matrix";

    /// xinput property toggling the device
    pub const ENABLED_PROPERTY: &[u8] = b"Device Enabled";

    /// Property type atom for the matrix values
    pub const FLOAT_ATOM: &[u8] = b"FLOAT";
}

/// Persistent file locations
pub mod config {
    /// Application config directory name
    pub const APP_DIR: &str = "randr-layoutd";

    /// Config store data file
    pub const DATA_FILE: &str = "display.json";

    /// Schema version marker file
    pub const VERSION_FILE: &str = "config.version";

    /// Plain-text builtin monitor name
    pub const BUILTIN_FILE: &str = "builtin-monitor";

    /// Scalar preferences
    pub const SETTINGS_FILE: &str = "settings.json";

    /// Schema version written by this build
    pub const CURRENT_VERSION: &str = "6.0";
}

/// IPC socket locations and limits
pub mod ipc {
    /// Socket file under the runtime directory
    pub const SOCKET_PATH: &str = "randr-layoutd/display.sock";

    /// Maximum message size (1 MiB)
    pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;
}

/// Chassis detection
pub mod chassis {
    /// DMI chassis type file
    pub const CHASSIS_TYPE_PATH: &str = "/sys/class/dmi/id/chassis_type";

    /// SMBIOS chassis types that carry an internal panel
    pub const PORTABLE_TYPES: &[&str] = &["8", "9", "10", "14", "30", "31", "32"];
}
