//! Application-wide constants
//!
//! This module contains the file names, timings and limits used throughout
//! the application, providing a single source of truth for constant values.

use std::time::Duration;

/// Settings file and catalog locations
pub mod config {
    /// Directory under the platform config/data dir
    pub const APP_DIR: &str = "creator-studio";

    /// Settings document file name
    pub const FILENAME: &str = "settings.json";

    /// Catalog directory under the app data dir
    pub const OBJECTS_DIR: &str = "objects";

    /// Extension used for the staging file during a settings write
    pub const STAGING_EXTENSION: &str = "tmp";

    /// Indentation for the settings document (diff-friendly, stable)
    pub const INDENT: &[u8] = b"   ";
}

/// Shutdown behavior
pub mod shutdown {
    use super::Duration;

    /// How long `close()` waits for each background loop before detaching it
    pub const JOIN_TIMEOUT: Duration = Duration::from_secs(3);
}

/// Capture source (camera) constants
pub mod capture {
    use super::Duration;

    /// Numeric camera ids map to this device node prefix
    pub const DEVICE_PATH_PREFIX: &str = "/dev/video";

    /// Bytes requested per raw frame read (640x480 YUYV)
    pub const FRAME_BUFFER_BYTES: usize = 640 * 480 * 2;

    /// Pause between failed reads
    pub const RETRY_DELAY: Duration = Duration::from_millis(33);

    /// Consecutive read failures before the acquisition loop gives up
    pub const MAX_CONSECUTIVE_FAILURES: u32 = 30;
}

/// Hardware channel (robot serial port) constants
pub mod serial {
    use super::Duration;

    /// Numeric robot ids map to this tty prefix
    pub const DEVICE_PATH_PREFIX: &str = "/dev/ttyACM";

    /// How often the communication loop checks its exit flag while idle
    pub const POLL_INTERVAL: Duration = Duration::from_millis(50);

    /// Line terminator for robot commands
    pub const LINE_ENDING: &str = "\n";
}

/// Thread names, visible in debuggers and `top -H`
pub mod threads {
    pub const ACQUISITION: &str = "capture-acquisition";
    pub const COMMUNICATION: &str = "robot-communication";
}
