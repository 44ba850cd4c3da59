//! Process-wide state shared by the resource handles
//!
//! Must be initialized before any handle is constructed.

use std::sync::OnceLock;
use std::time::{Duration, Instant};
use tracing::debug;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Fix the process epoch; later calls are no-ops
pub fn init() {
    let mut first = false;
    EPOCH.get_or_init(|| {
        first = true;
        Instant::now()
    });
    if first {
        debug!("Initialized process epoch");
    }
}

/// Time since [`init`], used to timestamp captured frames
pub fn elapsed() -> Duration {
    EPOCH.get_or_init(Instant::now).elapsed()
}
