#![forbid(unsafe_code)]
//! Resource coordinator for Creator Studio
//!
//! Owns the settings document and the long-lived device handles (camera,
//! robot, vision, object catalog) and drives their startup and shutdown.

pub mod config;
pub mod constants;
pub mod environment;
pub mod global;
pub mod objects;
pub mod robot;
pub mod types;
pub mod video;
pub mod vision;
pub mod worker;

#[cfg(test)]
mod testing;

pub use config::SettingsStore;
pub use environment::{Environment, Lifecycle, ShutdownReport};
pub use types::{DeviceId, DeviceState};
