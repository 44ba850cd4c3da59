//! Process-wide owner of the long-lived resources
//!
//! Holds the settings store, the capture source, the robot, the vision
//! subsystem and the object catalog, and handles their startup and
//! shutdown.
//!
//! Create exactly one at process entry and pass it (or the handles it owns)
//! down by parameter. Components that receive it should pull out what they
//! need rather than keep the `Environment` itself. Script interpreters are
//! not owned here; each caller creates its own.

use anyhow::{Result, ensure};
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::schema::{CAMERA_ID, ROBOT_ID};
use crate::config::{Document, SettingsStore};
use crate::constants::shutdown;
use crate::global;
use crate::objects::ObjectManager;
use crate::robot::{self, Robot, SerialBackend};
use crate::video::{CameraBackend, DeviceFileBackend, VideoStream};
use crate::vision::Vision;

/// Coordinator lifecycle
///
/// Accessors and settings changes are meant for `Ready`. There is no way
/// back from `Closed`; build a new `Environment` instead. `Uninitialized`
/// and `Constructing` only exist inside [`Environment::with_backends`], so
/// a built environment starts at `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Constructing,
    Ready,
    ShuttingDown,
    Closed,
}

/// A handle that may run background work and can be told to stop
pub trait Stoppable {
    fn label(&self) -> &'static str;

    /// Request a stop and wait up to `timeout` for it to take effect
    fn stop(&mut self, timeout: Duration) -> Result<()>;
}

impl Stoppable for Robot {
    fn label(&self) -> &'static str {
        "robot"
    }

    fn stop(&mut self, timeout: Duration) -> Result<()> {
        self.set_exiting(true);
        self.wait_for_exit(timeout)
    }
}

impl Stoppable for Vision {
    fn label(&self) -> &'static str {
        "vision"
    }

    fn stop(&mut self, _timeout: Duration) -> Result<()> {
        self.set_exiting(true);
        Ok(())
    }
}

impl Stoppable for VideoStream {
    fn label(&self) -> &'static str {
        "video stream"
    }

    fn stop(&mut self, timeout: Duration) -> Result<()> {
        self.end_thread(timeout)
    }
}

/// Outcome of one handle's stop request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownStep {
    pub handle: &'static str,
    pub error: Option<String>,
}

/// Per-handle results of [`Environment::close`], in stop order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub steps: Vec<ShutdownStep>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(|s| s.error.is_none())
    }

    pub fn failures(&self) -> impl Iterator<Item = &ShutdownStep> {
        self.steps.iter().filter(|s| s.error.is_some())
    }
}

/// Stop each handle in order; a failure never skips the handles after it
pub fn shutdown_in_order(handles: &mut [&mut dyn Stoppable], timeout: Duration) -> ShutdownReport {
    let mut report = ShutdownReport::default();
    for handle in handles.iter_mut() {
        let label = handle.label();
        let error = match handle.stop(timeout) {
            Ok(()) => {
                info!(handle = label, "Stopped");
                None
            }
            Err(e) => {
                let message = format!("{e:#}");
                error!(handle = label, error = %message, "Failed to stop cleanly, continuing shutdown");
                Some(message)
            }
        };
        report.steps.push(ShutdownStep { handle: label, error });
    }
    report
}

/// Device backends and catalog location used by an [`Environment`]
pub struct Backends {
    pub camera: Box<dyn CameraBackend>,
    pub serial: Box<dyn SerialBackend>,
    /// Catalog directory; `None` uses [`ObjectManager::default_dir`]
    pub objects_dir: Option<PathBuf>,
}

impl Default for Backends {
    fn default() -> Self {
        Self {
            camera: Box::new(DeviceFileBackend::default()),
            serial: robot::default_backend(),
            objects_dir: None,
        }
    }
}

pub struct Environment {
    settings: SettingsStore,
    vstream: VideoStream,
    robot: Robot,
    vision: Vision,
    objects: ObjectManager,
    lifecycle: Lifecycle,
    shutdown_timeout: Duration,
}

impl Environment {
    /// Build with the platform's default device backends
    pub fn new(settings_path: impl Into<PathBuf>) -> Self {
        Self::with_backends(settings_path, Backends::default())
    }

    /// Load settings, build every handle, then connect the saved camera and
    /// robot
    ///
    /// Never fails: a bad settings file means defaults, and a device that
    /// cannot be opened leaves its handle in [`crate::types::DeviceState::Failed`].
    pub fn with_backends(settings_path: impl Into<PathBuf>, backends: Backends) -> Self {
        debug!(state = ?Lifecycle::Constructing, "Creating environment");
        global::init();

        let settings = SettingsStore::open(settings_path);

        let mut vstream = VideoStream::with_backend(backends.camera);
        let mut robot = Robot::with_backend(backends.serial);
        let vision = Vision::new(&vstream);
        let objects = match backends.objects_dir {
            Some(dir) => ObjectManager::with_dir(dir),
            None => ObjectManager::new(),
        };

        // Camera before robot
        match settings.device_id(CAMERA_ID) {
            Some(id) => {
                if let Err(e) = vstream.set_new_camera(id) {
                    warn!(error = %e, "Saved camera unavailable, continuing without it");
                }
            }
            None => info!("No camera configured"),
        }
        match settings.device_id(ROBOT_ID) {
            Some(id) => {
                if let Err(e) = robot.set_uarm(id) {
                    warn!(error = %e, "Saved robot unavailable, continuing without it");
                }
            }
            None => info!("No robot configured"),
        }

        info!(
            settings = %settings.path().display(),
            camera = ?vstream.state(),
            robot = ?robot.state(),
            "Environment ready"
        );

        Self {
            settings,
            vstream,
            robot,
            vision,
            objects,
            lifecycle: Lifecycle::Ready,
            shutdown_timeout: shutdown::JOIN_TIMEOUT,
        }
    }

    pub fn state(&self) -> Lifecycle {
        self.lifecycle
    }

    /// Per-handle wait used by [`Environment::close`]
    pub fn set_shutdown_timeout(&mut self, timeout: Duration) {
        self.shutdown_timeout = timeout;
    }

    pub fn video_stream(&self) -> &VideoStream {
        &self.vstream
    }

    pub fn video_stream_mut(&mut self) -> &mut VideoStream {
        &mut self.vstream
    }

    pub fn robot(&self) -> &Robot {
        &self.robot
    }

    pub fn robot_mut(&mut self) -> &mut Robot {
        &mut self.robot
    }

    pub fn vision(&self) -> &Vision {
        &self.vision
    }

    pub fn object_manager(&self) -> &ObjectManager {
        &self.objects
    }

    pub fn object_manager_mut(&mut self) -> &mut ObjectManager {
        &mut self.objects
    }

    /// Copy of the whole settings document
    pub fn settings(&self) -> Document {
        self.settings.document()
    }

    /// Copy of one settings category
    pub fn setting(&self, category: &str) -> Result<Value> {
        self.settings.category(category)
    }

    /// Apply and save a category; `Ok(false)` means nothing changed
    pub fn update_settings(&mut self, category: &str, new_settings: Value) -> Result<bool> {
        ensure!(
            self.lifecycle == Lifecycle::Ready,
            "Cannot change settings while the environment is {:?}",
            self.lifecycle
        );
        let persisted = self.settings.update(category, new_settings)?;
        if persisted {
            info!(category, "Settings persisted");
        } else {
            debug!(category, "Settings unchanged");
        }
        Ok(persisted)
    }

    /// Stop the robot, the vision subsystem and the capture source, in that
    /// order
    ///
    /// Every handle is stopped even if an earlier one fails. Calling it again
    /// returns an empty report.
    pub fn close(&mut self) -> ShutdownReport {
        if self.lifecycle != Lifecycle::Ready {
            debug!(state = ?self.lifecycle, "Environment already shut down");
            return ShutdownReport::default();
        }

        self.lifecycle = Lifecycle::ShuttingDown;
        info!("Shutting down environment");

        let mut handles: [&mut dyn Stoppable; 3] = [&mut self.robot, &mut self.vision, &mut self.vstream];
        let report = shutdown_in_order(&mut handles, self.shutdown_timeout);

        self.lifecycle = Lifecycle::Closed;
        if report.is_clean() {
            info!("Environment closed");
        } else {
            warn!(failures = report.failures().count(), "Environment closed with errors");
        }
        report
    }
}

impl Drop for Environment {
    fn drop(&mut self) {
        if self.lifecycle == Lifecycle::Ready {
            self.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{EventLog, FakeCameraBackend, FakeSerialBackend};
    use crate::types::{DeviceId, DeviceState};
    use anyhow::bail;
    use serde_json::json;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    const WAIT: Duration = Duration::from_secs(2);

    fn backends(cameras: &[&str], ports: &[&str], log: &EventLog, dir: &Path) -> Backends {
        Backends {
            camera: Box::new(FakeCameraBackend::new(cameras, log.clone())),
            serial: Box::new(FakeSerialBackend::new(ports, log.clone(), EventLog::default())),
            objects_dir: Some(dir.join("objects")),
        }
    }

    #[test]
    fn test_no_settings_file_leaves_devices_unconfigured() {
        let dir = tempdir().unwrap();
        let log = EventLog::default();
        let env = Environment::with_backends(
            dir.path().join("settings.json"),
            backends(&["0"], &["/dev/ttyACM0"], &log, dir.path()),
        );

        assert_eq!(env.state(), Lifecycle::Ready);
        assert_eq!(env.video_stream().state(), &DeviceState::Unconfigured);
        assert_eq!(env.robot().state(), &DeviceState::Unconfigured);
        assert_eq!(env.setting(CAMERA_ID).unwrap(), Value::Null);
        assert!(log.entries().is_empty());
    }

    #[test]
    fn test_unavailable_camera_still_reaches_ready() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"cameraID": "2"}"#).unwrap();
        let log = EventLog::default();

        let env = Environment::with_backends(&path, backends(&["0"], &[], &log, dir.path()));

        assert_eq!(env.state(), Lifecycle::Ready);
        assert!(!env.video_stream().is_running());
        assert_eq!(env.video_stream().camera_id(), Some(&DeviceId::new("2")));
        assert!(env.video_stream().state().failure().unwrap().contains("not found"));
        assert_eq!(env.robot().state(), &DeviceState::Unconfigured);
    }

    #[test]
    fn test_saved_devices_activate_camera_first() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"robotID": "/dev/ttyACM0", "cameraID": 0}"#).unwrap();
        let log = EventLog::default();

        let mut env =
            Environment::with_backends(&path, backends(&["0"], &["/dev/ttyACM0"], &log, dir.path()));

        assert_eq!(log.entries(), vec!["camera:0", "robot:/dev/ttyACM0"]);
        assert!(env.video_stream().is_running());
        assert!(env.robot().is_connected());
        assert!(env.close().is_clean());
    }

    #[test]
    fn test_close_stops_everything_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"robotID": "/dev/ttyACM0", "cameraID": 0}"#).unwrap();
        let log = EventLog::default();
        let mut env =
            Environment::with_backends(&path, backends(&["0"], &["/dev/ttyACM0"], &log, dir.path()));
        env.set_shutdown_timeout(WAIT);

        let report = env.close();
        let order: Vec<&str> = report.steps.iter().map(|s| s.handle).collect();
        assert_eq!(order, vec!["robot", "vision", "video stream"]);
        assert!(report.is_clean());

        assert_eq!(env.state(), Lifecycle::Closed);
        assert!(env.robot().is_exiting());
        assert!(env.vision().is_exiting());
        assert!(!env.video_stream().is_running());
        assert_eq!(env.robot().state(), &DeviceState::Stopped);

        assert!(env.close().steps.is_empty());
        assert!(env.update_settings(CAMERA_ID, json!(1)).is_err());
    }

    #[test]
    fn test_update_settings_persists_and_copies() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let log = EventLog::default();
        let mut env = Environment::with_backends(&path, backends(&[], &[], &log, dir.path()));

        assert!(env.update_settings(CAMERA_ID, json!("5")).unwrap());
        assert!(!env.update_settings(CAMERA_ID, json!("5")).unwrap());
        assert!(!env.update_settings(CAMERA_ID, Value::Null).unwrap());

        let mut copy = env.settings();
        copy.insert(CAMERA_ID.to_string(), json!("9"));
        assert_eq!(env.setting(CAMERA_ID).unwrap(), json!("5"));

        let reopened = SettingsStore::open(&path);
        assert_eq!(reopened.category(CAMERA_ID).unwrap(), json!("5"));
    }

    struct Recorder {
        label: &'static str,
        fail: bool,
        calls: EventLog,
    }

    impl Stoppable for Recorder {
        fn label(&self) -> &'static str {
            self.label
        }

        fn stop(&mut self, _timeout: Duration) -> Result<()> {
            self.calls.push(self.label);
            if self.fail {
                bail!("{} refused to stop", self.label);
            }
            Ok(())
        }
    }

    #[test]
    fn test_shutdown_continues_past_failures() {
        let calls = EventLog::default();
        let mut hardware = Recorder { label: "hardware", fail: true, calls: calls.clone() };
        let mut analysis = Recorder { label: "analysis", fail: true, calls: calls.clone() };
        let mut capture = Recorder { label: "capture", fail: false, calls: calls.clone() };

        let mut handles: [&mut dyn Stoppable; 3] = [&mut hardware, &mut analysis, &mut capture];
        let report = shutdown_in_order(&mut handles, WAIT);

        assert_eq!(calls.entries(), vec!["hardware", "analysis", "capture"]);
        assert_eq!(report.failures().count(), 2);
        assert_eq!(report.steps[2], ShutdownStep { handle: "capture", error: None });
        assert!(report.steps[0].error.as_deref().unwrap().contains("refused"));
    }
}
