//! Capture source: a camera read continuously on a background thread
//!
//! The newest frame is kept in a shared buffer. Consumers such as
//! [`crate::vision::Vision`] get a read-only [`FrameReader`] onto it and
//! never own the acquisition loop.

mod device;

pub use device::{DeviceFileBackend, DeviceFileCamera};

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::constants::{capture, shutdown, threads};
use crate::global;
use crate::types::{DeviceId, DeviceState};
use crate::worker::{StopToken, Worker};

/// An opened camera
pub trait Camera: Send {
    /// Block until the next frame is available and return its raw bytes
    fn read_frame(&mut self) -> Result<Vec<u8>>;
}

/// Opens cameras by the identifier saved in settings
pub trait CameraBackend: Send {
    fn open(&self, id: &DeviceId) -> Result<Box<dyn Camera>>;
}

/// One captured frame
#[derive(Debug, Clone)]
pub struct Frame {
    /// Increases by one per published frame, across camera switches
    pub sequence: u64,
    /// Capture time relative to the process epoch
    pub captured_at: Duration,
    pub data: Arc<[u8]>,
}

#[derive(Debug, Default)]
struct FrameBuffer {
    latest: Mutex<Option<Frame>>,
    fresh: Condvar,
}

impl FrameBuffer {
    fn lock(&self) -> MutexGuard<'_, Option<Frame>> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, data: Vec<u8>) {
        let mut latest = self.lock();
        let sequence = latest.as_ref().map_or(0, |f| f.sequence + 1);
        *latest = Some(Frame {
            sequence,
            captured_at: global::elapsed(),
            data: data.into(),
        });
        self.fresh.notify_all();
    }
}

/// Read-only view of the capture source's frames
#[derive(Debug, Clone)]
pub struct FrameReader {
    buffer: Arc<FrameBuffer>,
}

impl FrameReader {
    pub fn latest(&self) -> Option<Frame> {
        self.buffer.lock().clone()
    }

    /// Wait for a frame newer than `after` (any frame if `None`)
    ///
    /// Returns `None` on timeout or as soon as `cancel` is set. A timeout
    /// too large to represent as a deadline waits until a frame or cancel.
    pub fn wait_newer(&self, after: Option<u64>, timeout: Duration, cancel: &AtomicBool) -> Option<Frame> {
        let deadline = Instant::now().checked_add(timeout);
        let mut latest = self.buffer.lock();
        loop {
            if cancel.load(Ordering::SeqCst) {
                return None;
            }
            if let Some(frame) = latest
                .as_ref()
                .filter(|f| after.is_none_or(|seq| f.sequence > seq))
            {
                return Some(frame.clone());
            }
            latest = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return None;
                    }
                    self.buffer
                        .fresh
                        .wait_timeout(latest, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => self
                    .buffer
                    .fresh
                    .wait(latest)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Wake every thread blocked in [`FrameReader::wait_newer`]
    pub fn wake_all(&self) {
        // Taking the lock orders this wake-up after any in-progress cancel check
        let _latest = self.buffer.lock();
        self.buffer.fresh.notify_all();
    }
}

/// Capture source handle
///
/// Construction does no I/O; a camera is opened only by
/// [`VideoStream::set_new_camera`].
pub struct VideoStream {
    backend: Box<dyn CameraBackend>,
    state: DeviceState,
    buffer: Arc<FrameBuffer>,
    acquisition: Option<Worker>,
}

impl Default for VideoStream {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoStream {
    pub fn new() -> Self {
        Self::with_backend(Box::new(DeviceFileBackend::default()))
    }

    pub fn with_backend(backend: Box<dyn CameraBackend>) -> Self {
        Self {
            backend,
            state: DeviceState::Unconfigured,
            buffer: Arc::new(FrameBuffer::default()),
            acquisition: None,
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Camera last selected, whether or not it opened
    pub fn camera_id(&self) -> Option<&DeviceId> {
        match &self.state {
            DeviceState::Connected(id) | DeviceState::Failed { id, .. } => Some(id),
            _ => None,
        }
    }

    /// True while the acquisition loop is alive
    pub fn is_running(&self) -> bool {
        self.acquisition.as_ref().is_some_and(|w| !w.is_finished())
    }

    pub fn frames(&self) -> FrameReader {
        FrameReader {
            buffer: Arc::clone(&self.buffer),
        }
    }

    pub fn latest_frame(&self) -> Option<Frame> {
        self.buffer.lock().clone()
    }

    /// Switch to camera `id` and start acquiring from it
    ///
    /// Any running acquisition loop is stopped first. On failure the state
    /// becomes [`DeviceState::Failed`] and the error is returned.
    pub fn set_new_camera(&mut self, id: DeviceId) -> Result<()> {
        info!(camera = %id, "Setting new camera");
        if let Err(e) = self.end_thread(shutdown::JOIN_TIMEOUT) {
            warn!(error = %e, "Previous acquisition loop did not stop cleanly");
        }

        let camera = match self.backend.open(&id) {
            Ok(camera) => camera,
            Err(e) => {
                error!(camera = %id, error = %e, "Failed to open camera");
                self.state = DeviceState::Failed {
                    id,
                    reason: format!("{e:#}"),
                };
                return Err(e);
            }
        };

        let buffer = Arc::clone(&self.buffer);
        match Worker::spawn(threads::ACQUISITION, move |token| {
            acquisition_loop(camera, &buffer, &token)
        }) {
            Ok(worker) => {
                info!(camera = %id, "Camera acquisition started");
                self.acquisition = Some(worker);
                self.state = DeviceState::Connected(id);
                Ok(())
            }
            Err(e) => {
                self.state = DeviceState::Failed {
                    id,
                    reason: format!("{e:#}"),
                };
                Err(e)
            }
        }
    }

    /// Stop the acquisition loop and release the camera
    ///
    /// Waits at most `timeout` for the loop to exit.
    pub fn end_thread(&mut self, timeout: Duration) -> Result<()> {
        let Some(worker) = self.acquisition.take() else {
            return Ok(());
        };
        if self.state.is_connected() {
            self.state = DeviceState::Stopped;
        }
        worker.stop(timeout)
    }
}

fn acquisition_loop(mut camera: Box<dyn Camera>, buffer: &FrameBuffer, token: &StopToken) {
    let mut failures = 0u32;
    while !token.is_stopped() {
        match camera.read_frame() {
            Ok(data) => {
                failures = 0;
                buffer.publish(data);
            }
            Err(e) => {
                failures += 1;
                if failures >= capture::MAX_CONSECUTIVE_FAILURES {
                    error!(error = %e, failures, "Camera stopped delivering frames, ending acquisition");
                    break;
                }
                debug!(error = %e, failures, "Frame read failed");
                thread::park_timeout(capture::RETRY_DELAY);
            }
        }
    }
    debug!("Acquisition loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{EventLog, FakeCameraBackend};

    const WAIT: Duration = Duration::from_secs(2);

    fn stream(available: &[&str]) -> VideoStream {
        VideoStream::with_backend(Box::new(FakeCameraBackend::new(available, EventLog::default())))
    }

    #[test]
    fn test_new_stream_is_idle() {
        let stream = stream(&["0"]);
        assert_eq!(stream.state(), &DeviceState::Unconfigured);
        assert!(!stream.is_running());
        assert!(stream.latest_frame().is_none());
    }

    #[test]
    fn test_unavailable_camera_fails_softly() {
        let mut stream = stream(&["0"]);

        assert!(stream.set_new_camera(DeviceId::new("2")).is_err());
        assert!(!stream.is_running());
        assert_eq!(stream.camera_id(), Some(&DeviceId::new("2")));
        assert!(stream.state().failure().is_some());
    }

    #[test]
    fn test_frames_flow_and_stop() {
        let mut stream = stream(&["0"]);
        stream.set_new_camera(DeviceId::new("0")).unwrap();
        assert!(stream.state().is_connected());

        let never = AtomicBool::new(false);
        let first = stream.frames().wait_newer(None, WAIT, &never).expect("first frame");
        let next = stream
            .frames()
            .wait_newer(Some(first.sequence), WAIT, &never)
            .expect("second frame");
        assert!(next.sequence > first.sequence);

        stream.end_thread(WAIT).unwrap();
        assert_eq!(stream.state(), &DeviceState::Stopped);
        assert!(!stream.is_running());
    }

    #[test]
    fn test_switching_camera_replaces_loop() {
        let mut stream = stream(&["0", "1"]);
        stream.set_new_camera(DeviceId::new("0")).unwrap();
        stream.set_new_camera(DeviceId::new("1")).unwrap();

        assert_eq!(stream.state(), &DeviceState::Connected(DeviceId::new("1")));
        assert!(stream.is_running());
        stream.end_thread(WAIT).unwrap();
    }

    #[test]
    fn test_wait_newer_honors_cancel() {
        let stream = stream(&[]);
        let cancel = AtomicBool::new(true);
        let started = Instant::now();

        assert!(stream.frames().wait_newer(None, WAIT, &cancel).is_none());
        assert!(started.elapsed() < WAIT);
    }
}
