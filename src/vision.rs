//! Analysis subsystem
//!
//! Consumes frames from the capture source through a [`FrameReader`]; it
//! never starts or stops the camera itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

use crate::video::{Frame, FrameReader, VideoStream};

pub struct Vision {
    frames: FrameReader,
    exiting: AtomicBool,
}

impl Vision {
    pub fn new(stream: &VideoStream) -> Self {
        Self {
            frames: stream.frames(),
            exiting: AtomicBool::new(false),
        }
    }

    pub fn latest_frame(&self) -> Option<Frame> {
        self.frames.latest()
    }

    /// Block until a frame newer than `after` arrives
    ///
    /// Returns `None` on timeout, or immediately once exiting is set.
    pub fn wait_for_new_frame(&self, after: Option<u64>, timeout: Duration) -> Option<Frame> {
        self.frames.wait_newer(after, timeout, &self.exiting)
    }

    /// Setting exiting releases every thread blocked on a frame
    pub fn set_exiting(&self, exiting: bool) {
        self.exiting.store(exiting, Ordering::SeqCst);
        if exiting {
            self.frames.wake_all();
        }
        debug!(exiting, "Vision exiting flag set");
    }

    pub fn is_exiting(&self) -> bool {
        self.exiting.load(Ordering::SeqCst)
    }
}
