//! Background threads with cooperative cancellation
//!
//! Long-running loops receive a [`StopToken`] and check it at their yield
//! points. Stopping is a request; [`Worker::join`] waits for the loop to
//! notice, but only up to a deadline.

use anyhow::{Context, Result, anyhow};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::constants::shutdown;

/// Shared exit flag observed by a background loop
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// A named thread running a cancellable loop
pub struct Worker {
    name: String,
    token: StopToken,
    handle: Option<thread::JoinHandle<()>>,
    // Disconnects when the thread's closure returns or unwinds
    done_rx: Receiver<()>,
}

impl Worker {
    /// Spawn `f` on a new thread, handing it the stop token
    pub fn spawn<F>(name: &str, f: F) -> Result<Self>
    where
        F: FnOnce(StopToken) + Send + 'static,
    {
        let token = StopToken::new();
        let (done_tx, done_rx) = mpsc::channel::<()>();
        let thread_token = token.clone();
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _done = done_tx;
                f(thread_token);
            })
            .with_context(|| format!("Failed to spawn thread '{name}'"))?;

        debug!(thread = name, "Worker started");
        Ok(Self {
            name: name.to_string(),
            token,
            handle: Some(handle),
            done_rx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the stop flag and wake the thread if it is parked
    pub fn request_stop(&self) {
        self.token.stop();
        if let Some(handle) = &self.handle {
            handle.thread().unpark();
        }
    }

    /// True once the loop has returned (or panicked)
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Wait up to `timeout` for the loop to exit
    ///
    /// On timeout the thread is detached and an error is returned; it keeps
    /// running until it next checks its token.
    pub fn join(mut self, timeout: Duration) -> Result<()> {
        self.join_inner(timeout)
    }

    /// [`Worker::request_stop`] followed by [`Worker::join`]
    pub fn stop(self, timeout: Duration) -> Result<()> {
        self.request_stop();
        self.join(timeout)
    }

    fn join_inner(&mut self, timeout: Duration) -> Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        match self.done_rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(thread = %self.name, timeout_ms = timeout.as_millis() as u64, "Worker did not stop in time, detaching");
                Err(anyhow!("Thread '{}' did not stop within {:?}", self.name, timeout))
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                handle
                    .join()
                    .map_err(|_| anyhow!("Thread '{}' panicked", self.name))?;
                debug!(thread = %self.name, "Worker stopped");
                Ok(())
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.request_stop();
            let _ = self.join_inner(shutdown::JOIN_TIMEOUT);
        }
    }
}
