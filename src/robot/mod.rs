//! Hardware channel: the robot arm's serial connection
//!
//! Commands are queued from any caller and written to the port by a
//! communication thread, which exits once the robot is told it is exiting.

#[cfg(unix)]
mod serial;

#[cfg(unix)]
pub use serial::{TtySerial, TtySerialBackend};

use anyhow::{Context, Result, anyhow, bail};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::constants::{serial as serial_consts, shutdown, threads};
use crate::types::{DeviceId, DeviceState};
use crate::worker::{StopToken, Worker};

/// An opened serial connection
pub trait SerialLink: Send {
    fn write_line(&mut self, line: &str) -> Result<()>;
}

/// Opens serial ports by the identifier saved in settings
pub trait SerialBackend: Send {
    fn open(&self, port: &DeviceId) -> Result<Box<dyn SerialLink>>;
}

/// Platform default serial backend
pub fn default_backend() -> Box<dyn SerialBackend> {
    #[cfg(unix)]
    {
        Box::new(TtySerialBackend)
    }
    #[cfg(not(unix))]
    {
        Box::new(UnsupportedSerialBackend)
    }
}

#[cfg(not(unix))]
struct UnsupportedSerialBackend;

#[cfg(not(unix))]
impl SerialBackend for UnsupportedSerialBackend {
    fn open(&self, port: &DeviceId) -> Result<Box<dyn SerialLink>> {
        bail!("Serial port {port} unavailable: serial support requires a unix platform")
    }
}

struct Connection {
    worker: Worker,
    commands: Sender<String>,
}

/// Hardware channel handle
///
/// Construction does no I/O; the port is opened by [`Robot::set_uarm`].
pub struct Robot {
    backend: Box<dyn SerialBackend>,
    state: DeviceState,
    connection: Option<Connection>,
    exiting: bool,
}

impl Default for Robot {
    fn default() -> Self {
        Self::new()
    }
}

impl Robot {
    pub fn new() -> Self {
        Self::with_backend(default_backend())
    }

    pub fn with_backend(backend: Box<dyn SerialBackend>) -> Self {
        Self {
            backend,
            state: DeviceState::Unconfigured,
            connection: None,
            exiting: false,
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Port last selected, whether or not it opened
    pub fn port(&self) -> Option<&DeviceId> {
        match &self.state {
            DeviceState::Connected(id) | DeviceState::Failed { id, .. } => Some(id),
            _ => None,
        }
    }

    /// True while the port is open and the communication loop is alive
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
            && self
                .connection
                .as_ref()
                .is_some_and(|c| !c.worker.is_finished())
    }

    pub fn is_exiting(&self) -> bool {
        self.exiting
    }

    /// Connect to the robot on `port`, replacing any existing connection
    pub fn set_uarm(&mut self, port: DeviceId) -> Result<()> {
        if self.exiting {
            bail!("Robot is exiting, not connecting to {port}");
        }
        info!(port = %port, "Setting robot port");
        if let Err(e) = self.wait_for_exit(shutdown::JOIN_TIMEOUT) {
            warn!(error = %e, "Previous communication loop did not stop cleanly");
        }

        let link = match self.backend.open(&port) {
            Ok(link) => link,
            Err(e) => {
                error!(port = %port, error = %e, "Failed to connect to robot");
                self.state = DeviceState::Failed {
                    id: port,
                    reason: format!("{e:#}"),
                };
                return Err(e);
            }
        };

        let (commands, rx) = mpsc::channel();
        let worker = Worker::spawn(threads::COMMUNICATION, move |token| {
            communication_loop(link, rx, &token)
        })
        .inspect_err(|e| {
            self.state = DeviceState::Failed {
                id: port.clone(),
                reason: format!("{e:#}"),
            };
        })?;

        info!(port = %port, "Robot connected");
        self.connection = Some(Connection { worker, commands });
        self.state = DeviceState::Connected(port);
        Ok(())
    }

    /// Queue one command line for the communication loop
    pub fn send_command(&self, line: &str) -> Result<()> {
        let connection = self.connection.as_ref().context("Robot is not connected")?;
        connection
            .commands
            .send(line.to_string())
            .map_err(|_| anyhow!("Robot communication loop has exited"))
    }

    /// Mark the robot as exiting (or clear the mark)
    ///
    /// Setting it asks the communication loop to stop; it does not wait.
    pub fn set_exiting(&mut self, exiting: bool) {
        self.exiting = exiting;
        if exiting && let Some(connection) = &self.connection {
            connection.worker.request_stop();
        }
        debug!(exiting, "Robot exiting flag set");
    }

    /// Stop the communication loop and close the port, waiting at most
    /// `timeout`
    pub fn wait_for_exit(&mut self, timeout: Duration) -> Result<()> {
        let Some(Connection { worker, commands }) = self.connection.take() else {
            return Ok(());
        };
        if self.state.is_connected() {
            self.state = DeviceState::Stopped;
        }
        // Closing the queue also ends the loop once it drains
        drop(commands);
        worker.stop(timeout)
    }
}

fn communication_loop(mut link: Box<dyn SerialLink>, commands: Receiver<String>, token: &StopToken) {
    while !token.is_stopped() {
        match commands.recv_timeout(serial_consts::POLL_INTERVAL) {
            Ok(line) => {
                debug!(command = %line, "Sending robot command");
                if let Err(e) = link.write_line(&line) {
                    error!(command = %line, error = %e, "Failed to write robot command");
                }
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("Communication loop exited");
}
