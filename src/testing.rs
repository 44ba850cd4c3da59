//! In-memory device backends for unit tests

use anyhow::{Result, bail};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crate::robot::{SerialBackend, SerialLink};
use crate::types::DeviceId;
use crate::video::{Camera, CameraBackend};

/// Ordered record of what the fakes were asked to do
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

pub struct FakeCameraBackend {
    available: Vec<String>,
    log: EventLog,
}

impl FakeCameraBackend {
    pub fn new(available: &[&str], log: EventLog) -> Self {
        Self {
            available: available.iter().map(|s| s.to_string()).collect(),
            log,
        }
    }
}

impl CameraBackend for FakeCameraBackend {
    fn open(&self, id: &DeviceId) -> Result<Box<dyn Camera>> {
        self.log.push(format!("camera:{id}"));
        if !self.available.iter().any(|a| a == id.as_str()) {
            bail!("camera {id} not found");
        }
        Ok(Box::new(FakeCamera { counter: 0 }))
    }
}

struct FakeCamera {
    counter: u8,
}

impl Camera for FakeCamera {
    fn read_frame(&mut self) -> Result<Vec<u8>> {
        thread::sleep(Duration::from_millis(2));
        self.counter = self.counter.wrapping_add(1);
        Ok(vec![self.counter; 16])
    }
}

pub struct FakeSerialBackend {
    available: Vec<String>,
    log: EventLog,
    written: EventLog,
}

impl FakeSerialBackend {
    pub fn new(available: &[&str], log: EventLog, written: EventLog) -> Self {
        Self {
            available: available.iter().map(|s| s.to_string()).collect(),
            log,
            written,
        }
    }
}

impl SerialBackend for FakeSerialBackend {
    fn open(&self, port: &DeviceId) -> Result<Box<dyn SerialLink>> {
        self.log.push(format!("robot:{port}"));
        if !self.available.iter().any(|a| a == port.as_str()) {
            bail!("port {port} busy");
        }
        Ok(Box::new(FakeLink {
            written: self.written.clone(),
        }))
    }
}

struct FakeLink {
    written: EventLog,
}

impl SerialLink for FakeLink {
    fn write_line(&mut self, line: &str) -> Result<()> {
        self.written.push(line);
        Ok(())
    }
}
