//! tty-backed serial link for the robot

use anyhow::{Context, Result};
use nix::sys::termios::{self, BaudRate, SetArg};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use tracing::info;

use super::{SerialBackend, SerialLink};
use crate::constants::serial;
use crate::types::DeviceId;

/// Opens a tty in raw mode at 115200 baud
///
/// Ids that are paths are used as-is, bare numbers map to `/dev/ttyACM<N>`,
/// and bare names (`ttyUSB0`) are looked up under `/dev`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TtySerialBackend;

impl TtySerialBackend {
    fn port_path(port: &DeviceId) -> PathBuf {
        let id = port.as_str();
        if id.starts_with('/') {
            PathBuf::from(id)
        } else if let Some(n) = port.index() {
            PathBuf::from(format!("{}{n}", serial::DEVICE_PATH_PREFIX))
        } else {
            PathBuf::from("/dev").join(id)
        }
    }
}

impl SerialBackend for TtySerialBackend {
    fn open(&self, port: &DeviceId) -> Result<Box<dyn SerialLink>> {
        let path = Self::port_path(port);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open serial port {}", path.display()))?;
        configure_raw(&file)
            .with_context(|| format!("Failed to configure serial port {}", path.display()))?;
        info!(port = %path.display(), "Opened serial port");
        Ok(Box::new(TtySerial { file, path }))
    }
}

fn configure_raw(file: &File) -> nix::Result<()> {
    let mut attrs = termios::tcgetattr(file)?;
    termios::cfmakeraw(&mut attrs);
    termios::cfsetspeed(&mut attrs, BaudRate::B115200)?;
    termios::tcsetattr(file, SetArg::TCSANOW, &attrs)
}

/// Open serial port; closed when dropped
pub struct TtySerial {
    file: File,
    path: PathBuf,
}

impl SerialLink for TtySerial {
    fn write_line(&mut self, line: &str) -> Result<()> {
        self.file
            .write_all(line.as_bytes())
            .and_then(|_| self.file.write_all(serial::LINE_ENDING.as_bytes()))
            .and_then(|_| self.file.flush())
            .with_context(|| format!("Failed to write to serial port {}", self.path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_port_path_mapping() {
        assert_eq!(
            TtySerialBackend::port_path(&DeviceId::new("/dev/ttyUSB1")),
            PathBuf::from("/dev/ttyUSB1")
        );
        assert_eq!(
            TtySerialBackend::port_path(&DeviceId::new("0")),
            PathBuf::from("/dev/ttyACM0")
        );
        assert_eq!(
            TtySerialBackend::port_path(&DeviceId::new("ttyUSB0")),
            PathBuf::from("/dev/ttyUSB0")
        );
    }

    #[test]
    fn test_regular_file_is_not_a_serial_port() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fake-tty");
        std::fs::write(&path, "").unwrap();

        let result = TtySerialBackend.open(&DeviceId::new(path.to_str().unwrap()));
        assert!(result.is_err());
    }
}
