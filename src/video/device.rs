//! Default camera backend reading raw frames from a device node

use anyhow::{Context, Result, bail};
use std::fs::File;
use std::io::Read;
use std::path::PathBuf;
use tracing::info;

use super::{Camera, CameraBackend};
use crate::constants::capture;
use crate::types::DeviceId;

/// Opens `/dev/video<N>` for numeric ids, or the id itself if it is a path
#[derive(Debug, Clone)]
pub struct DeviceFileBackend {
    frame_bytes: usize,
}

impl Default for DeviceFileBackend {
    fn default() -> Self {
        Self {
            frame_bytes: capture::FRAME_BUFFER_BYTES,
        }
    }
}

impl DeviceFileBackend {
    pub fn with_frame_bytes(frame_bytes: usize) -> Self {
        Self { frame_bytes }
    }

    fn device_path(id: &DeviceId) -> Result<PathBuf> {
        if id.as_str().starts_with('/') {
            return Ok(PathBuf::from(id.as_str()));
        }
        match id.index() {
            Some(n) => Ok(PathBuf::from(format!("{}{n}", capture::DEVICE_PATH_PREFIX))),
            None => bail!("Camera id '{id}' is neither an index nor a device path"),
        }
    }
}

impl CameraBackend for DeviceFileBackend {
    fn open(&self, id: &DeviceId) -> Result<Box<dyn Camera>> {
        let path = Self::device_path(id)?;
        let file = File::open(&path)
            .with_context(|| format!("Failed to open camera device {}", path.display()))?;
        info!(camera = %id, path = %path.display(), "Opened camera device");
        Ok(Box::new(DeviceFileCamera {
            file,
            path,
            buf: vec![0; self.frame_bytes],
        }))
    }
}

/// Camera backed by an open device file; closed when dropped
pub struct DeviceFileCamera {
    file: File,
    path: PathBuf,
    buf: Vec<u8>,
}

impl Camera for DeviceFileCamera {
    fn read_frame(&mut self) -> Result<Vec<u8>> {
        let n = self
            .file
            .read(&mut self.buf)
            .with_context(|| format!("Failed to read frame from {}", self.path.display()))?;
        if n == 0 {
            bail!("Camera device {} returned no data", self.path.display());
        }
        Ok(self.buf[..n].to_vec())
    }
}
