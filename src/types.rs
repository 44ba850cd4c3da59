//! Small value types shared by the resource handles

use serde_json::Value;
use std::fmt;
use tracing::warn;

/// Opaque identifier for a camera or robot port, as saved in settings
///
/// Cameras are usually saved as an index (`0`, `"2"`), robots as a port
/// name (`"/dev/ttyACM0"`). Backends decide how to interpret it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric form of the id, if it is one
    pub fn index(&self) -> Option<u32> {
        self.0.trim().parse().ok()
    }

    /// Read an identifier out of a settings value
    ///
    /// Null means "not configured". Empty strings, negative numbers and
    /// non-scalar values are treated as unset.
    pub fn from_setting(key: &str, value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::String(s) if !s.trim().is_empty() => Some(Self::new(s.trim())),
            Value::Number(n) => match n.as_u64() {
                Some(n) => Some(Self::new(n.to_string())),
                None => {
                    warn!(category = key, value = %n, "Ignoring non-integer device id");
                    None
                }
            },
            other => {
                warn!(category = key, value = %other, "Ignoring unusable device id");
                None
            }
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Connection state of a device-backed handle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceState {
    /// No device selected yet
    Unconfigured,
    /// Device opened and its background loop started
    Connected(DeviceId),
    /// Activation was attempted and failed; the handle is still unconfigured
    Failed { id: DeviceId, reason: String },
    /// Background loop stopped by shutdown
    Stopped,
}

impl DeviceState {
    pub fn is_connected(&self) -> bool {
        matches!(self, DeviceState::Connected(_))
    }

    /// Error from the last activation attempt, if it failed
    pub fn failure(&self) -> Option<&str> {
        match self {
            DeviceState::Failed { reason, .. } => Some(reason),
            _ => None,
        }
    }
}
