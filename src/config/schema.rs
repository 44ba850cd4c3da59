//! Canonical default settings document
//!
//! The schema is authoritative: loaded files are reconciled against it, keys
//! it does not name are dropped, and keys it names are always present.

use serde_json::{Map, Value, json};

/// The full persisted settings tree (top level is always a mapping)
pub type Document = Map<String, Value>;

// Logic related settings
pub const ROBOT_ID: &str = "robotID";
pub const CAMERA_ID: &str = "cameraID";
pub const MOTION_CALIBRATIONS: &str = "motionCalibrations";
pub const COORD_CALIBRATIONS: &str = "coordCalibrations";

// GUI related settings
pub const CONSOLE_SETTINGS: &str = "consoleSettings";
pub const WINDOW_GEOMETRY: &str = "windowGeometry";
pub const WINDOW_STATE: &str = "windowState";
pub const LAST_OPENED_FILE: &str = "lastOpenedFile";

/// Build the default document, keys in the order they are written to disk
pub fn default_document() -> Document {
    let value = json!({
        // Serial port of the robot
        ROBOT_ID: null,
        // Index of the camera to capture from
        CAMERA_ID: null,
        MOTION_CALIBRATIONS: {
            "stationaryMovement": null,
            "activeMovement": null
        },
        COORD_CALIBRATIONS: {
            // Pairs of (camera, robot) points
            "ptPairs": null,
            // Points where calibration failed
            "failPts": null,
            // Ground position as [x, y, z]
            "groundPos": null
        },
        // Which message sources the console shows
        CONSOLE_SETTINGS: {
            "wordWrap": false,
            "robot": true,
            "vision": true,
            "serial": false,
            "interpreter": true,
            "script": true,
            "gui": false,
            "other": true
        },
        WINDOW_GEOMETRY: null,
        WINDOW_STATE: null,
        // So the GUI can reopen the last file
        LAST_OPENED_FILE: null
    });

    match value {
        Value::Object(map) => map,
        _ => unreachable!("schema literal is a JSON object"),
    }
}
