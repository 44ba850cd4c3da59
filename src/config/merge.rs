//! Schema reconciliation for loaded settings
//!
//! Lets the on-disk format change between releases without corrupting old
//! files: keys the schema gained take their defaults, keys it lost are
//! dropped, and nested categories are merged leaf by leaf.

use serde_json::{Map, Value};
use tracing::debug;

/// Overlay `loaded` onto `defaults`, keeping the shape of `defaults`
///
/// For each key in `defaults` that `loaded` also has:
/// - default is a mapping, loaded is a mapping: recurse
/// - default is a mapping, loaded is not: keep the default subtree
/// - default is a scalar: take the loaded value, whatever its type
///
/// Keys only in `loaded` are never copied.
pub fn reconcile(defaults: &mut Map<String, Value>, loaded: &Map<String, Value>) {
    for (key, default) in defaults.iter_mut() {
        let Some(incoming) = loaded.get(key) else {
            continue;
        };

        match (default, incoming) {
            (Value::Object(nested), Value::Object(incoming)) => reconcile(nested, incoming),
            (Value::Object(_), other) => {
                debug!(key = %key, found = %other, "Keeping default mapping over non-mapping value");
            }
            (slot, incoming) => *slot = incoming.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{self, default_document};
    use serde_json::json;

    fn map(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_unknown_keys_are_dropped() {
        let mut doc = default_document();
        let loaded = map(json!({
            "cameraID": 1,
            "legacyOption": true,
            "consoleSettings": { "wordWrap": true, "colorTheme": "dark" }
        }));

        reconcile(&mut doc, &loaded);

        let expected_keys: Vec<String> = default_document().keys().cloned().collect();
        let keys: Vec<String> = doc.keys().cloned().collect();
        assert_eq!(keys, expected_keys);
        assert!(doc[schema::CONSOLE_SETTINGS].get("colorTheme").is_none());
        assert_eq!(doc[schema::CONSOLE_SETTINGS]["wordWrap"], json!(true));
        assert_eq!(doc[schema::CAMERA_ID], json!(1));
    }

    #[test]
    fn test_missing_leaves_keep_defaults() {
        let mut doc = default_document();
        let loaded = map(json!({
            "consoleSettings": { "serial": true },
            "coordCalibrations": { "groundPos": [0.0, 1.0, 2.0] }
        }));

        reconcile(&mut doc, &loaded);

        assert_eq!(doc[schema::CONSOLE_SETTINGS]["serial"], json!(true));
        assert_eq!(doc[schema::CONSOLE_SETTINGS]["robot"], json!(true));
        assert_eq!(doc[schema::CONSOLE_SETTINGS]["gui"], json!(false));
        assert_eq!(doc[schema::COORD_CALIBRATIONS]["groundPos"], json!([0.0, 1.0, 2.0]));
        assert_eq!(doc[schema::COORD_CALIBRATIONS]["ptPairs"], Value::Null);
        assert_eq!(doc[schema::ROBOT_ID], Value::Null);
    }

    #[test]
    fn test_reconcile_with_schema_is_identity() {
        let mut doc = default_document();
        reconcile(&mut doc, &default_document());
        assert_eq!(doc, default_document());
    }

    #[test]
    fn test_mapping_default_survives_scalar_on_disk() {
        let mut doc = default_document();
        let loaded = map(json!({ "consoleSettings": "corrupted", "motionCalibrations": null }));

        reconcile(&mut doc, &loaded);

        assert_eq!(doc[schema::CONSOLE_SETTINGS], default_document()[schema::CONSOLE_SETTINGS]);
        assert_eq!(doc[schema::MOTION_CALIBRATIONS], default_document()[schema::MOTION_CALIBRATIONS]);
    }

    #[test]
    fn test_scalar_default_takes_any_loaded_shape() {
        let mut doc = default_document();
        let loaded = map(json!({
            "windowGeometry": { "x": 10, "y": 20 },
            "coordCalibrations": { "ptPairs": [[[1, 2], [3, 4, 5]]] },
            "lastOpenedFile": "/home/user/task.json"
        }));

        reconcile(&mut doc, &loaded);

        assert_eq!(doc[schema::WINDOW_GEOMETRY], json!({ "x": 10, "y": 20 }));
        assert_eq!(doc[schema::COORD_CALIBRATIONS]["ptPairs"], json!([[[1, 2], [3, 4, 5]]]));
        assert_eq!(doc[schema::LAST_OPENED_FILE], json!("/home/user/task.json"));
    }
}
