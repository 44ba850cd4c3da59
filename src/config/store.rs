//! Settings persistence
//!
//! Loads the JSON settings document, reconciles it against the schema, and
//! rewrites the whole file whenever a category actually changes.

use anyhow::{Context, Result, bail};
use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use serde_json::{Serializer, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

use super::merge::reconcile;
use super::schema::{Document, default_document};
use crate::constants::config;
use crate::types::DeviceId;

/// Owner of the live settings document and the file it is saved to
///
/// Readers only ever get deep copies; every accepted change goes through
/// [`SettingsStore::update`], which persists before returning.
#[derive(Debug)]
pub struct SettingsStore {
    path: PathBuf,
    document: Document,
}

impl SettingsStore {
    /// `<config dir>/creator-studio/settings.json`
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(config::APP_DIR);
        path.push(config::FILENAME);
        path
    }

    /// Load settings from `path`, falling back to defaults on any read or
    /// parse problem
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let document = load_or_default(&path);
        Self { path, document }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Deep copy of the whole document
    pub fn document(&self) -> Document {
        self.document.clone()
    }

    /// Deep copy of one category
    ///
    /// `key` is a top-level key or a dotted path into a nested category,
    /// e.g. `consoleSettings.wordWrap`.
    pub fn category(&self, key: &str) -> Result<Value> {
        lookup(&self.document, key)
            .cloned()
            .with_context(|| format!("Unknown settings category '{key}'"))
    }

    /// Identifier stored under `key`, if one is configured
    pub fn device_id(&self, key: &str) -> Option<DeviceId> {
        lookup(&self.document, key).and_then(|value| DeviceId::from_setting(key, value))
    }

    /// Replace a category and save the document
    ///
    /// Returns `Ok(false)` without touching disk when `new_value` is null or
    /// equal to the stored value. A mapping is reconciled against the
    /// schema first, so the stored value is what the next load would give.
    /// On a write error the in-memory document has already changed;
    /// [`SettingsStore::persist`] can be retried.
    pub fn update(&mut self, key: &str, new_value: Value) -> Result<bool> {
        let current = lookup_mut(&mut self.document, key)
            .with_context(|| format!("Unknown settings category '{key}'"))?;

        if new_value.is_null() {
            info!(category = key, "No settings changed");
            return Ok(false);
        }

        let new_value = match (current.is_object(), new_value) {
            (true, Value::Object(loaded)) => {
                let mut normalized = lookup(&default_document(), key)
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                reconcile(&mut normalized, &loaded);
                Value::Object(normalized)
            }
            (true, other) => {
                bail!("Settings category '{key}' is a mapping, refusing to replace it with {other}")
            }
            (false, value) => value,
        };

        if *current == new_value {
            info!(category = key, "No settings changed");
            return Ok(false);
        }

        *current = new_value;
        info!(category = key, "Saving setting");

        self.persist()
            .with_context(|| format!("Setting '{key}' changed in memory but was not saved"))?;
        Ok(true)
    }

    /// Write the full document to the settings path
    pub fn persist(&self) -> Result<()> {
        write_document(&self.path, &self.document)
    }
}

/// Build the default document and overlay whatever can be read from `path`
///
/// A missing, unreadable or malformed file is not an error: it is logged
/// and the defaults are returned unchanged.
pub fn load_or_default(path: &Path) -> Document {
    let mut document = default_document();
    info!(path = %path.display(), "Loading settings");

    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "No settings file could be read, using default values");
            return document;
        }
    };

    match parse_document(&contents) {
        Ok(loaded) => reconcile(&mut document, &loaded),
        Err(e) => {
            error!(path = %path.display(), error = %e, "Failed to parse existing settings file, using default values");
        }
    }
    document
}

/// Read and parse a settings file without reconciling it
pub fn read_document(path: &Path) -> Result<Document> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("Failed to read settings from {}", path.display()))?;
    parse_document(&contents).with_context(|| format!("Failed to parse settings from {}", path.display()))
}

fn parse_document(contents: &str) -> Result<Document> {
    match serde_json::from_str::<Value>(contents)? {
        Value::Object(map) => Ok(map),
        other => bail!("Top level of the settings file must be an object, found {other}"),
    }
}

/// Serialize `document` in schema order with a fixed indent and move it
/// into place
pub fn write_document(path: &Path, document: &Document) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create settings directory {}", parent.display()))?;
    }

    let mut buf = Vec::new();
    let mut serializer = Serializer::with_formatter(&mut buf, PrettyFormatter::with_indent(config::INDENT));
    document
        .serialize(&mut serializer)
        .context("Failed to serialize settings")?;

    let staging = path.with_extension(config::STAGING_EXTENSION);
    fs::write(&staging, &buf)
        .with_context(|| format!("Failed to write settings to {}", staging.display()))?;
    if let Err(e) = fs::rename(&staging, path) {
        let _ = fs::remove_file(&staging);
        return Err(e).with_context(|| format!("Failed to replace settings file {}", path.display()));
    }

    debug!(path = %path.display(), bytes = buf.len(), "Saved settings");
    Ok(())
}

fn lookup<'a>(document: &'a Document, key: &str) -> Option<&'a Value> {
    let mut parts = key.split('.');
    let mut current = document.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn lookup_mut<'a>(document: &'a mut Document, key: &str) -> Option<&'a mut Value> {
    let mut parts = key.split('.');
    let mut current = document.get_mut(parts.next()?)?;
    for part in parts {
        current = current.as_object_mut()?.get_mut(part)?;
    }
    Some(current)
}
