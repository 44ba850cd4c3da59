//! Catalog of user-defined objects (vision targets, movement paths,
//! functions), one JSON file per object

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::constants::config;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Vision,
    MovementPath,
    Function,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogObject {
    pub name: String,
    pub kind: ObjectKind,
    /// Object-specific payload, stored as-is
    #[serde(default)]
    pub data: Value,
}

impl CatalogObject {
    pub fn new(name: impl Into<String>, kind: ObjectKind, data: Value) -> Self {
        Self {
            name: name.into(),
            kind,
            data,
        }
    }
}

/// Catalog manager
///
/// Construction does no I/O; call [`ObjectManager::load_objects`] to read
/// the catalog directory.
#[derive(Debug)]
pub struct ObjectManager {
    dir: PathBuf,
    objects: BTreeMap<String, CatalogObject>,
}

impl Default for ObjectManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectManager {
    /// `<data dir>/creator-studio/objects`
    pub fn default_dir() -> PathBuf {
        let mut path = dirs::data_dir().unwrap_or_else(|| PathBuf::from("."));
        path.push(config::APP_DIR);
        path.push(config::OBJECTS_DIR);
        path
    }

    pub fn new() -> Self {
        Self::with_dir(Self::default_dir())
    }

    pub fn with_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            objects: BTreeMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Replace the in-memory catalog with the directory contents
    ///
    /// Files that fail to parse are skipped with a warning. A missing
    /// directory is an empty catalog.
    pub fn load_objects(&mut self) -> Result<usize> {
        self.objects.clear();

        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(dir = %self.dir.display(), "No catalog directory yet");
                return Ok(0);
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read catalog directory {}", self.dir.display()));
            }
        };

        for entry in entries {
            let path = entry
                .with_context(|| format!("Failed to list catalog directory {}", self.dir.display()))?
                .path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_object(&path) {
                Ok(object) => {
                    self.objects.insert(object.name.clone(), object);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable catalog object"),
            }
        }

        info!(count = self.objects.len(), dir = %self.dir.display(), "Loaded catalog objects");
        Ok(self.objects.len())
    }

    pub fn get(&self, name: &str) -> Option<&CatalogObject> {
        self.objects.get(name)
    }

    /// Names of all objects of `kind`, sorted
    pub fn names(&self, kind: ObjectKind) -> Vec<&str> {
        self.objects
            .values()
            .filter(|o| o.kind == kind)
            .map(|o| o.name.as_str())
            .collect()
    }

    /// Write `object` to the catalog directory and keep it in memory
    pub fn save(&mut self, object: CatalogObject) -> Result<()> {
        validate_name(&object.name)?;
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create catalog directory {}", self.dir.display()))?;

        let path = self.object_path(&object.name);
        let json = serde_json::to_string_pretty(&object)
            .with_context(|| format!("Failed to serialize catalog object '{}'", object.name))?;
        fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;

        info!(name = %object.name, kind = ?object.kind, "Saved catalog object");
        self.objects.insert(object.name.clone(), object);
        Ok(())
    }

    /// Delete an object; returns false if it was not in the catalog
    pub fn remove(&mut self, name: &str) -> Result<bool> {
        if self.objects.remove(name).is_none() {
            return Ok(false);
        }
        let path = self.object_path(name);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e).with_context(|| format!("Failed to delete {}", path.display())),
        }
        info!(name, "Removed catalog object");
        Ok(true)
    }

    fn object_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.json"))
    }
}

fn read_object(path: &Path) -> Result<CatalogObject> {
    let contents = fs::read_to_string(path)?;
    let object: CatalogObject = serde_json::from_str(&contents)?;
    validate_name(&object.name)?;
    Ok(object)
}

/// Names become file names, so keep them to a portable character set
fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        bail!("Catalog object name must not be empty");
    }
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_alphanumeric() || matches!(c, ' ' | '-' | '_')))
    {
        bail!("Catalog object name '{name}' contains unsupported character '{c}'");
    }
    Ok(())
}
