use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};

/// File name of the shared service settings document.
pub const SERVICES_FILE: &str = "services.json";

/// Suffix appended to the application name to form its own document.
pub const APPLICATION_SUFFIX: &str = ".app.json";

/// Path of the shared service settings document inside `dir`.
pub fn services_path(dir: &Path) -> PathBuf {
    dir.join(SERVICES_FILE)
}

/// Path of the application's settings document inside `dir`.
pub fn application_path(dir: &Path, app_name: &str) -> PathBuf {
    dir.join(format!("{app_name}{APPLICATION_SUFFIX}"))
}

/// A structured settings document: a top-level mapping from a key (service
/// name, or setting name for an application document) to an arbitrary JSON
/// value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigStore {
    entries: Map<String, Value>,
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a document. The top level must be a JSON object.
    pub fn from_json_str(input: &str) -> Result<Self> {
        let value: Value =
            serde_json::from_str(input).context("failed to parse settings document JSON")?;
        Self::from_value(value)
    }

    /// Wrap an already-parsed value. The value must be an object.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(entries) => Ok(Self { entries }),
            other => bail!(
                "settings document must be a JSON object, found {}",
                kind_of(&other)
            ),
        }
    }

    /// Load a document from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings at {}", path.display()))?;
        Self::from_json_str(&raw)
            .with_context(|| format!("invalid settings document at {}", path.display()))
    }

    /// Write the document to disk as pretty-printed JSON, creating parent
    /// directories as needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut raw = serde_json::to_string_pretty(&self.entries)
            .context("failed to serialize settings document")?;
        raw.push('\n');
        fs::write(path, raw)
            .with_context(|| format!("failed to write settings at {}", path.display()))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    /// Insert or replace the blob stored under `key`.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.entries.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.entries.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Consume the store and return it as a JSON object value.
    pub fn into_value(self) -> Value {
        Value::Object(self.entries)
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
