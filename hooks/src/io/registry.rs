//! Key-value registry shared between hooks.
//!
//! Earlier hooks record facts such as the detected `engine`; later hooks
//! only need to read them back.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use serde_json::{Map, Value};
use tracing::debug;

pub const ENGINE_KEY: &str = "engine";

pub trait Registry {
    fn get(&self, key: &str) -> Result<Option<String>>;
}

impl<G: Registry + ?Sized> Registry for &G {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }
}

/// Registry persisted as a flat JSON object.
#[derive(Debug, Clone)]
pub struct JsonRegistry {
    path: PathBuf,
}

impl JsonRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Store `value` under `key`, replacing the file atomically.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut entries = self.load()?;
        entries.insert(key.to_string(), Value::String(value.to_string()));
        let mut buf = serde_json::to_string_pretty(&entries).context("serialize registry")?;
        buf.push('\n');
        debug!(key, path = %self.path.display(), "writing registry");
        crate::io::write_atomic(&self.path, &buf)
    }

    fn load(&self) -> Result<Map<String, Value>> {
        if !self.path.exists() {
            return Ok(Map::new());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read registry {}", self.path.display()))?;
        match serde_json::from_str::<Value>(&contents)
            .with_context(|| format!("parse registry {}", self.path.display()))?
        {
            Value::Object(entries) => Ok(entries),
            _ => Err(anyhow!(
                "registry {} is not a JSON object",
                self.path.display()
            )),
        }
    }
}

impl Registry for JsonRegistry {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let value = self.load()?.remove(key);
        Ok(value.and_then(|value| match value {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        }))
    }
}

/// In-memory registry.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(key: &str, value: &str) -> Self {
        let registry = Self::new();
        registry.set(key, value);
        registry
    }

    pub fn set(&self, key: &str, value: &str) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key.to_string(), value.to_string());
        }
    }
}

impl Registry for MemoryRegistry {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("registry lock poisoned"))?;
        Ok(entries.get(key).cloned())
    }
}
