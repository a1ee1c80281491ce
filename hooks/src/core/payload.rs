//! Engine payload: the single argument handed to engine scripts.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::dirs::DirectorySet;

/// Payload supplied by the hook framework for one hook run.
///
/// The app values are opaque here and pass through to engine scripts as-is.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HookPayload {
    pub app: Value,
    pub env: Value,
    pub dns: Value,
    pub port: Value,
    pub boxfile: Value,
    /// Threshold for the build log, e.g. `debug`.
    pub log_level: Option<String>,
}

/// Serialized as a JSON object in field order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnginePayload {
    pub code_dir: String,
    pub build_dir: String,
    pub cache_dir: String,
    pub etc_dir: String,
    pub env_dir: String,
    pub app: Value,
    pub env: Value,
    pub dns: Value,
    pub port: Value,
    pub boxfile: Value,
    pub engine: String,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadBuilder;

impl PayloadBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, dirs: &DirectorySet, app: &HookPayload, engine: &str) -> EnginePayload {
        EnginePayload {
            code_dir: dirs.code.display().to_string(),
            build_dir: dirs.build.display().to_string(),
            cache_dir: dirs.cache.display().to_string(),
            etc_dir: dirs.etc.display().to_string(),
            env_dir: dirs.env.display().to_string(),
            app: app.app.clone(),
            env: app.env.clone(),
            dns: app.dns.clone(),
            port: app.port.clone(),
            boxfile: app.boxfile.clone(),
            engine: engine.to_string(),
        }
    }

    pub fn serialize(&self, payload: &EnginePayload) -> serde_json::Result<String> {
        serde_json::to_string(payload)
    }
}

/// Whether `path` looks like a filesystem path.
///
/// Paths usually come from the developer's workstation and will not resolve
/// locally, so only the leading character is inspected.
pub fn is_filepath(path: &str) -> bool {
    path.starts_with(['~', '.', '/', '\\'])
}
