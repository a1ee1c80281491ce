//! Hook configuration (TOML), by default `/etc/engine-hooks/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::dirs::{DirectorySet, Roots};

pub const DEFAULT_CONFIG_PATH: &str = "/etc/engine-hooks/config.toml";

/// Hook configuration.
///
/// Missing fields default to the paths of the standard build container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HooksConfig {
    /// Account engine scripts run as. Empty runs them as the invoking user.
    pub run_as: String,

    /// Exclude list for the build → deploy mirror.
    pub build_excludes: PathBuf,

    /// JSON file backing the key-value registry.
    pub registry_path: PathBuf,

    /// Kill engine scripts after this many seconds. Unset waits forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_timeout_secs: Option<u64>,

    pub roots: Roots,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            run_as: "gonano".to_string(),
            build_excludes: PathBuf::from("/var/nanobox/build-excludes.txt"),
            registry_path: PathBuf::from("/var/db/hookit/registry.json"),
            script_timeout_secs: None,
            roots: Roots::default(),
        }
    }
}

impl HooksConfig {
    pub fn validate(&self) -> Result<()> {
        let relative = self.roots.relative_roots();
        if !relative.is_empty() {
            return Err(anyhow!(
                "roots must be absolute paths: {}",
                relative.join(", ")
            ));
        }
        if self.script_timeout_secs == Some(0) {
            return Err(anyhow!("script_timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn run_as(&self) -> Option<String> {
        let user = self.run_as.trim();
        (!user.is_empty()).then(|| user.to_string())
    }

    pub fn script_timeout(&self) -> Option<Duration> {
        self.script_timeout_secs.map(Duration::from_secs)
    }

    pub fn dirs(&self) -> DirectorySet {
        DirectorySet::from_roots(&self.roots)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `HooksConfig::default()`.
pub fn load_config(path: &Path) -> Result<HooksConfig> {
    if !path.exists() {
        let cfg = HooksConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: HooksConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &HooksConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    crate::io::write_atomic(path, &buf)
}
