//! Test-only helpers: a scripted command runner and a throwaway build layout.

use std::collections::VecDeque;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result, anyhow};
use tempfile::TempDir;

use crate::core::dirs::{DirectorySet, Roots};
use crate::io::config::HooksConfig;
use crate::io::process::{CommandRunner, ExecOutput, ExecutionSpec};

/// Canned result for one command.
#[derive(Debug, Clone)]
pub struct ScriptedRun {
    /// Chunks handed to the streaming callback, in order.
    pub chunks: Vec<String>,
    pub code: Option<i32>,
    /// Fail as if the command could not be spawned.
    pub spawn_error: Option<String>,
}

impl ScriptedRun {
    pub fn ok(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|chunk| chunk.to_string()).collect(),
            code: Some(0),
            spawn_error: None,
        }
    }

    pub fn exit(code: i32) -> Self {
        Self {
            code: Some(code),
            ..Self::ok(&[])
        }
    }

    pub fn spawn_error(message: &str) -> Self {
        Self {
            spawn_error: Some(message.to_string()),
            ..Self::ok(&[])
        }
    }
}

/// Everything a runner was asked to do, minus the callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedSpec {
    pub label: String,
    pub program: PathBuf,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub search_path: Option<Vec<PathBuf>>,
    pub user: Option<String>,
    pub stream: bool,
}

/// Runner that records each spec and replays queued results.
///
/// Once the queue is empty every command succeeds silently.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    runs: Mutex<VecDeque<ScriptedRun>>,
    calls: Mutex<Vec<RecordedSpec>>,
}

impl ScriptedRunner {
    pub fn new(runs: Vec<ScriptedRun>) -> Self {
        Self {
            runs: Mutex::new(runs.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<RecordedSpec> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, mut spec: ExecutionSpec<'_>) -> Result<ExecOutput> {
        self.calls
            .lock()
            .map_err(|_| anyhow!("calls lock poisoned"))?
            .push(RecordedSpec {
                label: spec.label.clone(),
                program: spec.program.clone(),
                args: spec
                    .args
                    .iter()
                    .map(|arg| arg.to_string_lossy().into_owned())
                    .collect(),
                cwd: spec.cwd.clone(),
                search_path: spec.search_path.clone(),
                user: spec.user.clone(),
                stream: spec.stream,
            });

        let run = self
            .runs
            .lock()
            .map_err(|_| anyhow!("runs lock poisoned"))?
            .pop_front()
            .unwrap_or_else(|| ScriptedRun::ok(&[]));
        if let Some(message) = run.spawn_error {
            return Err(anyhow!(message));
        }

        let mut output = ExecOutput {
            code: run.code,
            ..ExecOutput::default()
        };
        for chunk in &run.chunks {
            match spec.on_data.as_mut() {
                Some(on_data) if spec.stream => on_data(chunk.as_str()),
                _ => output.stdout.push_str(chunk),
            }
        }
        Ok(output)
    }
}

/// Build container layout rooted in a temp directory.
pub struct TestLayout {
    temp: TempDir,
    pub config: HooksConfig,
}

impl TestLayout {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir().context("tempdir")?;
        let root = temp.path();
        let roots = Roots {
            build: root.join("data"),
            deploy: root.join("mnt/deploy"),
            cache: root.join("mnt/cache"),
            engines: root.join("opt/engines"),
            share: root.join("share"),
            code: root.join("code"),
            platform: root.join("opt/gonano"),
        };
        fs::create_dir_all(&roots.build).context("create build dir")?;
        fs::create_dir_all(&roots.deploy).context("create deploy dir")?;
        let build_excludes = root.join("build-excludes.txt");
        fs::write(&build_excludes, "").context("write build excludes")?;

        let config = HooksConfig {
            run_as: String::new(),
            build_excludes,
            registry_path: root.join("registry.json"),
            script_timeout_secs: None,
            roots,
        };
        Ok(Self { temp, config })
    }

    pub fn path(&self) -> &Path {
        self.temp.path()
    }

    pub fn dirs(&self) -> DirectorySet {
        self.config.dirs()
    }

    /// Write an executable engine script and return its path.
    pub fn install_script(&self, engine: &str, name: &str, body: &str) -> Result<PathBuf> {
        let dirs = self.dirs();
        let bin = dirs.engine_bin(engine);
        fs::create_dir_all(&bin).with_context(|| format!("create {}", bin.display()))?;
        let script = bin.join(name);
        fs::write(&script, body).with_context(|| format!("write {}", script.display()))?;
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755))
            .with_context(|| format!("chmod {}", script.display()))?;
        Ok(script)
    }

    /// Create `<build>/var/db/pkgin` with one package entry.
    pub fn create_pkgin_db(&self) -> Result<PathBuf> {
        let db = self.dirs().pkgin_db();
        fs::create_dir_all(&db).with_context(|| format!("create {}", db.display()))?;
        fs::write(db.join("pkgin.db"), "packages").context("write pkgin.db")?;
        Ok(db)
    }

    /// Write the config file and return its path.
    pub fn write_config(&self) -> Result<PathBuf> {
        let path = self.path().join("config.toml");
        crate::io::config::write_config(&path, &self.config)?;
        Ok(path)
    }
}
