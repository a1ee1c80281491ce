//! Orchestration of the `setup` and `cleanup` build hooks.
//!
//! Stages run strictly in order and the first failure aborts whatever is
//! left. Before a failure is returned it is rendered into the build log as a
//! fatal block.

use std::error::Error as _;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, info, instrument, warn};

use crate::core::dirs::{DirectorySet, contents_of};
use crate::core::output::TextFormatter;
use crate::core::payload::{HookPayload, PayloadBuilder};
use crate::core::types::{LogLevel, ScriptOutcome, Stage};
use crate::error::{CopyStep, HookError};
use crate::io::config::HooksConfig;
use crate::io::logtap::LogSink;
use crate::io::process::{CommandRunner, ExecutionSpec};
use crate::io::registry::{ENGINE_KEY, Registry};

const RSYNC: &str = "rsync";

/// What the cleanup hook did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub script: ScriptOutcome,
    /// Whether a pkgin database was stashed into the cache.
    pub pkgin_cached: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleReport {
    pub setup: ScriptOutcome,
    pub cleanup: CleanupReport,
}

/// Runs engine scripts and the cleanup copies for one build.
pub struct HookOrchestrator<R, S, G> {
    dirs: DirectorySet,
    app: HookPayload,
    run_as: Option<String>,
    script_timeout: Option<Duration>,
    build_excludes: PathBuf,
    formatter: TextFormatter,
    payloads: PayloadBuilder,
    runner: R,
    sink: S,
    registry: G,
}

impl<R: CommandRunner, S: LogSink, G: Registry> HookOrchestrator<R, S, G> {
    pub fn new(cfg: &HooksConfig, app: HookPayload, runner: R, sink: S, registry: G) -> Self {
        Self {
            dirs: cfg.dirs(),
            app,
            run_as: cfg.run_as(),
            script_timeout: cfg.script_timeout(),
            build_excludes: cfg.build_excludes.clone(),
            formatter: TextFormatter::new(),
            payloads: PayloadBuilder::new(),
            runner,
            sink,
            registry,
        }
    }

    /// Engine recorded in the registry by an earlier hook.
    pub fn engine(&self) -> Result<String, HookError> {
        self.registry
            .get(ENGINE_KEY)
            .map_err(HookError::Registry)?
            .filter(|engine| !engine.trim().is_empty())
            .ok_or(HookError::EngineUnset)
    }

    /// Serialized payload for the registered engine.
    pub fn engine_payload(&self) -> Result<String, HookError> {
        let engine = self.engine()?;
        self.payload_for(&engine)
    }

    fn payload_for(&self, engine: &str) -> Result<String, HookError> {
        let payload = self.payloads.build(&self.dirs, &self.app, engine);
        Ok(self.payloads.serialize(&payload)?)
    }

    /// Run the engine's `setup` script if it has one.
    #[instrument(skip_all)]
    pub fn run_setup(&self) -> Result<ScriptOutcome, HookError> {
        self.print(&self.formatter.bullet("running setup hook"), LogLevel::Debug);
        self.run_engine_script(Stage::Setup)
            .map_err(|err| self.report(err))
    }

    /// Run the engine's `cleanup` script if it has one, publish the build
    /// into the deploy directory and stash the pkgin cache.
    #[instrument(skip_all)]
    pub fn run_cleanup(&self) -> Result<CleanupReport, HookError> {
        self.cleanup_steps().map_err(|err| self.report(err))
    }

    /// Setup followed by cleanup.
    pub fn run_lifecycle(&self) -> Result<LifecycleReport, HookError> {
        let setup = self.run_setup()?;
        let cleanup = self.run_cleanup()?;
        Ok(LifecycleReport { setup, cleanup })
    }

    fn cleanup_steps(&self) -> Result<CleanupReport, HookError> {
        let script = self.run_engine_script(Stage::Cleanup)?;
        self.copy_build()?;
        let pkgin_cached = self.stash_pkgin_cache()?;
        Ok(CleanupReport {
            script,
            pkgin_cached,
        })
    }

    fn run_engine_script(&self, stage: Stage) -> Result<ScriptOutcome, HookError> {
        let engine = self.engine()?;
        let script = self.dirs.engine_script(&engine, stage.script_name());
        if !script.exists() {
            info!(%stage, %engine, "no engine script, skipping");
            return Ok(ScriptOutcome::Skipped);
        }

        self.print(
            &self
                .formatter
                .bullet(&format!("{stage} script detected, running now")),
            LogLevel::Debug,
        );
        let payload = self.payload_for(&engine)?;

        let spec = ExecutionSpec::new(format!("{stage} engine script"), &script)
            .arg(payload)
            .cwd(self.dirs.engine_bin(&engine))
            .search_path(self.dirs.script_path())
            .user(self.run_as.clone())
            .timeout(self.script_timeout)
            .streaming(|chunk| self.sink.print(chunk, LogLevel::Info));

        info!(%stage, script = %script.display(), "running engine script");
        let output = self
            .runner
            .run(spec)
            .map_err(|source| HookError::ScriptSpawn {
                stage,
                script: script.clone(),
                source,
            })?;
        if !output.success() {
            warn!(%stage, exit_code = ?output.code, timed_out = output.timed_out, "engine script failed");
            return Err(HookError::ScriptFailed {
                stage,
                script,
                code: output.code,
                timed_out: output.timed_out,
            });
        }
        Ok(ScriptOutcome::Ran)
    }

    /// Mirror the build into the deploy directory, deleting extraneous files.
    fn copy_build(&self) -> Result<(), HookError> {
        let step = CopyStep::BuildToDeploy;
        self.print(&self.formatter.process_start(&step.to_string()), LogLevel::Debug);

        let spec = ExecutionSpec::new(step.to_string(), RSYNC)
            .arg("-a")
            .arg("--delete")
            .arg(format!("--exclude-from={}", self.build_excludes.display()))
            .arg(contents_of(&self.dirs.build))
            .arg(&self.dirs.deploy);
        self.mirror(step, spec)?;

        self.print(&self.formatter.process_end(), LogLevel::Debug);
        Ok(())
    }

    /// Copy the pkgin database into the cache for later builds. Returns
    /// false when the build left no pkgin database.
    fn stash_pkgin_cache(&self) -> Result<bool, HookError> {
        let step = CopyStep::PkginCache;
        let db = self.dirs.pkgin_db();
        if !db.exists() {
            debug!(db = %db.display(), "no pkgin database, skipping cache");
            return Ok(false);
        }

        self.print(
            &self.formatter.bullet("ensuring the pkgin cache dir exists"),
            LogLevel::Debug,
        );
        let cache = self.dirs.pkgin_cache();
        fs::create_dir_all(&cache)
            .with_context(|| format!("create {}", cache.display()))
            .map_err(|source| HookError::CopyIo { step, source })?;

        self.print(&self.formatter.process_start(&step.to_string()), LogLevel::Debug);
        let spec = ExecutionSpec::new(step.to_string(), RSYNC)
            .arg("-v")
            .arg("-a")
            .arg(contents_of(&db))
            .arg(&cache);
        self.mirror(step, spec)?;
        self.print(&self.formatter.process_end(), LogLevel::Debug);
        Ok(true)
    }

    fn mirror<'s>(&'s self, step: CopyStep, spec: ExecutionSpec<'s>) -> Result<(), HookError> {
        let spec = spec.streaming(|chunk| self.sink.print(chunk, LogLevel::Debug));
        let output = self
            .runner
            .run(spec)
            .map_err(|source| HookError::CopyIo { step, source })?;
        if !output.success() {
            warn!(%step, exit_code = ?output.code, "mirror failed");
            return Err(HookError::CopyFailed {
                step,
                code: output.code,
            });
        }
        Ok(())
    }

    fn print(&self, fragment: &str, level: LogLevel) {
        self.sink.print(fragment, level);
    }

    /// Render `err` as a fatal block, then hand it back.
    fn report(&self, err: HookError) -> HookError {
        let chain = error_chain(&err);
        let fatal = self.formatter.fatal(&err.title(), Some(chain.as_str()));
        self.print(&fatal, LogLevel::Error);
        err
    }
}

fn error_chain(err: &HookError) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::logtap::MemorySink;
    use crate::io::registry::MemoryRegistry;
    use crate::test_support::{ScriptedRun, ScriptedRunner, TestLayout};

    fn orchestrator<'a>(
        layout: &TestLayout,
        runner: &'a ScriptedRunner,
        sink: &'a MemorySink,
        engine: &str,
    ) -> HookOrchestrator<&'a ScriptedRunner, &'a MemorySink, MemoryRegistry> {
        HookOrchestrator::new(
            &layout.config,
            HookPayload::default(),
            runner,
            sink,
            MemoryRegistry::with(ENGINE_KEY, engine),
        )
    }

    #[test]
    fn setup_skips_when_engine_has_no_script() {
        let layout = TestLayout::new().expect("layout");
        let runner = ScriptedRunner::new(vec![]);
        let sink = MemorySink::new();

        let outcome = orchestrator(&layout, &runner, &sink, "ruby")
            .run_setup()
            .expect("setup");

        assert_eq!(outcome, ScriptOutcome::Skipped);
        assert!(runner.calls().is_empty());
        assert_eq!(sink.text(), "+> running setup hook\n");
    }

    #[test]
    fn setup_runs_script_with_payload_and_streams_output() {
        let layout = TestLayout::new().expect("layout");
        let script = layout.install_script("ruby", "setup", "#!/bin/sh\n").expect("script");
        let runner = ScriptedRunner::new(vec![ScriptedRun::ok(&["installing\n", "done\n"])]);
        let sink = MemorySink::new();

        let outcome = orchestrator(&layout, &runner, &sink, "ruby")
            .run_setup()
            .expect("setup");

        assert_eq!(outcome, ScriptOutcome::Ran);
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        let call = &calls[0];
        assert_eq!(call.program, script);
        assert_eq!(call.cwd.as_deref(), script.parent());
        assert!(call.stream);
        assert_eq!(call.user, None);
        assert_eq!(call.search_path.as_ref().map(Vec::len), Some(12));

        let payload: serde_json::Value = serde_json::from_str(&call.args[0]).expect("payload");
        assert_eq!(payload["engine"], "ruby");
        assert_eq!(
            payload["build_dir"],
            layout.dirs().build.display().to_string()
        );

        assert!(sink.entries().contains(&(LogLevel::Info, "installing\n".to_string())));
        assert!(sink.text().ends_with("installing\ndone\n"));
    }

    #[test]
    fn setup_failure_renders_fatal_and_returns_error() {
        let layout = TestLayout::new().expect("layout");
        layout.install_script("ruby", "setup", "#!/bin/sh\n").expect("script");
        let runner = ScriptedRunner::new(vec![ScriptedRun::exit(2)]);
        let sink = MemorySink::new();

        let err = orchestrator(&layout, &runner, &sink, "ruby")
            .run_setup()
            .unwrap_err();

        assert!(matches!(
            err,
            HookError::ScriptFailed {
                stage: Stage::Setup,
                code: Some(2),
                ..
            }
        ));
        let (level, fatal) = sink.entries().pop().expect("fatal entry");
        assert_eq!(level, LogLevel::Error);
        assert!(fatal.starts_with("\n! SETUP SCRIPT FAILED !\n"));
    }

    #[test]
    fn missing_engine_is_reported() {
        let layout = TestLayout::new().expect("layout");
        let runner = ScriptedRunner::new(vec![]);
        let sink = MemorySink::new();
        let hooks = HookOrchestrator::new(
            &layout.config,
            HookPayload::default(),
            &runner,
            &sink,
            MemoryRegistry::new(),
        );

        let err = hooks.run_setup().unwrap_err();
        assert!(matches!(err, HookError::EngineUnset));
        assert!(sink.text().contains("! ENGINE UNKNOWN !"));
    }

    #[test]
    fn cleanup_copies_build_and_skips_absent_pkgin() {
        let layout = TestLayout::new().expect("layout");
        let runner = ScriptedRunner::new(vec![ScriptedRun::ok(&["sending incremental file list\n"])]);
        let sink = MemorySink::new();

        let report = orchestrator(&layout, &runner, &sink, "ruby")
            .run_cleanup()
            .expect("cleanup");

        assert_eq!(
            report,
            CleanupReport {
                script: ScriptOutcome::Skipped,
                pkgin_cached: false,
            }
        );
        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        let dirs = layout.dirs();
        assert_eq!(calls[0].program, PathBuf::from("rsync"));
        assert_eq!(
            calls[0].args,
            vec![
                "-a".to_string(),
                "--delete".to_string(),
                format!("--exclude-from={}", layout.config.build_excludes.display()),
                contents_of(&dirs.build),
                dirs.deploy.display().to_string(),
            ]
        );
        assert!(!dirs.pkgin_cache().exists());
        assert!(sink.text().contains("COPY BUILD INTO PLACE ---"));
    }

    #[test]
    fn cleanup_stashes_pkgin_cache_when_present() {
        let layout = TestLayout::new().expect("layout");
        layout.install_script("ruby", "cleanup", "#!/bin/sh\n").expect("script");
        let db = layout.create_pkgin_db().expect("pkgin db");
        let runner = ScriptedRunner::new(vec![]);
        let sink = MemorySink::new();

        let report = orchestrator(&layout, &runner, &sink, "ruby")
            .run_cleanup()
            .expect("cleanup");

        assert_eq!(report.script, ScriptOutcome::Ran);
        assert!(report.pkgin_cached);
        let cache = layout.dirs().pkgin_cache();
        assert!(cache.is_dir());

        let calls = runner.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2].args, vec![
            "-v".to_string(),
            "-a".to_string(),
            contents_of(&db),
            cache.display().to_string(),
        ]);
        assert!(sink.text().contains("+> ensuring the pkgin cache dir exists\n"));
    }

    #[test]
    fn cleanup_stashes_pkgin_into_existing_cache_dir() {
        let layout = TestLayout::new().expect("layout");
        let db = layout.create_pkgin_db().expect("pkgin db");
        let cache = layout.dirs().pkgin_cache();
        fs::create_dir_all(&cache).expect("pre-create cache");
        let runner = ScriptedRunner::new(vec![]);
        let sink = MemorySink::new();

        let report = orchestrator(&layout, &runner, &sink, "ruby")
            .run_cleanup()
            .expect("cleanup");

        assert!(report.pkgin_cached);
        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].args.last(), Some(&cache.display().to_string()));
        assert_eq!(calls[1].args[2], contents_of(&db));
    }

    #[test]
    fn script_and_payload_use_one_registry_read() {
        let layout = TestLayout::new().expect("layout");
        layout.install_script("ruby", "setup", "#!/bin/sh\n").expect("script");
        let runner = ScriptedRunner::new(vec![]);
        let sink = MemorySink::new();
        let hooks = HookOrchestrator::new(
            &layout.config,
            HookPayload::default(),
            &runner,
            &sink,
            ChangingRegistry::new(&["ruby", "node"]),
        );

        hooks.run_setup().expect("setup");

        let calls = runner.calls();
        let payload: serde_json::Value = serde_json::from_str(&calls[0].args[0]).expect("payload");
        assert_eq!(payload["engine"], "ruby");
        assert_eq!(hooks.registry.reads(), 1);
    }

    /// Returns a different engine on every read.
    struct ChangingRegistry {
        engines: Vec<String>,
        reads: std::sync::atomic::AtomicUsize,
    }

    impl ChangingRegistry {
        fn new(engines: &[&str]) -> Self {
            Self {
                engines: engines.iter().map(ToString::to_string).collect(),
                reads: std::sync::atomic::AtomicUsize::new(0),
            }
        }

        fn reads(&self) -> usize {
            self.reads.load(std::sync::atomic::Ordering::SeqCst)
        }
    }

    impl Registry for ChangingRegistry {
        fn get(&self, _key: &str) -> anyhow::Result<Option<String>> {
            let n = self.reads.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(self.engines.get(n).cloned())
        }
    }

    #[test]
    fn cleanup_script_failure_stops_before_copies() {
        let layout = TestLayout::new().expect("layout");
        layout.install_script("node", "cleanup", "#!/bin/sh\n").expect("script");
        layout.create_pkgin_db().expect("pkgin db");
        let runner = ScriptedRunner::new(vec![ScriptedRun::exit(1)]);
        let sink = MemorySink::new();

        let err = orchestrator(&layout, &runner, &sink, "node")
            .run_cleanup()
            .unwrap_err();

        assert!(err.is_stage_failure());
        assert_eq!(runner.calls().len(), 1);
        assert!(!layout.dirs().pkgin_cache().exists());
    }

    #[test]
    fn copy_failure_is_fatal() {
        let layout = TestLayout::new().expect("layout");
        layout.create_pkgin_db().expect("pkgin db");
        let runner = ScriptedRunner::new(vec![ScriptedRun::exit(23)]);
        let sink = MemorySink::new();

        let err = orchestrator(&layout, &runner, &sink, "ruby")
            .run_cleanup()
            .unwrap_err();

        assert!(matches!(
            err,
            HookError::CopyFailed {
                step: CopyStep::BuildToDeploy,
                code: Some(23),
            }
        ));
        assert_eq!(runner.calls().len(), 1);
        assert!(sink.text().contains("! COPY BUILD INTO PLACE FAILED !"));
    }

    #[test]
    fn spawn_error_keeps_its_cause() {
        let layout = TestLayout::new().expect("layout");
        layout.install_script("ruby", "setup", "#!/bin/sh\n").expect("script");
        let runner = ScriptedRunner::new(vec![ScriptedRun::spawn_error("permission denied")]);
        let sink = MemorySink::new();

        let err = orchestrator(&layout, &runner, &sink, "ruby")
            .run_setup()
            .unwrap_err();

        assert!(matches!(err, HookError::ScriptSpawn { .. }));
        assert!(error_chain(&err).ends_with("permission denied"));
    }
}
