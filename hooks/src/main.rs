//! Build lifecycle hooks for platform engines.
//!
//! Runs the engine's optional `setup`/`cleanup` scripts with the engine
//! payload, streams their output into the build log, and publishes the build.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use engine_hooks::exit_codes;
use engine_hooks::error::HookError;
use engine_hooks::hooks::HookOrchestrator;
use engine_hooks::io::config::{DEFAULT_CONFIG_PATH, HooksConfig, load_config, write_config};
use engine_hooks::io::hook_payload::read_payload;
use engine_hooks::io::logtap::StderrSink;
use engine_hooks::io::process::SystemRunner;
use engine_hooks::io::registry::{JsonRegistry, Registry};
use engine_hooks::logging;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "engine-hooks",
    version,
    about = "Build lifecycle hooks for platform engines"
)]
struct Cli {
    /// Hook configuration (TOML). Missing file means defaults.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the engine's setup script, if any.
    Setup(PayloadArgs),
    /// Run the engine's cleanup script, publish the build and stash the pkgin cache.
    Cleanup(PayloadArgs),
    /// Setup followed by cleanup.
    Lifecycle(PayloadArgs),
    /// Print the engine payload passed to engine scripts.
    Payload(PayloadArgs),
    /// Write the default configuration to `--config`.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(short, long)]
        force: bool,
    },
    /// Read or write the hook registry.
    Registry {
        #[command(subcommand)]
        action: RegistryAction,
    },
}

#[derive(Subcommand)]
enum RegistryAction {
    /// Print the value stored under KEY.
    Get { key: String },
    /// Store VALUE under KEY.
    Set { key: String, value: String },
}

#[derive(Args, Debug, Default)]
struct PayloadArgs {
    /// Hook payload as inline JSON.
    #[arg(long, conflicts_with = "payload_file")]
    payload: Option<String>,

    /// Hook payload read from a JSON file.
    #[arg(long)]
    payload_file: Option<PathBuf>,
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{:#}", err);
        std::process::exit(exit_code_for(&err));
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Setup(args) => {
            let outcome = orchestrator(&cli.config, &args)?.run_setup()?;
            info!(?outcome, "setup hook finished");
        }
        Command::Cleanup(args) => {
            let report = orchestrator(&cli.config, &args)?.run_cleanup()?;
            info!(?report, "cleanup hook finished");
        }
        Command::Lifecycle(args) => {
            let report = orchestrator(&cli.config, &args)?.run_lifecycle()?;
            info!(?report, "lifecycle finished");
        }
        Command::Payload(args) => {
            println!("{}", orchestrator(&cli.config, &args)?.engine_payload()?);
        }
        Command::InitConfig { force } => cmd_init_config(&cli.config, force)?,
        Command::Registry { action } => cmd_registry(&cli.config, action)?,
    }
    Ok(())
}

type SystemHooks = HookOrchestrator<SystemRunner, StderrSink, JsonRegistry>;

fn orchestrator(config_path: &Path, args: &PayloadArgs) -> Result<SystemHooks> {
    let cfg = load_config(config_path)?;
    let payload = read_payload(args.payload.as_deref(), args.payload_file.as_deref())?;
    let sink = StderrSink::from_payload_level(payload.log_level.as_deref());
    let registry = JsonRegistry::new(&cfg.registry_path);
    Ok(HookOrchestrator::new(
        &cfg,
        payload,
        SystemRunner,
        sink,
        registry,
    ))
}

fn cmd_init_config(path: &Path, force: bool) -> Result<()> {
    if !force && path.exists() {
        return Err(anyhow!(
            "{} already exists (use --force to overwrite)",
            path.display()
        ));
    }
    write_config(path, &HooksConfig::default())
        .with_context(|| format!("write {}", path.display()))
}

fn cmd_registry(config_path: &Path, action: RegistryAction) -> Result<()> {
    let cfg = load_config(config_path)?;
    let registry = JsonRegistry::new(&cfg.registry_path);
    match action {
        RegistryAction::Get { key } => {
            let value = registry
                .get(&key)?
                .with_context(|| format!("{key} is not set in {}", registry.path().display()))?;
            println!("{value}");
        }
        RegistryAction::Set { key, value } => registry.set(&key, &value)?,
    }
    Ok(())
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<HookError>() {
        Some(hook_err) if hook_err.is_stage_failure() => exit_codes::STAGE_FAILED,
        _ => exit_codes::INVALID,
    }
}
