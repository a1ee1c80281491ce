//! CLI tests for the `engine-hooks` binary.
//!
//! Spawns the binary against a temp build layout and checks exit codes,
//! stdout and the build log on stderr.

use std::process::{Command, Output};

use engine_hooks::exit_codes;
use engine_hooks::io::registry::{ENGINE_KEY, JsonRegistry};
use engine_hooks::test_support::TestLayout;
use serde_json::Value;

fn hooks(layout: &TestLayout, args: &[&str]) -> Output {
    let config = layout.write_config().expect("write config");
    Command::new(env!("CARGO_BIN_EXE_engine-hooks"))
        .arg("--config")
        .arg(config)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("run engine-hooks")
}

#[test]
fn payload_prints_engine_payload() {
    let layout = TestLayout::new().expect("layout");
    let set = hooks(&layout, &["registry", "set", ENGINE_KEY, "ruby"]);
    assert_eq!(set.status.code(), Some(exit_codes::OK));

    let out = hooks(&layout, &["payload", "--payload", r#"{"app":"demo","dns":["a.dev"]}"#]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let payload: Value = serde_json::from_slice(&out.stdout).expect("payload json");
    assert_eq!(payload["engine"], "ruby");
    assert_eq!(payload["app"], "demo");
    assert_eq!(payload["dns"][0], "a.dev");
    assert_eq!(
        payload["build_dir"],
        layout.dirs().build.display().to_string()
    );
}

#[test]
fn registry_get_round_trips() {
    let layout = TestLayout::new().expect("layout");
    hooks(&layout, &["registry", "set", "lang", "ruby-2.2"]);
    let out = hooks(&layout, &["registry", "get", "lang"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert_eq!(String::from_utf8_lossy(&out.stdout), "ruby-2.2\n");

    let missing = hooks(&layout, &["registry", "get", "nope"]);
    assert_eq!(missing.status.code(), Some(exit_codes::INVALID));
}

#[test]
fn setup_without_script_succeeds() {
    let layout = TestLayout::new().expect("layout");
    JsonRegistry::new(&layout.config.registry_path)
        .set(ENGINE_KEY, "ruby")
        .expect("set engine");

    let out = hooks(&layout, &["setup", "--payload", r#"{"log_level":"debug"}"#]);

    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("+> running setup hook\n"), "{stderr}");
}

#[test]
fn setup_hides_debug_fragments_at_info_level() {
    let layout = TestLayout::new().expect("layout");
    JsonRegistry::new(&layout.config.registry_path)
        .set(ENGINE_KEY, "ruby")
        .expect("set engine");

    let out = hooks(&layout, &["setup"]);

    assert_eq!(out.status.code(), Some(exit_codes::OK));
    assert!(!String::from_utf8_lossy(&out.stderr).contains("running setup hook"));
}

#[test]
fn failing_setup_script_exits_with_stage_failure() {
    let layout = TestLayout::new().expect("layout");
    JsonRegistry::new(&layout.config.registry_path)
        .set(ENGINE_KEY, "ruby")
        .expect("set engine");
    layout
        .install_script("ruby", "setup", "#!/bin/sh\necho compiling\nexit 4\n")
        .expect("script");

    let out = hooks(&layout, &["setup"]);

    assert_eq!(out.status.code(), Some(exit_codes::STAGE_FAILED));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("compiling\n"), "{stderr}");
    assert!(stderr.contains("! SETUP SCRIPT FAILED !"), "{stderr}");
}

#[test]
fn setup_without_engine_is_invalid() {
    let layout = TestLayout::new().expect("layout");
    let out = hooks(&layout, &["setup"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&out.stderr).contains("no engine set in the registry"));
}

#[test]
fn init_config_refuses_to_overwrite_without_force() {
    let layout = TestLayout::new().expect("layout");
    let path = layout.path().join("fresh.toml");
    let run = |extra: &[&str]| {
        Command::new(env!("CARGO_BIN_EXE_engine-hooks"))
            .arg("--config")
            .arg(&path)
            .arg("init-config")
            .args(extra)
            .output()
            .expect("run engine-hooks")
    };

    assert_eq!(run(&[]).status.code(), Some(exit_codes::OK));
    let written = std::fs::read_to_string(&path).expect("read config");
    assert!(written.contains("run_as = \"gonano\""));
    assert!(written.contains("[roots]"));

    assert_eq!(run(&[]).status.code(), Some(exit_codes::INVALID));
    assert_eq!(run(&["--force"]).status.code(), Some(exit_codes::OK));
}
