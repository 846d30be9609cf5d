//! CLI integration tests
//!
//! Tests the cm-agent binary's argument handling using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;

fn cm_agent() -> Command {
    Command::cargo_bin("cm-agent")
        .expect("Failed to locate cm-agent binary - ensure it's built before running tests")
}

#[test]
fn test_cli_help() {
    cm_agent()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("cm-agent"))
        .stdout(predicate::str::contains("attach"))
        .stdout(predicate::str::contains("run"));
}

#[test]
fn test_cli_version() {
    cm_agent()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("cm-agent"));
}

#[test]
fn test_cli_missing_command_exits_1() {
    cm_agent().assert().code(1);
}

#[test]
fn test_cli_attach_missing_history_exits_1() {
    cm_agent()
        .args(["attach", "localhost", "5050"])
        .assert()
        .code(1);
}

#[test]
fn test_cli_run_without_config_exits_1() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("agent.toml");

    cm_agent()
        .args(["--config", config.to_str().unwrap(), "run", "alice/resnet"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("attach to a controller first"));
}

#[test]
fn test_cli_run_with_missing_files_exits_1() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("agent.toml");
    std::fs::write(&config, "controller_address = \"127.0.0.1:1\"\nhistory_id = 3\n").unwrap();

    cm_agent()
        .args([
            "--config",
            config.to_str().unwrap(),
            "run",
            "alice/resnet",
            dir.path().join("params.json").to_str().unwrap(),
            dir.path().join("out.bin").to_str().unwrap(),
        ])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("does not exist"));
}
