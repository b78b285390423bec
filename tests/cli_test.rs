//! CLI smoke tests driving the `toolbridge` binary.

mod common;

use assert_cmd::Command;
use predicates::prelude::*;

use common::{temp_config_file, test_server_exe};

fn config_with_helper() -> (tempfile::TempDir, std::path::PathBuf) {
    temp_config_file(&format!(
        r#"
client:
  init_timeout_seconds: 5
  tool_timeout_seconds: 5
servers:
  - name: helper
    command: "{}"
  - name: parked
    command: "{}"
    disabled: true
  - name: "bad.name"
    command: whatever
"#,
        test_server_exe().display(),
        test_server_exe().display(),
    ))
}

fn toolbridge() -> Command {
    let mut cmd = Command::cargo_bin("toolbridge").unwrap();
    cmd.env_remove("TOOLBRIDGE_CONFIG")
        .env_remove("TOOLBRIDGE_TOKEN")
        .env_remove("TOOLBRIDGE_APP_NAME")
        .env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_lists_subcommands() {
    toolbridge()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("servers"))
        .stdout(predicate::str::contains("tools"))
        .stdout(predicate::str::contains("call"))
        .stdout(predicate::str::contains("serve"));
}

#[test]
fn test_servers_prints_status_table() {
    let (_dir, path) = config_with_helper();
    toolbridge()
        .args(["--config", path.to_str().unwrap(), "servers"])
        .assert()
        .success()
        .stdout(predicate::str::contains("helper"))
        .stdout(predicate::str::contains("connected"))
        .stdout(predicate::str::contains("parked"))
        .stdout(predicate::str::contains("disabled"))
        .stdout(predicate::str::contains("bad.name").not());
}

#[test]
fn test_tools_prints_qualified_names() {
    let (_dir, path) = config_with_helper();
    toolbridge()
        .args(["--config", path.to_str().unwrap(), "tools"])
        .assert()
        .success()
        .stdout(predicate::str::contains("helper.echo"))
        .stdout(predicate::str::contains("helper.process_message"));
}

#[test]
fn test_call_prints_response_json() {
    let (_dir, path) = config_with_helper();
    toolbridge()
        .args([
            "--config",
            path.to_str().unwrap(),
            "call",
            "helper.echo",
            "--args",
            r#"{"text":"from the cli","chat_id":"c-3"}"#,
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""response": "from the cli""#))
        .stdout(predicate::str::contains(r#""chat_id": "c-3""#));
}

#[test]
fn test_call_tool_error_exits_nonzero() {
    let (_dir, path) = config_with_helper();
    toolbridge()
        .args(["--config", path.to_str().unwrap(), "call", "helper.missing"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains(r#""error""#));
}

#[test]
fn test_invalid_config_is_rejected() {
    let (_dir, path) = temp_config_file("client:\n  init_timeout_seconds: 0\n");
    toolbridge()
        .args(["--config", path.to_str().unwrap(), "servers"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("init_timeout_seconds"));
}

#[test]
fn test_serve_stdio_answers_ping() {
    let (_dir, path) = config_with_helper();
    toolbridge()
        .args(["--config", path.to_str().unwrap(), "serve", "--stdio"])
        .write_stdin("{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"ping\"}\n")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""id":1"#));
}
