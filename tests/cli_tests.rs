//! End-to-end tests of the `tether` binary.

use std::path::{Path, PathBuf};
use std::process::Command;

fn run_tether(args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_tether"))
        .args(args)
        .output()
        .expect("failed to execute tether");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn assert_success(args: &[&str]) -> String {
    let (stdout, stderr, success) = run_tether(args);
    assert!(success, "command should succeed, stderr:\n{}", stderr);
    stdout
}

fn assert_failure(args: &[&str]) -> String {
    let (_, stderr, success) = run_tether(args);
    assert!(!success, "command should fail");
    stderr
}

fn script(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("scripts")
        .join(name)
}

#[test]
fn test_run_code() {
    let stdout = assert_success(&["run", "-c", "return 1+1"]);
    assert_eq!(stdout, "2\n");
}

#[test]
fn test_run_prints_each_result() {
    let stdout = assert_success(&["run", "-c", "return 1.5, 'text', nil, true"]);
    assert_eq!(stdout, "1.5\ntext\nnil\ntrue\n");
}

#[test]
fn test_run_json() {
    let stdout = assert_success(&[
        "run",
        "--json",
        "-c",
        "return 1, 'a', {1, 2}, {key = 2.5}, nil",
    ]);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(
        parsed,
        serde_json::json!([1, "a", [1, 2], {"key": 2.5}, null])
    );
}

#[test]
fn test_run_file() {
    let stdout = assert_success(&[
        "run",
        "--json",
        script("vectors.lua").to_str().unwrap(),
    ]);
    let parsed: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(parsed[0]["origin"], serde_json::json!({"x": 0, "y": 0}));
}

#[test]
fn test_script_arguments() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("args.lua");
    std::fs::write(&path, "return #arg, arg[1] .. arg[2]").unwrap();

    let stdout = assert_success(&["run", path.to_str().unwrap(), "left", "-right"]);
    assert_eq!(stdout, "2\nleft-right\n");
}

#[test]
fn test_runtime_error() {
    let stderr = assert_failure(&["run", "-c", "error('boom')"]);
    assert!(stderr.contains("boom"), "stderr:\n{}", stderr);
    assert!(stderr.contains("runtime error"), "stderr:\n{}", stderr);
}

#[test]
fn test_missing_source() {
    let stderr = assert_failure(&["run"]);
    assert!(stderr.contains("no file specified"), "stderr:\n{}", stderr);
}

#[test]
fn test_no_std() {
    let stdout = assert_success(&["run", "--no-std", "-c", "return print == nil"]);
    assert_eq!(stdout, "true\n");
}

#[test]
fn test_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let toml_path = dir.path().join("session.toml");
    std::fs::write(&toml_path, "std_libs = false\n").unwrap();
    let stdout = assert_success(&[
        "run",
        "--config",
        toml_path.to_str().unwrap(),
        "-c",
        "return string == nil",
    ]);
    assert_eq!(stdout, "true\n");

    let json_path = dir.path().join("session.json");
    std::fs::write(&json_path, r#"{"package_path": "/opt/lua/?.lua"}"#).unwrap();
    let stdout = assert_success(&[
        "run",
        "--config",
        json_path.to_str().unwrap(),
        "-c",
        "return package.path:sub(1, 14)",
    ]);
    assert_eq!(stdout, "/opt/lua/?.lua\n");
}

#[test]
fn test_invalid_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "stack_reserve = 0\n").unwrap();
    let stderr = assert_failure(&["run", "--config", path.to_str().unwrap(), "-c", "return 1"]);
    assert!(stderr.contains("invalid configuration"), "stderr:\n{}", stderr);
}

#[test]
fn test_check() {
    let stdout = assert_success(&["check", script("vectors.lua").to_str().unwrap()]);
    assert_eq!(stdout, "Syntax check passed.\n");

    let stderr = assert_failure(&["check", script("broken.lua").to_str().unwrap()]);
    assert!(stderr.contains("syntax error"), "stderr:\n{}", stderr);
}

#[test]
fn test_timeout() {
    let stderr = assert_failure(&["run", "--timeout", "1", "-c", "while true do end"]);
    assert!(stderr.contains("timed out"), "stderr:\n{}", stderr);
}
