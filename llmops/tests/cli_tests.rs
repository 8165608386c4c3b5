#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::process::Command;

/// A `docker` stand-in that answers `docker compose version` and fails everything else
fn fake_docker(bin_dir: &Path, exit_code: i32) {
    let script = format!(
        "#!/bin/sh\nif [ \"$2\" = \"version\" ]; then exit 0; fi\nexit {}\n",
        exit_code
    );
    let path = bin_dir.join("docker");
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
}

fn llmops(bin_dir: &Path, args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_llmops"))
        .args(args)
        .env("PATH", bin_dir)
        .env("LOG_LEVEL", "ERROR")
        .output()
        .unwrap()
}

#[test]
fn test_failed_compose_command_exit_code_is_propagated() {
    let bin = tempfile::tempdir().unwrap();
    let stack = tempfile::tempdir().unwrap();
    fake_docker(bin.path(), 7);

    let dir = stack.path().to_str().unwrap();
    let output = llmops(bin.path(), &["monitoring", "down", "--dir", dir]);
    assert_eq!(output.status.code(), Some(7));
    assert!(String::from_utf8_lossy(&output.stderr).contains("docker compose down"));
}

#[test]
fn test_monitoring_init_writes_files_and_succeeds() {
    let bin = tempfile::tempdir().unwrap();
    let stack = tempfile::tempdir().unwrap();

    let dir = stack.path().to_str().unwrap();
    let output = llmops(bin.path(), &["monitoring", "init", "--dir", dir]);
    assert_eq!(output.status.code(), Some(0));
    assert!(stack.path().join("docker-compose.yml").is_file());
    assert!(stack.path().join("prometheus.yml").is_file());
}

#[test]
fn test_missing_compose_tool_exits_with_one() {
    let bin = tempfile::tempdir().unwrap();
    let stack = tempfile::tempdir().unwrap();

    let dir = stack.path().to_str().unwrap();
    let output = llmops(bin.path(), &["monitoring", "status", "--dir", dir]);
    assert_eq!(output.status.code(), Some(1));
}
