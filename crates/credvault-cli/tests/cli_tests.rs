//! Integration tests for the `credvault` CLI binary.
//!
//! These tests exercise the CLI as a subprocess, verifying exit codes and
//! output. They do NOT require a running server: every network call goes
//! to an address nothing listens on.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::fs;
use std::path::Path;
use std::process::Command;

/// Helper: locate the `credvault` binary built by `cargo test`.
fn credvault_bin() -> String {
    let path = env!("CARGO_BIN_EXE_credvault");
    assert!(
        Path::new(path).exists(),
        "credvault binary not found at {path}"
    );
    path.to_owned()
}

/// Helper: run credvault with args and return (`exit_code`, stdout, stderr).
fn run(args: &[&str]) -> (i32, String, String) {
    let output = Command::new(credvault_bin())
        .args(args)
        .env("CREDVAULT_ADDR", "http://127.0.0.1:19999") // Non-existent server
        .env_remove("CREDVAULT_ACCOUNT")
        .output()
        .expect("failed to execute credvault");

    let code = output.status.code().unwrap_or(-1);
    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (code, stdout, stderr)
}

// ── Version & help ───────────────────────────────────────────────────

#[test]
fn test_version_flag() {
    let (code, stdout, _) = run(&["--version"]);
    assert_eq!(code, 0, "credvault --version should exit 0");
    assert!(
        stdout.contains("credvault"),
        "version output should contain 'credvault': {stdout}"
    );
}

#[test]
fn test_help_flag() {
    let (code, stdout, _) = run(&["--help"]);
    assert_eq!(code, 0, "credvault --help should exit 0");
    assert!(stdout.contains("CredVault CLI"), "help should mention CredVault CLI");
    for command in ["status", "account", "group", "customer", "service-group", "service", "access"] {
        assert!(stdout.contains(command), "help should list '{command}'");
    }
    assert!(stdout.contains("CREDVAULT_ACCOUNT"));
}

#[test]
fn test_subcommand_help() {
    let cases: [(&str, &[&str]); 5] = [
        ("account", &["create", "get", "list", "delete", "rotate-key"]),
        (
            "group",
            &["create", "members", "add-member", "remove-member", "rotate-key"],
        ),
        ("customer", &["create", "get", "list", "delete"]),
        ("service-group", &["create", "get", "list", "delete"]),
        ("service", &["create", "grant", "revoke", "grants", "rotate-key"]),
    ];
    for (sub, actions) in cases {
        let (code, stdout, _) = run(&[sub, "--help"]);
        assert_eq!(code, 0, "credvault {sub} --help should exit 0");
        for action in actions {
            assert!(
                stdout.contains(action),
                "credvault {sub} --help should list '{action}': {stdout}"
            );
        }
    }
}

#[test]
fn test_unknown_subcommand_fails() {
    let (code, _, stderr) = run(&["unseal"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("unrecognized subcommand"), "stderr: {stderr}");
}

#[test]
fn test_missing_required_flag_fails() {
    let (code, _, stderr) = run(&["group", "create", "--name", "ops"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("--public-key"), "stderr: {stderr}");
}

// ── Offline failures ─────────────────────────────────────────────────

#[test]
fn test_status_without_server_fails() {
    let (code, _, stderr) = run(&["status"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("request failed"), "stderr: {stderr}");
}

#[test]
fn test_access_needs_an_account() {
    let (code, _, stderr) = run(&["access"]);
    assert_eq!(code, 1);
    assert!(stderr.contains("CREDVAULT_ACCOUNT"), "stderr: {stderr}");
}

#[test]
fn test_rotation_file_must_exist() {
    let (code, _, stderr) = run(&[
        "group",
        "rotate-key",
        "00000000-0000-0000-0000-000000000000",
        "--file",
        "/nonexistent/rotation.json",
    ]);
    assert_eq!(code, 1);
    assert!(stderr.contains("failed to read"), "stderr: {stderr}");
}

#[test]
fn test_rotation_file_must_be_an_object() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rotation.json");
    fs::write(&path, "[1, 2, 3]").unwrap();

    let (code, _, stderr) = run(&[
        "service",
        "rotate-key",
        "00000000-0000-0000-0000-000000000000",
        "--file",
        path.to_str().unwrap(),
    ]);
    assert_eq!(code, 1);
    assert!(stderr.contains("must contain a JSON object"), "stderr: {stderr}");
}

#[test]
fn test_malformed_rotation_file_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rotation.json");
    fs::write(&path, "{ not json").unwrap();

    let (code, _, stderr) = run(&[
        "account",
        "rotate-key",
        "00000000-0000-0000-0000-000000000000",
        "--file",
        path.to_str().unwrap(),
    ]);
    assert_eq!(code, 1);
    assert!(stderr.contains("failed to parse"), "stderr: {stderr}");
}

#[test]
fn test_bad_metadata_is_rejected_locally() {
    let (code, _, stderr) = run(&[
        "service",
        "create",
        "--service-group",
        "00000000-0000-0000-0000-000000000000",
        "--url",
        "ssh://db1",
        "--secret",
        "ct",
        "--metadata",
        "port=22",
    ]);
    assert_eq!(code, 1);
    assert!(stderr.contains("--metadata"), "stderr: {stderr}");
}
