//! CLI integration tests for the wxmp command-line interface.
//!
//! These tests verify:
//! - Help text and argument parsing
//! - Config store commands against a throwaway config directory
//! - Commands that fail before reaching the network
//!
//! Note: nothing here contacts the platform API.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get a command for the wxmp binary.
fn wxmp() -> Command {
    Command::cargo_bin("wxmp").unwrap()
}

/// A wxmp command rooted in `dir`.
fn wxmp_in(dir: &TempDir) -> Command {
    let mut cmd = wxmp();
    cmd.env_remove("WXMP_CONFIG_DIR")
        .arg("--config-dir")
        .arg(dir.path());
    cmd
}

// ─────────────────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_help_displays() {
    wxmp()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("wxmp"))
        .stdout(predicate::str::contains("credential manager"));
}

#[test]
fn test_version_displays() {
    wxmp()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("wxmp"));
}

#[test]
fn test_help_lists_subcommands() {
    wxmp()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("store"))
        .stdout(predicate::str::contains("token"))
        .stdout(predicate::str::contains("call"))
        .stdout(predicate::str::contains("log"))
        .stdout(predicate::str::contains("verify"))
        .stdout(predicate::str::contains("serve"));
}

#[test]
fn test_verbose_flag_accepted() {
    wxmp().args(["--verbose", "--help"]).assert().success();
}

#[test]
fn test_unknown_subcommand_rejected() {
    wxmp().arg("frobnicate").assert().failure();
}

// ─────────────────────────────────────────────────────────────────────────────
// Store Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_store_set_then_get() {
    let dir = TempDir::new().unwrap();

    wxmp_in(&dir)
        .args(["store", "set", "appid", "wx1234567890"])
        .assert()
        .success();

    wxmp_in(&dir)
        .args(["store", "get", "appid"])
        .assert()
        .success()
        .stdout(predicate::str::diff("wx1234567890\n"));

    assert!(dir.path().join("wxmp.db").exists());
}

#[test]
fn test_store_get_unset_fails() {
    let dir = TempDir::new().unwrap();
    wxmp_in(&dir)
        .args(["store", "get", "appsecret"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not set"));
}

#[test]
fn test_store_list_masks_secrets() {
    let dir = TempDir::new().unwrap();
    wxmp_in(&dir)
        .args(["store", "set", "appsecret", "0123456789abcdef"])
        .assert()
        .success();

    wxmp_in(&dir)
        .args(["store", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("appid"))
        .stdout(predicate::str::contains("access_token_expire_time"))
        .stdout(predicate::str::contains("qrcode"))
        .stdout(predicate::str::contains("0123...cdef"))
        .stdout(predicate::str::contains("0123456789abcdef").not());

    wxmp_in(&dir)
        .args(["store", "list", "--show-secrets"])
        .assert()
        .success()
        .stdout(predicate::str::contains("0123456789abcdef"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Token Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_token_status_requires_identity() {
    let dir = TempDir::new().unwrap();
    wxmp_in(&dir)
        .args(["token", "status"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("appid"));
}

#[test]
fn test_token_status_without_credential() {
    let dir = TempDir::new().unwrap();
    wxmp_in(&dir)
        .args(["store", "set", "appid", "wx1"])
        .assert()
        .success();
    wxmp_in(&dir)
        .args(["store", "set", "appsecret", "s3cret"])
        .assert()
        .success();

    wxmp_in(&dir)
        .args(["token", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("missing"));

    wxmp_in(&dir)
        .args(["token", "status", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"present\": false"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Call / Log Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_call_rejects_invalid_body() {
    let dir = TempDir::new().unwrap();
    wxmp_in(&dir)
        .args([
            "call",
            "https://api.weixin.qq.com/cgi-bin/menu/create",
            "--body",
            "{not json",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not valid JSON"));
}

#[test]
fn test_log_show_unknown_id() {
    let dir = TempDir::new().unwrap();
    wxmp_in(&dir)
        .args(["log", "show", "20240101ffffffffffffffffffffffffffffffff"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no diagnostic entry"));
}

#[test]
fn test_log_show_malformed_id() {
    let dir = TempDir::new().unwrap();
    wxmp_in(&dir)
        .args(["log", "show", "nope"])
        .assert()
        .failure();
}

#[test]
fn test_log_show_with_file_backend() {
    let dir = TempDir::new().unwrap();
    std::fs::write(
        dir.path().join("config.toml"),
        "[diagnostics]\nbackend = \"file\"\n",
    )
    .unwrap();

    wxmp_in(&dir)
        .args(["log", "show", "20240101ffffffffffffffffffffffffffffffff"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no diagnostic entry"));
    assert!(dir.path().join("log").is_dir());
}

// ─────────────────────────────────────────────────────────────────────────────
// Verify Tests
// ─────────────────────────────────────────────────────────────────────────────

#[test]
fn test_verify_valid_signature() {
    let dir = TempDir::new().unwrap();
    wxmp_in(&dir)
        .args([
            "verify",
            "--timestamp",
            "1409304348",
            "--nonce",
            "xxxxxx",
            "--signature",
            "b82f87e6b932163675b4860262ee1a3129a7b647",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("signature valid"));
}

#[test]
fn test_verify_explicit_token() {
    let dir = TempDir::new().unwrap();
    wxmp_in(&dir)
        .args([
            "verify",
            "--token",
            "milingerfuyelkdoywb",
            "--timestamp",
            "1700000000",
            "--nonce",
            "abc123",
            "--signature",
            "26fb94a79f879c9102c5e443064bf2a26a3cd8a9",
        ])
        .assert()
        .success();
}

#[test]
fn test_verify_mismatch_fails() {
    let dir = TempDir::new().unwrap();
    wxmp_in(&dir)
        .args([
            "verify",
            "--token",
            "another-token",
            "--timestamp",
            "1409304348",
            "--nonce",
            "xxxxxx",
            "--signature",
            "b82f87e6b932163675b4860262ee1a3129a7b647",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("signature mismatch"));
}

#[test]
fn test_verify_requires_arguments() {
    wxmp().args(["verify", "--nonce", "x"]).assert().failure();
}
