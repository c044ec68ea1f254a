//! CLI end-to-end tests
//!
//! Tests for the txscope command-line interface.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use std::process::Command;
use tempfile::tempdir;

/// Get a command for the txscope binary
#[allow(deprecated)]
fn txscope_cmd() -> Command {
    let mut cmd = Command::cargo_bin("txscope").unwrap();
    cmd.env_remove("TXSCOPE_DATABASE_URL").env_remove("RUST_LOG");
    cmd
}

fn write_migrations(root: &Path) {
    let dir = root.join("migration");
    fs::create_dir_all(&dir).unwrap();
    fs::write(
        dir.join("00001_create_users.sql"),
        "-- +goose Up\nCREATE TABLE users (id INTEGER PRIMARY KEY, email TEXT NOT NULL);\n\
         -- +goose Down\nDROP TABLE users;\n",
    )
    .unwrap();
    fs::write(
        dir.join("00002_add_users_name.sql"),
        "-- +goose Up\nALTER TABLE users ADD COLUMN name TEXT;\n\
         -- +goose Down\nALTER TABLE users DROP COLUMN name;\n",
    )
    .unwrap();
}

#[test]
fn test_cli_no_args_shows_help() {
    txscope_cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

#[test]
fn test_cli_help_flag() {
    txscope_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("txscope"))
        .stdout(predicate::str::contains("migrate"));
}

#[test]
fn test_cli_version_command() {
    txscope_cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_cli_ping_memory() {
    txscope_cmd()
        .args(["ping", "--url", "sqlite::memory:"])
        .assert()
        .success()
        .stdout(predicate::str::contains("reachable"));
}

#[test]
fn test_cli_ping_invalid_url_fails() {
    txscope_cmd()
        .args(["ping", "--url", "invalid-connection-string"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid-connection-string"));
}

#[test]
fn test_cli_ping_unreachable_fails() {
    txscope_cmd()
        .args(["ping", "--url", "sqlite:///nonexistent-txscope-dir/db.sqlite"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to connect"));
}

#[test]
fn test_cli_migrate_up_status_down() {
    let dir = tempdir().unwrap();
    write_migrations(dir.path());
    let url = format!("sqlite://{}", dir.path().join("app.db").display());
    let migrations = dir.path().to_str().unwrap();

    txscope_cmd()
        .args(["migrate", "--dir", migrations, "--url", &url, "up"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Applied 2 migration(s)"))
        .stdout(predicate::str::contains("Current version: 2"));

    txscope_cmd()
        .args(["migrate", "--dir", migrations, "--url", &url, "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("applied"))
        .stdout(predicate::str::contains("add_users_name"))
        .stdout(predicate::str::contains("pending").not());

    txscope_cmd()
        .args(["migrate", "--dir", migrations, "--url", &url, "down"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Reverted 2 migration(s)"));

    let conn = rusqlite::Connection::open(dir.path().join("app.db")).unwrap();
    let users: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE name = 'users'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(users, 0);
}

#[test]
fn test_cli_migrate_from_config() {
    let dir = tempdir().unwrap();
    write_migrations(dir.path());
    let config_path = dir.path().join("txscope.toml");
    fs::write(
        &config_path,
        format!(
            "[database]\nurl = \"sqlite://{}\"\n\n[migrations]\ndir = \"{}\"\n",
            dir.path().join("cfg.db").display(),
            dir.path().display()
        ),
    )
    .unwrap();

    txscope_cmd()
        .args(["--config", config_path.to_str().unwrap(), "migrate", "status"])
        .assert()
        .success()
        .stdout(predicate::str::contains("pending"));
}

#[test]
fn test_cli_migrate_missing_dir_fails() {
    txscope_cmd()
        .args([
            "migrate",
            "--dir",
            "/nonexistent/txscope/migrations",
            "--url",
            "sqlite::memory:",
            "up",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_cli_validate_config() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("txscope.toml");
    fs::write(
        &config_path,
        "[database]\nurl = \"sqlite::memory:\"\nbegin_mode = \"immediate\"\n",
    )
    .unwrap();

    txscope_cmd()
        .args(["validate", config_path.to_str().unwrap()])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"))
        .stdout(predicate::str::contains("immediate"));
}

#[test]
fn test_cli_validate_rejects_bad_begin_mode() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("txscope.toml");
    fs::write(&config_path, "[database]\nbegin_mode = \"whenever\"\n").unwrap();

    txscope_cmd()
        .args(["validate", config_path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("begin_mode"));
}

#[test]
fn test_cli_env_overrides_url() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("txscope.toml");
    fs::write(&config_path, "[database]\nurl = \"sqlite:///nonexistent-txscope-dir/db\"\n").unwrap();

    txscope_cmd()
        .env("TXSCOPE_DATABASE_URL", "sqlite::memory:")
        .args(["--config", config_path.to_str().unwrap(), "ping"])
        .assert()
        .success();
}
