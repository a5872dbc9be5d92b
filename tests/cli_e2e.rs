//! Binary surface tests.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn skillshelf() -> Command {
    Command::cargo_bin("skillshelf").expect("binary builds")
}

#[test]
fn help_lists_both_subcommands() {
    skillshelf()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("discover"))
        .stdout(predicate::str::contains("download"));
}

#[test]
fn version_prints() {
    skillshelf()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("skillshelf"));
}

#[test]
fn no_subcommand_fails() {
    skillshelf().assert().failure();
}

#[test]
fn unknown_flag_fails() {
    skillshelf()
        .args(["discover", "--definitely-not-a-flag"])
        .assert()
        .failure();
}

#[test]
fn discover_without_skills_file_exits_with_error() {
    let dir = TempDir::new().expect("tempdir");
    skillshelf()
        .current_dir(dir.path())
        .args(["discover", "--dry-run"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("skills file"));
}

#[test]
fn download_without_credentials_exits_with_error() {
    let dir = TempDir::new().expect("tempdir");
    skillshelf()
        .current_dir(dir.path())
        .arg("download")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("credentials"));
}

#[test]
fn invalid_config_file_is_reported() {
    let dir = TempDir::new().expect("tempdir");
    let config = dir.path().join("config.json");
    std::fs::write(&config, "not json").expect("write config");

    skillshelf()
        .current_dir(dir.path())
        .args(["--config", "config.json", "discover", "--dry-run"])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("config"));
}
