//! Binary smoke tests that need neither hardware nor a NATS server.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn sds(config_dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("sds").unwrap();
    cmd.env_remove("NATS_URL")
        .env_remove("NATS_KV_BUCKET")
        .env_remove("ASSET_PATH")
        .env_remove("RUST_LOG")
        .arg("--config-dir")
        .arg(config_dir.path());
    cmd
}

#[test]
fn test_instance_id_is_created_once() {
    let dir = TempDir::new().unwrap();

    let first = sds(&dir).arg("instance-id").assert().success();
    let first = String::from_utf8(first.get_output().stdout.clone()).unwrap();
    let id = first.trim();
    assert!(uuid::Uuid::parse_str(id).is_ok(), "not a uuid: {id}");

    sds(&dir)
        .arg("instance-id")
        .assert()
        .success()
        .stdout(predicate::str::diff(format!("{id}\n")));

    let stored = std::fs::read_to_string(dir.path().join("instance-id")).unwrap();
    assert_eq!(stored.trim(), id);
}

#[test]
fn test_instance_id_json() {
    let dir = TempDir::new().unwrap();
    let output = sds(&dir).args(["--json", "instance-id"]).assert().success();
    let value: serde_json::Value = serde_json::from_slice(&output.get_output().stdout).unwrap();
    assert!(value["instance_id"].is_string());
}

#[test]
fn test_missing_explicit_config_fails_with_hint() {
    let dir = TempDir::new().unwrap();
    sds(&dir)
        .args(["--config"])
        .arg(dir.path().join("absent.toml"))
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("absent.toml"))
        .stderr(predicate::str::contains("Hint:"));
}

#[test]
fn test_invalid_bucket_is_rejected_before_connecting() {
    let dir = TempDir::new().unwrap();
    sds(&dir)
        .args(["--bucket", "bad.bucket", "run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("bucket"));
}

#[test]
fn test_config_file_errors_are_reported() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("config.toml"), "no_such_setting = 1\n").unwrap();
    sds(&dir)
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("config.toml"));
}

#[test]
fn test_version_mentions_package_version() {
    let dir = TempDir::new().unwrap();
    sds(&dir)
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}
