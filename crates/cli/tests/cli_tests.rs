#![allow(deprecated)] // cargo_bin is deprecated but still functional

use assert_cmd::Command;
use predicates::str::contains;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Temp dir holding a config file with filesystem blobs and a SQLite
/// name index.
fn workspace() -> (TempDir, PathBuf) {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("depot.toml");
    let blobs = temp.path().join("blobs");
    let db = temp.path().join("names.db");
    fs::write(
        &config,
        format!(
            r#"
[store]
bucket = "registry"
project_id = "cli-tests"

[store.storage]
type = "filesystem"
path = "{}"

[store.datastore]
type = "sqlite"
path = "{}"
"#,
            blobs.display(),
            db.display()
        ),
    )
    .unwrap();
    (temp, config)
}

fn depotctl(config: &Path) -> Command {
    let mut cmd = Command::cargo_bin("depotctl").unwrap();
    cmd.env("RUST_LOG", "error")
        .env_remove("DEPOT_PROJECT_ID")
        .env_remove("DEPOT_KEY_FILE")
        .arg("--config")
        .arg(config);
    cmd
}

#[test]
fn missing_store_section_fails() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("absent.toml");

    depotctl(&config)
        .arg("names")
        .assert()
        .failure()
        .stderr(contains("missing config"));
}

#[test]
fn add_list_remove_names() {
    let (_temp, config) = workspace();

    depotctl(&config).args(["add", "lodash"]).assert().success();
    depotctl(&config).args(["add", "@types/node"]).assert().success();
    depotctl(&config)
        .arg("names")
        .assert()
        .success()
        .stdout("lodash\n@types/node\n");

    depotctl(&config)
        .args(["remove", "lodash"])
        .assert()
        .success();
    depotctl(&config)
        .args(["remove", "lodash"])
        .assert()
        .failure()
        .stderr(contains("not found"));
    depotctl(&config)
        .arg("names")
        .assert()
        .success()
        .stdout("@types/node\n");
}

#[test]
fn put_then_get_tarball() {
    let (temp, config) = workspace();
    let input = temp.path().join("input.tgz");
    let output = temp.path().join("output.tgz");
    let content: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();
    fs::write(&input, &content).unwrap();

    depotctl(&config)
        .args(["put", "lodash", "lodash-4.17.21.tgz"])
        .arg(&input)
        .assert()
        .success()
        .stdout(contains("100000 bytes"));

    depotctl(&config)
        .args(["get", "lodash", "lodash-4.17.21.tgz", "-o"])
        .arg(&output)
        .assert()
        .success();
    assert_eq!(fs::read(&output).unwrap(), content);

    depotctl(&config)
        .args(["get", "lodash", "lodash-4.17.21.tgz"])
        .assert()
        .success()
        .stdout(content);
}

#[test]
fn put_existing_tarball_conflicts() {
    let (temp, config) = workspace();
    let input = temp.path().join("input.tgz");
    fs::write(&input, b"tarball").unwrap();

    depotctl(&config)
        .args(["put", "lodash", "lodash-1.0.0.tgz"])
        .arg(&input)
        .assert()
        .success();
    depotctl(&config)
        .args(["put", "lodash", "lodash-1.0.0.tgz"])
        .arg(&input)
        .assert()
        .failure()
        .stderr(contains("lodash-1.0.0.tgz package already exist"));
}

#[test]
fn get_missing_tarball_fails_without_output_file() {
    let (temp, config) = workspace();
    let output = temp.path().join("missing.tgz");

    depotctl(&config)
        .args(["get", "lodash", "lodash-1.0.0.tgz", "-o"])
        .arg(&output)
        .assert()
        .failure()
        .stderr(contains("no such package available"));
    assert!(!output.exists());
}

#[test]
fn show_missing_package_fails() {
    let (_temp, config) = workspace();

    depotctl(&config)
        .args(["show", "lodash"])
        .assert()
        .failure()
        .stderr(contains("no such package available"));
}

#[test]
fn delete_and_purge() {
    let (temp, config) = workspace();
    let input = temp.path().join("input.tgz");
    fs::write(&input, b"tarball").unwrap();

    for artifact in ["lodash-1.0.0.tgz", "lodash-2.0.0.tgz"] {
        depotctl(&config)
            .args(["put", "lodash", artifact])
            .arg(&input)
            .assert()
            .success();
    }

    depotctl(&config)
        .args(["delete", "lodash", "lodash-1.0.0.tgz"])
        .assert()
        .success();
    let package_dir = temp.path().join("blobs/registry/lodash");
    assert!(!package_dir.join("lodash-1.0.0.tgz").exists());
    assert!(package_dir.join("lodash-2.0.0.tgz").exists());

    depotctl(&config).args(["purge", "lodash"]).assert().success();
    assert!(!package_dir.exists());
}

#[test]
fn secret_set_then_get() {
    let (_temp, config) = workspace();

    depotctl(&config)
        .args(["secret", "get"])
        .assert()
        .failure()
        .stderr(contains("no secret set"));
    depotctl(&config)
        .args(["secret", "set", "s3cr3t"])
        .assert()
        .success();
    depotctl(&config)
        .args(["secret", "get"])
        .assert()
        .success()
        .stdout("s3cr3t\n");
}

#[test]
fn health_reports_ok() {
    let (_temp, config) = workspace();

    depotctl(&config)
        .arg("health")
        .assert()
        .success()
        .stdout("ok\n");
}
