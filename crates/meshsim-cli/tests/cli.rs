//! Integration tests for the meshsim binary.

#![allow(deprecated)] // Command::cargo_bin is deprecated but replacement requires newer assert_cmd

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

const TINY: &str = r#"
name = "tiny"

[[services]]
name = "mysql"
package = "store"
regions = 1
count = 2

[[services]]
name = "www"
package = "denominator"
regions = 0
count = 0
dependencies = ["mysql"]
"#;

fn meshsim(project: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("meshsim").unwrap();
    cmd.arg("--no-color").arg("-C").arg(project.path());
    cmd
}

// ============================================================================
// Basic commands
// ============================================================================

#[test]
fn version_prints_name() {
    Command::cargo_bin("meshsim")
        .unwrap()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("meshsim"));
}

#[test]
fn run_help_lists_overrides() {
    Command::cargo_bin("meshsim")
        .unwrap()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--victim"))
        .stdout(predicate::str::contains("--arch-file"))
        .stdout(predicate::str::contains("--duration"));
}

#[test]
fn name_explains_segments() {
    Command::cargo_bin("meshsim")
        .unwrap()
        .args([
            "--no-color",
            "name",
            "netflixoss.us-east-1.zoneA..cassTurtle00...cassTurtle.priamCassandra",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Zone: zoneA"))
        .stdout(predicate::str::contains("Package: priamCassandra"));
}

#[test]
fn name_rejects_short_names() {
    Command::cargo_bin("meshsim")
        .unwrap()
        .args(["name", "a.b.c"])
        .assert()
        .failure();
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn config_reflects_project_file() {
    let project = TempDir::new().unwrap();
    fs::write(
        project.path().join("meshsim.toml"),
        "[topology]\nregions = 2\n",
    )
    .unwrap();

    meshsim(&project)
        .args(["config", "--format", "toml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("regions = 2"))
        .stdout(predicate::str::contains("[discovery]"));
}

#[test]
fn config_rejects_unknown_format() {
    let project = TempDir::new().unwrap();
    meshsim(&project)
        .args(["config", "--format", "yaml"])
        .assert()
        .failure();
}

// ============================================================================
// Runs
// ============================================================================

#[test]
fn run_small_architecture_and_export_flows() {
    let project = TempDir::new().unwrap();
    let arch = project.path().join("tiny.toml");
    fs::write(&arch, TINY).unwrap();
    fs::write(
        project.path().join("meshsim.toml"),
        "[discovery]\npoll_interval = \"50ms\"\n",
    )
    .unwrap();
    let flow_file = project.path().join("out").join("flow.json");

    meshsim(&project)
        .arg("run")
        .arg("--arch-file")
        .arg(&arch)
        .args(["--duration", "500ms", "--chat", "5ms", "--seed", "3"])
        .arg("--flow-file")
        .arg(&flow_file)
        .assert()
        .success()
        .stdout(predicate::str::contains("Simulation of tiny complete"))
        .stdout(predicate::str::contains("3 sent, 3 acknowledged"));

    let exported = fs::read_to_string(&flow_file).unwrap();
    assert!(exported.trim_start().starts_with('['));
}

#[test]
fn run_with_bad_duration_fails() {
    let project = TempDir::new().unwrap();
    meshsim(&project)
        .args(["run", "--duration", "forever"])
        .assert()
        .failure();
}
