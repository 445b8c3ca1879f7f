//! Tests for `distgraph assemble`, `check` and `plan`.

use predicates::prelude::*;

use super::common::{BASIC_CONFIG, TestEnv, zip_entry, zip_names};

#[test]
fn assemble_builds_archive_and_checksum() {
  let env = TestEnv::project(BASIC_CONFIG);

  env
    .distgraph_cmd()
    .arg("assemble")
    .assert()
    .success()
    .stdout(predicate::str::contains("Executed: 3"));

  let archive = env.dist_path("mytool-1.2.3.zip");
  assert!(archive.exists(), "archive should exist at {}", archive.display());

  let digest = std::fs::read_to_string(env.dist_path("mytool-1.2.3.zip.sha512")).unwrap();
  assert_eq!(digest.len(), 128);
  assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn assemble_applies_substitutions_and_filters() {
  let env = TestEnv::project(BASIC_CONFIG);
  env.distgraph_cmd().arg("assemble").assert().success();

  let archive = env.dist_path("mytool-1.2.3.zip");
  assert_eq!(zip_entry(&archive, "mytool/run.sh"), "#!/bin/sh\necho \"tool 1.2.3\"\n");
  assert_eq!(zip_entry(&archive, "mytool/lib/util.sh"), "util() { :; }\n");

  let names = zip_names(&archive);
  assert!(!names.iter().any(|n| n.ends_with("old.bak")), "excluded file archived: {names:?}");
}

#[test]
fn second_assemble_is_up_to_date() {
  let env = TestEnv::project(BASIC_CONFIG);
  env.distgraph_cmd().arg("assemble").assert().success();
  let first = std::fs::read(env.dist_path("mytool-1.2.3.zip")).unwrap();

  env
    .distgraph_cmd()
    .arg("assemble")
    .assert()
    .success()
    .stdout(predicate::str::contains("Executed: 0"))
    .stdout(predicate::str::contains("Up to date: 3"));

  assert_eq!(std::fs::read(env.dist_path("mytool-1.2.3.zip")).unwrap(), first);
}

#[test]
fn changed_source_rebuilds_variant() {
  let env = TestEnv::project(BASIC_CONFIG);
  env.distgraph_cmd().arg("assemble").assert().success();

  env.write_file("scripts/tool/run.sh", "#!/bin/sh\necho \"tool <HEAD> v2\"\n");
  env
    .distgraph_cmd()
    .arg("assemble")
    .assert()
    .success()
    .stdout(predicate::str::contains("Executed: 3"));

  let archive = env.dist_path("mytool-1.2.3.zip");
  assert_eq!(zip_entry(&archive, "mytool/run.sh"), "#!/bin/sh\necho \"tool 1.2.3 v2\"\n");
}

#[test]
fn rerun_tasks_ignores_fingerprints() {
  let env = TestEnv::project(BASIC_CONFIG);
  env.distgraph_cmd().arg("assemble").assert().success();

  env
    .distgraph_cmd()
    .args(["--rerun-tasks", "assemble"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Executed: 3"));
}

#[test]
fn assemble_json_output() {
  let env = TestEnv::project(BASIC_CONFIG);

  let output = env.distgraph_cmd().args(["--output", "json", "assemble"]).output().unwrap();
  assert!(output.status.success());

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert_eq!(json["target"], "assemble");
  assert_eq!(json["success"], true);
  assert_eq!(json["executed"], 3);
  let ids: Vec<&str> = json["nodes"]
    .as_array()
    .unwrap()
    .iter()
    .map(|n| n["id"].as_str().unwrap())
    .collect();
  assert_eq!(ids, vec!["aggregate:current/tool", "checksum:current/tool", "package:current/tool"]);
}

#[test]
fn check_verifies_checksums() {
  let env = TestEnv::project(BASIC_CONFIG);

  env
    .distgraph_cmd()
    .arg("check")
    .assert()
    .success()
    .stdout(predicate::str::contains("check complete"));

  let report = env.root().join("build/reports/checksums.txt");
  assert!(report.exists());
}

#[test]
fn plan_reports_stale_then_fresh() {
  let env = TestEnv::project(BASIC_CONFIG);

  env
    .distgraph_cmd()
    .arg("plan")
    .assert()
    .success()
    .stdout(predicate::str::contains("To run: 3"))
    .stdout(predicate::str::contains("no previous run recorded"));

  env.distgraph_cmd().arg("assemble").assert().success();

  env
    .distgraph_cmd()
    .arg("plan")
    .assert()
    .success()
    .stdout(predicate::str::contains("To run: 0"));

  assert!(!env.root().join("build/reports").exists(), "plan must not run anything");
}

#[test]
fn missing_source_is_a_configuration_error() {
  let env = TestEnv::project(BASIC_CONFIG);
  std::fs::remove_dir_all(env.root().join("scripts/tool")).unwrap();

  env
    .distgraph_cmd()
    .arg("assemble")
    .assert()
    .failure()
    .stderr(predicate::str::contains("does not exist"));

  assert!(!env.dist_path("mytool-1.2.3.zip").exists());
}
