//! Which nodes re-run after a change between two invocations.

use super::common::{BASIC_CONFIG, TWO_VARIANT_CONFIG, TestEnv, node_statuses, zip_entry};

fn assemble_json(env: &TestEnv) -> std::collections::BTreeMap<String, String> {
  let mut cmd = env.distgraph_cmd();
  cmd.args(["--output", "json", "assemble"]);
  node_statuses(cmd)
}

#[test]
fn source_change_leaves_other_variant_untouched() {
  let env = TestEnv::project(TWO_VARIANT_CONFIG);
  let first = assemble_json(&env);
  assert_eq!(first.len(), 6);
  assert!(first.values().all(|s| s == "EXECUTED"), "{first:?}");

  let other_archive = env.dist_path("othertool-1.2.3.zip");
  let other_bytes = std::fs::read(&other_archive).unwrap();

  env.write_file("scripts/tool/run.sh", "#!/bin/sh\necho \"tool <HEAD> changed\"\n");
  let second = assemble_json(&env);

  for id in ["aggregate:current/tool", "package:current/tool", "checksum:current/tool"] {
    assert_eq!(second[id], "EXECUTED", "{id} should re-run: {second:?}");
  }
  for id in ["aggregate:current/other", "package:current/other", "checksum:current/other"] {
    assert_eq!(second[id], "UP_TO_DATE", "{id} should be untouched: {second:?}");
  }
  assert_eq!(std::fs::read(&other_archive).unwrap(), other_bytes);
}

#[test]
fn version_bump_restamps_artifacts() {
  let env = TestEnv::project(BASIC_CONFIG);
  env.distgraph_cmd().arg("check").assert().success();
  assert!(env.dist_path("mytool-1.2.3.zip").exists());

  env.write_file("release/version.txt", "1.2.4\n");
  let mut cmd = env.distgraph_cmd();
  cmd.args(["--output", "json", "check"]);
  let statuses = node_statuses(cmd);

  for id in [
    "aggregate:current/tool",
    "package:current/tool",
    "checksum:current/tool",
    "verify",
  ] {
    assert_eq!(statuses[id], "EXECUTED", "{id} should re-run: {statuses:?}");
  }

  let archive = env.dist_path("mytool-1.2.4.zip");
  assert!(archive.exists());
  let digest = std::fs::read_to_string(env.dist_path("mytool-1.2.4.zip.sha512")).unwrap();
  assert_eq!(digest.len(), 128);
  assert_eq!(zip_entry(&archive, "mytool/run.sh"), "#!/bin/sh\necho \"tool 1.2.4\"\n");

  let report = std::fs::read_to_string(env.root().join("build/reports/checksums.txt")).unwrap();
  assert!(report.contains("mytool-1.2.4.zip"));
  assert!(report.contains(digest.trim()));
}
