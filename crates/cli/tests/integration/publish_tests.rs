//! Tests for `distgraph publish` that never reach a release host.

use predicates::prelude::*;

use super::common::{BASIC_CONFIG, RELEASE_CONFIG, TestEnv};

#[test]
fn publish_without_token_fails_before_running() {
  let env = TestEnv::project(RELEASE_CONFIG);

  env
    .distgraph_cmd()
    .env_remove("DISTGRAPH_IT_UNSET_TOKEN")
    .arg("publish")
    .assert()
    .failure()
    .stderr(predicate::str::contains("missing credential"))
    .stderr(predicate::str::contains("DISTGRAPH_IT_UNSET_TOKEN"));

  assert!(!env.dist_path("mytool-1.2.3.zip").exists());
}

#[test]
fn publish_without_release_section_fails() {
  let env = TestEnv::project(BASIC_CONFIG);

  env
    .distgraph_cmd()
    .args(["release", "--token", "t"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("invalid release"));
}

#[test]
fn plan_for_publish_lists_release_nodes() {
  let env = TestEnv::project(RELEASE_CONFIG);

  env
    .distgraph_cmd()
    .env_remove("DISTGRAPH_IT_UNSET_TOKEN")
    .args(["plan", "publish"])
    .assert()
    .success()
    .stdout(predicate::str::contains("verify"))
    .stdout(predicate::str::contains("publish"))
    .stdout(predicate::str::contains("To run: 5"));
}
