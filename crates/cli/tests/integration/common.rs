//! Shared test helpers for CLI integration tests.

use std::collections::BTreeMap;
use std::io::Read;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// A project with one variant built from `scripts/tool`.
pub const BASIC_CONFIG: &str = r#"
[project]
version_file = "release/version.txt"
notes_file = "release/changes.md"

[[variant]]
ecosystem = "tool"
archive_base_name = "mytool"
  [[variant.sources]]
  path = "scripts/tool"
  exclude = ["**/*.bak"]
  substitutions = [{ token = "<HEAD>", value = "${version}" }]
"#;

/// Two independent variants, `current/tool` and `current/other`.
pub const TWO_VARIANT_CONFIG: &str = r#"
[project]
version_file = "release/version.txt"

[[variant]]
ecosystem = "tool"
archive_base_name = "mytool"
  [[variant.sources]]
  path = "scripts/tool"
  exclude = ["**/*.bak"]
  substitutions = [{ token = "<HEAD>", value = "${version}" }]

[[variant]]
ecosystem = "other"
archive_base_name = "othertool"
  [[variant.sources]]
  path = "scripts/other"
"#;

/// The same project with a release section whose token variable is never set.
pub const RELEASE_CONFIG: &str = r#"
[project]
version_file = "release/version.txt"
notes_file = "release/changes.md"

[[variant]]
ecosystem = "tool"
archive_base_name = "mytool"
  [[variant.sources]]
  path = "scripts/tool"

[release]
repository = "owner/mytool"
api_url = "http://127.0.0.1:9"
token_env = "DISTGRAPH_IT_UNSET_TOKEN"
"#;

/// Isolated test environment.
///
/// Each test gets its own temporary project directory.
pub struct TestEnv {
  pub temp: TempDir,
  pub config_path: PathBuf,
}

impl TestEnv {
  /// A project with sources, a version file and release notes.
  pub fn project(config: &str) -> Self {
    let env = Self::empty();
    env.write_file("distgraph.toml", config);
    env.write_file("release/version.txt", "1.2.3\n");
    env.write_file("release/changes.md", "- first release\n");
    env.write_file("scripts/tool/run.sh", "#!/bin/sh\necho \"tool <HEAD>\"\n");
    env.write_file("scripts/tool/lib/util.sh", "util() { :; }\n");
    env.write_file("scripts/tool/old.bak", "stale\n");
    env.write_file("scripts/other/other.sh", "#!/bin/sh\necho other\n");
    env
  }

  /// Create an empty test environment.
  pub fn empty() -> Self {
    let temp = TempDir::new().unwrap();
    let config_path = temp.path().join("distgraph.toml");
    Self { temp, config_path }
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  /// Canonical project root.
  pub fn root(&self) -> PathBuf {
    dunce::canonicalize(self.temp.path()).unwrap()
  }

  pub fn dist_path(&self, name: &str) -> PathBuf {
    self.root().join("build").join("distributions").join(name)
  }

  /// Get a pre-configured Command for the distgraph binary, pointed at this project.
  pub fn distgraph_cmd(&self) -> Command {
    let mut cmd: Command = cargo_bin_cmd!("distgraph");
    cmd.current_dir(self.temp.path());
    cmd.arg("--config").arg(&self.config_path);
    cmd.env_remove("RUST_LOG");
    cmd
  }
}

/// Read one entry of a zip archive as text.
pub fn zip_entry(archive: &Path, name: &str) -> String {
  let file = std::fs::File::open(archive).unwrap();
  let mut zip = zip::ZipArchive::new(file).unwrap();
  let mut entry = zip.by_name(name).unwrap();
  let mut content = String::new();
  entry.read_to_string(&mut content).unwrap();
  content
}

/// Names of every entry in a zip archive.
pub fn zip_names(archive: &Path) -> Vec<String> {
  let file = std::fs::File::open(archive).unwrap();
  let zip = zip::ZipArchive::new(file).unwrap();
  zip.file_names().map(String::from).collect()
}

/// Run the command with `--output json` and return each node's reported status.
pub fn node_statuses(mut cmd: Command) -> BTreeMap<String, String> {
  let output = cmd.output().unwrap();
  assert!(output.status.success(), "command failed: {}", String::from_utf8_lossy(&output.stderr));

  let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  json["nodes"]
    .as_array()
    .unwrap()
    .iter()
    .map(|n| (n["id"].as_str().unwrap().to_string(), n["status"].as_str().unwrap().to_string()))
    .collect()
}
