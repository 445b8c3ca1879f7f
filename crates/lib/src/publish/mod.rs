//! Publishing a release: tag, release metadata, asset uploads.
//!
//! A publish moves through three stages and the [`TagState`] records how far it got:
//!
//! 1. **Tag**: create the git tag locally and push it. An existing tag is a
//!    [`PublishError::TagConflict`] unless overwriting is enabled, in which case the tag
//!    is moved and the remote copy replaced.
//! 2. **Release**: create the hosted release, or update it when it exists and
//!    overwriting is enabled.
//! 3. **Upload**: upload every asset, deleting a same-named asset first.
//!
//! All conflict checks run before anything is mutated, so a conflicting publish
//! leaves no trace. A failure in any stage is reported as [`PublishError::Stage`],
//! carrying the [`TagState`] the attempt left behind.

mod git;
mod github;
mod types;

pub use git::GitTags;
pub use github::GithubReleaseHost;
pub use types::{
  HostError, PublishError, PublishResult, PublishStage, ReleaseDescriptor, ReleaseHost, ReleaseRequest, RemoteAsset,
  RemoteRelease, TagState,
};

use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::execute::actions::CommandExecutor;

pub struct Publisher<'a> {
  host: &'a dyn ReleaseHost,
  executor: &'a dyn CommandExecutor,
  root: &'a Path,
}

impl<'a> Publisher<'a> {
  /// `root` is the project root: git runs there and asset paths resolve against it.
  pub fn new(host: &'a dyn ReleaseHost, executor: &'a dyn CommandExecutor, root: &'a Path) -> Self {
    Self { host, executor, root }
  }

  /// Publish once.
  pub fn publish(&self, release: &ReleaseDescriptor) -> Result<PublishResult, PublishError> {
    let tag = release.tag_name.as_str();
    let overwrite = release.overwrite_existing;
    let git = GitTags::new(self.executor, self.root, &release.remote);

    // Conflict checks: nothing is mutated until these pass
    let local_tag = git
      .local_exists(tag)
      .map_err(PublishError::at(PublishStage::Tag, TagState::Absent))?;
    let remote_tag = git
      .remote_exists(tag)
      .map_err(PublishError::at(PublishStage::Tag, TagState::Absent))?;
    let existing = self
      .host
      .find_release(tag)
      .map_err(PublishError::at(PublishStage::Release, TagState::Absent))?;

    if !overwrite && (local_tag || remote_tag || existing.is_some()) {
      return Err(PublishError::TagConflict { tag: tag.to_string() });
    }

    let mut assets = Vec::with_capacity(release.assets.len());
    for rel in &release.assets {
      let path = self.root.join(rel);
      let name = rel
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
      let content = fs::read(&path).map_err(|e| PublishError::Stage {
        stage: PublishStage::Upload,
        reached: TagState::Absent,
        cause: HostError::Asset {
          path: path.clone(),
          message: e.to_string(),
        },
      })?;
      assets.push((name, content));
    }

    // Tag
    git
      .create(tag, local_tag)
      .map_err(PublishError::at(PublishStage::Tag, TagState::Absent))?;
    git
      .push(tag, remote_tag)
      .map_err(PublishError::at(PublishStage::Tag, TagState::Tagged))?;
    info!(tag = %tag, replaced = remote_tag || local_tag, "tag pushed");

    // Release
    let request = release.request();
    let (remote, created) = match existing {
      Some(found) => {
        let updated = self
          .host
          .update_release(found.id, &request)
          .map_err(PublishError::at(PublishStage::Release, TagState::Tagged))?;
        (updated, false)
      }
      None => {
        let created = self
          .host
          .create_release(&request)
          .map_err(PublishError::at(PublishStage::Release, TagState::Tagged))?;
        (created, true)
      }
    };
    info!(tag = %tag, release = remote.id, created, "release ready");

    // Upload
    let mut uploaded = Vec::new();
    let mut replaced = Vec::new();
    for (name, content) in assets {
      if let Some(old) = remote.assets.iter().find(|a| a.name == name) {
        self
          .host
          .delete_asset(old.id)
          .map_err(PublishError::at(PublishStage::Upload, TagState::Released))?;
        replaced.push(name.clone());
      }
      self
        .host
        .upload_asset(&remote, &name, content)
        .map_err(PublishError::at(PublishStage::Upload, TagState::Released))?;
      info!(asset = %name, "uploaded");
      uploaded.push(name);
    }

    Ok(PublishResult {
      tag_name: tag.to_string(),
      state: TagState::Released,
      release_id: remote.id,
      release_url: remote.html_url.clone(),
      release_created: created,
      tag_replaced: local_tag || remote_tag,
      uploaded,
      replaced_assets: replaced,
      attempts: 1,
    })
  }

  /// Publish, retrying failed stages up to `attempts` times in total.
  ///
  /// Retries only happen with overwriting enabled: a retry has to move the tag or
  /// update the release that the failed attempt left behind.
  pub fn publish_with_retries(&self, release: &ReleaseDescriptor, attempts: u32) -> Result<PublishResult, PublishError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
      match self.publish(release) {
        Ok(mut result) => {
          result.attempts = attempt;
          return Ok(result);
        }
        Err(err @ PublishError::Stage { .. }) if release.overwrite_existing && attempt < attempts => {
          warn!(attempt, max = attempts, error = %err, "publish failed, retrying");
          attempt += 1;
        }
        Err(err) => return Err(err),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::execute::actions::{CommandSpec, ExitCode};
  use crate::util::testutil::{FakeExecutor, FakeReleaseHost};
  use std::collections::BTreeSet;
  use std::sync::{Arc, Mutex};
  use tempfile::{TempDir, tempdir};

  /// Git fake with a tag set shared between local and remote.
  fn git_with_tags(local: &[&str], remote: &[&str]) -> FakeExecutor {
    let local: Arc<Mutex<BTreeSet<String>>> = Arc::new(Mutex::new(local.iter().map(|s| s.to_string()).collect()));
    let remote: BTreeSet<String> = remote.iter().map(|s| format!("refs/tags/{s}")).collect();
    FakeExecutor::with_handler(move |cmd: &CommandSpec| {
      let args: Vec<&str> = cmd.args.iter().map(String::as_str).collect();
      let code = match args.as_slice() {
        ["rev-parse", "-q", "--verify", r] => {
          let tag = r.trim_start_matches("refs/tags/");
          if local.lock().unwrap().contains(tag) { 0 } else { 1 }
        }
        ["ls-remote", .., r] => {
          if remote.contains(*r) {
            0
          } else {
            2
          }
        }
        ["tag", "-f", t] => {
          local.lock().unwrap().insert(t.to_string());
          0
        }
        ["tag", t] => {
          if local.lock().unwrap().insert(t.to_string()) { 0 } else { 128 }
        }
        _ => 0,
      };
      Ok(ExitCode(Some(code)))
    })
  }

  fn project() -> TempDir {
    let temp = tempdir().unwrap();
    fs::create_dir_all(temp.path().join("dist")).unwrap();
    fs::write(temp.path().join("dist/app-1.0.zip"), b"zip").unwrap();
    fs::write(temp.path().join("dist/app-1.0.zip.sha512"), b"digest").unwrap();
    temp
  }

  fn descriptor(overwrite: bool) -> ReleaseDescriptor {
    ReleaseDescriptor::new("v1.0", "1.0")
      .body("notes")
      .overwrite_existing(overwrite)
      .asset("dist/app-1.0.zip")
      .asset("dist/app-1.0.zip.sha512")
  }

  #[test]
  fn fresh_publish_tags_releases_and_uploads() {
    let temp = project();
    let git = git_with_tags(&[], &[]);
    let host = FakeReleaseHost::new();

    let result = Publisher::new(&host, &git, temp.path()).publish(&descriptor(false)).unwrap();

    assert_eq!(result.state, TagState::Released);
    assert!(result.release_created);
    assert!(!result.tag_replaced);
    assert_eq!(result.uploaded, vec!["app-1.0.zip", "app-1.0.zip.sha512"]);
    assert_eq!(host.uploaded("app-1.0.zip").unwrap(), b"zip");

    let lines = git.command_lines();
    assert!(lines.contains(&"git tag v1.0".to_string()));
    assert!(lines.contains(&"git push origin refs/tags/v1.0".to_string()));
    assert!(!lines.iter().any(|l| l.contains(":refs/tags")));
  }

  #[test]
  fn existing_tag_without_overwrite_conflicts_before_mutation() {
    let temp = project();
    let git = git_with_tags(&[], &["v1.0"]);
    let host = FakeReleaseHost::new();

    let err = Publisher::new(&host, &git, temp.path())
      .publish(&descriptor(false))
      .unwrap_err();

    assert!(matches!(err, PublishError::TagConflict { tag } if tag == "v1.0"));
    assert!(!git.command_lines().iter().any(|l| l.starts_with("git tag") || l.starts_with("git push")));
    assert_eq!(host.calls(), vec!["find v1.0"]);
  }

  #[test]
  fn overwrite_moves_tag_updates_release_and_replaces_assets() {
    let temp = project();
    let git = git_with_tags(&["v1.0"], &["v1.0"]);
    let host = FakeReleaseHost::new().with_release("v1.0", &["app-1.0.zip"]);

    let result = Publisher::new(&host, &git, temp.path()).publish(&descriptor(true)).unwrap();

    assert!(!result.release_created);
    assert!(result.tag_replaced);
    assert_eq!(result.replaced_assets, vec!["app-1.0.zip"]);
    let lines = git.command_lines();
    assert!(lines.contains(&"git tag -f v1.0".to_string()));
    assert!(lines.contains(&"git push origin :refs/tags/v1.0".to_string()));
    assert!(host.calls().contains(&"delete-asset 1000".to_string()));

    let names: Vec<String> = host.release("v1.0").unwrap().assets.into_iter().map(|a| a.name).collect();
    assert_eq!(names, vec!["app-1.0.zip", "app-1.0.zip.sha512"]);
  }

  #[test]
  fn failed_push_is_a_tag_stage_error_after_local_tag() {
    let temp = project();
    let git = FakeExecutor::with_handler(|cmd| {
      let code = match cmd.args.first().map(String::as_str) {
        Some("rev-parse") => 1,
        Some("ls-remote") => 2,
        Some("push") => 1,
        _ => 0,
      };
      Ok(ExitCode(Some(code)))
    });
    let host = FakeReleaseHost::new();

    let err = Publisher::new(&host, &git, temp.path())
      .publish(&descriptor(false))
      .unwrap_err();
    assert!(matches!(
      err,
      PublishError::Stage {
        stage: PublishStage::Tag,
        reached: TagState::Tagged,
        ..
      }
    ));
    assert!(git.command_lines().contains(&"git tag v1.0".to_string()));
    assert!(host.calls().iter().all(|c| !c.starts_with("create")));
  }

  #[test]
  fn failed_local_tag_leaves_nothing_behind() {
    let temp = project();
    let git = FakeExecutor::with_handler(|cmd| {
      let code = match cmd.args.first().map(String::as_str) {
        Some("rev-parse") => 1,
        Some("ls-remote") => 2,
        Some("tag") => 128,
        _ => 0,
      };
      Ok(ExitCode(Some(code)))
    });
    let host = FakeReleaseHost::new();

    let err = Publisher::new(&host, &git, temp.path())
      .publish(&descriptor(false))
      .unwrap_err();
    assert_eq!(err.reached(), TagState::Absent);
    assert!(!git.command_lines().iter().any(|l| l.starts_with("git push")));
  }

  #[test]
  fn upload_failure_retries_with_overwrite() {
    let temp = project();
    let git = git_with_tags(&[], &[]);
    let host = FakeReleaseHost::new().fail_uploads(1);

    let result = Publisher::new(&host, &git, temp.path())
      .publish_with_retries(&descriptor(true), 3)
      .unwrap();

    assert_eq!(result.attempts, 2);
    assert!(!result.release_created);
    assert!(result.tag_replaced);
  }

  #[test]
  fn no_retry_without_overwrite() {
    let temp = project();
    let git = git_with_tags(&[], &[]);
    let host = FakeReleaseHost::new().fail_creates(1);

    let err = Publisher::new(&host, &git, temp.path())
      .publish_with_retries(&descriptor(false), 3)
      .unwrap_err();

    assert!(matches!(
      err,
      PublishError::Stage {
        stage: PublishStage::Release,
        reached: TagState::Tagged,
        ..
      }
    ));
    assert_eq!(host.calls().iter().filter(|c| c.starts_with("create")).count(), 1);
  }

  #[test]
  fn retries_are_bounded() {
    let temp = project();
    let git = git_with_tags(&[], &[]);
    let host = FakeReleaseHost::new().fail_uploads(10);

    let err = Publisher::new(&host, &git, temp.path())
      .publish_with_retries(&descriptor(true), 2)
      .unwrap_err();

    assert!(matches!(
      err,
      PublishError::Stage {
        stage: PublishStage::Upload,
        reached: TagState::Released,
        ..
      }
    ));
    assert_eq!(host.calls().iter().filter(|c| c.starts_with("upload")).count(), 2);
  }

  #[test]
  fn missing_asset_fails_before_tagging() {
    let temp = tempdir().unwrap();
    let git = git_with_tags(&[], &[]);
    let host = FakeReleaseHost::new();

    let err = Publisher::new(&host, &git, temp.path())
      .publish(&descriptor(false))
      .unwrap_err();

    assert!(matches!(
      err,
      PublishError::Stage {
        stage: PublishStage::Upload,
        reached: TagState::Absent,
        cause: HostError::Asset { .. }
      }
    ));
    assert!(!git.command_lines().iter().any(|l| l.starts_with("git tag")));
  }
}
