//! Types shared by the publisher, the release host trait and its implementations.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::consts::DEFAULT_REMOTE;

/// What to publish: the tag, the release metadata and the asset files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseDescriptor {
  pub tag_name: String,
  pub release_name: String,
  #[serde(default)]
  pub body: String,
  #[serde(default)]
  pub prerelease: bool,
  #[serde(default)]
  pub overwrite_existing: bool,
  /// Asset files relative to the project root. Uploaded under their file names.
  pub assets: BTreeSet<PathBuf>,
  pub remote: String,
}

impl ReleaseDescriptor {
  pub fn new(tag_name: impl Into<String>, release_name: impl Into<String>) -> Self {
    Self {
      tag_name: tag_name.into(),
      release_name: release_name.into(),
      body: String::new(),
      prerelease: false,
      overwrite_existing: false,
      assets: BTreeSet::new(),
      remote: DEFAULT_REMOTE.to_string(),
    }
  }

  pub fn body(mut self, body: impl Into<String>) -> Self {
    self.body = body.into();
    self
  }

  pub fn prerelease(mut self, prerelease: bool) -> Self {
    self.prerelease = prerelease;
    self
  }

  pub fn overwrite_existing(mut self, overwrite: bool) -> Self {
    self.overwrite_existing = overwrite;
    self
  }

  pub fn asset(mut self, path: impl Into<PathBuf>) -> Self {
    self.assets.insert(path.into());
    self
  }

  pub(crate) fn request(&self) -> ReleaseRequest {
    ReleaseRequest {
      tag_name: self.tag_name.clone(),
      name: self.release_name.clone(),
      body: self.body.clone(),
      prerelease: self.prerelease,
    }
  }
}

/// How far a publish got.
///
/// `Tagged` means the tag exists locally, whether or not the push went through.
/// `Released` means the hosted release exists, though its assets may be incomplete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TagState {
  Absent,
  Tagged,
  Released,
}

/// Stage at which a publish failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PublishStage {
  Tag,
  Release,
  Upload,
}

impl fmt::Display for PublishStage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      PublishStage::Tag => "tag",
      PublishStage::Release => "release",
      PublishStage::Upload => "upload",
    })
  }
}

/// Failure talking to git or the release host.
#[derive(Debug, Error)]
pub enum HostError {
  #[error("HTTP {status}: {message}")]
  Http { status: u16, message: String },

  #[error("request failed: {0}")]
  Request(String),

  #[error("unexpected response: {0}")]
  Decode(String),

  #[error("`{cmd}` exited with code {code:?}")]
  Command { cmd: String, code: Option<i32> },

  #[error("failed to run {program}: {message}")]
  Spawn { program: String, message: String },

  #[error("failed to read asset {path}: {message}")]
  Asset { path: PathBuf, message: String },
}

#[derive(Debug, Error)]
pub enum PublishError {
  /// The tag or release already exists and overwriting is disabled.
  #[error("tag {tag} already exists and overwriting is disabled")]
  TagConflict { tag: String },

  /// `reached` is the state the failed attempt left behind.
  #[error("publish failed at the {stage} stage: {cause}")]
  Stage {
    stage: PublishStage,
    reached: TagState,
    #[source]
    cause: HostError,
  },
}

impl PublishError {
  pub(crate) fn at(stage: PublishStage, reached: TagState) -> impl FnOnce(HostError) -> PublishError {
    move |cause| PublishError::Stage { stage, reached, cause }
  }

  /// State reached before the failure. A conflict leaves nothing behind.
  pub fn reached(&self) -> TagState {
    match self {
      PublishError::TagConflict { .. } => TagState::Absent,
      PublishError::Stage { reached, .. } => *reached,
    }
  }
}

/// Release metadata sent when creating or updating a release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseRequest {
  pub tag_name: String,
  pub name: String,
  pub body: String,
  pub prerelease: bool,
}

/// A release as the host reports it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteRelease {
  pub id: u64,
  pub tag_name: String,
  #[serde(default)]
  pub name: Option<String>,
  #[serde(default)]
  pub prerelease: bool,
  #[serde(default)]
  pub html_url: Option<String>,
  pub upload_url: String,
  #[serde(default)]
  pub assets: Vec<RemoteAsset>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteAsset {
  pub id: u64,
  pub name: String,
}

/// Summary of a completed publish, written as the publish node's receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishResult {
  pub tag_name: String,
  pub state: TagState,
  pub release_id: u64,
  pub release_url: Option<String>,
  pub release_created: bool,
  pub tag_replaced: bool,
  pub uploaded: Vec<String>,
  pub replaced_assets: Vec<String>,
  pub attempts: u32,
}

/// Operations the publisher needs from a release host.
pub trait ReleaseHost: Send + Sync {
  fn find_release(&self, tag: &str) -> Result<Option<RemoteRelease>, HostError>;
  fn create_release(&self, request: &ReleaseRequest) -> Result<RemoteRelease, HostError>;
  fn update_release(&self, id: u64, request: &ReleaseRequest) -> Result<RemoteRelease, HostError>;
  fn delete_asset(&self, asset_id: u64) -> Result<(), HostError>;
  fn upload_asset(&self, release: &RemoteRelease, name: &str, content: Vec<u8>) -> Result<RemoteAsset, HostError>;
}
