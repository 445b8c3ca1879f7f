//! Types for graph execution.
//!
//! This module defines the error type raised by node actions, the per-node status
//! model, the execution result and the engine configuration.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigurationError;
use crate::fingerprint::FingerprintError;
use crate::graph::TaskId;
use crate::pathspec::PathSpecError;
use crate::publish::PublishError;
use crate::util::hash::FileHashError;

/// Errors raised while running a node's action.
#[derive(Debug, Error)]
pub enum ActionError {
  /// Command exited non-zero.
  #[error("command failed with exit code {code:?}: {cmd}")]
  CmdFailed { cmd: String, code: Option<i32> },

  /// Command could not be started.
  #[error("failed to spawn {program}: {source}")]
  Spawn {
    program: String,
    #[source]
    source: std::io::Error,
  },

  /// HTTP request failed during a fetch.
  #[error("fetch failed for {url}: {message}")]
  FetchFailed { url: String, message: String },

  /// SHA256 hash mismatch after download.
  #[error("hash mismatch for {url}: expected {expected}, got {actual}")]
  HashMismatch {
    url: String,
    expected: String,
    actual: String,
  },

  /// Stored digest does not match the artifact.
  #[error("checksum mismatch for {artifact}: expected {expected}, got {actual}")]
  ChecksumMismatch {
    artifact: PathBuf,
    expected: String,
    actual: String,
  },

  /// A source tree or artifact the action needs is absent.
  #[error("missing {what}: {path}")]
  Missing { what: &'static str, path: PathBuf },

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Hash(#[from] FileHashError),

  #[error(transparent)]
  PathSpec(#[from] PathSpecError),

  #[error("archive error: {0}")]
  Archive(#[from] zip::result::ZipError),

  #[error(transparent)]
  Fingerprint(#[from] FingerprintError),

  #[error(transparent)]
  Publish(#[from] PublishError),

  #[error("failed to serialize {what}: {message}")]
  Serialize { what: &'static str, message: String },

  /// A publish node ran without a configured release host.
  #[error("no release host configured")]
  NoReleaseHost,

  /// The worker running the action panicked or was cancelled.
  #[error("worker task failed: {0}")]
  Join(String),
}

/// Errors that stop an execution or a plan before any node runs.
#[derive(Debug, Error)]
pub enum ExecuteError {
  #[error(transparent)]
  Configuration(#[from] ConfigurationError),

  #[error(transparent)]
  Fingerprint(#[from] FingerprintError),
}

/// Why a node did not run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "node", rename_all = "snake_case")]
pub enum SkipReason {
  /// A direct dependency failed or was itself skipped.
  DependencyFailed(TaskId),
  /// Fail-fast stopped scheduling after another node failed.
  Cancelled,
}

impl fmt::Display for SkipReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SkipReason::DependencyFailed(id) => write!(f, "dependency {id} did not succeed"),
      SkipReason::Cancelled => f.write_str("cancelled after an earlier failure"),
    }
  }
}

/// Terminal status of a node after an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeStatus {
  Executed,
  UpToDate,
  Failed,
  Skipped,
}

impl fmt::Display for NodeStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      NodeStatus::Executed => "executed",
      NodeStatus::UpToDate => "up-to-date",
      NodeStatus::Failed => "failed",
      NodeStatus::Skipped => "skipped",
    })
  }
}

/// Outcome of executing a set of targets. Every node of the closure lands in exactly one bucket.
#[derive(Debug, Default)]
pub struct ExecutionResult {
  pub executed: BTreeSet<TaskId>,
  pub up_to_date: BTreeSet<TaskId>,
  pub failed: BTreeMap<TaskId, ActionError>,
  pub skipped: BTreeMap<TaskId, SkipReason>,
}

impl ExecutionResult {
  /// True when no node failed.
  pub fn is_success(&self) -> bool {
    self.failed.is_empty()
  }

  pub fn status(&self, id: &TaskId) -> Option<NodeStatus> {
    if self.executed.contains(id) {
      Some(NodeStatus::Executed)
    } else if self.up_to_date.contains(id) {
      Some(NodeStatus::UpToDate)
    } else if self.failed.contains_key(id) {
      Some(NodeStatus::Failed)
    } else if self.skipped.contains_key(id) {
      Some(NodeStatus::Skipped)
    } else {
      None
    }
  }

  /// Statuses of every node, sorted by id.
  pub fn statuses(&self) -> BTreeMap<TaskId, NodeStatus> {
    let mut out = BTreeMap::new();
    out.extend(self.executed.iter().map(|id| (id.clone(), NodeStatus::Executed)));
    out.extend(self.up_to_date.iter().map(|id| (id.clone(), NodeStatus::UpToDate)));
    out.extend(self.failed.keys().map(|id| (id.clone(), NodeStatus::Failed)));
    out.extend(self.skipped.keys().map(|id| (id.clone(), NodeStatus::Skipped)));
    out
  }

  /// Nodes whose outputs are valid after this run.
  pub fn succeeded(&self) -> impl Iterator<Item = &TaskId> {
    self.executed.iter().chain(self.up_to_date.iter())
  }

  pub fn total(&self) -> usize {
    self.executed.len() + self.up_to_date.len() + self.failed.len() + self.skipped.len()
  }
}

/// Configuration for graph execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of nodes to execute in parallel.
  pub parallelism: usize,

  /// Stop scheduling new nodes after the first failure.
  pub fail_fast: bool,

  /// Ignore fingerprints and run every node in the closure.
  pub rerun_all: bool,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      fail_fast: false,
      rerun_all: false,
    }
  }
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}
