//! Content fingerprints and up-to-date checks.
//!
//! A [`Fingerprint`] summarizes the files selected by one [`PathSpec`]: the SHA-256 of
//! each file keyed by its relative path, folded into one content hash. Timestamps,
//! permissions and the absolute location of the project never contribute.
//!
//! A node is up to date when its last successful run recorded the same action hash,
//! the same input fingerprints and the same output fingerprints that the filesystem
//! shows now. Nodes without outputs are never up to date.

mod store;

pub use store::{FingerprintStore, NodeState};

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::trace;

use crate::graph::{TaskId, TaskNode};
use crate::pathspec::{PathSpec, PathSpecError};
use crate::util::hash::{ContentHash, FileHashError, Hashable, hash_file};

#[derive(Debug, Error)]
pub enum FingerprintError {
  #[error(transparent)]
  Hash(#[from] FileHashError),

  #[error(transparent)]
  PathSpec(#[from] PathSpecError),

  #[error("failed to hash action of {node}: {source}")]
  ActionHash {
    node: TaskId,
    #[source]
    source: serde_json::Error,
  },

  #[error("failed to write fingerprint record {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to serialize fingerprint record: {0}")]
  Serialize(#[source] serde_json::Error),

  #[error("node {0} is not tracked by this fingerprint store")]
  UnknownNode(TaskId),
}

/// Fingerprint of the files selected by one path spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
  pub path_spec_id: String,
  pub content_hash: ContentHash,
  pub paths: BTreeSet<String>,
}

/// Fingerprint the files `spec` selects under `root`.
///
/// The hash covers each selected file's relative path and content, in sorted order,
/// so it does not depend on traversal order or on where `root` lives.
pub fn fingerprint(spec: &PathSpec, root: &Path) -> Result<Fingerprint, FingerprintError> {
  let files = spec.resolved(root).matched_files()?;

  let mut entries = Vec::with_capacity(files.len());
  for file in files {
    let hash = hash_file(&file.absolute)?;
    entries.push((file.relative, hash));
  }
  entries.sort();

  let mut hasher = Sha256::new();
  for (rel, hash) in &entries {
    hasher.update(format!("F:{rel}:{hash}\n").as_bytes());
  }

  let fp = Fingerprint {
    path_spec_id: spec.id(),
    content_hash: ContentHash(hex::encode(hasher.finalize())),
    paths: entries.into_iter().map(|(rel, _)| rel).collect(),
  };
  trace!(path = %spec.path.display(), files = fp.paths.len(), hash = %fp.content_hash, "fingerprinted");
  Ok(fp)
}

/// Fold several fingerprints into one hash, independent of their order.
pub fn composite(fingerprints: &[Fingerprint]) -> ContentHash {
  let mut parts: Vec<(&str, &str)> = fingerprints
    .iter()
    .map(|fp| (fp.path_spec_id.as_str(), fp.content_hash.0.as_str()))
    .collect();
  parts.sort();

  let mut hasher = Sha256::new();
  for (id, hash) in parts {
    hasher.update(format!("S:{id}:{hash}\n").as_bytes());
  }
  ContentHash(hex::encode(hasher.finalize()))
}

pub fn input_fingerprints(node: &TaskNode, root: &Path) -> Result<Vec<Fingerprint>, FingerprintError> {
  node.inputs.iter().map(|spec| fingerprint(spec, root)).collect()
}

pub fn output_fingerprints(node: &TaskNode, root: &Path) -> Result<Vec<Fingerprint>, FingerprintError> {
  node.outputs.iter().map(|spec| fingerprint(spec, root)).collect()
}

/// Hash of the node's action configuration.
pub fn action_hash(node: &TaskNode) -> Result<String, FingerprintError> {
  node
    .action
    .compute_hash()
    .map(|h| h.0)
    .map_err(|source| FingerprintError::ActionHash {
      node: node.id.clone(),
      source,
    })
}

/// Why a node has to run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum StaleReason {
  NoOutputs,
  NoHistory,
  ActionChanged,
  OutputsMissing(PathBuf),
  InputsChanged,
  OutputsChanged,
}

impl fmt::Display for StaleReason {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      StaleReason::NoOutputs => f.write_str("declares no outputs"),
      StaleReason::NoHistory => f.write_str("no previous run recorded"),
      StaleReason::ActionChanged => f.write_str("action configuration changed"),
      StaleReason::OutputsMissing(path) => write!(f, "output {} is missing", path.display()),
      StaleReason::InputsChanged => f.write_str("inputs changed"),
      StaleReason::OutputsChanged => f.write_str("outputs changed since last run"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Freshness {
  UpToDate,
  Stale { reason: StaleReason },
}

impl Freshness {
  pub fn is_up_to_date(&self) -> bool {
    matches!(self, Freshness::UpToDate)
  }

  fn stale(reason: StaleReason) -> Self {
    Freshness::Stale { reason }
  }
}

impl fmt::Display for Freshness {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Freshness::UpToDate => f.write_str("up to date"),
      Freshness::Stale { reason } => write!(f, "stale ({reason})"),
    }
  }
}

/// Compare the node's current state on disk with its last successful run.
pub fn check(node: &TaskNode, root: &Path, previous: Option<&NodeState>) -> Result<Freshness, FingerprintError> {
  if node.outputs.is_empty() {
    return Ok(Freshness::stale(StaleReason::NoOutputs));
  }
  let Some(previous) = previous else {
    return Ok(Freshness::stale(StaleReason::NoHistory));
  };
  if previous.action_hash != action_hash(node)? {
    return Ok(Freshness::stale(StaleReason::ActionChanged));
  }
  if let Some(missing) = node.outputs.iter().find(|spec| !root.join(&spec.path).exists()) {
    return Ok(Freshness::stale(StaleReason::OutputsMissing(missing.path.clone())));
  }
  if composite(&input_fingerprints(node, root)?) != previous.input_hash {
    return Ok(Freshness::stale(StaleReason::InputsChanged));
  }
  if composite(&output_fingerprints(node, root)?) != previous.output_hash {
    return Ok(Freshness::stale(StaleReason::OutputsChanged));
  }
  Ok(Freshness::UpToDate)
}

/// Shorthand for [`check`] when only the verdict matters.
pub fn is_up_to_date(node: &TaskNode, root: &Path, previous: Option<&NodeState>) -> Result<bool, FingerprintError> {
  Ok(check(node, root, previous)?.is_up_to_date())
}
