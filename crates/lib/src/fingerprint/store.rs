//! Persistent fingerprint records, one JSON file per node.
//!
//! Records live under the store directory as `<hash-of-node-id>.json`. Each node has
//! its own lock, so nodes running concurrently never contend on a shared one. Writes
//! go through a temp file and a rename, so a crash never leaves a half-written record.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::consts::{OBJ_HASH_PREFIX_LEN, STATE_FORMAT_VERSION};
use crate::graph::{TaskId, TaskNode};
use crate::util::fs::write_atomic;
use crate::util::hash::{ContentHash, hash_bytes};

use super::{Fingerprint, FingerprintError, action_hash, composite, output_fingerprints};

/// What a node looked like after its last successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
  pub version: u32,
  pub node: TaskId,
  pub action_hash: String,
  pub input_hash: ContentHash,
  pub output_hash: ContentHash,
  pub inputs: Vec<Fingerprint>,
  pub outputs: Vec<Fingerprint>,
}

impl NodeState {
  /// Record the node's state after a successful run.
  ///
  /// `inputs` are the fingerprints taken right before the action ran; outputs are
  /// fingerprinted now.
  pub fn capture(node: &TaskNode, root: &Path, inputs: Vec<Fingerprint>) -> Result<Self, FingerprintError> {
    let outputs = output_fingerprints(node, root)?;
    Ok(Self {
      version: STATE_FORMAT_VERSION,
      node: node.id.clone(),
      action_hash: action_hash(node)?,
      input_hash: composite(&inputs),
      output_hash: composite(&outputs),
      inputs,
      outputs,
    })
  }
}

/// Directory of per-node fingerprint records.
#[derive(Debug)]
pub struct FingerprintStore {
  dir: PathBuf,
  locks: HashMap<TaskId, Mutex<()>>,
}

impl FingerprintStore {
  /// Open the store at `dir`, tracking the given nodes. The directory is created lazily.
  pub fn open<'a>(dir: impl Into<PathBuf>, nodes: impl IntoIterator<Item = &'a TaskId>) -> Self {
    let locks = nodes.into_iter().map(|id| (id.clone(), Mutex::new(()))).collect();
    Self { dir: dir.into(), locks }
  }

  pub fn dir(&self) -> &Path {
    &self.dir
  }

  fn lock(&self, id: &TaskId) -> Result<MutexGuard<'_, ()>, FingerprintError> {
    let lock = self
      .locks
      .get(id)
      .ok_or_else(|| FingerprintError::UnknownNode(id.clone()))?;
    Ok(lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner()))
  }

  /// Path of the record file for a node.
  pub fn record_path(&self, id: &TaskId) -> PathBuf {
    let hash = hash_bytes(id.as_str().as_bytes());
    self.dir.join(format!("{}.json", &hash.0[..OBJ_HASH_PREFIX_LEN]))
  }

  /// Load a node's last recorded state.
  ///
  /// Missing, unreadable or outdated records count as no history.
  pub fn load(&self, id: &TaskId) -> Result<Option<NodeState>, FingerprintError> {
    let _guard = self.lock(id)?;
    let path = self.record_path(id);

    let content = match fs::read_to_string(&path) {
      Ok(content) => content,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
      Err(e) => {
        warn!(node = %id, path = %path.display(), error = %e, "unreadable fingerprint record, treating as absent");
        return Ok(None);
      }
    };

    match serde_json::from_str::<NodeState>(&content) {
      Ok(state) if state.version == STATE_FORMAT_VERSION && &state.node == id => Ok(Some(state)),
      Ok(state) => {
        debug!(node = %id, version = state.version, "discarding outdated fingerprint record");
        Ok(None)
      }
      Err(e) => {
        warn!(node = %id, path = %path.display(), error = %e, "corrupt fingerprint record, treating as absent");
        Ok(None)
      }
    }
  }

  /// Persist a node's state, replacing any earlier record.
  pub fn save(&self, state: &NodeState) -> Result<(), FingerprintError> {
    let _guard = self.lock(&state.node)?;
    let path = self.record_path(&state.node);

    let content = serde_json::to_string_pretty(state).map_err(FingerprintError::Serialize)?;
    write_atomic(&path, content.as_bytes()).map_err(|source| FingerprintError::Write {
      path: path.clone(),
      source,
    })?;

    debug!(node = %state.node, path = %path.display(), "saved fingerprint record");
    Ok(())
  }

  /// Forget a node's history so its next run executes.
  pub fn invalidate(&self, id: &TaskId) -> Result<(), FingerprintError> {
    let _guard = self.lock(id)?;
    let path = self.record_path(id);
    match fs::remove_file(&path) {
      Ok(()) => Ok(()),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(source) => Err(FingerprintError::Write { path, source }),
    }
  }
}
