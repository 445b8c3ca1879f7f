//! Errors detected while loading configuration or assembling the task graph.
//!
//! Every variant is raised before any node executes.

use std::path::PathBuf;

use thiserror::Error;

use crate::graph::TaskId;
use crate::pathspec::PathSpecError;

#[derive(Debug, Error)]
pub enum ConfigurationError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse {path}: {message}")]
  Parse { path: PathBuf, message: String },

  #[error("invalid {field}: {message}")]
  Invalid { field: String, message: String },

  #[error(transparent)]
  InvalidGlob(#[from] PathSpecError),

  #[error("duplicate node id: {0}")]
  DuplicateNode(TaskId),

  #[error("nodes {first} and {second} declare overlapping outputs at {path}")]
  OutputCollision {
    first: TaskId,
    second: TaskId,
    path: PathBuf,
  },

  #[error("node {node} depends on unknown node {dependency}")]
  UnknownDependency { node: TaskId, dependency: TaskId },

  #[error("dependency cycle detected: {}", format_cycle(.0))]
  Cycle(Vec<TaskId>),

  #[error("node {node} declares input {path} which does not exist and is produced by no node")]
  MissingInput { node: TaskId, path: PathBuf },

  #[error("missing credential: {0}")]
  MissingCredential(String),

  #[error("variant {variant} extends unknown variant {base}")]
  UnknownVariant { variant: String, base: String },

  #[error("unknown node: {0}")]
  UnknownTarget(TaskId),
}

fn format_cycle(path: &[TaskId]) -> String {
  path.iter().map(|id| id.as_str()).collect::<Vec<_>>().join(" -> ")
}
