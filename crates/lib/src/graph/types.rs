//! Node identity and the task node definition.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::execute::actions::Action;
use crate::pathspec::PathSpec;

/// Unique identifier of a node, e.g. `package:current/gradle`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for TaskId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.0)
  }
}

impl From<&str> for TaskId {
  fn from(s: &str) -> Self {
    TaskId(s.to_string())
  }
}

impl From<String> for TaskId {
  fn from(s: String) -> Self {
    TaskId(s)
  }
}

/// A unit of work: declared inputs and outputs plus the action producing the outputs.
///
/// Nodes are immutable once registered with a [`TaskGraphBuilder`](super::TaskGraphBuilder).
/// Paths inside specs and actions are relative to the project root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskNode {
  pub id: TaskId,
  pub inputs: Vec<PathSpec>,
  pub outputs: Vec<PathSpec>,
  pub action: Action,
  pub depends_on: BTreeSet<TaskId>,
  pub description: Option<String>,
}

impl TaskNode {
  pub fn new(id: impl Into<TaskId>, action: Action) -> Self {
    Self {
      id: id.into(),
      inputs: Vec::new(),
      outputs: Vec::new(),
      action,
      depends_on: BTreeSet::new(),
      description: None,
    }
  }

  pub fn input(mut self, spec: PathSpec) -> Self {
    self.inputs.push(spec);
    self
  }

  pub fn output(mut self, spec: PathSpec) -> Self {
    self.outputs.push(spec);
    self
  }

  pub fn depends_on(mut self, id: impl Into<TaskId>) -> Self {
    self.depends_on.insert(id.into());
    self
  }

  pub fn depends_on_all<I, T>(mut self, ids: I) -> Self
  where
    I: IntoIterator<Item = T>,
    T: Into<TaskId>,
  {
    self.depends_on.extend(ids.into_iter().map(Into::into));
    self
  }

  pub fn describe(mut self, description: impl Into<String>) -> Self {
    self.description = Some(description.into());
    self
  }
}
