//! Dependency graph of task nodes.
//!
//! Nodes are registered with a [`TaskGraphBuilder`], which rejects duplicate ids and
//! overlapping outputs as they arrive. [`TaskGraphBuilder::build`] then resolves the
//! declared dependencies into a [`TaskGraph`], rejecting unknown ids and cycles.
//!
//! The finished graph answers scheduling queries: the transitive closure of a set of
//! targets, a topological order, and parallel execution waves.

mod types;

pub use types::{TaskId, TaskNode};

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use petgraph::Direction;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use tracing::debug;

use crate::config::ConfigurationError;
use crate::util::fs::normalize;

/// Whether one path equals or contains the other.
fn overlaps(a: &Path, b: &Path) -> bool {
  a.starts_with(b) || b.starts_with(a)
}

/// Collects nodes during the configuration phase.
#[derive(Debug, Default)]
pub struct TaskGraphBuilder {
  nodes: BTreeMap<TaskId, TaskNode>,
  /// Normalized output paths in registration order.
  outputs: Vec<(PathBuf, TaskId)>,
}

impl TaskGraphBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Register a node.
  ///
  /// # Errors
  ///
  /// - `DuplicateNode` if the id is already registered
  /// - `OutputCollision` if an output equals or nests with another node's output
  /// - `InvalidGlob` if any spec carries a malformed pattern
  pub fn register_node(&mut self, node: TaskNode) -> Result<(), ConfigurationError> {
    if self.nodes.contains_key(&node.id) {
      return Err(ConfigurationError::DuplicateNode(node.id));
    }

    for spec in node.inputs.iter().chain(&node.outputs) {
      spec.validate()?;
    }

    let mut claimed = Vec::with_capacity(node.outputs.len());
    for spec in &node.outputs {
      let path = normalize(&spec.path);
      if let Some((_, owner)) = self.outputs.iter().find(|(existing, _)| overlaps(existing, &path)) {
        return Err(ConfigurationError::OutputCollision {
          first: owner.clone(),
          second: node.id.clone(),
          path,
        });
      }
      claimed.push((path, node.id.clone()));
    }

    debug!(node = %node.id, inputs = node.inputs.len(), outputs = node.outputs.len(), "registered node");
    self.outputs.extend(claimed);
    self.nodes.insert(node.id.clone(), node);
    Ok(())
  }

  /// The registered node whose output covers `path`, if any.
  ///
  /// Used during configuration to infer producer dependencies before a consumer is registered.
  pub fn producer_of(&self, path: &Path) -> Option<&TaskId> {
    let path = normalize(path);
    self
      .outputs
      .iter()
      .find(|(output, _)| overlaps(output, &path))
      .map(|(_, id)| id)
  }

  pub fn contains(&self, id: &TaskId) -> bool {
    self.nodes.contains_key(id)
  }

  /// Resolve dependencies and verify the graph is acyclic.
  pub fn build(self) -> Result<TaskGraph, ConfigurationError> {
    let mut graph = DiGraph::new();
    let mut index = HashMap::new();

    for id in self.nodes.keys() {
      let idx = graph.add_node(id.clone());
      index.insert(id.clone(), idx);
    }

    for (id, node) in &self.nodes {
      let dependent_idx = index[id];
      for dep in &node.depends_on {
        let Some(&dep_idx) = index.get(dep) else {
          return Err(ConfigurationError::UnknownDependency {
            node: id.clone(),
            dependency: dep.clone(),
          });
        };
        // Edge from dependency to dependent
        graph.add_edge(dep_idx, dependent_idx, ());
      }
    }

    if let Err(cycle) = toposort(&graph, None) {
      return Err(ConfigurationError::Cycle(cycle_path(&graph, cycle.node_id())));
    }

    Ok(TaskGraph {
      graph,
      index,
      nodes: self.nodes,
      outputs: self.outputs,
    })
  }
}

/// Walk from `start` until the walk returns to it, naming every node on the way.
fn cycle_path(graph: &DiGraph<TaskId, ()>, start: NodeIndex) -> Vec<TaskId> {
  fn walk(
    graph: &DiGraph<TaskId, ()>,
    current: NodeIndex,
    target: NodeIndex,
    path: &mut Vec<NodeIndex>,
    visited: &mut HashSet<NodeIndex>,
  ) -> bool {
    for next in graph.neighbors_directed(current, Direction::Outgoing) {
      if next == target {
        return true;
      }
      if visited.insert(next) {
        path.push(next);
        if walk(graph, next, target, path, visited) {
          return true;
        }
        path.pop();
      }
    }
    false
  }

  let mut path = vec![start];
  let mut visited = HashSet::from([start]);
  walk(graph, start, start, &mut path, &mut visited);
  path.push(start);
  path.into_iter().map(|idx| graph[idx].clone()).collect()
}

/// A validated, acyclic graph of task nodes.
#[derive(Debug)]
pub struct TaskGraph {
  graph: DiGraph<TaskId, ()>,
  index: HashMap<TaskId, NodeIndex>,
  nodes: BTreeMap<TaskId, TaskNode>,
  outputs: Vec<(PathBuf, TaskId)>,
}

impl TaskGraph {
  pub fn node(&self, id: &TaskId) -> Option<&TaskNode> {
    self.nodes.get(id)
  }

  pub fn nodes(&self) -> impl Iterator<Item = &TaskNode> {
    self.nodes.values()
  }

  pub fn ids(&self) -> impl Iterator<Item = &TaskId> {
    self.nodes.keys()
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  /// Direct dependencies of a node.
  pub fn dependencies(&self, id: &TaskId) -> Vec<&TaskId> {
    let Some(&idx) = self.index.get(id) else {
      return Vec::new();
    };
    let mut deps: Vec<&TaskId> = self
      .graph
      .neighbors_directed(idx, Direction::Incoming)
      .map(|dep_idx| &self.graph[dep_idx])
      .collect();
    deps.sort();
    deps
  }

  /// The targets plus everything they transitively depend on.
  pub fn closure(&self, targets: &BTreeSet<TaskId>) -> Result<BTreeSet<TaskId>, ConfigurationError> {
    let mut seen = BTreeSet::new();
    let mut queue = VecDeque::new();

    for target in targets {
      let idx = self
        .index
        .get(target)
        .ok_or_else(|| ConfigurationError::UnknownTarget(target.clone()))?;
      queue.push_back(*idx);
    }

    while let Some(idx) = queue.pop_front() {
      if seen.insert(self.graph[idx].clone()) {
        queue.extend(self.graph.neighbors_directed(idx, Direction::Incoming));
      }
    }

    Ok(seen)
  }

  /// Closure of `targets` in an order where dependencies come before dependents.
  pub fn topological_order(&self, targets: &BTreeSet<TaskId>) -> Result<Vec<TaskId>, ConfigurationError> {
    Ok(self.waves(targets)?.into_iter().flatten().collect())
  }

  /// Closure of `targets` grouped into waves.
  ///
  /// Every node's dependencies sit in earlier waves, so the nodes of one wave may run
  /// concurrently. Ids within a wave are sorted.
  pub fn waves(&self, targets: &BTreeSet<TaskId>) -> Result<Vec<Vec<TaskId>>, ConfigurationError> {
    let closure = self.closure(targets)?;
    let members: HashSet<NodeIndex> = closure.iter().map(|id| self.index[id]).collect();

    // Kahn's algorithm, one level at a time
    let mut in_degree: HashMap<NodeIndex, usize> = members
      .iter()
      .map(|&idx| {
        let degree = self
          .graph
          .neighbors_directed(idx, Direction::Incoming)
          .filter(|dep| members.contains(dep))
          .count();
        (idx, degree)
      })
      .collect();

    let mut remaining = members;
    let mut waves = Vec::new();

    while !remaining.is_empty() {
      let ready: Vec<NodeIndex> = remaining.iter().filter(|idx| in_degree[idx] == 0).copied().collect();
      if ready.is_empty() {
        let start = *remaining.iter().next().unwrap_or(&NodeIndex::new(0));
        return Err(ConfigurationError::Cycle(cycle_path(&self.graph, start)));
      }

      for &idx in &ready {
        remaining.remove(&idx);
        for dependent in self.graph.neighbors_directed(idx, Direction::Outgoing) {
          if let Some(deg) = in_degree.get_mut(&dependent) {
            *deg = deg.saturating_sub(1);
          }
        }
      }

      let mut wave: Vec<TaskId> = ready.into_iter().map(|idx| self.graph[idx].clone()).collect();
      wave.sort();
      waves.push(wave);
    }

    Ok(waves)
  }

  /// The node whose output covers `path`, if any.
  pub fn producer_of(&self, path: &Path) -> Option<&TaskId> {
    let path = normalize(path);
    self
      .outputs
      .iter()
      .find(|(output, _)| overlaps(output, &path))
      .map(|(_, id)| id)
  }

  /// Check that every input of the given nodes exists under `root` or is produced by some node.
  pub fn validate_inputs(&self, ids: &BTreeSet<TaskId>, root: &Path) -> Result<(), ConfigurationError> {
    for id in ids {
      let Some(node) = self.nodes.get(id) else {
        return Err(ConfigurationError::UnknownTarget(id.clone()));
      };
      for spec in &node.inputs {
        if root.join(&spec.path).exists() {
          continue;
        }
        if self.producer_of(&spec.path).is_some_and(|producer| producer != id) {
          continue;
        }
        return Err(ConfigurationError::MissingInput {
          node: id.clone(),
          path: spec.path.clone(),
        });
      }
    }
    Ok(())
  }
}
