//! Graph execution.
//!
//! The [`Engine`] runs the closure of a set of targets wave by wave:
//! - nodes whose dependencies all completed run concurrently, bounded by the
//!   configured parallelism
//! - up-to-date nodes are skipped via the fingerprint store
//! - a failed node skips its dependents while independent branches continue
//! - in fail-fast mode nothing new is scheduled after the first failure

pub mod actions;
pub mod types;

use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::fingerprint::{self, FingerprintStore, Freshness, NodeState};
use crate::graph::{TaskGraph, TaskId, TaskNode};

use actions::{ActionContext, run_action};

pub use types::{ActionError, ExecuteConfig, ExecuteError, ExecutionResult, NodeStatus, SkipReason};

/// How a scheduled node finished without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeRun {
  Executed,
  UpToDate,
  Cancelled,
}

/// Runs a [`TaskGraph`] against a [`FingerprintStore`].
#[derive(Debug)]
pub struct Engine {
  graph: Arc<TaskGraph>,
  store: Arc<FingerprintStore>,
  ctx: ActionContext,
  config: ExecuteConfig,
}

impl Engine {
  pub fn new(graph: TaskGraph, store: FingerprintStore, ctx: ActionContext, config: ExecuteConfig) -> Self {
    Self {
      graph: Arc::new(graph),
      store: Arc::new(store),
      ctx,
      config,
    }
  }

  pub fn graph(&self) -> &TaskGraph {
    &self.graph
  }

  pub fn store(&self) -> &FingerprintStore {
    &self.store
  }

  /// Freshness of every node in the closure of `targets`, in execution order.
  ///
  /// Nothing is executed. Nodes downstream of a stale node may still report up to date
  /// here even though running them could change their inputs.
  pub fn plan(&self, targets: &BTreeSet<TaskId>) -> Result<Vec<(TaskId, Freshness)>, ExecuteError> {
    let order = self.graph.topological_order(targets)?;
    let mut plan = Vec::with_capacity(order.len());
    for id in order {
      let Some(node) = self.graph.node(&id) else {
        continue;
      };
      let previous = self.store.load(&id)?;
      let freshness = fingerprint::check(node, &self.ctx.root, previous.as_ref())?;
      plan.push((id, freshness));
    }
    Ok(plan)
  }

  /// Execute `targets` and everything they depend on.
  ///
  /// Configuration problems (unknown targets, missing inputs) fail before anything
  /// runs. Node failures never make this return `Err`; they are recorded in the result.
  pub async fn execute(&self, targets: &BTreeSet<TaskId>) -> Result<ExecutionResult, ExecuteError> {
    let waves = self.graph.waves(targets)?;
    let closure: BTreeSet<TaskId> = waves.iter().flatten().cloned().collect();
    self.graph.validate_inputs(&closure, &self.ctx.root)?;

    info!(
      nodes = closure.len(),
      waves = waves.len(),
      parallelism = self.config.parallelism,
      "starting execution"
    );

    let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
    let cancelled = Arc::new(AtomicBool::new(false));
    let mut result = ExecutionResult::default();

    for (wave_idx, wave) in waves.iter().enumerate() {
      debug!(wave = wave_idx, nodes = wave.len(), "executing wave");

      let mut join_set = JoinSet::new();
      let mut pending: BTreeSet<TaskId> = BTreeSet::new();

      for id in wave {
        let failed_dep = self
          .graph
          .dependencies(id)
          .into_iter()
          .find(|dep| result.failed.contains_key(*dep) || result.skipped.contains_key(*dep));

        if let Some(dep) = failed_dep {
          let reason = match result.skipped.get(dep) {
            Some(SkipReason::Cancelled) => SkipReason::Cancelled,
            _ => {
              warn!(node = %id, dependency = %dep, "skipping node due to failed dependency");
              SkipReason::DependencyFailed(dep.clone())
            }
          };
          result.skipped.insert(id.clone(), reason);
          continue;
        }

        if cancelled.load(Ordering::SeqCst) {
          debug!(node = %id, "cancelled");
          result.skipped.insert(id.clone(), SkipReason::Cancelled);
          continue;
        }

        let Some(node) = self.graph.node(id).cloned() else {
          continue;
        };
        let store = self.store.clone();
        let ctx = self.ctx.clone();
        let semaphore = semaphore.clone();
        let cancelled = cancelled.clone();
        let fail_fast = self.config.fail_fast;
        let rerun_all = self.config.rerun_all;

        pending.insert(id.clone());
        join_set.spawn(async move {
          let id = node.id.clone();
          let Ok(_permit) = semaphore.acquire_owned().await else {
            return (id, Ok(NodeRun::Cancelled));
          };
          if fail_fast && cancelled.load(Ordering::SeqCst) {
            return (id, Ok(NodeRun::Cancelled));
          }

          let outcome = tokio::task::spawn_blocking(move || run_node(&node, &store, &ctx, rerun_all))
            .await
            .unwrap_or_else(|e| Err(ActionError::Join(e.to_string())));

          if outcome.is_err() && fail_fast {
            cancelled.store(true, Ordering::SeqCst);
          }
          (id, outcome)
        });
      }

      while let Some(joined) = join_set.join_next().await {
        let (id, outcome) = match joined {
          Ok(done) => done,
          Err(e) => {
            error!(error = %e, "node task panicked");
            continue;
          }
        };
        pending.remove(&id);

        match outcome {
          Ok(NodeRun::Executed) => {
            info!(node = %id, "executed");
            result.executed.insert(id);
          }
          Ok(NodeRun::UpToDate) => {
            info!(node = %id, "up to date");
            result.up_to_date.insert(id);
          }
          Ok(NodeRun::Cancelled) => {
            debug!(node = %id, "cancelled");
            result.skipped.insert(id, SkipReason::Cancelled);
          }
          Err(e) => {
            error!(node = %id, error = %e, "node failed");
            result.failed.insert(id, e);
          }
        }
      }

      // A task that panicked outside its action never reported back
      for id in pending {
        result
          .failed
          .insert(id, ActionError::Join("node task did not complete".to_string()));
      }
    }

    info!(
      executed = result.executed.len(),
      up_to_date = result.up_to_date.len(),
      failed = result.failed.len(),
      skipped = result.skipped.len(),
      "execution complete"
    );

    Ok(result)
  }
}

/// Run one node: check freshness, run the action, record the new state.
///
/// A failed action invalidates the node's record so the next run retries it.
fn run_node(
  node: &TaskNode,
  store: &FingerprintStore,
  ctx: &ActionContext,
  rerun_all: bool,
) -> Result<NodeRun, ActionError> {
  let root = &ctx.root;

  if !rerun_all {
    let previous = store.load(&node.id)?;
    match fingerprint::check(node, root, previous.as_ref())? {
      Freshness::UpToDate => return Ok(NodeRun::UpToDate),
      Freshness::Stale { reason } => debug!(node = %node.id, reason = %reason, "node is stale"),
    }
  }

  let inputs = fingerprint::input_fingerprints(node, root)?;

  info!(node = %node.id, action = node.action.kind(), "executing");
  if let Err(e) = run_action(&node.action, ctx) {
    if let Err(invalidate_err) = store.invalidate(&node.id) {
      warn!(node = %node.id, error = %invalidate_err, "failed to invalidate fingerprint record");
    }
    return Err(e);
  }

  let state = NodeState::capture(node, root, inputs)?;
  store.save(&state)?;
  Ok(NodeRun::Executed)
}
