//! Implementation of `distgraph assemble`, `check` and `publish`.
//!
//! All three configure the same graph and execute a different target set. The build
//! directory is locked exclusively for the duration of the run.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::info;

use distgraph_lib::execute::actions::ActionContext;
use distgraph_lib::execute::{Engine, ExecutionResult, NodeStatus};
use distgraph_lib::fingerprint::FingerprintStore;
use distgraph_lib::graph::TaskId;
use distgraph_lib::lock::BuildLock;
use distgraph_lib::pipeline::Target;
use distgraph_lib::publish::GithubReleaseHost;

use crate::RunArgs;
use crate::output::{OutputFormat, format_duration, print_error, print_json, print_node, print_stat, print_success};

#[derive(Serialize)]
struct RunOutput {
  target: Target,
  success: bool,
  executed: usize,
  up_to_date: usize,
  failed: usize,
  skipped: usize,
  nodes: Vec<NodeOutput>,
}

#[derive(Serialize)]
struct NodeOutput {
  id: String,
  status: NodeStatus,
  #[serde(skip_serializing_if = "Option::is_none")]
  detail: Option<String>,
}

/// Run a target. Returns `Ok(false)` when any node failed.
pub fn cmd_run(target: Target, args: &RunArgs, output: OutputFormat) -> Result<bool> {
  let started = Instant::now();
  let (config, pipeline) = super::configure(args)?;
  let targets = pipeline.targets(target)?;

  let mut ctx = ActionContext::new(pipeline.root());
  if target == Target::Publish {
    let release = config.release.as_ref().context("No [release] section configured")?;
    let token = release.token()?;
    let host = GithubReleaseHost::new(&release.api_url, &release.repository, token.expose())
      .context("Failed to create release client")?;
    ctx = ctx.with_release_host(Arc::new(host));
  }

  let _lock = BuildLock::exclusive(pipeline.build_dir(), &target.to_string()).context("Failed to acquire build lock")?;

  let store = FingerprintStore::open(pipeline.state_dir(), pipeline.graph().ids());
  let engine = Engine::new(pipeline.into_graph(), store, ctx, super::execute_config(args));

  info!(%target, version = %config.version, "running target");
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let result = rt
    .block_on(engine.execute(&targets))
    .with_context(|| format!("Failed to run {target}"))?;

  if output.is_json() {
    print_json(&to_output(target, &result))?;
  } else {
    print_summary(target, &result, started);
  }

  Ok(result.is_success())
}

fn detail(result: &ExecutionResult, id: &TaskId) -> Option<String> {
  if let Some(err) = result.failed.get(id) {
    return Some(err.to_string());
  }
  result.skipped.get(id).map(ToString::to_string)
}

fn to_output(target: Target, result: &ExecutionResult) -> RunOutput {
  RunOutput {
    target,
    success: result.is_success(),
    executed: result.executed.len(),
    up_to_date: result.up_to_date.len(),
    failed: result.failed.len(),
    skipped: result.skipped.len(),
    nodes: result
      .statuses()
      .into_iter()
      .map(|(id, status)| NodeOutput {
        detail: detail(result, &id),
        id: id.0,
        status,
      })
      .collect(),
  }
}

fn print_summary(target: Target, result: &ExecutionResult, started: Instant) {
  for (id, status) in result.statuses() {
    print_node(id.as_str(), status, detail(result, &id).as_deref());
  }

  println!();
  print_stat("Executed", &result.executed.len().to_string());
  print_stat("Up to date", &result.up_to_date.len().to_string());
  print_stat("Failed", &result.failed.len().to_string());
  print_stat("Skipped", &result.skipped.len().to_string());
  print_stat("Duration", &format_duration(started.elapsed()));
  println!();

  if result.is_success() {
    print_success(&format!("{target} complete"));
  } else {
    print_error(&format!("{target} failed: {} node(s) failed", result.failed.len()));
  }
}
