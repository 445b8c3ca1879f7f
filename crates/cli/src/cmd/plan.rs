//! Implementation of the `distgraph plan` command.
//!
//! Reports the freshness of every node a target would touch, without running anything.

use anyhow::{Context, Result};
use serde::Serialize;

use distgraph_lib::execute::Engine;
use distgraph_lib::execute::actions::ActionContext;
use distgraph_lib::fingerprint::{FingerprintStore, Freshness};
use distgraph_lib::lock::BuildLock;
use distgraph_lib::pipeline::Target;

use crate::RunArgs;
use crate::output::{OutputFormat, print_info, print_json, print_plan_entry, print_stat};

#[derive(Serialize)]
struct PlanOutput {
  target: Target,
  version: String,
  to_run: usize,
  up_to_date: usize,
  nodes: Vec<PlanEntry>,
}

#[derive(Serialize)]
struct PlanEntry {
  id: String,
  #[serde(flatten)]
  freshness: Freshness,
}

pub fn cmd_plan(target: Target, args: &RunArgs, output: OutputFormat) -> Result<bool> {
  let (config, pipeline) = super::configure(args)?;
  let targets = pipeline.targets(target)?;

  let _lock = BuildLock::shared(pipeline.build_dir()).context("Failed to acquire build lock")?;

  let store = FingerprintStore::open(pipeline.state_dir(), pipeline.graph().ids());
  let ctx = ActionContext::new(pipeline.root());
  let engine = Engine::new(pipeline.into_graph(), store, ctx, super::execute_config(args));

  let plan = engine.plan(&targets).context("Failed to compute plan")?;
  let up_to_date = plan.iter().filter(|(_, f)| f.is_up_to_date()).count();
  let to_run = if args.rerun_tasks { plan.len() } else { plan.len() - up_to_date };

  if output.is_json() {
    let nodes = plan
      .into_iter()
      .map(|(id, freshness)| PlanEntry { id: id.0, freshness })
      .collect();
    print_json(&PlanOutput {
      target,
      version: config.version,
      to_run,
      up_to_date,
      nodes,
    })?;
    return Ok(true);
  }

  print_info(&format!("Plan for {target} (version {})", config.version));
  println!();
  for (id, freshness) in &plan {
    print_plan_entry(id.as_str(), freshness, args.rerun_tasks);
  }
  println!();
  print_stat("Nodes", &plan.len().to_string());
  print_stat("To run", &to_run.to_string());
  print_stat("Up to date", &(plan.len() - to_run).to_string());

  Ok(true)
}
