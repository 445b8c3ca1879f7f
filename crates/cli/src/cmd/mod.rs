mod plan;
mod run;

pub use plan::cmd_plan;
pub use run::cmd_run;

use anyhow::{Context, Result};

use distgraph_lib::config::{PipelineConfig, Properties};
use distgraph_lib::execute::ExecuteConfig;
use distgraph_lib::pipeline::Pipeline;

use crate::RunArgs;

/// Load the configuration and build the pipeline graph.
fn configure(args: &RunArgs) -> Result<(PipelineConfig, Pipeline)> {
  let props: Properties = args
    .properties
    .iter()
    .map(|p| (p.key.clone(), p.value.clone()))
    .collect();

  let config = PipelineConfig::load(&args.config, &props, args.token.as_deref())
    .with_context(|| format!("Failed to load config: {}", args.config.display()))?;
  let pipeline = Pipeline::configure(&config).context("Failed to configure pipeline")?;
  Ok((config, pipeline))
}

fn execute_config(args: &RunArgs) -> ExecuteConfig {
  let mut config = ExecuteConfig::default();
  if let Some(parallelism) = args.parallelism {
    config.parallelism = parallelism.max(1);
  }
  config.fail_fast = args.fail_fast;
  config.rerun_all = args.rerun_tasks;
  config
}
