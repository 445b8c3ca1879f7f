//! Turns a [`PipelineConfig`] into a task graph.
//!
//! Node ids and what they do:
//!
//! | id                   | action                                         |
//! |----------------------|------------------------------------------------|
//! | `fetch:<name>`       | download a pinned artifact                     |
//! | `unpack:<name>`      | extract it under `<build>/unpacked/<name>`     |
//! | `generate:<name>`    | run the code generator over the templates      |
//! | `aggregate:<variant>`| merge the variant's sources                    |
//! | `package:<variant>`  | archive the merged tree                        |
//! | `checksum:<variant>` | write the archive's `.sha512`                  |
//! | `verify`             | re-check every archive against its digest      |
//! | `publish`            | tag, release and upload archives plus digests  |
//!
//! Dependencies between nodes are inferred from paths: a node depends on whichever
//! node declares an output covering one of its inputs.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::checksum::digest_path;
use crate::config::{ConfigurationError, DistributionVariant, PipelineConfig};
use crate::consts::STATE_DIR_NAME;
use crate::execute::actions::{Action, url_to_filename};
use crate::graph::{TaskGraph, TaskGraphBuilder, TaskId, TaskNode};
use crate::package::archive_file_name;
use crate::pathspec::PathSpec;
use crate::publish::ReleaseDescriptor;

/// What the user asked to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Target {
  /// Every checksum node and everything upstream of it.
  Assemble,
  /// The verify node.
  Check,
  /// The publish node.
  Publish,
}

impl fmt::Display for Target {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Target::Assemble => "assemble",
      Target::Check => "check",
      Target::Publish => "publish",
    })
  }
}

pub const VERIFY_NODE: &str = "verify";
pub const PUBLISH_NODE: &str = "publish";

/// The configured graph plus where its state lives.
#[derive(Debug)]
pub struct Pipeline {
  graph: TaskGraph,
  root: PathBuf,
  build_dir: PathBuf,
  checksum_nodes: BTreeSet<TaskId>,
  has_release: bool,
}

impl Pipeline {
  /// Build the complete graph. Every value is resolved here; execution only reads it.
  pub fn configure(config: &PipelineConfig) -> Result<Self, ConfigurationError> {
    let mut builder = Wiring::default();

    for fetch in &config.fetches {
      let download = config
        .build_dir
        .join("downloads")
        .join(url_to_filename(&fetch.url));
      let fetch_id = format!("fetch:{}", fetch.name);
      builder.add(
        TaskNode::new(
          fetch_id.as_str(),
          Action::Fetch {
            url: fetch.url.clone(),
            sha256: fetch.sha256.clone(),
            dest: download.clone(),
          },
        )
        .output(PathSpec::new(&download))
        .describe(format!("download {}", fetch.url)),
      )?;

      if fetch.unpack {
        let dest = config.build_dir.join("unpacked").join(&fetch.name);
        builder.add(
          TaskNode::new(
            format!("unpack:{}", fetch.name),
            Action::Unpack {
              archive: download.clone(),
              dest: dest.clone(),
            },
          )
          .input(PathSpec::new(&download))
          .output(PathSpec::new(&dest))
          .describe(format!("unpack {}", fetch.name)),
        )?;
      }
    }

    if let Some(generator) = &config.generator {
      builder.add(
        TaskNode::new(
          format!("generate:{}", generator.name),
          Action::Generate {
            tool: generator.home.join(&generator.tool),
            templates: generator.templates.clone(),
            output: generator.output.clone(),
          },
        )
        .input(generator.templates.clone())
        .input(PathSpec::new(&generator.home))
        .output(PathSpec::new(&generator.output))
        .describe("generate scripts from templates"),
      )?;
    }

    let mut archives = Vec::new();
    let mut checksum_nodes = BTreeSet::new();
    for variant in &config.variants {
      let (archive, checksum_id) = add_variant(&mut builder, config, variant)?;
      archives.push(archive);
      checksum_nodes.insert(checksum_id);
    }

    let digests: Vec<PathBuf> = archives.iter().map(|a| digest_path(a)).collect();

    if !archives.is_empty() {
      let mut verify = TaskNode::new(
        VERIFY_NODE,
        Action::Verify {
          artifacts: archives.clone(),
          report: config.build_dir.join("reports").join("checksums.txt"),
        },
      )
      .output(PathSpec::new(config.build_dir.join("reports").join("checksums.txt")))
      .depends_on_all(checksum_nodes.iter().cloned())
      .describe("verify archive checksums");
      for path in archives.iter().chain(&digests) {
        verify = verify.input(PathSpec::new(path));
      }
      builder.add(verify)?;
    }

    let has_release = config.release.is_some() && !archives.is_empty();
    if let Some(release) = config.release.as_ref().filter(|_| has_release) {
      let mut descriptor = ReleaseDescriptor::new(&release.tag_name, &release.release_name)
        .body(config.notes.clone())
        .prerelease(release.prerelease)
        .overwrite_existing(release.overwrite_existing);
      descriptor.remote = release.remote.clone();
      for path in archives.iter().chain(&digests) {
        descriptor = descriptor.asset(path);
      }

      let receipt = config
        .build_dir
        .join("release")
        .join(format!("{}.json", release.tag_name));
      let mut node = TaskNode::new(
        PUBLISH_NODE,
        Action::Publish {
          release: descriptor,
          receipt: receipt.clone(),
        },
      )
      .input(PathSpec::new(&config.version_file))
      .output(PathSpec::new(receipt))
      .depends_on(VERIFY_NODE)
      .describe(format!("publish release {}", release.tag_name));
      if let Some(notes) = &config.notes_file {
        node = node.input(PathSpec::new(notes));
      }
      for path in archives.iter().chain(&digests) {
        node = node.input(PathSpec::new(path));
      }
      builder.add(node)?;
    }

    let graph = builder.finish()?;
    debug!(nodes = graph.len(), "configured pipeline");

    Ok(Pipeline {
      graph,
      root: config.root.clone(),
      build_dir: config.root.join(&config.build_dir),
      checksum_nodes,
      has_release,
    })
  }

  pub fn graph(&self) -> &TaskGraph {
    &self.graph
  }

  pub fn into_graph(self) -> TaskGraph {
    self.graph
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Absolute build directory.
  pub fn build_dir(&self) -> &Path {
    &self.build_dir
  }

  /// Directory of the fingerprint records.
  pub fn state_dir(&self) -> PathBuf {
    self.build_dir.join(STATE_DIR_NAME).join("state")
  }

  /// Node ids a target resolves to.
  pub fn targets(&self, target: Target) -> Result<BTreeSet<TaskId>, ConfigurationError> {
    match target {
      Target::Assemble => Ok(self.checksum_nodes.clone()),
      Target::Check if self.graph.node(&TaskId::from(VERIFY_NODE)).is_some() => {
        Ok(BTreeSet::from([TaskId::from(VERIFY_NODE)]))
      }
      Target::Check => Ok(BTreeSet::new()),
      Target::Publish if self.has_release => Ok(BTreeSet::from([TaskId::from(PUBLISH_NODE)])),
      Target::Publish => Err(ConfigurationError::Invalid {
        field: "release".to_string(),
        message: "publishing needs a [release] section and at least one variant".to_string(),
      }),
    }
  }
}

/// Adds the aggregate, package and checksum nodes of one variant. Returns the
/// archive path and the checksum node id.
fn add_variant(
  builder: &mut Wiring,
  config: &PipelineConfig,
  variant: &DistributionVariant,
) -> Result<(PathBuf, TaskId), ConfigurationError> {
  let staging = config.build_dir.join("dist").join(&variant.name);
  let aggregate_id = TaskId::from(format!("aggregate:{}", variant.name));
  let package_id = TaskId::from(format!("package:{}", variant.name));
  let checksum_id = TaskId::from(format!("checksum:{}", variant.name));

  let mut aggregate = TaskNode::new(
    aggregate_id.clone(),
    Action::Aggregate {
      sources: variant.sources.clone(),
      destination: staging.clone(),
    },
  )
  .input(PathSpec::new(&config.version_file))
  .output(PathSpec::new(&staging))
  .describe(format!("assemble the {} distribution", variant.name));
  for source in &variant.sources {
    aggregate = aggregate.input(source.clone());
  }
  builder.add(aggregate)?;

  let archive = config
    .dist_dir
    .join(archive_file_name(&variant.archive_base_name, &variant.version, variant.format));
  builder.add(
    TaskNode::new(
      package_id.clone(),
      Action::Package {
        source: staging.clone(),
        base_name: variant.archive_base_name.clone(),
        version: variant.version.clone(),
        out_dir: config.dist_dir.clone(),
        format: variant.format,
      },
    )
    .input(PathSpec::new(&staging))
    .input(PathSpec::new(&config.version_file))
    .output(PathSpec::new(&archive))
    .describe(format!("package {}", variant.name)),
  )?;

  builder.add(
    TaskNode::new(
      checksum_id.clone(),
      Action::Checksum {
        artifacts: vec![archive.clone()],
      },
    )
    .input(PathSpec::new(&archive))
    .output(PathSpec::new(digest_path(&archive)))
    .describe(format!("checksum {}", variant.name)),
  )?;

  Ok((archive, checksum_id))
}

/// Graph builder that wires path-based dependencies as nodes arrive.
///
/// Producers are registered before their consumers, so each input's producer is
/// already known when a node is added.
#[derive(Default)]
struct Wiring {
  builder: TaskGraphBuilder,
}

impl Wiring {
  fn add(&mut self, node: TaskNode) -> Result<(), ConfigurationError> {
    let producers: Vec<TaskId> = node
      .inputs
      .iter()
      .filter_map(|spec| self.builder.producer_of(&spec.path))
      .filter(|producer| **producer != node.id)
      .cloned()
      .collect();
    if !producers.is_empty() {
      debug!(node = %node.id, dependencies = ?producers, "inferred dependencies");
    }
    self.builder.register_node(node.depends_on_all(producers))
  }

  fn finish(self) -> Result<TaskGraph, ConfigurationError> {
    self.builder.build()
  }
}
