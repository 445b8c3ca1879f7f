//! distgraph-lib: incremental task-graph builds for versioned distributions
//!
//! This crate provides:
//! - `graph`: task nodes and the dependency graph they form
//! - `fingerprint`: content fingerprints and the per-node state store
//! - `execute`: the engine that runs a graph incrementally, and node actions
//! - `aggregate`, `package`, `checksum`: the distribution build steps
//! - `publish`: git tags and hosted releases
//! - `config` and `pipeline`: from a configuration file to a configured graph

pub mod aggregate;
pub mod checksum;
pub mod config;
pub mod consts;
pub mod execute;
pub mod fingerprint;
pub mod graph;
pub mod lock;
pub mod package;
pub mod pathspec;
pub mod pipeline;
pub mod publish;
pub mod util;
