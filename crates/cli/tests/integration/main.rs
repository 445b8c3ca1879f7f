//! End-to-end tests driving the distgraph binary against temporary projects.

mod assemble_tests;
mod common;
mod invalidation_tests;
mod publish_tests;
