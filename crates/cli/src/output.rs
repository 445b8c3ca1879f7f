//! CLI output formatting utilities.
//!
//! Provides consistent formatting for terminal output including colored status
//! messages, node status lines and duration formatting.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

use distgraph_lib::execute::NodeStatus;
use distgraph_lib::fingerprint::Freshness;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
  pub const SKIP: &str = "-";
  pub const UNCHANGED: &str = "=";
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  let millis = duration.subsec_millis();

  if secs >= 60 {
    let mins = secs / 60;
    let remaining_secs = secs % 60;
    format!("{}m {}s", mins, remaining_secs)
  } else if secs > 0 {
    format!("{}.{:02}s", secs, millis / 10)
  } else {
    format!("{}ms", millis)
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

/// One line per node after an execution.
pub fn print_node(id: &str, status: NodeStatus, detail: Option<&str>) {
  let symbol = match status {
    NodeStatus::Executed => format!("{}", symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green())),
    NodeStatus::UpToDate => format!("{}", symbols::UNCHANGED.if_supports_color(Stream::Stdout, |s| s.dimmed())),
    NodeStatus::Failed => format!("{}", symbols::ERROR.if_supports_color(Stream::Stdout, |s| s.red())),
    NodeStatus::Skipped => format!("{}", symbols::SKIP.if_supports_color(Stream::Stdout, |s| s.yellow())),
  };
  let status = status.to_string();
  match detail {
    Some(detail) => println!(
      "  {} {} {} {}",
      symbol,
      id,
      status.if_supports_color(Stream::Stdout, |s| s.dimmed()),
      format!("({detail})").if_supports_color(Stream::Stdout, |s| s.dimmed())
    ),
    None => println!(
      "  {} {} {}",
      symbol,
      id,
      status.if_supports_color(Stream::Stdout, |s| s.dimmed())
    ),
  }
}

/// One line per node in a plan.
pub fn print_plan_entry(id: &str, freshness: &Freshness, rerun_all: bool) {
  match freshness {
    Freshness::UpToDate if !rerun_all => println!(
      "  {} {} {}",
      symbols::UNCHANGED.if_supports_color(Stream::Stdout, |s| s.dimmed()),
      id,
      "up to date".if_supports_color(Stream::Stdout, |s| s.dimmed())
    ),
    Freshness::UpToDate => println!(
      "  {} {} {}",
      symbols::ARROW.if_supports_color(Stream::Stdout, |s| s.cyan()),
      id,
      "forced".if_supports_color(Stream::Stdout, |s| s.dimmed())
    ),
    Freshness::Stale { reason } => println!(
      "  {} {} {}",
      symbols::ARROW.if_supports_color(Stream::Stdout, |s| s.cyan()),
      id,
      reason.to_string().if_supports_color(Stream::Stdout, |s| s.dimmed())
    ),
  }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{}", json);
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_format_duration() {
    assert_eq!(format_duration(Duration::from_millis(50)), "50ms");
    assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
    assert_eq!(format_duration(Duration::from_secs(65)), "1m 5s");
  }

  #[test]
  fn json_output_format() {
    assert!(OutputFormat::Json.is_json());
    assert!(!OutputFormat::default().is_json());
  }
}
