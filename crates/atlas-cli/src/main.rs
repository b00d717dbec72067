//! `atlas`: job entry point for the regional warehouse.
//!
//! # Usage
//!
//! ```text
//! atlas load --source intervista --from 2024-07-01 --to 2024-07-31
//! atlas maintain --source intervista
//! atlas audit --from 2024-07-01 --to 2024-07-31
//! atlas serve --bind 127.0.0.1:8080
//! ```
//!
//! `load` exits 0 when the run completed, 1 on a partial failure and 2 when
//! the run failed. Every other command exits 0 on success and 2 on error.

mod commands;

use std::{
  path::{Path, PathBuf},
  process::ExitCode,
};

use atlas_core::region::{KindMap, RegionKind, VariantType};
use atlas_pipeline::{AtlasConfig, config::StorePath};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "atlas", version, about = "Regional tourism warehouse jobs")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "atlas.toml", global = true)]
  config: PathBuf,

  /// SQLite database file; overrides `store_path`.
  #[arg(long, env = "ATLAS_STORE", global = true)]
  store: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Load one source over a date range into the fact tables.
  Load {
    #[arg(long)]
    source:                 String,
    #[arg(long)]
    from:                   NaiveDate,
    #[arg(long)]
    to:                     NaiveDate,
    #[arg(long)]
    batch_size:             Option<usize>,
    /// Minimum fuzzy confidence to load and cache a match.
    #[arg(long)]
    auto_approve_threshold: Option<f64>,
  },

  /// Absorb the resolution log, suggest matches and auto-approve aliases.
  Maintain {
    /// Restrict to one source; all sources by default.
    #[arg(long)]
    source:         Option<String>,
    #[arg(long)]
    min_occurrence: Option<u64>,
    #[arg(long)]
    auto_approve:   Option<f64>,
  },

  /// Audit fact rows in a date range and write quality records.
  Audit {
    #[arg(long)]
    from:   NaiveDate,
    #[arg(long)]
    to:     NaiveDate,
    #[arg(long)]
    source: Option<String>,
    /// Batch id for the quality records; a new one by default.
    #[arg(long)]
    batch:  Option<Uuid>,
  },

  /// Mark runs stuck in `running` as failed.
  Watchdog {
    #[arg(long)]
    stale_after_secs: Option<u64>,
  },

  /// Show recent ledger entries.
  Runs {
    #[arg(long, default_value_t = 20)]
    limit:   usize,
    /// Show the per-process summary instead.
    #[arg(long)]
    summary: bool,
  },

  /// Show the quality summary of an audit batch.
  Quality { batch: Uuid },

  /// List unmapped names awaiting review.
  Review {
    #[arg(long)]
    source: Option<String>,
    #[arg(long, default_value_t = 50)]
    limit:  usize,
  },

  /// Bind an unmapped entry to a region.
  Approve {
    entry:  i64,
    region: i64,
  },

  /// Manage aliases.
  Alias {
    #[command(subcommand)]
    command: AliasCommand,
  },

  /// Manage regions.
  Region {
    #[command(subcommand)]
    command: RegionCommand,
  },

  /// Import regions and aliases from a JSON document.
  Seed { file: PathBuf },

  /// Serve the read-only JSON API.
  Serve {
    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: String,
  },
}

#[derive(Subcommand, Debug)]
enum AliasCommand {
  Add {
    #[arg(long)]
    region:   i64,
    #[arg(long)]
    raw_name: String,
    #[arg(long)]
    source:   String,
    #[arg(long, default_value = "source_specific", value_parser = parse_variant)]
    variant:  VariantType,
    #[arg(long)]
    primary:  bool,
  },
}

#[derive(Subcommand, Debug)]
enum RegionCommand {
  Add {
    #[arg(long)]
    name:   String,
    #[arg(long, value_parser = parse_kind)]
    kind:   RegionKind,
    #[arg(long)]
    code:   Option<String>,
    #[arg(long)]
    parent: Option<i64>,
  },
  SetParent {
    #[arg(long)]
    region: i64,
    /// Omit to clear the parent.
    #[arg(long)]
    parent: Option<i64>,
  },
  Retire {
    #[arg(long)]
    region: i64,
  },
  List {
    #[arg(long, value_parser = parse_kind)]
    kind:    Option<RegionKind>,
    #[arg(long)]
    retired: bool,
  },
}

fn parse_kind(s: &str) -> Result<RegionKind, String> {
  KindMap::builtin()
    .resolve(s)
    .ok_or_else(|| format!("unknown region kind {s:?}"))
}

fn parse_variant(s: &str) -> Result<VariantType, String> {
  VariantType::parse(s).map_err(|e| e.to_string())
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> ExitCode {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  match run(cli).await {
    Ok(code) => code,
    Err(e) => {
      tracing::error!("{e:#}");
      eprintln!("error: {e:#}");
      ExitCode::from(2)
    }
  }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
  let mut config = AtlasConfig::load(&cli.config)?;
  if let Some(store) = cli.store {
    config.store_path = StorePath(store);
  }
  config.store_path = StorePath(expand_tilde(&config.store_path.0));

  commands::dispatch(cli.command, config).await
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use clap::CommandFactory;

  use super::*;

  #[test]
  fn cli_definition_is_consistent() { Cli::command().debug_assert(); }

  #[test]
  fn load_arguments_parse() {
    let cli = Cli::try_parse_from([
      "atlas", "load", "--source", "intervista", "--from", "2024-07-01", "--to", "2024-07-31",
      "--batch-size", "200",
    ])
    .unwrap();
    match cli.command {
      Command::Load { source, from, batch_size, .. } => {
        assert_eq!(source, "intervista");
        assert_eq!(from, NaiveDate::from_ymd_opt(2024, 7, 1).unwrap());
        assert_eq!(batch_size, Some(200));
      }
      other => panic!("unexpected command {other:?}"),
    }
  }

  #[test]
  fn kinds_accept_source_labels() {
    assert_eq!(parse_kind("Kanton"), Ok(RegionKind::Canton));
    assert_eq!(parse_kind("tourism_region"), Ok(RegionKind::TourismRegion));
    assert!(parse_kind("galaxy").is_err());
  }
}
