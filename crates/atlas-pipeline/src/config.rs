//! Pipeline configuration.
//!
//! Loaded from an optional TOML file layered under `ATLAS_*` environment
//! variables (nested keys separated by `__`, e.g.
//! `ATLAS_LOADER__BATCH_SIZE=1000`). Every field has a default, so an empty
//! configuration is valid.

use std::{collections::HashMap, path::PathBuf, time::Duration};

use atlas_core::{
  quality::ScoreWeights,
  region::{KindMap, RegionKind},
};
use serde::{Deserialize, Serialize};

use crate::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AtlasConfig {
  pub store_path: StorePath,
  pub dictionary: DictionaryConfig,
  /// Source kind label → canonical kind, layered over the built-in labels.
  pub kind_map:   HashMap<String, RegionKind>,
  pub loader:     LoaderConfig,
  pub maintainer: MaintainerConfig,
  pub auditor:    AuditorConfig,
  pub watchdog:   WatchdogConfig,
}

impl AtlasConfig {
  /// Read `path` (if it exists) and the environment.
  pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path.into()).required(false))
      .add_source(
        config::Environment::with_prefix("ATLAS")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()?;
    Ok(settings.try_deserialize()?)
  }

  pub fn kind_map(&self) -> KindMap { KindMap::with_overrides(&self.kind_map) }
}

/// Location of the SQLite database file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorePath(pub PathBuf);

impl Default for StorePath {
  fn default() -> Self { Self(PathBuf::from("atlas.db")) }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DictionaryConfig {
  /// Minimum similarity for a fuzzy candidate to count as a match.
  pub match_threshold:  f64,
  /// Minimum similarity for a fuzzy match to be persisted as an alias.
  pub auto_accept:      f64,
  /// A runner-up closer than this to the best candidate makes a match
  /// ambiguous.
  pub ambiguity_margin: f64,
  /// Candidates below this score are not returned by fuzzy search.
  pub fuzzy_floor:      f64,
  pub fuzzy_limit:      usize,
}

impl Default for DictionaryConfig {
  fn default() -> Self {
    Self {
      match_threshold:  0.7,
      auto_accept:      0.9,
      ambiguity_margin: 0.05,
      fuzzy_floor:      0.3,
      fuzzy_limit:      5,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
  pub batch_size:         usize,
  /// Chunks processed at the same time.
  pub concurrency:        usize,
  /// Fuzzy matches below this confidence are not loaded.
  pub min_confidence:     f64,
  /// Kinds for which an unseen name creates a new region.
  pub create_kinds:       Vec<RegionKind>,
  pub max_retries:        u32,
  pub retry_backoff_ms:   u64,
  /// A chunk failing at or above this rate aborts the run.
  pub abort_failure_rate: f64,
  /// Chunks smaller than this never trigger the abort rule.
  pub abort_min_chunk:    usize,
  pub lease_ttl_secs:     u64,
}

impl Default for LoaderConfig {
  fn default() -> Self {
    Self {
      batch_size:         500,
      concurrency:        4,
      min_confidence:     0.9,
      create_kinds:       vec![RegionKind::TourismRegion],
      max_retries:        3,
      retry_backoff_ms:   200,
      abort_failure_rate: 0.95,
      abort_min_chunk:    20,
      lease_ttl_secs:     3600,
    }
  }
}

impl LoaderConfig {
  pub fn retry_policy(&self) -> RetryPolicy {
    RetryPolicy {
      max_retries: self.max_retries,
      backoff:     Duration::from_millis(self.retry_backoff_ms),
    }
  }

  pub fn lease_ttl(&self) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(self.lease_ttl_secs).unwrap_or(i64::MAX / 1000))
  }
}

/// Bounded exponential backoff for storage writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_retries: u32,
  /// Delay before the first retry; doubled for each further one.
  pub backoff:     Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintainerConfig {
  pub min_occurrence: u64,
  pub auto_approve:   f64,
  pub lease_ttl_secs: u64,
}

impl Default for MaintainerConfig {
  fn default() -> Self { Self { min_occurrence: 1, auto_approve: 0.9, lease_ttl_secs: 900 } }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditorConfig {
  /// Discrepancies above this percentage are errors.
  pub severity_threshold: f64,
  pub weights:            ScoreWeights,
}

impl Default for AuditorConfig {
  fn default() -> Self {
    Self { severity_threshold: 20.0, weights: ScoreWeights::default() }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
  pub stale_after_secs: u64,
}

impl Default for WatchdogConfig {
  fn default() -> Self { Self { stale_after_secs: 6 * 60 * 60 } }
}

impl WatchdogConfig {
  pub fn stale_after(&self) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(self.stale_after_secs).unwrap_or(i64::MAX / 1000))
  }
}
