//! Run ledger: the lineage record of every pipeline invocation.
//!
//! An entry is created in [`RunStatus::Running`] when a job starts and is
//! moved to a terminal status exactly once.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Error;

/// Status of a ledger entry as stored.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RunStatus {
  Running,
  Completed,
  Failed,
  /// Some records failed while others were loaded.
  Partial,
}

impl RunStatus {
  pub fn as_str(self) -> &'static str { self.into() }

  pub fn parse(s: &str) -> crate::Result<Self> {
    s.parse().map_err(|_| Error::UnknownStatus(s.to_owned()))
  }

  pub fn is_terminal(self) -> bool { !matches!(self, Self::Running) }
}

/// Record counts carried by a ledger entry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
  /// Raw records read from the source.
  pub read:      u64,
  /// Records whose rows were committed.
  pub processed: u64,
  pub failed:    u64,
  /// Records with nothing to load.
  pub skipped:   u64,
}

impl RunCounts {
  pub fn absorb(&mut self, other: RunCounts) {
    self.read += other.read;
    self.processed += other.processed;
    self.failed += other.failed;
    self.skipped += other.skipped;
  }
}

/// One pipeline invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunEntry {
  pub run_id:        Uuid,
  pub process_name:  String,
  pub source_system: Option<String>,
  pub status:        RunStatus,
  pub started_at:    DateTime<Utc>,
  pub finished_at:   Option<DateTime<Utc>>,
  pub counts:        RunCounts,
  pub message:       Option<String>,
}

impl RunEntry {
  /// Wall-clock duration, once the run has finished.
  pub fn duration(&self) -> Option<chrono::Duration> {
    self.finished_at.map(|end| end - self.started_at)
  }
}

/// Input to [`crate::store::LedgerStore::start_run`].
#[derive(Debug, Clone)]
pub struct NewRun {
  pub process_name:  String,
  pub source_system: Option<String>,
}

/// The terminal update applied to a running entry.
#[derive(Debug, Clone)]
pub struct RunCompletion {
  pub status:  RunStatus,
  pub counts:  RunCounts,
  pub message: Option<String>,
}

/// One row of the per-process ledger summary view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummaryRow {
  pub process_name:      String,
  pub source_system:     Option<String>,
  pub status:            RunStatus,
  pub runs:              u64,
  pub records_processed: u64,
  pub records_failed:    u64,
  pub last_finished_at:  Option<DateTime<Utc>>,
}

// ─── Leases ──────────────────────────────────────────────────────────────────

/// An advisory lock request keyed by `(source_system, job_kind)`.
#[derive(Debug, Clone)]
pub struct LeaseRequest {
  pub source_system: String,
  pub job_kind:      String,
  pub holder:        Uuid,
  pub ttl:           chrono::Duration,
}
