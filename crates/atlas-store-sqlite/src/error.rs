//! Error type for `atlas-store-sqlite`.

use atlas_core::{ledger::RunStatus, region::{RegionId, RegionKind}};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] atlas_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("region not found: {0}")]
  RegionNotFound(RegionId),

  #[error("setting parent {parent} on region {child} would create a cycle")]
  CycleDetected { child: RegionId, parent: RegionId },

  /// Insert-if-absent kept colliding without a readable winner.
  #[error("could not insert or read region {normalized_name:?} ({kind})")]
  RegionInsertConflict { normalized_name: String, kind: RegionKind },

  #[error("run not found: {0}")]
  RunNotFound(uuid::Uuid),

  #[error("run {run_id} is already {status}")]
  RunAlreadyFinished { run_id: uuid::Uuid, status: RunStatus },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
