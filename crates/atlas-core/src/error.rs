//! Error types for `atlas-core`.

use thiserror::Error;

use crate::region::RegionId;

#[derive(Debug, Error)]
pub enum Error {
  #[error("unknown region kind: {0:?}")]
  UnknownKind(String),

  #[error("unknown run status: {0:?}")]
  UnknownStatus(String),

  #[error("unknown alias variant: {0:?}")]
  UnknownVariant(String),

  #[error("unknown breakdown kind: {0:?}")]
  UnknownBreakdown(String),

  #[error("unknown discrepancy type: {0:?}")]
  UnknownDiscrepancy(String),

  #[error("setting parent {parent} on region {child} would create a cycle")]
  CycleDetected { child: RegionId, parent: RegionId },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
