//! Error type for `atlas-pipeline`.

use atlas_core::region::RegionId;
use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
  /// A name could not be matched to a region. Recorded, not fatal.
  #[error("could not resolve {raw_name:?}: {reason}")]
  ResolutionMiss { raw_name: String, reason: String },

  /// An alias would bind one raw name to two regions.
  #[error(
    "alias ({source_system}, {raw_name:?}) already maps to region {existing}, not {requested}"
  )]
  ResolutionConflict {
    source_system: String,
    raw_name:      String,
    existing:      RegionId,
    requested:     RegionId,
  },

  /// A nested structure was dropped; the rest of the record loaded.
  #[error("malformed {field}: {reason}")]
  MalformedSubrecord { field: String, reason: String },

  /// A storage write kept failing after the configured retries.
  #[error("storage write failed after {attempts} attempts: {source}")]
  PersistenceFailure {
    attempts: u32,
    #[source]
    source:   BoxError,
  },

  #[error("setting parent {parent} on region {child} would create a cycle")]
  CycleDetected { child: RegionId, parent: RegionId },

  #[error("region not found: {0}")]
  RegionNotFound(RegionId),

  #[error("unmapped entry not found: {0}")]
  EntryNotFound(i64),

  #[error("lease for ({source_system}, {job_kind}) is held by another job")]
  LeaseHeld { source_system: String, job_kind: String },

  #[error("payload error: {0}")]
  Payload(#[from] atlas_payload::Error),

  #[error("configuration error: {0}")]
  Config(#[from] config::ConfigError),

  #[error("seed document error: {0}")]
  Seed(String),

  #[error("store error: {0}")]
  Store(#[source] BoxError),
}

impl Error {
  /// Box a backend error.
  pub fn store<E>(err: E) -> Self
  where
    E: std::error::Error + Send + Sync + 'static,
  {
    Self::Store(Box::new(err))
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
