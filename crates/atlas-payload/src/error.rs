//! Error types for the atlas-payload codec.

use thiserror::Error;

/// A failure that prevents decoding a record at all. Problems confined to a
/// nested sub-structure are reported as [`crate::SubrecordIssue`]s instead.
#[derive(Debug, Error)]
pub enum Error {
  #[error("payload is not valid JSON: {0}")]
  InvalidJson(#[source] serde_json::Error),

  #[error("payload is not a JSON object")]
  NotAnObject,

  #[error("payload has no \"type\" tag")]
  MissingType,

  #[error("unknown observation type: {0:?}")]
  UnknownType(String),

  #[error("missing or malformed region reference: {0}")]
  InvalidRegion(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
