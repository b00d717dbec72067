//! Codec for raw landing payloads.
//!
//! Converts the loosely-typed JSON payloads of the landing table into tagged
//! [`Observation`] variants, once, at the edge of the pipeline. Pure
//! synchronous; no database dependencies.
//!
//! Decoding is lenient below the top level: a malformed nested structure
//! (a ranked list, a histogram, one industry entry) is dropped and reported
//! as a [`SubrecordIssue`] while the rest of the record still decodes.
//!
//! # Quick start
//!
//! ```no_run
//! use atlas_payload::{Observation, decode_payload};
//!
//! let json = r#"{"type":"visitor","region":{"name":"Zürich","kind":"kanton"},"total_visitors":14}"#;
//! let (obs, issues) = decode_payload(json).unwrap();
//! assert!(matches!(obs, Observation::Visitor(_)));
//! assert!(issues.is_empty());
//! ```

mod decode;
pub mod error;

use std::collections::BTreeMap;

use atlas_core::observation::RawRecord;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub use decode::decode_payload;
pub use error::{Error, Result};

// ─── Public types
// ─────────────────────────────────────────────────────────────

/// A geographic reference as the source spelled it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionRef {
  pub name: String,
  /// Source-specific kind label, e.g. `"kanton"`.
  pub kind: String,
}

/// One share of a demographic breakdown, e.g. age group `"20-39"` → `0.31`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Share {
  pub label: String,
  pub value: f64,
}

/// One entry of a ranked list; the rank is its position in the list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedEntry {
  pub name:     String,
  pub visitors: f64,
}

/// Daily visitor counts for one region.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VisitorObservation {
  pub region:                   RegionRef,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub total_visitors:           Option<i64>,
  /// Category → count, with category names in snake case.
  #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
  pub visitor_categories:       BTreeMap<String, i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub demographics:             Option<Demographics>,
  /// Values in [`atlas_core::observation::DWELL_BUCKETS`] order.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub dwell_time:               Option<Vec<f64>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub top_foreign_countries:    Option<Vec<RankedEntry>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub top_swiss_cantons:        Option<Vec<RankedEntry>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub top_swiss_municipalities: Option<Vec<RankedEntry>>,
}

/// Demographic shares of a visitor observation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Demographics {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub age_groups: Option<Vec<Share>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub gender:     Option<Vec<Share>>,
}

/// Spending in one industry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndustrySpend {
  pub industry:     String,
  pub transactions: i64,
  pub amount:       f64,
}

/// Daily card spending for one region.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpendingObservation {
  pub region:     RegionRef,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub origin:     Option<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub industries: Vec<IndustrySpend>,
}

/// A decoded payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Observation {
  Visitor(VisitorObservation),
  Spending(SpendingObservation),
}

impl Observation {
  pub fn region(&self) -> &RegionRef {
    match self {
      Self::Visitor(v) => &v.region,
      Self::Spending(s) => &s.region,
    }
  }

  /// Whether the observation carries anything to load.
  pub fn has_measures(&self) -> bool {
    match self {
      Self::Visitor(v) => {
        v.total_visitors.is_some()
          || !v.visitor_categories.is_empty()
          || v.demographics.is_some()
          || v.dwell_time.is_some()
          || v.top_foreign_countries.is_some()
          || v.top_swiss_cantons.is_some()
          || v.top_swiss_municipalities.is_some()
      }
      Self::Spending(s) => !s.industries.is_empty(),
    }
  }
}

/// A nested structure that was dropped during decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubrecordIssue {
  /// Payload field path, e.g. `"industries[2]"`.
  pub field:  String,
  pub reason: String,
}

/// A landing record with its payload decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRecord {
  pub record_id:     i64,
  pub source_system: String,
  pub fact_date:     NaiveDate,
  pub observation:   Observation,
  pub issues:        Vec<SubrecordIssue>,
}

// ─── Public API
// ───────────────────────────────────────────────────────────────

/// Decode the payload of one landing record.
pub fn decode(record: &RawRecord) -> Result<DecodedRecord> {
  let (observation, issues) = decode_payload(&record.payload)?;
  Ok(DecodedRecord {
    record_id: record.record_id,
    source_system: record.source_system.clone(),
    fact_date: record.fact_date,
    observation,
    issues,
  })
}
