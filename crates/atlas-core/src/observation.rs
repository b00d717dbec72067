//! Raw landing records and the normalised fact rows the loader derives from
//! them.
//!
//! Fact rows are keyed by `(fact_date, region_id, category, source_system)`.
//! A later load for the same key replaces the stored values; it never adds a
//! second row. Every row also carries the month partition key derived from
//! its date.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, region::RegionId};

// ─── Raw landing rows ────────────────────────────────────────────────────────

/// One row of the external landing table, as written by upstream ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
  pub record_id:     i64,
  pub source_system: String,
  pub fact_date:     NaiveDate,
  /// Undecoded JSON payload.
  pub payload:       String,
}

// ─── Partitions ──────────────────────────────────────────────────────────────

/// The month partition a fact date belongs to, e.g. `"2024-03"`.
pub fn partition_key(date: NaiveDate) -> String {
  format!("{:04}-{:02}", date.year(), date.month())
}

/// Registry entry for one fact partition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionInfo {
  pub table_name:    String,
  pub partition_key: String,
  pub row_count:     u64,
  pub last_batch_id: Option<Uuid>,
}

// ─── Keys ────────────────────────────────────────────────────────────────────

/// Category value for the declared total of a visitor observation.
pub const TOTAL_CATEGORY: &str = "total";

/// The natural key of a fact row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FactKey {
  pub fact_date:     NaiveDate,
  pub region_id:     RegionId,
  pub category:      String,
  pub source_system: String,
}

/// The key shared by every row derived from one observation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObservationKey {
  pub fact_date:     NaiveDate,
  pub region_id:     RegionId,
  pub source_system: String,
}

impl ObservationKey {
  pub fn fact_key(&self, category: impl Into<String>) -> FactKey {
    FactKey {
      fact_date:     self.fact_date,
      region_id:     self.region_id,
      category:      category.into(),
      source_system: self.source_system.clone(),
    }
  }
}

// ─── Fact rows ───────────────────────────────────────────────────────────────

/// A visitor count for one category (or [`TOTAL_CATEGORY`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitorFact {
  pub key:      FactKey,
  pub visitors: i64,
}

/// The nested sub-structures a visitor observation may carry.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::IntoStaticStr,
  strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BreakdownKind {
  AgeGroup,
  Gender,
  DwellTime,
  TopForeignCountry,
  TopSwissCanton,
  TopSwissMunicipality,
}

impl BreakdownKind {
  pub fn as_str(self) -> &'static str { self.into() }

  pub fn parse(s: &str) -> crate::Result<Self> {
    s.parse().map_err(|_| Error::UnknownBreakdown(s.to_owned()))
  }

  /// Demographic breakdowns feed the completeness check.
  pub fn is_demographic(self) -> bool { matches!(self, Self::AgeGroup | Self::Gender) }
}

/// One entry of a breakdown: a histogram bucket, a demographic share or a
/// ranked list position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownRow {
  pub label: String,
  /// 1-based position in ranked lists; bucket index + 1 for histograms.
  pub rank:  u32,
  pub value: f64,
}

/// A complete breakdown of one kind. Writing a set replaces every stored row
/// of that kind for the observation key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownSet {
  pub key:  ObservationKey,
  pub kind: BreakdownKind,
  pub rows: Vec<BreakdownRow>,
}

/// Metrics derived from an observation rather than read from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitorDerived {
  pub key:               ObservationKey,
  /// Weighted-average dwell time over [`DWELL_BUCKETS`].
  pub avg_dwell_minutes: Option<f64>,
}

/// Spending for one industry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpendingFact {
  pub key:          FactKey,
  pub transactions: i64,
  pub amount:       f64,
  /// `amount / transactions`, absent when there were no transactions.
  pub avg_ticket:   Option<f64>,
}

// ─── Dwell-time histogram ────────────────────────────────────────────────────

/// Fixed dwell-time buckets: label and midpoint weight in minutes. Raw
/// histograms list their values in this order.
pub const DWELL_BUCKETS: [(&str, f64); 6] = [
  ("0-15", 7.5),
  ("15-30", 22.5),
  ("30-60", 45.0),
  ("60-120", 90.0),
  ("120-240", 180.0),
  ("240+", 300.0),
];

// ─── Chunks ──────────────────────────────────────────────────────────────────

/// Everything one loader chunk writes. Applied atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FactChunk {
  pub batch_id:       Uuid,
  pub visitor_facts:  Vec<VisitorFact>,
  pub breakdowns:     Vec<BreakdownSet>,
  pub derived:        Vec<VisitorDerived>,
  pub spending_facts: Vec<SpendingFact>,
}

impl FactChunk {
  pub fn new(batch_id: Uuid) -> Self { Self { batch_id, ..Self::default() } }

  pub fn is_empty(&self) -> bool {
    self.visitor_facts.is_empty()
      && self.breakdowns.is_empty()
      && self.derived.is_empty()
      && self.spending_facts.is_empty()
  }
}

/// Row counts written by one chunk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkWrite {
  pub visitor_rows:   u64,
  pub breakdown_rows: u64,
  pub derived_rows:   u64,
  pub spending_rows:  u64,
}

impl ChunkWrite {
  pub fn absorb(&mut self, other: ChunkWrite) {
    self.visitor_rows += other.visitor_rows;
    self.breakdown_rows += other.breakdown_rows;
    self.derived_rows += other.derived_rows;
    self.spending_rows += other.spending_rows;
  }
}

/// Row counts in a date range, used by idempotence checks and summaries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactCounts {
  pub visitor_rows:   u64,
  pub breakdown_rows: u64,
  pub derived_rows:   u64,
  pub spending_rows:  u64,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn partition_key_is_zero_padded_month() {
    let date = NaiveDate::from_ymd_opt(2024, 3, 9).unwrap();
    assert_eq!(partition_key(date), "2024-03");
  }

  #[test]
  fn breakdown_kinds_parse_from_column_values() {
    assert_eq!(
      BreakdownKind::parse("top_foreign_country").unwrap(),
      BreakdownKind::TopForeignCountry
    );
    assert!(BreakdownKind::AgeGroup.is_demographic());
    assert!(!BreakdownKind::DwellTime.is_demographic());
  }
}
