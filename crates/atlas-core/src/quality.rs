//! Data-quality records and batch-level scoring.
//!
//! One [`QualityRecord`] is written per `(batch, date, region)`. Records of
//! earlier batches are retained so quality can be tracked over time.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, region::RegionId};

/// Per-`(date, region)` aggregates read back from fact storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyTotals {
  pub fact_date:        NaiveDate,
  pub region_id:        RegionId,
  /// Sum of declared totals across sources; `None` when no source declared
  /// one.
  pub total_visitors:   Option<i64>,
  pub category_sum:     i64,
  pub category_rows:    u64,
  pub has_demographics: bool,
  pub has_dwell_time:   bool,
}

/// Direction of a mismatch between declared total and category sum.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DiscrepancyType {
  SumExceedsTotal,
  SumBelowTotal,
}

impl DiscrepancyType {
  pub fn as_str(self) -> &'static str { self.into() }

  pub fn parse(s: &str) -> crate::Result<Self> {
    s.parse().map_err(|_| Error::UnknownDiscrepancy(s.to_owned()))
  }
}

/// The audit finding for one `(batch, date, region)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRecord {
  pub batch_id:         Uuid,
  pub fact_date:        NaiveDate,
  pub region_id:        RegionId,
  pub total_visitors:   i64,
  pub category_sum:     i64,
  pub has_demographics: bool,
  pub has_dwell_time:   bool,
  pub has_discrepancy:  bool,
  pub discrepancy_type: Option<DiscrepancyType>,
  /// `|total − sum| / total × 100`; zero without a discrepancy.
  pub discrepancy_pct:  f64,
  pub is_error:         bool,
  pub audited_at:       DateTime<Utc>,
}

/// Relative weights of hard errors and soft discrepancies in the score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
  pub error:       f64,
  pub discrepancy: f64,
}

impl Default for ScoreWeights {
  fn default() -> Self { Self { error: 0.7, discrepancy: 0.3 } }
}

/// Aggregated quality of one audit batch. Rates are percentages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualitySummary {
  pub batch_id:            Uuid,
  pub total_records:       u64,
  pub error_records:       u64,
  pub discrepancy_records: u64,
  pub error_rate:          f64,
  pub discrepancy_rate:    f64,
  pub success_rate:        f64,
  /// `100 − (w_err × error_rate + w_disc × discrepancy_rate)`, in `0..=100`.
  pub quality_score:       f64,
}

impl QualitySummary {
  pub fn from_records(
    batch_id: Uuid,
    records: &[QualityRecord],
    weights: ScoreWeights,
  ) -> Self {
    let total = records.len() as u64;
    let errors = records.iter().filter(|r| r.is_error).count() as u64;
    let discrepancies = records.iter().filter(|r| r.has_discrepancy).count() as u64;

    let rate = |n: u64| if total == 0 { 0.0 } else { n as f64 / total as f64 * 100.0 };
    let error_rate = rate(errors);
    let discrepancy_rate = rate(discrepancies);
    let quality_score = (100.0
      - (weights.error * error_rate + weights.discrepancy * discrepancy_rate))
      .clamp(0.0, 100.0);

    Self {
      batch_id,
      total_records: total,
      error_records: errors,
      discrepancy_records: discrepancies,
      error_rate,
      discrepancy_rate,
      success_rate: 100.0 - error_rate,
      quality_score,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn record(is_error: bool, has_discrepancy: bool) -> QualityRecord {
    QualityRecord {
      batch_id: Uuid::nil(),
      fact_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
      region_id: RegionId(1),
      total_visitors: 100,
      category_sum: 100,
      has_demographics: true,
      has_dwell_time: true,
      has_discrepancy,
      discrepancy_type: None,
      discrepancy_pct: 0.0,
      is_error,
      audited_at: Utc::now(),
    }
  }

  #[test]
  fn empty_batch_scores_perfectly() {
    let summary = QualitySummary::from_records(Uuid::nil(), &[], ScoreWeights::default());
    assert_eq!(summary.total_records, 0);
    assert_eq!(summary.success_rate, 100.0);
    assert_eq!(summary.quality_score, 100.0);
  }

  #[test]
  fn errors_weigh_more_than_discrepancies() {
    // 10 records: 1 error (also a discrepancy), 2 further discrepancies.
    let mut records = vec![record(false, false); 7];
    records.push(record(true, true));
    records.push(record(false, true));
    records.push(record(false, true));

    let summary = QualitySummary::from_records(Uuid::nil(), &records, ScoreWeights::default());
    assert_eq!(summary.error_records, 1);
    assert_eq!(summary.discrepancy_records, 3);
    assert!((summary.error_rate - 10.0).abs() < 1e-9);
    assert!((summary.success_rate - 90.0).abs() < 1e-9);
    // 100 − (0.7 × 10 + 0.3 × 30) = 84
    assert!((summary.quality_score - 84.0).abs() < 1e-9);
  }
}
