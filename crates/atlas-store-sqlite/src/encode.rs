//! Encoding and decoding helpers between domain types and the plain-text
//! representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings with microsecond precision and a
//! `Z` suffix, so lexical order equals chronological order. Dates are stored
//! as `YYYY-MM-DD`. UUIDs are stored as hyphenated lowercase strings.

use atlas_core::{
  ledger::{RunCounts, RunEntry, RunStatus},
  quality::{DiscrepancyType, QualityRecord},
  region::{Alias, Region, RegionId, RegionKind, Suggestion, UnmappedEntry, VariantType},
};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::Row;
use uuid::Uuid;

use crate::{Error, Result};

// ─── Scalars ─────────────────────────────────────────────────────────────────

pub fn encode_uuid(id: Uuid) -> String { id.hyphenated().to_string() }

pub fn decode_uuid(s: &str) -> Result<Uuid> { Ok(Uuid::parse_str(s)?) }

pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

pub fn encode_date(d: NaiveDate) -> String { d.format("%Y-%m-%d").to_string() }

pub fn decode_date(s: &str) -> Result<NaiveDate> {
  NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|e| Error::DateParse(e.to_string()))
}

/// Counts are stored as signed integers; negative values never occur but
/// clamp rather than wrap if they do.
pub fn decode_count(n: i64) -> u64 { n.max(0) as u64 }

// ─── Row types ───────────────────────────────────────────────────────────────

pub const REGION_COLUMNS: &str = "region_id, display_name, normalized_name, kind, parent_id, \
                                  code, active, valid_from, valid_to";

/// Raw values read directly from a `regions` row.
pub struct RawRegion {
  pub region_id:       i64,
  pub display_name:    String,
  pub normalized_name: String,
  pub kind:            String,
  pub parent_id:       Option<i64>,
  pub code:            Option<String>,
  pub active:          bool,
  pub valid_from:      String,
  pub valid_to:        Option<String>,
}

impl RawRegion {
  /// Read a row selected with [`REGION_COLUMNS`].
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      region_id:       row.get(0)?,
      display_name:    row.get(1)?,
      normalized_name: row.get(2)?,
      kind:            row.get(3)?,
      parent_id:       row.get(4)?,
      code:            row.get(5)?,
      active:          row.get(6)?,
      valid_from:      row.get(7)?,
      valid_to:        row.get(8)?,
    })
  }

  pub fn into_region(self) -> Result<Region> {
    Ok(Region {
      region_id:       RegionId(self.region_id),
      display_name:    self.display_name,
      normalized_name: self.normalized_name,
      kind:            RegionKind::parse(&self.kind)?,
      parent_id:       self.parent_id.map(RegionId),
      code:            self.code,
      active:          self.active,
      valid_from:      decode_dt(&self.valid_from)?,
      valid_to:        self.valid_to.as_deref().map(decode_dt).transpose()?,
    })
  }
}

pub const ALIAS_COLUMNS: &str = "a.source_system, a.raw_name, a.normalized_name, a.region_id, \
                                 a.variant, a.is_primary, a.created_at";

/// Raw values read from a `region_aliases` row aliased as `a`.
pub struct RawAlias {
  pub source_system:   String,
  pub raw_name:        String,
  pub normalized_name: String,
  pub region_id:       i64,
  pub variant:         String,
  pub is_primary:      bool,
  pub created_at:      String,
}

impl RawAlias {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      source_system:   row.get(0)?,
      raw_name:        row.get(1)?,
      normalized_name: row.get(2)?,
      region_id:       row.get(3)?,
      variant:         row.get(4)?,
      is_primary:      row.get(5)?,
      created_at:      row.get(6)?,
    })
  }

  pub fn into_alias(self) -> Result<Alias> {
    Ok(Alias {
      source_system:   self.source_system,
      raw_name:        self.raw_name,
      normalized_name: self.normalized_name,
      region_id:       RegionId(self.region_id),
      variant:         VariantType::parse(&self.variant)?,
      is_primary:      self.is_primary,
      created_at:      decode_dt(&self.created_at)?,
    })
  }
}

pub const UNMAPPED_COLUMNS: &str = "entry_id, source_system, raw_name, normalized_name, kind, \
                                    occurrences, first_seen, last_seen, suggested_region_id, \
                                    suggested_score, runner_up_score, suggested_at";

pub struct RawUnmapped {
  pub entry_id:            i64,
  pub source_system:       String,
  pub raw_name:            String,
  pub normalized_name:     String,
  pub kind:                String,
  pub occurrences:         i64,
  pub first_seen:          String,
  pub last_seen:           String,
  pub suggested_region_id: Option<i64>,
  pub suggested_score:     Option<f64>,
  pub runner_up_score:     Option<f64>,
  pub suggested_at:        Option<String>,
}

impl RawUnmapped {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      entry_id:            row.get(0)?,
      source_system:       row.get(1)?,
      raw_name:            row.get(2)?,
      normalized_name:     row.get(3)?,
      kind:                row.get(4)?,
      occurrences:         row.get(5)?,
      first_seen:          row.get(6)?,
      last_seen:           row.get(7)?,
      suggested_region_id: row.get(8)?,
      suggested_score:     row.get(9)?,
      runner_up_score:     row.get(10)?,
      suggested_at:        row.get(11)?,
    })
  }

  pub fn into_entry(self) -> Result<UnmappedEntry> {
    // The log may carry a suggestion without a timestamp; fall back to
    // last_seen so the entry still exposes it.
    let suggestion = match (self.suggested_region_id, self.suggested_score) {
      (Some(region_id), Some(score)) => Some(Suggestion {
        region_id: RegionId(region_id),
        score,
        runner_up_score: self.runner_up_score,
        suggested_at: decode_dt(self.suggested_at.as_deref().unwrap_or(&self.last_seen))?,
      }),
      _ => None,
    };

    Ok(UnmappedEntry {
      entry_id: self.entry_id,
      source_system: self.source_system,
      raw_name: self.raw_name,
      normalized_name: self.normalized_name,
      kind: RegionKind::parse(&self.kind)?,
      occurrences: decode_count(self.occurrences),
      first_seen: decode_dt(&self.first_seen)?,
      last_seen: decode_dt(&self.last_seen)?,
      suggestion,
    })
  }
}

pub const RUN_COLUMNS: &str = "run_id, process_name, source_system, status, started_at, \
                               finished_at, records_read, records_processed, records_failed, \
                               records_skipped, message";

pub struct RawRun {
  pub run_id:            String,
  pub process_name:      String,
  pub source_system:     Option<String>,
  pub status:            String,
  pub started_at:        String,
  pub finished_at:       Option<String>,
  pub records_read:      i64,
  pub records_processed: i64,
  pub records_failed:    i64,
  pub records_skipped:   i64,
  pub message:           Option<String>,
}

impl RawRun {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      run_id:            row.get(0)?,
      process_name:      row.get(1)?,
      source_system:     row.get(2)?,
      status:            row.get(3)?,
      started_at:        row.get(4)?,
      finished_at:       row.get(5)?,
      records_read:      row.get(6)?,
      records_processed: row.get(7)?,
      records_failed:    row.get(8)?,
      records_skipped:   row.get(9)?,
      message:           row.get(10)?,
    })
  }

  pub fn into_entry(self) -> Result<RunEntry> {
    Ok(RunEntry {
      run_id:        decode_uuid(&self.run_id)?,
      process_name:  self.process_name,
      source_system: self.source_system,
      status:        RunStatus::parse(&self.status)?,
      started_at:    decode_dt(&self.started_at)?,
      finished_at:   self.finished_at.as_deref().map(decode_dt).transpose()?,
      counts:        RunCounts {
        read:      decode_count(self.records_read),
        processed: decode_count(self.records_processed),
        failed:    decode_count(self.records_failed),
        skipped:   decode_count(self.records_skipped),
      },
      message:       self.message,
    })
  }
}

pub const QUALITY_COLUMNS: &str = "batch_id, fact_date, region_id, total_visitors, category_sum, \
                                   has_demographics, has_dwell_time, has_discrepancy, \
                                   discrepancy_type, discrepancy_pct, is_error, audited_at";

pub struct RawQuality {
  pub batch_id:         String,
  pub fact_date:        String,
  pub region_id:        i64,
  pub total_visitors:   i64,
  pub category_sum:     i64,
  pub has_demographics: bool,
  pub has_dwell_time:   bool,
  pub has_discrepancy:  bool,
  pub discrepancy_type: Option<String>,
  pub discrepancy_pct:  f64,
  pub is_error:         bool,
  pub audited_at:       String,
}

impl RawQuality {
  pub fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      batch_id:         row.get(0)?,
      fact_date:        row.get(1)?,
      region_id:        row.get(2)?,
      total_visitors:   row.get(3)?,
      category_sum:     row.get(4)?,
      has_demographics: row.get(5)?,
      has_dwell_time:   row.get(6)?,
      has_discrepancy:  row.get(7)?,
      discrepancy_type: row.get(8)?,
      discrepancy_pct:  row.get(9)?,
      is_error:         row.get(10)?,
      audited_at:       row.get(11)?,
    })
  }

  pub fn into_record(self) -> Result<QualityRecord> {
    Ok(QualityRecord {
      batch_id:         decode_uuid(&self.batch_id)?,
      fact_date:        decode_date(&self.fact_date)?,
      region_id:        RegionId(self.region_id),
      total_visitors:   self.total_visitors,
      category_sum:     self.category_sum,
      has_demographics: self.has_demographics,
      has_dwell_time:   self.has_dwell_time,
      has_discrepancy:  self.has_discrepancy,
      discrepancy_type: self
        .discrepancy_type
        .as_deref()
        .map(DiscrepancyType::parse)
        .transpose()?,
      discrepancy_pct:  self.discrepancy_pct,
      is_error:         self.is_error,
      audited_at:       decode_dt(&self.audited_at)?,
    })
  }
}

#[cfg(test)]
mod tests {
  use chrono::TimeZone;

  use super::*;

  #[test]
  fn timestamps_sort_lexically() {
    let a = Utc.with_ymd_and_hms(2024, 5, 1, 9, 0, 0).unwrap();
    let b = a + chrono::Duration::milliseconds(1500);
    assert!(encode_dt(a) < encode_dt(b));
    assert_eq!(decode_dt(&encode_dt(b)).unwrap(), b);
  }

  #[test]
  fn dates_use_iso_format() {
    let d = NaiveDate::from_ymd_opt(2024, 2, 9).unwrap();
    assert_eq!(encode_date(d), "2024-02-09");
    assert_eq!(decode_date("2024-02-09").unwrap(), d);
    assert!(decode_date("09.02.2024").is_err());
  }
}
