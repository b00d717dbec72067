//! Quality Auditor: consistency and completeness checks per
//! `(date, region)`.

use std::sync::Arc;

use atlas_core::{
  ledger::{NewRun, RunCompletion, RunCounts, RunStatus},
  quality::{DiscrepancyType, KeyTotals, QualityRecord, QualitySummary},
  store::DateRange,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::{Error, Result, Warehouse, config::AuditorConfig, context::JobContext};

#[derive(Debug, Clone, Serialize)]
pub struct AuditReport {
  pub run_id:  Uuid,
  pub summary: QualitySummary,
}

/// Classify one key. A declared total of zero or none is never a
/// discrepancy; missing demographic or dwell-time data is always an error.
pub fn assess(
  totals: &KeyTotals,
  batch_id: Uuid,
  severity_threshold: f64,
  audited_at: DateTime<Utc>,
) -> QualityRecord {
  let total = totals.total_visitors.unwrap_or(0);
  let sum = totals.category_sum;
  let has_discrepancy = total > 0 && total != sum;
  let (discrepancy_type, discrepancy_pct) = if has_discrepancy {
    let kind = if sum > total {
      DiscrepancyType::SumExceedsTotal
    } else {
      DiscrepancyType::SumBelowTotal
    };
    (Some(kind), (total - sum).abs() as f64 / total as f64 * 100.0)
  } else {
    (None, 0.0)
  };
  let incomplete = !totals.has_demographics || !totals.has_dwell_time;

  QualityRecord {
    batch_id,
    fact_date: totals.fact_date,
    region_id: totals.region_id,
    total_visitors: total,
    category_sum: sum,
    has_demographics: totals.has_demographics,
    has_dwell_time: totals.has_dwell_time,
    has_discrepancy,
    discrepancy_type,
    discrepancy_pct,
    is_error: incomplete || discrepancy_pct > severity_threshold,
    audited_at,
  }
}

pub struct Auditor<S> {
  store:  Arc<S>,
  config: AuditorConfig,
}

impl<S: Warehouse> Auditor<S> {
  pub fn new(store: Arc<S>, config: AuditorConfig) -> Self { Self { store, config } }

  /// Audit every key with fact rows in `[from, to]` and write one quality
  /// record per key under `batch_id`.
  pub async fn audit(
    &self,
    ctx: &JobContext,
    batch_id: Uuid,
    from: NaiveDate,
    to: NaiveDate,
    source_system: Option<String>,
  ) -> Result<AuditReport> {
    let span = tracing::info_span!(parent: &ctx.span(), "audit", %batch_id, %from, %to);
    async {
      let run = self
        .store
        .start_run(NewRun { process_name: ctx.job().to_owned(), source_system: source_system.clone() })
        .await
        .map_err(Error::store)?;

      let outcome = self.check(batch_id, DateRange { from, to, source_system }).await;
      let completion = match &outcome {
        Ok(summary) => RunCompletion {
          status:  RunStatus::Completed,
          counts:  RunCounts {
            read:      summary.total_records,
            processed: summary.total_records,
            failed:    summary.error_records,
            skipped:   0,
          },
          message: Some(format!(
            "batch {batch_id}: quality score {:.1}, {} errors, {} discrepancies",
            summary.quality_score, summary.error_records, summary.discrepancy_records
          )),
        },
        Err(e) => RunCompletion {
          status:  RunStatus::Failed,
          counts:  RunCounts::default(),
          message: Some(e.to_string()),
        },
      };
      self
        .store
        .finish_run(run.run_id, completion)
        .await
        .map_err(Error::store)?;

      let summary = outcome?;
      tracing::info!(
        run_id = %run.run_id,
        records = summary.total_records,
        errors = summary.error_records,
        discrepancies = summary.discrepancy_records,
        score = summary.quality_score,
        "audit finished"
      );
      Ok::<_, Error>(AuditReport { run_id: run.run_id, summary })
    }
    .instrument(span)
    .await
  }

  async fn check(&self, batch_id: Uuid, range: DateRange) -> Result<QualitySummary> {
    let totals = self.store.key_totals(range).await.map_err(Error::store)?;
    let now = Utc::now();
    let records: Vec<QualityRecord> = totals
      .iter()
      .map(|t| assess(t, batch_id, self.config.severity_threshold, now))
      .collect();
    for record in records.iter().filter(|r| r.is_error) {
      tracing::debug!(
        fact_date = %record.fact_date,
        region_id = %record.region_id,
        discrepancy_pct = record.discrepancy_pct,
        has_demographics = record.has_demographics,
        has_dwell_time = record.has_dwell_time,
        "quality error"
      );
    }

    let summary = QualitySummary::from_records(batch_id, &records, self.config.weights);
    self
      .store
      .write_quality(records)
      .await
      .map_err(Error::store)?;
    Ok(summary)
  }
}
