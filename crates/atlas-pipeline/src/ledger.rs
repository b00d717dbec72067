//! Read side of the run ledger, plus the watchdog for stuck runs.

use std::sync::Arc;

use atlas_core::{
  ledger::{RunEntry, RunSummaryRow},
  quality::{QualityRecord, QualitySummary, ScoreWeights},
  store::{LedgerStore, QualityStore},
};
use chrono::Utc;
use uuid::Uuid;

use crate::{Error, Result};

pub struct Ledger<S> {
  store:   Arc<S>,
  weights: ScoreWeights,
}

impl<S> Ledger<S>
where
  S: LedgerStore + QualityStore,
{
  pub fn new(store: Arc<S>, weights: ScoreWeights) -> Self { Self { store, weights } }

  /// Most recently started runs first.
  pub async fn recent(&self, limit: usize) -> Result<Vec<RunEntry>> {
    self.store.recent_runs(limit).await.map_err(Error::store)
  }

  pub async fn get(&self, run_id: Uuid) -> Result<Option<RunEntry>> {
    self.store.get_run(run_id).await.map_err(Error::store)
  }

  pub async fn summary(&self) -> Result<Vec<RunSummaryRow>> {
    self.store.run_summary().await.map_err(Error::store)
  }

  pub async fn quality_records(&self, batch_id: Uuid) -> Result<Vec<QualityRecord>> {
    self.store.quality_records(batch_id).await.map_err(Error::store)
  }

  /// Recompute a batch summary from its stored quality records.
  pub async fn quality_summary(&self, batch_id: Uuid) -> Result<QualitySummary> {
    let records = self.quality_records(batch_id).await?;
    Ok(QualitySummary::from_records(batch_id, &records, self.weights))
  }

  /// Fail every run still marked running after `stale_after`.
  pub async fn fail_stale(&self, stale_after: chrono::Duration) -> Result<Vec<Uuid>> {
    let cutoff = Utc::now() - stale_after;
    let message = format!("no terminal status after {} minutes", stale_after.num_minutes());
    let failed = self
      .store
      .fail_stale_runs(cutoff, message)
      .await
      .map_err(Error::store)?;
    for run_id in &failed {
      tracing::warn!(%run_id, "stale run marked failed");
    }
    Ok(failed)
  }
}
