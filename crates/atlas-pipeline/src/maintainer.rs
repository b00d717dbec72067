//! Region Dictionary Maintainer: turns unmapped names into aliases.
//!
//! A maintenance run folds the loader's resolution log into unmapped
//! entries, attaches the best same-kind candidate to each entry and
//! promotes unambiguous high-confidence suggestions into aliases. Everything
//! else waits in the review queue for [`Maintainer::approve`].

use std::sync::Arc;

use atlas_core::{
  ledger::{LeaseRequest, NewRun, RunCompletion, RunCounts, RunStatus},
  region::{
    AliasOutcome, NewAlias, RegionId, Suggestion, UnmappedEntry, UnmappedQuery, VariantType,
  },
};
use chrono::Utc;
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
  Error, Result, Warehouse,
  config::{AtlasConfig, MaintainerConfig},
  context::JobContext,
  dictionary::Dictionary,
};

/// Lease job kind taken by maintenance runs.
pub const MAINTAIN_JOB: &str = "maintain";

/// Lease key used when a run covers every source.
const ALL_SOURCES: &str = "*";

/// Thresholds of one maintenance run.
#[derive(Debug, Clone, Copy)]
pub struct MaintainOptions {
  pub min_occurrence: u64,
  pub auto_approve:   f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Approvals {
  pub approved:  u64,
  /// Suggestions rejected because the name already maps elsewhere.
  pub conflicts: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaintainerReport {
  pub run_id:    Uuid,
  /// Resolution log rows folded into entries.
  pub absorbed:  u64,
  pub suggested: u64,
  pub approved:  u64,
  pub conflicts: u64,
  /// Entries still waiting for review.
  pub remaining: u64,
}

pub struct Maintainer<S> {
  store:      Arc<S>,
  dictionary: Dictionary<S>,
  config:     MaintainerConfig,
}

impl<S: Warehouse> Maintainer<S> {
  pub fn new(store: Arc<S>, config: &AtlasConfig) -> Self {
    Self {
      dictionary: Dictionary::new(Arc::clone(&store), config.dictionary),
      store,
      config: config.maintainer,
    }
  }

  pub fn default_options(&self) -> MaintainOptions {
    MaintainOptions {
      min_occurrence: self.config.min_occurrence,
      auto_approve:   self.config.auto_approve,
    }
  }

  /// Fold pending resolution-log rows into unmapped entries.
  pub async fn absorb_log(&self, source_system: Option<&str>) -> Result<u64> {
    let absorbed = self
      .store
      .absorb_unmapped_log(source_system.map(str::to_owned))
      .await
      .map_err(Error::store)?;
    tracing::debug!(absorbed, "resolution log absorbed");
    Ok(absorbed)
  }

  /// Attach the best same-kind candidate to every entry seen at least
  /// `min_occurrence` times. No alias is written. Returns how many entries
  /// received a suggestion.
  pub async fn suggest_matches(
    &self,
    source_system: Option<&str>,
    min_occurrence: u64,
  ) -> Result<u64> {
    let entries = self
      .entries(source_system, min_occurrence, false, None)
      .await?;
    let mut suggested = 0;
    for entry in entries {
      let candidates = self
        .dictionary
        .candidates(&entry.normalized_name, entry.kind)
        .await?;
      let Some(best) = candidates.first() else { continue };
      let suggestion = Suggestion {
        region_id:       best.region_id,
        score:           best.score,
        runner_up_score: candidates.get(1).map(|c| c.score),
        suggested_at:    Utc::now(),
      };
      tracing::debug!(
        raw_name = %entry.raw_name,
        candidate = %best.display_name,
        score = best.score,
        runner_up = ?suggestion.runner_up_score,
        "suggested match"
      );
      self
        .store
        .set_suggestion(entry.entry_id, suggestion)
        .await
        .map_err(Error::store)?;
      suggested += 1;
    }
    Ok(suggested)
  }

  /// Promote suggestions scoring at least `threshold`, with no runner-up
  /// inside the ambiguity margin, into aliases.
  pub async fn auto_approve(
    &self,
    source_system: Option<&str>,
    threshold: f64,
    min_occurrence: u64,
  ) -> Result<Approvals> {
    let margin = self.dictionary.config().ambiguity_margin;
    let entries = self.entries(source_system, min_occurrence, true, None).await?;
    let mut approvals = Approvals::default();

    for entry in entries {
      let Some(suggestion) = &entry.suggestion else { continue };
      if suggestion.score < threshold || !suggestion.is_unambiguous(margin) {
        continue;
      }
      match self.promote(&entry, suggestion.region_id).await {
        Ok(_) => {
          tracing::info!(
            source_system = %entry.source_system,
            raw_name = %entry.raw_name,
            region_id = %suggestion.region_id,
            score = suggestion.score,
            "auto-approved alias"
          );
          approvals.approved += 1;
        }
        Err(e @ Error::ResolutionConflict { .. }) => {
          tracing::warn!(error = %e, "suggestion conflicts with an existing alias");
          approvals.conflicts += 1;
        }
        Err(Error::RegionNotFound(id)) => {
          tracing::warn!(raw_name = %entry.raw_name, region_id = %id, "suggested region is gone");
        }
        Err(e) => return Err(e),
      }
    }
    Ok(approvals)
  }

  /// Unmapped entries, most frequent first.
  pub async fn review_queue(
    &self,
    source_system: Option<&str>,
    limit: Option<usize>,
  ) -> Result<Vec<UnmappedEntry>> {
    self.entries(source_system, 1, false, limit).await
  }

  /// Bind an unmapped entry to `region_id` by hand.
  pub async fn approve(&self, entry_id: i64, region_id: RegionId) -> Result<AliasOutcome> {
    let entry = self
      .store
      .get_unmapped(entry_id)
      .await
      .map_err(Error::store)?
      .ok_or(Error::EntryNotFound(entry_id))?;
    let outcome = self.promote(&entry, region_id).await?;
    tracing::info!(
      entry_id,
      raw_name = %entry.raw_name,
      region_id = %region_id,
      "approved alias"
    );
    Ok(outcome)
  }

  /// One full maintenance pass under the maintenance lease, recorded in the
  /// run ledger.
  pub async fn run(
    &self,
    ctx: &JobContext,
    source_system: Option<String>,
    options: MaintainOptions,
  ) -> Result<MaintainerReport> {
    let span = tracing::info_span!(
      parent: &ctx.span(),
      "maintain",
      source_system = source_system.as_deref().unwrap_or(ALL_SOURCES),
    );
    self.run_leased(ctx, source_system, options).instrument(span).await
  }

  async fn run_leased(
    &self,
    ctx: &JobContext,
    source_system: Option<String>,
    options: MaintainOptions,
  ) -> Result<MaintainerReport> {
    let lease_key = source_system.clone().unwrap_or_else(|| ALL_SOURCES.to_owned());
    let lease = LeaseRequest {
      source_system: lease_key.clone(),
      job_kind:      MAINTAIN_JOB.to_owned(),
      holder:        ctx.holder(),
      ttl:           chrono::Duration::seconds(
        i64::try_from(self.config.lease_ttl_secs).unwrap_or(i64::MAX / 1000),
      ),
    };
    if !self.store.acquire_lease(lease).await.map_err(Error::store)? {
      return Err(Error::LeaseHeld { source_system: lease_key, job_kind: MAINTAIN_JOB.to_owned() });
    }

    let run = self
      .store
      .start_run(NewRun { process_name: ctx.job().to_owned(), source_system: source_system.clone() })
      .await
      .map_err(Error::store);
    let result = match run {
      Ok(run) => {
        let outcome = self.pass(run.run_id, source_system.as_deref(), options).await;
        let completion = match &outcome {
          Ok(report) => RunCompletion {
            status:  RunStatus::Completed,
            counts:  RunCounts {
              read:      report.absorbed,
              processed: report.approved,
              failed:    report.conflicts,
              skipped:   0,
            },
            message: Some(format!(
              "{} suggested, {} approved, {} conflicts, {} awaiting review",
              report.suggested, report.approved, report.conflicts, report.remaining
            )),
          },
          Err(e) => RunCompletion {
            status:  RunStatus::Failed,
            counts:  RunCounts::default(),
            message: Some(e.to_string()),
          },
        };
        match self.store.finish_run(run.run_id, completion).await {
          Ok(_) => outcome,
          Err(e) => outcome.and(Err(Error::store(e))),
        }
      }
      Err(e) => Err(e),
    };

    if let Err(e) = self
      .store
      .release_lease(lease_key, MAINTAIN_JOB.to_owned(), ctx.holder())
      .await
    {
      tracing::warn!(error = %e, "could not release maintenance lease");
    }
    result
  }

  async fn pass(
    &self,
    run_id: Uuid,
    source_system: Option<&str>,
    options: MaintainOptions,
  ) -> Result<MaintainerReport> {
    let absorbed = self.absorb_log(source_system).await?;
    let suggested = self
      .suggest_matches(source_system, options.min_occurrence)
      .await?;
    let approvals = self
      .auto_approve(source_system, options.auto_approve, options.min_occurrence)
      .await?;
    let remaining = self.entries(source_system, 1, false, None).await?.len() as u64;

    let report = MaintainerReport {
      run_id,
      absorbed,
      suggested,
      approved: approvals.approved,
      conflicts: approvals.conflicts,
      remaining,
    };
    tracing::info!(?report, "maintenance finished");
    Ok(report)
  }

  /// Write the alias and drop the entry.
  async fn promote(&self, entry: &UnmappedEntry, region_id: RegionId) -> Result<AliasOutcome> {
    let outcome = self
      .dictionary
      .add_alias(NewAlias {
        region_id,
        raw_name: entry.raw_name.clone(),
        source_system: entry.source_system.clone(),
        variant: VariantType::SourceSpecific,
        is_primary: false,
      })
      .await?;
    // An alias that was already present does not clear the entry itself.
    self
      .store
      .clear_unmapped(entry.source_system.clone(), entry.raw_name.clone())
      .await
      .map_err(Error::store)?;
    Ok(outcome)
  }

  async fn entries(
    &self,
    source_system: Option<&str>,
    min_occurrence: u64,
    with_suggestion: bool,
    limit: Option<usize>,
  ) -> Result<Vec<UnmappedEntry>> {
    self
      .store
      .unmapped_entries(UnmappedQuery {
        source_system: source_system.map(str::to_owned),
        min_occurrences: Some(min_occurrence),
        with_suggestion,
        limit,
      })
      .await
      .map_err(Error::store)
  }
}
