//! Storage traits and supporting query types.
//!
//! The traits are implemented by storage backends (e.g. `atlas-store-sqlite`).
//! The pipeline and the API depend on these abstractions, not on any
//! concrete backend. Each concern has its own trait; all share the error
//! type declared once by [`Backend`].
//!
//! All methods return `Send` futures so the traits can be used in
//! multi-threaded async runtimes.

use std::future::Future;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::{
  ledger::{LeaseRequest, NewRun, RunCompletion, RunEntry, RunSummaryRow},
  observation::{
    BreakdownSet, ChunkWrite, FactChunk, FactCounts, ObservationKey, PartitionInfo,
    RawRecord, SpendingFact, VisitorDerived, VisitorFact,
  },
  quality::{KeyTotals, QualityRecord},
  region::{
    Alias, AliasOutcome, NewAlias, NewRegion, Region, RegionId, RegionKind,
    Suggestion, UnmappedEntry, UnmappedQuery, UnmappedSighting,
  },
  similarity::MatchCandidate,
};

// ─── Shared error type ───────────────────────────────────────────────────────

/// The error type shared by every storage trait of one backend.
pub trait Backend: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;
}

/// Query over a date range, optionally restricted to one source system.
#[derive(Debug, Clone)]
pub struct DateRange {
  pub from:          NaiveDate,
  pub to:            NaiveDate,
  pub source_system: Option<String>,
}

// ─── Region dictionary ───────────────────────────────────────────────────────

/// Persistence for regions and aliases.
pub trait DictionaryStore: Backend {
  fn get_region(
    &self,
    id: RegionId,
  ) -> impl Future<Output = Result<Option<Region>, Self::Error>> + Send + '_;

  /// The active region with the given key, if any.
  fn find_region(
    &self,
    normalized_name: String,
    kind: RegionKind,
  ) -> impl Future<Output = Result<Option<Region>, Self::Error>> + Send + '_;

  /// Active regions of any kind sharing `normalized_name`.
  fn regions_named(
    &self,
    normalized_name: String,
  ) -> impl Future<Output = Result<Vec<Region>, Self::Error>> + Send + '_;

  fn list_regions(
    &self,
    kind: Option<RegionKind>,
    include_retired: bool,
  ) -> impl Future<Output = Result<Vec<Region>, Self::Error>> + Send + '_;

  /// Insert `region` unless an active region with the same
  /// `(normalized_name, kind)` exists. Returns the stored region and whether
  /// this call created it. Concurrent callers converge on one row.
  fn insert_region_if_absent(
    &self,
    region: NewRegion,
  ) -> impl Future<Output = Result<(Region, bool), Self::Error>> + Send + '_;

  /// Set (or clear) a region's parent. Rejects assignments that would close
  /// a cycle in the parent chain.
  fn set_parent(
    &self,
    child: RegionId,
    parent: Option<RegionId>,
  ) -> impl Future<Output = Result<Region, Self::Error>> + Send + '_;

  /// Clear the active flag and close the validity interval. Regions are
  /// never deleted.
  fn retire_region(
    &self,
    id: RegionId,
  ) -> impl Future<Output = Result<Region, Self::Error>> + Send + '_;

  fn find_alias(
    &self,
    source_system: String,
    raw_name: String,
  ) -> impl Future<Output = Result<Option<Alias>, Self::Error>> + Send + '_;

  /// Aliases from any source whose normalised name equals `normalized_name`
  /// and whose region is active and of `kind`.
  fn aliases_by_normalized(
    &self,
    normalized_name: String,
    kind: RegionKind,
  ) -> impl Future<Output = Result<Vec<Alias>, Self::Error>> + Send + '_;

  fn aliases_for(
    &self,
    region: RegionId,
  ) -> impl Future<Output = Result<Vec<Alias>, Self::Error>> + Send + '_;

  /// Bind `(raw_name, source_system)` to a region. A binding to a different
  /// region is reported as [`AliasOutcome::Conflict`] and not written. On
  /// insert, matching unmapped entries are cleared.
  fn add_alias(
    &self,
    alias: NewAlias,
  ) -> impl Future<Output = Result<AliasOutcome, Self::Error>> + Send + '_;

  /// Top-`limit` active regions of `kind` scoring at least `floor` against
  /// `normalized_name`, best first.
  fn fuzzy_candidates(
    &self,
    normalized_name: String,
    kind: RegionKind,
    floor: f64,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<MatchCandidate>, Self::Error>> + Send + '_;
}

// ─── Unmapped names ──────────────────────────────────────────────────────────

/// Persistence for the resolution log and unmapped name entries.
pub trait UnmappedStore: Backend {
  /// Append one sighting to the resolution log. Cheap; no aggregation.
  fn log_unmapped(
    &self,
    sighting: UnmappedSighting,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Fold pending log rows into unmapped entries and delete them, atomically.
  /// Returns the number of log rows consumed.
  fn absorb_unmapped_log(
    &self,
    source_system: Option<String>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  fn unmapped_entries(
    &self,
    query: UnmappedQuery,
  ) -> impl Future<Output = Result<Vec<UnmappedEntry>, Self::Error>> + Send + '_;

  fn get_unmapped(
    &self,
    entry_id: i64,
  ) -> impl Future<Output = Result<Option<UnmappedEntry>, Self::Error>> + Send + '_;

  fn set_suggestion(
    &self,
    entry_id: i64,
    suggestion: Suggestion,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;

  /// Remove entries for `(source_system, raw_name)`; returns how many.
  fn clear_unmapped(
    &self,
    source_system: String,
    raw_name: String,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;
}

// ─── Raw records ─────────────────────────────────────────────────────────────

/// Read-only access to the external landing table.
pub trait RawSource: Backend {
  /// Up to `limit` records of one source and date with `record_id` greater
  /// than `after`, ordered by `record_id`.
  fn fetch_raw(
    &self,
    source_system: String,
    date: NaiveDate,
    after: i64,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<RawRecord>, Self::Error>> + Send + '_;
}

// ─── Facts ───────────────────────────────────────────────────────────────────

/// Partitioned fact storage with an idempotent upsert primitive.
pub trait FactStore: Backend {
  /// Apply a chunk in one transaction: fact rows are upserted by natural
  /// key, breakdown sets replace the stored set of the same kind.
  fn write_chunk(
    &self,
    chunk: FactChunk,
  ) -> impl Future<Output = Result<ChunkWrite, Self::Error>> + Send + '_;

  fn visitor_facts(
    &self,
    range: DateRange,
  ) -> impl Future<Output = Result<Vec<VisitorFact>, Self::Error>> + Send + '_;

  fn spending_facts(
    &self,
    range: DateRange,
  ) -> impl Future<Output = Result<Vec<SpendingFact>, Self::Error>> + Send + '_;

  fn breakdowns(
    &self,
    key: ObservationKey,
  ) -> impl Future<Output = Result<Vec<BreakdownSet>, Self::Error>> + Send + '_;

  fn derived_metrics(
    &self,
    range: DateRange,
  ) -> impl Future<Output = Result<Vec<VisitorDerived>, Self::Error>> + Send + '_;

  /// Per-`(date, region)` aggregates for the quality audit.
  fn key_totals(
    &self,
    range: DateRange,
  ) -> impl Future<Output = Result<Vec<KeyTotals>, Self::Error>> + Send + '_;

  fn fact_counts(
    &self,
    range: DateRange,
  ) -> impl Future<Output = Result<FactCounts, Self::Error>> + Send + '_;

  fn partitions(
    &self,
  ) -> impl Future<Output = Result<Vec<PartitionInfo>, Self::Error>> + Send + '_;
}

// ─── Quality ─────────────────────────────────────────────────────────────────

pub trait QualityStore: Backend {
  /// Write records; a record for an existing `(batch, date, region)` replaces
  /// it, records of other batches are kept.
  fn write_quality(
    &self,
    records: Vec<QualityRecord>,
  ) -> impl Future<Output = Result<u64, Self::Error>> + Send + '_;

  fn quality_records(
    &self,
    batch_id: Uuid,
  ) -> impl Future<Output = Result<Vec<QualityRecord>, Self::Error>> + Send + '_;
}

// ─── Ledger ──────────────────────────────────────────────────────────────────

pub trait LedgerStore: Backend {
  fn start_run(
    &self,
    run: NewRun,
  ) -> impl Future<Output = Result<RunEntry, Self::Error>> + Send + '_;

  /// Move a running entry to its terminal status. Fails if the entry is
  /// missing or already terminal.
  fn finish_run(
    &self,
    run_id: Uuid,
    completion: RunCompletion,
  ) -> impl Future<Output = Result<RunEntry, Self::Error>> + Send + '_;

  fn get_run(
    &self,
    run_id: Uuid,
  ) -> impl Future<Output = Result<Option<RunEntry>, Self::Error>> + Send + '_;

  fn recent_runs(
    &self,
    limit: usize,
  ) -> impl Future<Output = Result<Vec<RunEntry>, Self::Error>> + Send + '_;

  fn run_summary(
    &self,
  ) -> impl Future<Output = Result<Vec<RunSummaryRow>, Self::Error>> + Send + '_;

  /// Mark every running entry started before `started_before` as failed with
  /// `message`. Returns the affected run ids.
  fn fail_stale_runs(
    &self,
    started_before: DateTime<Utc>,
    message: String,
  ) -> impl Future<Output = Result<Vec<Uuid>, Self::Error>> + Send + '_;

  /// Take the advisory lease unless another holder owns an unexpired one.
  fn acquire_lease(
    &self,
    request: LeaseRequest,
  ) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  fn release_lease(
    &self,
    source_system: String,
    job_kind: String,
    holder: Uuid,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
