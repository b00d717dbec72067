//! Batch Loader: moves landing records of one source and date range into
//! the fact tables.
//!
//! A run splits the range into dates and hands up to `concurrency` dates at
//! a time to workers. A worker pages through its date in chunks of
//! `batch_size` records; each chunk resolves its regions, decomposes its
//! observations and commits its rows in one transaction. Because fact rows
//! are upserted by natural key, a failed run is recovered by running it
//! again.

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
  },
  time::Instant,
};

use atlas_core::{
  ledger::{LeaseRequest, NewRun, RunCompletion, RunCounts, RunStatus},
  observation::{ChunkWrite, FactChunk, RawRecord},
  region::{KindMap, RegionId, UnmappedSighting},
  similarity::MatchCandidate,
  store::RawSource,
};
use atlas_payload::SubrecordIssue;
use chrono::NaiveDate;
use futures::{StreamExt, stream};
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;

use crate::{
  Error, Result, Warehouse,
  config::{AtlasConfig, LoaderConfig},
  context::JobContext,
  decompose::decompose,
  dictionary::{Dictionary, Resolution},
  retry::with_retries,
};

/// Lease job kind taken by load runs.
pub const LOAD_JOB: &str = "load";

/// Failure causes copied into the ledger message.
const MESSAGE_CAUSES: usize = 5;

/// One invocation of the loader.
#[derive(Debug, Clone)]
pub struct LoadRequest {
  pub source_system:          String,
  pub from:                   NaiveDate,
  pub to:                     NaiveDate,
  /// Overrides `loader.batch_size`.
  pub batch_size:             Option<usize>,
  /// Overrides both the dictionary's auto-accept threshold and the minimum
  /// confidence a fuzzy match needs to be loaded.
  pub auto_approve_threshold: Option<f64>,
}

/// Terminal state of a load run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadStatus {
  Completed,
  /// Some records failed while others were loaded.
  PartialFailure,
  Failed,
}

impl LoadStatus {
  pub fn exit_code(self) -> i32 {
    match self {
      Self::Completed => 0,
      Self::PartialFailure => 1,
      Self::Failed => 2,
    }
  }

  pub fn run_status(self) -> RunStatus {
    match self {
      Self::Completed => RunStatus::Completed,
      Self::PartialFailure => RunStatus::Partial,
      Self::Failed => RunStatus::Failed,
    }
  }
}

/// Why one record was not loaded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordFailure {
  pub record_id: i64,
  pub fact_date: NaiveDate,
  pub cause:     String,
}

/// What happened to one landing record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
  /// Rows were staged. `issues` lists sub-structures that were dropped.
  Loaded {
    record_id: i64,
    issues:    Vec<SubrecordIssue>,
  },
  /// Nothing to load.
  Skipped { record_id: i64, reason: String },
  Failed(RecordFailure),
}

#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
  /// Also the batch id stamped on every fact row written by the run.
  pub run_id:       Uuid,
  pub status:       LoadStatus,
  pub counts:       RunCounts,
  pub rows:         ChunkWrite,
  pub elapsed_secs: f64,
  pub message:      Option<String>,
  pub failures:     Vec<RecordFailure>,
}

impl LoadReport {
  pub fn records_processed(&self) -> u64 { self.counts.processed }

  pub fn records_failed(&self) -> u64 { self.counts.failed }
}

#[derive(Default)]
struct ChunkResult {
  counts:   RunCounts,
  rows:     ChunkWrite,
  failures: Vec<RecordFailure>,
  /// Set when the chunk could not be committed.
  fatal:    Option<Error>,
}

/// Run-wide accumulator.
#[derive(Default)]
struct Progress {
  counts:    RunCounts,
  rows:      ChunkWrite,
  failures:  Vec<RecordFailure>,
  /// Why the run stopped early, if it did.
  abort:     Option<String>,
  cancelled: bool,
}

impl Progress {
  fn absorb(&mut self, chunk: ChunkResult) {
    self.counts.absorb(chunk.counts);
    self.rows.absorb(chunk.rows);
    self.failures.extend(chunk.failures);
    if let Some(e) = chunk.fatal {
      self.abort.get_or_insert_with(|| e.to_string());
    }
  }

  fn status(&self) -> LoadStatus {
    if self.abort.is_some() {
      LoadStatus::Failed
    } else if self.cancelled {
      if self.counts.processed > 0 { LoadStatus::PartialFailure } else { LoadStatus::Failed }
    } else if self.counts.failed == 0 {
      LoadStatus::Completed
    } else if self.counts.processed == 0 {
      LoadStatus::Failed
    } else {
      LoadStatus::PartialFailure
    }
  }

  fn message(&self) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(abort) = &self.abort {
      parts.push(format!("aborted: {abort}"));
    }
    if self.cancelled {
      parts.push(format!("cancelled after {} records", self.counts.read));
    }
    if self.counts.failed > 0 {
      let causes: Vec<String> = self
        .failures
        .iter()
        .take(MESSAGE_CAUSES)
        .map(|f| format!("#{} {}", f.record_id, f.cause))
        .collect();
      parts.push(format!(
        "{} of {} records failed: {}",
        self.counts.failed,
        self.counts.read,
        causes.join("; ")
      ));
    }
    (!parts.is_empty()).then(|| parts.join(". "))
  }
}

/// Pages through one date of the landing table in record-id order.
struct DatePager {
  source_system: String,
  date:          NaiveDate,
  after:         i64,
  limit:         usize,
  done:          bool,
}

impl DatePager {
  fn new(source_system: &str, date: NaiveDate, limit: usize) -> Self {
    Self { source_system: source_system.to_owned(), date, after: 0, limit, done: false }
  }

  async fn next_page<S: RawSource>(
    &mut self,
    store: &S,
    loader: &LoaderConfig,
  ) -> Result<Option<Vec<RawRecord>>> {
    if self.done {
      return Ok(None);
    }
    let (source_system, date, after, limit) =
      (self.source_system.clone(), self.date, self.after, self.limit);
    let page = with_retries(loader.retry_policy(), "fetch raw records", || {
      store.fetch_raw(source_system.clone(), date, after, limit)
    })
    .await?;

    match page.last() {
      Some(last) if page.len() >= self.limit => self.after = last.record_id,
      _ => self.done = true,
    }
    Ok((!page.is_empty()).then_some(page))
  }
}

/// State shared by the date workers of one run.
struct RunScope<'a, S> {
  ctx:            &'a JobContext,
  dictionary:     Dictionary<S>,
  run_id:         Uuid,
  source_system:  &'a str,
  batch_size:     usize,
  min_confidence: f64,
  /// Raised by the first worker that hits the abort rule.
  halted:         AtomicBool,
}

impl<S> RunScope<'_, S> {
  fn should_stop(&self) -> bool { self.ctx.is_cancelled() || self.halted.load(Ordering::SeqCst) }
}

/// Chunks committed for one date, plus the error that stopped it early.
#[derive(Default)]
struct DateResult {
  chunks: Vec<ChunkResult>,
  error:  Option<Error>,
}

pub struct Loader<S> {
  store:      Arc<S>,
  dictionary: Dictionary<S>,
  kinds:      KindMap,
  config:     LoaderConfig,
}

impl<S: Warehouse> Loader<S> {
  pub fn new(store: Arc<S>, config: &AtlasConfig) -> Self {
    Self {
      dictionary: Dictionary::new(Arc::clone(&store), config.dictionary),
      store,
      kinds: config.kind_map(),
      config: config.loader.clone(),
    }
  }

  /// Load one source over `[from, to]`. Record-level failures are part of
  /// the report; an `Err` means the run could not be started or finalised.
  pub async fn run(&self, ctx: &JobContext, request: LoadRequest) -> Result<LoadReport> {
    let span = tracing::info_span!(
      parent: &ctx.span(),
      "load",
      source_system = %request.source_system,
      from = %request.from,
      to = %request.to,
    );
    self.run_leased(ctx, request).instrument(span).await
  }

  async fn run_leased(&self, ctx: &JobContext, request: LoadRequest) -> Result<LoadReport> {
    let lease = LeaseRequest {
      source_system: request.source_system.clone(),
      job_kind:      LOAD_JOB.to_owned(),
      holder:        ctx.holder(),
      ttl:           self.config.lease_ttl(),
    };
    if !self.store.acquire_lease(lease).await.map_err(Error::store)? {
      return Err(Error::LeaseHeld {
        source_system: request.source_system,
        job_kind:      LOAD_JOB.to_owned(),
      });
    }

    let result = self.run_ledgered(ctx, &request).await;

    if let Err(e) = self
      .store
      .release_lease(request.source_system.clone(), LOAD_JOB.to_owned(), ctx.holder())
      .await
    {
      tracing::warn!(error = %e, "could not release load lease");
    }
    result
  }

  async fn run_ledgered(&self, ctx: &JobContext, request: &LoadRequest) -> Result<LoadReport> {
    let started = Instant::now();
    let run = self
      .store
      .start_run(NewRun {
        process_name:  ctx.job().to_owned(),
        source_system: Some(request.source_system.clone()),
      })
      .await
      .map_err(Error::store)?;
    tracing::info!(run_id = %run.run_id, "load started");

    let mut progress = Progress::default();
    self.load_range(ctx, run.run_id, request, &mut progress).await;

    let status = progress.status();
    let message = progress.message();
    let completion = RunCompletion {
      status:  status.run_status(),
      counts:  progress.counts,
      message: message.clone(),
    };
    with_retries(self.config.retry_policy(), "finish ledger entry", || {
      self.store.finish_run(run.run_id, completion.clone())
    })
    .await?;

    let report = LoadReport {
      run_id: run.run_id,
      status,
      counts: progress.counts,
      rows: progress.rows,
      elapsed_secs: started.elapsed().as_secs_f64(),
      message,
      failures: progress.failures,
    };
    tracing::info!(
      run_id = %report.run_id,
      status = ?report.status,
      read = report.counts.read,
      processed = report.counts.processed,
      failed = report.counts.failed,
      skipped = report.counts.skipped,
      elapsed_secs = report.elapsed_secs,
      "load finished"
    );
    Ok(report)
  }

  /// Each worker owns whole dates and pages through them in order, so two
  /// records with the same natural key are never committed concurrently.
  async fn load_range(
    &self,
    ctx: &JobContext,
    run_id: Uuid,
    request: &LoadRequest,
    progress: &mut Progress,
  ) {
    let concurrency = self.config.concurrency.max(1);
    let (dictionary, min_confidence) = match request.auto_approve_threshold {
      Some(t) => (self.dictionary.clone().with_auto_accept(t), t),
      None => (self.dictionary.clone(), self.config.min_confidence),
    };
    let scope = RunScope {
      ctx,
      dictionary,
      run_id,
      source_system: &request.source_system,
      batch_size: request.batch_size.unwrap_or(self.config.batch_size).max(1),
      min_confidence,
      halted: AtomicBool::new(false),
    };

    let dates: Vec<NaiveDate> =
      request.from.iter_days().take_while(|d| *d <= request.to).collect();
    for wave in dates.chunks(concurrency) {
      if ctx.is_cancelled() {
        break;
      }
      let results: Vec<DateResult> = stream::iter(wave.iter().copied())
        .map(|date| self.load_date(&scope, date))
        .buffer_unordered(concurrency)
        .collect()
        .await;

      for result in results {
        for chunk in result.chunks {
          if let Some(reason) = self.abort_reason(&chunk) {
            progress.abort.get_or_insert(reason);
          }
          progress.absorb(chunk);
        }
        if let Some(e) = result.error {
          progress.abort.get_or_insert_with(|| e.to_string());
        }
      }
      if progress.abort.is_some() {
        tracing::error!(run_id = %run_id, abort = ?progress.abort, "load aborted");
        return;
      }
    }

    if ctx.is_cancelled() {
      tracing::warn!(run_id = %run_id, "load cancelled");
      progress.cancelled = true;
    }
  }

  async fn load_date(&self, scope: &RunScope<'_, S>, date: NaiveDate) -> DateResult {
    let mut result = DateResult::default();
    let mut pager = DatePager::new(scope.source_system, date, scope.batch_size);
    while !scope.should_stop() {
      let records = match pager.next_page(self.store.as_ref(), &self.config).await {
        Ok(Some(records)) => records,
        Ok(None) => break,
        Err(e) => {
          scope.halted.store(true, Ordering::SeqCst);
          result.error = Some(e);
          break;
        }
      };
      let chunk = self
        .load_chunk(&scope.dictionary, scope.run_id, scope.min_confidence, records)
        .await;
      if chunk.fatal.is_some() || self.abort_reason(&chunk).is_some() {
        scope.halted.store(true, Ordering::SeqCst);
      }
      result.chunks.push(chunk);
    }
    result
  }

  /// A chunk where nearly every record failed points at a systemic fault.
  fn abort_reason(&self, result: &ChunkResult) -> Option<String> {
    let read = result.counts.read;
    if read == 0 || read < self.config.abort_min_chunk as u64 {
      return None;
    }
    let rate = result.counts.failed as f64 / read as f64;
    (rate >= self.config.abort_failure_rate).then(|| {
      format!("{} of {} records in one chunk failed", result.counts.failed, read)
    })
  }

  async fn load_chunk(
    &self,
    dictionary: &Dictionary<S>,
    run_id: Uuid,
    min_confidence: f64,
    records: Vec<RawRecord>,
  ) -> ChunkResult {
    let mut result = ChunkResult::default();
    result.counts.read = records.len() as u64;
    let mut chunk = FactChunk::new(run_id);
    let mut loaded = 0u64;

    for raw in records {
      match self
        .load_record(dictionary, run_id, min_confidence, raw, &mut chunk)
        .await
      {
        RecordOutcome::Loaded { .. } => loaded += 1,
        RecordOutcome::Skipped { record_id, reason } => {
          tracing::debug!(record_id, %reason, "record skipped");
          result.counts.skipped += 1;
        }
        RecordOutcome::Failed(failure) => {
          tracing::warn!(
            record_id = failure.record_id,
            fact_date = %failure.fact_date,
            cause = %failure.cause,
            "record failed"
          );
          result.counts.failed += 1;
          result.failures.push(failure);
        }
      }
    }

    if chunk.is_empty() {
      result.counts.processed = loaded;
      return result;
    }
    let write = with_retries(self.config.retry_policy(), "write fact chunk", || {
      self.store.write_chunk(chunk.clone())
    })
    .await;
    match write {
      Ok(rows) => {
        tracing::info!(
          run_id = %run_id,
          records = loaded,
          visitor_rows = rows.visitor_rows,
          breakdown_rows = rows.breakdown_rows,
          spending_rows = rows.spending_rows,
          "chunk committed"
        );
        result.counts.processed = loaded;
        result.rows = rows;
      }
      Err(e) => {
        result.counts.failed += loaded;
        result.fatal = Some(e);
      }
    }
    result
  }

  /// Decode, resolve and decompose one record into `chunk`.
  pub async fn load_record(
    &self,
    dictionary: &Dictionary<S>,
    run_id: Uuid,
    min_confidence: f64,
    raw: RawRecord,
    chunk: &mut FactChunk,
  ) -> RecordOutcome {
    let fail = |cause: String| {
      RecordOutcome::Failed(RecordFailure {
        record_id: raw.record_id,
        fact_date: raw.fact_date,
        cause,
      })
    };

    let record = match atlas_payload::decode(&raw) {
      Ok(record) => record,
      Err(e) => return fail(e.to_string()),
    };
    if !record.observation.has_measures() {
      return RecordOutcome::Skipped {
        record_id: raw.record_id,
        reason:    "observation carries no measures".into(),
      };
    }

    let region = record.observation.region();
    let Some(kind) = self.kinds.resolve(&region.kind) else {
      return fail(
        Error::ResolutionMiss {
          raw_name: region.name.clone(),
          reason:   format!("unknown kind label {:?}", region.kind),
        }
        .to_string(),
      );
    };

    let resolution = if self.config.create_kinds.contains(&kind) {
      dictionary
        .resolve_or_create(&record.source_system, &region.name, kind)
        .await
    } else {
      dictionary.resolve(&record.source_system, &region.name, kind).await
    };
    let resolution = match resolution {
      Ok(resolution) => resolution,
      Err(e) => return fail(e.to_string()),
    };

    let region_id = match accepted_region(&resolution, min_confidence) {
      Some(region_id) => region_id,
      None => {
        let reason = miss_reason(&resolution, min_confidence);
        let suggestion = self.suggestion_for(&resolution).await;
        dictionary
          .record_unmapped(UnmappedSighting {
            source_system: record.source_system.clone(),
            raw_name: region.name.clone(),
            kind,
            fact_date: Some(record.fact_date),
            run_id: Some(run_id),
            reason: reason.clone(),
            suggestion,
            runner_up_score: resolution.runner_up_score(),
          })
          .await;
        return fail(Error::ResolutionMiss { raw_name: region.name.clone(), reason }.to_string());
      }
    };

    let mut issues = record.issues.clone();
    issues.extend(decompose(&record, region_id, chunk));
    for issue in &issues {
      let err = Error::MalformedSubrecord {
        field:  issue.field.clone(),
        reason: issue.reason.clone(),
      };
      tracing::warn!(record_id = raw.record_id, error = %err, "sub-structure skipped");
    }
    RecordOutcome::Loaded { record_id: raw.record_id, issues }
  }

  /// The candidate worth keeping for review. Low-confidence matches carry
  /// only a region id, so their display name is looked up.
  async fn suggestion_for(&self, resolution: &Resolution) -> Option<MatchCandidate> {
    match resolution {
      Resolution::Matched { region_id, confidence, .. } => {
        let display_name = match self.store.get_region(*region_id).await {
          Ok(Some(region)) => region.display_name,
          _ => String::new(),
        };
        Some(MatchCandidate { region_id: *region_id, display_name, score: *confidence })
      }
      other => other.suggestion(),
    }
  }
}

fn accepted_region(resolution: &Resolution, min_confidence: f64) -> Option<RegionId> {
  match resolution {
    Resolution::Created { region_id } => Some(*region_id),
    Resolution::Matched { region_id, confidence, .. } if *confidence >= min_confidence => {
      Some(*region_id)
    }
    _ => None,
  }
}

fn miss_reason(resolution: &Resolution, min_confidence: f64) -> String {
  match resolution {
    Resolution::Matched { confidence, .. } => {
      format!("best match {confidence:.2} is below the load confidence {min_confidence:.2}")
    }
    Resolution::Ambiguous { best, runner_up } => format!(
      "ambiguous between {:?} ({:.2}) and {:?} ({:.2})",
      best.display_name, best.score, runner_up.display_name, runner_up.score
    ),
    Resolution::Unresolved { best: Some(best) } => {
      format!("closest candidate {:?} scored {:.2}", best.display_name, best.score)
    }
    Resolution::Unresolved { best: None } | Resolution::Created { .. } => "no candidate".into(),
  }
}
