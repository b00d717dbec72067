//! Integration tests for `SqliteStore` against an in-memory database.

use atlas_core::{
  ledger::{LeaseRequest, NewRun, RunCompletion, RunCounts, RunStatus},
  observation::{
    BreakdownKind, BreakdownRow, BreakdownSet, FactChunk, ObservationKey, SpendingFact,
    VisitorDerived, VisitorFact,
  },
  quality::{DiscrepancyType, QualityRecord},
  region::{
    AliasOutcome, NewAlias, NewRegion, RegionId, RegionKind, Suggestion, UnmappedQuery,
    UnmappedSighting, VariantType,
  },
  similarity::MatchCandidate,
  store::{DateRange, DictionaryStore, FactStore, LedgerStore, QualityStore, RawSource, UnmappedStore},
};
use chrono::{Duration, NaiveDate, Utc};
use uuid::Uuid;

use crate::{Error, SqliteStore};

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn day(d: u32) -> NaiveDate { NaiveDate::from_ymd_opt(2024, 3, d).unwrap() }

fn alias(region: RegionId, raw: &str, source: &str) -> NewAlias {
  NewAlias {
    region_id:     region,
    raw_name:      raw.into(),
    source_system: source.into(),
    variant:       VariantType::SourceSpecific,
    is_primary:    false,
  }
}

fn sighting(raw: &str, suggestion: Option<MatchCandidate>) -> UnmappedSighting {
  UnmappedSighting {
    source_system: "intervista".into(),
    raw_name: raw.into(),
    kind: RegionKind::City,
    fact_date: Some(day(1)),
    run_id: None,
    reason: "no match".into(),
    suggestion,
    runner_up_score: None,
  }
}

// ─── Regions ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn insert_if_absent_returns_existing_row() {
  let s = store().await;

  let (first, created) = s
    .insert_region_if_absent(NewRegion::new("Zürich", RegionKind::Canton).with_code("ZH"))
    .await
    .unwrap();
  assert!(created);
  assert_eq!(first.normalized_name, "zurich");
  assert_eq!(first.code.as_deref(), Some("ZH"));
  assert!(first.active);

  let (second, created) = s
    .insert_region_if_absent(NewRegion::new("ZURICH", RegionKind::Canton))
    .await
    .unwrap();
  assert!(!created);
  assert_eq!(second.region_id, first.region_id);
}

#[tokio::test]
async fn same_name_different_kind_are_distinct_regions() {
  let s = store().await;
  let (canton, _) = s
    .insert_region_if_absent(NewRegion::new("Zürich", RegionKind::Canton))
    .await
    .unwrap();
  let (city, created) = s
    .insert_region_if_absent(NewRegion::new("Zürich (City)", RegionKind::City))
    .await
    .unwrap();
  assert!(created);
  assert_ne!(canton.region_id, city.region_id);

  let found = s
    .find_region("zurich".into(), RegionKind::Canton)
    .await
    .unwrap()
    .unwrap();
  assert_eq!(found.region_id, canton.region_id);
  assert!(s.find_region("zurich".into(), RegionKind::City).await.unwrap().is_none());
  assert_eq!(s.regions_named("zurich".into()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn set_parent_rejects_cycles() {
  let s = store().await;
  let (canton, _) = s
    .insert_region_if_absent(NewRegion::new("Bern", RegionKind::Canton))
    .await
    .unwrap();
  let (district, _) = s
    .insert_region_if_absent(NewRegion::new("Thun", RegionKind::District))
    .await
    .unwrap();
  let (city, _) = s
    .insert_region_if_absent(NewRegion::new("Thun", RegionKind::City))
    .await
    .unwrap();

  s.set_parent(district.region_id, Some(canton.region_id)).await.unwrap();
  let city = s.set_parent(city.region_id, Some(district.region_id)).await.unwrap();
  assert_eq!(city.parent_id, Some(district.region_id));

  let err = s
    .set_parent(canton.region_id, Some(city.region_id))
    .await
    .unwrap_err();
  assert!(matches!(err, Error::CycleDetected { .. }));

  let err = s.set_parent(canton.region_id, Some(canton.region_id)).await.unwrap_err();
  assert!(matches!(err, Error::CycleDetected { .. }));

  // The rejected assignment left the canton a root.
  let canton = s.get_region(canton.region_id).await.unwrap().unwrap();
  assert_eq!(canton.parent_id, None);
}

#[tokio::test]
async fn set_parent_on_missing_region_fails() {
  let s = store().await;
  let err = s.set_parent(RegionId(99), None).await.unwrap_err();
  assert!(matches!(err, Error::RegionNotFound(RegionId(99))));
}

#[tokio::test]
async fn retired_region_frees_its_key() {
  let s = store().await;
  let (old, _) = s
    .insert_region_if_absent(NewRegion::new("Val-de-Travers", RegionKind::Municipality))
    .await
    .unwrap();

  let retired = s.retire_region(old.region_id).await.unwrap();
  assert!(!retired.active);
  assert!(retired.valid_to.is_some());

  assert!(s.list_regions(Some(RegionKind::Municipality), false).await.unwrap().is_empty());
  assert_eq!(s.list_regions(None, true).await.unwrap().len(), 1);

  let (new, created) = s
    .insert_region_if_absent(NewRegion::new("Val-de-Travers", RegionKind::Municipality))
    .await
    .unwrap();
  assert!(created);
  assert_ne!(new.region_id, old.region_id);
}

// ─── Aliases ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn alias_binding_is_unique_per_source() {
  let s = store().await;
  let (luzern, _) = s
    .insert_region_if_absent(NewRegion::new("Luzern", RegionKind::Canton))
    .await
    .unwrap();
  let (bern, _) = s
    .insert_region_if_absent(NewRegion::new("Bern", RegionKind::Canton))
    .await
    .unwrap();

  let out = s.add_alias(alias(luzern.region_id, "Lucerne", "mastercard")).await.unwrap();
  assert_eq!(out, AliasOutcome::Inserted);

  let out = s.add_alias(alias(luzern.region_id, "Lucerne", "mastercard")).await.unwrap();
  assert_eq!(out, AliasOutcome::AlreadyPresent);

  let out = s.add_alias(alias(bern.region_id, "Lucerne", "mastercard")).await.unwrap();
  assert_eq!(out, AliasOutcome::Conflict { existing: luzern.region_id });

  // Another source may bind the same raw name independently.
  let out = s.add_alias(alias(bern.region_id, "Lucerne", "intervista")).await.unwrap();
  assert_eq!(out, AliasOutcome::Inserted);

  let found = s
    .find_alias("mastercard".into(), "Lucerne".into())
    .await
    .unwrap()
    .unwrap();
  assert_eq!(found.region_id, luzern.region_id);
  assert_eq!(found.normalized_name, "lucerne");
  assert_eq!(s.aliases_for(luzern.region_id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn alias_to_missing_region_fails() {
  let s = store().await;
  let err = s.add_alias(alias(RegionId(7), "Nowhere", "x")).await.unwrap_err();
  assert!(matches!(err, Error::RegionNotFound(RegionId(7))));
}

#[tokio::test]
async fn normalized_alias_lookup_is_scoped_to_kind() {
  let s = store().await;
  let (canton, _) = s
    .insert_region_if_absent(NewRegion::new("Genève", RegionKind::Canton))
    .await
    .unwrap();
  s.add_alias(alias(canton.region_id, "GENÈVE", "mastercard")).await.unwrap();

  let hits = s
    .aliases_by_normalized("geneve".into(), RegionKind::Canton)
    .await
    .unwrap();
  assert_eq!(hits.len(), 1);
  assert!(
    s.aliases_by_normalized("geneve".into(), RegionKind::City)
      .await
      .unwrap()
      .is_empty()
  );
}

#[tokio::test]
async fn fuzzy_candidates_are_ranked_and_bounded() {
  let s = store().await;
  for name in ["Grindelwald", "Grindelwald Dorf", "Lauterbrunnen", "Interlaken"] {
    s.insert_region_if_absent(NewRegion::new(name, RegionKind::Municipality))
      .await
      .unwrap();
  }

  let hits = s
    .fuzzy_candidates("grindelwaldd".into(), RegionKind::Municipality, 0.3, 1)
    .await
    .unwrap();
  assert_eq!(hits.len(), 1);
  assert_eq!(hits[0].display_name, "Grindelwald");

  let all = s
    .fuzzy_candidates("grindelwald".into(), RegionKind::Municipality, 0.0, 10)
    .await
    .unwrap();
  assert_eq!(all.len(), 4);
  assert!(all.windows(2).all(|w| w[0].score >= w[1].score));
  assert_eq!(all[0].score, 1.0);

  assert!(
    s.fuzzy_candidates("grindelwald".into(), RegionKind::City, 0.0, 10)
      .await
      .unwrap()
      .is_empty()
  );
}

// ─── Unmapped names ──────────────────────────────────────────────────────────

#[tokio::test]
async fn absorbing_the_log_counts_occurrences_once() {
  let s = store().await;
  for _ in 0..3 {
    s.log_unmapped(sighting("Sankt Moritz", None)).await.unwrap();
  }
  s.log_unmapped(sighting("Pontresina", None)).await.unwrap();

  assert_eq!(s.absorb_unmapped_log(None).await.unwrap(), 4);
  // A second pass finds nothing new.
  assert_eq!(s.absorb_unmapped_log(None).await.unwrap(), 0);

  let entries = s.unmapped_entries(UnmappedQuery::default()).await.unwrap();
  assert_eq!(entries.len(), 2);
  assert_eq!(entries[0].raw_name, "Sankt Moritz");
  assert_eq!(entries[0].occurrences, 3);
  assert_eq!(entries[0].normalized_name, "sankt moritz");

  let frequent = s
    .unmapped_entries(UnmappedQuery { min_occurrences: Some(2), ..Default::default() })
    .await
    .unwrap();
  assert_eq!(frequent.len(), 1);
}

#[tokio::test]
async fn log_suggestions_keep_the_best_score() {
  let s = store().await;
  let (region, _) = s
    .insert_region_if_absent(NewRegion::new("St. Moritz", RegionKind::City))
    .await
    .unwrap();
  let candidate = |score| MatchCandidate {
    region_id: region.region_id,
    display_name: "St. Moritz".into(),
    score,
  };
  s.log_unmapped(sighting("St Moritz", Some(candidate(0.8)))).await.unwrap();
  s.log_unmapped(sighting("St Moritz", Some(candidate(0.6)))).await.unwrap();
  s.absorb_unmapped_log(Some("intervista".into())).await.unwrap();

  let entries = s
    .unmapped_entries(UnmappedQuery { with_suggestion: true, ..Default::default() })
    .await
    .unwrap();
  assert_eq!(entries.len(), 1);
  let suggestion = entries[0].suggestion.as_ref().unwrap();
  assert_eq!(suggestion.region_id, region.region_id);
  assert_eq!(suggestion.score, 0.8);
}

#[tokio::test]
async fn adding_an_alias_clears_unmapped_entries() {
  let s = store().await;
  let (region, _) = s
    .insert_region_if_absent(NewRegion::new("Basel", RegionKind::City))
    .await
    .unwrap();
  s.log_unmapped(sighting("Bâle", None)).await.unwrap();
  s.absorb_unmapped_log(None).await.unwrap();
  assert_eq!(s.unmapped_entries(UnmappedQuery::default()).await.unwrap().len(), 1);

  s.add_alias(alias(region.region_id, "Bâle", "intervista")).await.unwrap();
  assert!(s.unmapped_entries(UnmappedQuery::default()).await.unwrap().is_empty());

  // Sightings logged before the alias existed are dropped on absorb.
  s.log_unmapped(sighting("Bâle", None)).await.unwrap();
  assert_eq!(s.absorb_unmapped_log(None).await.unwrap(), 1);
  assert!(s.unmapped_entries(UnmappedQuery::default()).await.unwrap().is_empty());
}

#[tokio::test]
async fn absorbed_suggestion_keeps_its_runner_up() {
  let s = store().await;
  let (region, _) = s
    .insert_region_if_absent(NewRegion::new("Chur", RegionKind::City))
    .await
    .unwrap();
  let candidate = MatchCandidate {
    region_id:    region.region_id,
    display_name: "Chur".into(),
    score:        0.75,
  };
  let mut tied = sighting("Cur", Some(candidate));
  tied.runner_up_score = Some(0.74);
  s.log_unmapped(tied).await.unwrap();
  s.absorb_unmapped_log(None).await.unwrap();

  let entry = s.unmapped_entries(UnmappedQuery::default()).await.unwrap().remove(0);
  let suggestion = entry.suggestion.unwrap();
  assert_eq!(suggestion.runner_up_score, Some(0.74));
  assert!(!suggestion.is_unambiguous(0.05));
}

#[tokio::test]
async fn set_suggestion_overwrites_entry_suggestion() {
  let s = store().await;
  let (region, _) = s
    .insert_region_if_absent(NewRegion::new("Chur", RegionKind::City))
    .await
    .unwrap();
  s.log_unmapped(sighting("Coira", None)).await.unwrap();
  s.absorb_unmapped_log(None).await.unwrap();
  let entry = s.unmapped_entries(UnmappedQuery::default()).await.unwrap().remove(0);
  assert!(entry.suggestion.is_none());

  s.set_suggestion(entry.entry_id, Suggestion {
    region_id:       region.region_id,
    score:           0.72,
    runner_up_score: Some(0.4),
    suggested_at:    Utc::now(),
  })
  .await
  .unwrap();

  let entry = s.get_unmapped(entry.entry_id).await.unwrap().unwrap();
  let suggestion = entry.suggestion.unwrap();
  assert_eq!(suggestion.runner_up_score, Some(0.4));

  assert_eq!(s.clear_unmapped("intervista".into(), "Coira".into()).await.unwrap(), 1);
  assert!(s.get_unmapped(entry.entry_id).await.unwrap().is_none());
}

// ─── Landing and facts ───────────────────────────────────────────────────────

#[tokio::test]
async fn fetch_raw_pages_by_record_id() {
  let s = store().await;
  for i in 0..5 {
    s.land_raw_record("intervista", day(1), &format!("{{\"n\":{i}}}")).await.unwrap();
  }
  s.land_raw_record("intervista", day(2), "{}").await.unwrap();
  s.land_raw_record("mastercard", day(1), "{}").await.unwrap();

  let first = s.fetch_raw("intervista".into(), day(1), 0, 3).await.unwrap();
  assert_eq!(first.len(), 3);
  let after = first.last().unwrap().record_id;
  let rest = s.fetch_raw("intervista".into(), day(1), after, 3).await.unwrap();
  assert_eq!(rest.len(), 2);
  assert!(rest.iter().all(|r| r.record_id > after && r.fact_date == day(1)));
}

async fn region(s: &SqliteStore, name: &str) -> RegionId {
  s.insert_region_if_absent(NewRegion::new(name, RegionKind::Canton))
    .await
    .unwrap()
    .0
    .region_id
}

fn chunk(region: RegionId, visitors: i64, age_rows: &[(&str, f64)]) -> FactChunk {
  let key = ObservationKey {
    fact_date:     day(4),
    region_id:     region,
    source_system: "intervista".into(),
  };
  let mut chunk = FactChunk::new(Uuid::new_v4());
  chunk.visitor_facts.push(VisitorFact { key: key.fact_key("total"), visitors });
  chunk.visitor_facts.push(VisitorFact { key: key.fact_key("swiss_local"), visitors: visitors - 1 });
  chunk.breakdowns.push(BreakdownSet {
    key:  key.clone(),
    kind: BreakdownKind::AgeGroup,
    rows: age_rows
      .iter()
      .enumerate()
      .map(|(i, (label, value))| BreakdownRow {
        label: (*label).into(),
        rank:  i as u32 + 1,
        value: *value,
      })
      .collect(),
  });
  chunk.derived.push(VisitorDerived { key: key.clone(), avg_dwell_minutes: Some(42.0) });
  chunk.spending_facts.push(SpendingFact {
    key:          key.fact_key("retail"),
    transactions: 4,
    amount:       100.0,
    avg_ticket:   Some(25.0),
  });
  chunk
}

fn march() -> DateRange {
  DateRange { from: day(1), to: day(31), source_system: None }
}

#[tokio::test]
async fn rewriting_a_chunk_is_idempotent() {
  let s = store().await;
  let r = region(&s, "Wallis").await;

  let ages = [("0-19", 0.2), ("20-39", 0.5), ("40+", 0.3)];
  s.write_chunk(chunk(r, 10, &ages)).await.unwrap();
  let before = s.fact_counts(march()).await.unwrap();
  s.write_chunk(chunk(r, 10, &ages)).await.unwrap();
  let after = s.fact_counts(march()).await.unwrap();

  assert_eq!(before, after);
  assert_eq!(after.visitor_rows, 2);
  assert_eq!(after.breakdown_rows, 3);
  assert_eq!(after.derived_rows, 1);
  assert_eq!(after.spending_rows, 1);
}

#[tokio::test]
async fn breakdown_sets_replace_rather_than_merge() {
  let s = store().await;
  let r = region(&s, "Tessin").await;

  s.write_chunk(chunk(r, 10, &[("a", 0.1), ("b", 0.2), ("c", 0.7)])).await.unwrap();
  s.write_chunk(chunk(r, 12, &[("x", 1.0)])).await.unwrap();

  let key = ObservationKey {
    fact_date:     day(4),
    region_id:     r,
    source_system: "intervista".into(),
  };
  let sets = s.breakdowns(key).await.unwrap();
  assert_eq!(sets.len(), 1);
  assert_eq!(sets[0].rows.len(), 1);
  assert_eq!(sets[0].rows[0].label, "x");

  let facts = s.visitor_facts(march()).await.unwrap();
  let total = facts.iter().find(|f| f.key.category == "total").unwrap();
  assert_eq!(total.visitors, 12);
}

#[tokio::test]
async fn range_queries_respect_dates_and_source() {
  let s = store().await;
  let r = region(&s, "Uri").await;
  s.write_chunk(chunk(r, 5, &[])).await.unwrap();

  let april = DateRange {
    from: NaiveDate::from_ymd_opt(2024, 4, 1).unwrap(),
    to: NaiveDate::from_ymd_opt(2024, 4, 30).unwrap(),
    source_system: None,
  };
  assert!(s.visitor_facts(april).await.unwrap().is_empty());

  let other_source = DateRange { source_system: Some("mastercard".into()), ..march() };
  assert!(s.spending_facts(other_source).await.unwrap().is_empty());

  let spending = s.spending_facts(march()).await.unwrap();
  assert_eq!(spending.len(), 1);
  assert_eq!(spending[0].avg_ticket, Some(25.0));
  let derived = s.derived_metrics(march()).await.unwrap();
  assert_eq!(derived[0].avg_dwell_minutes, Some(42.0));
}

#[tokio::test]
async fn partition_registry_tracks_row_counts() {
  let s = store().await;
  let r = region(&s, "Glarus").await;
  let c = chunk(r, 8, &[("a", 1.0)]);
  let batch = c.batch_id;
  s.write_chunk(c).await.unwrap();

  let parts = s.partitions().await.unwrap();
  assert_eq!(parts.len(), 4);
  assert!(parts.iter().all(|p| p.partition_key == "2024-03"));
  assert!(parts.iter().all(|p| p.last_batch_id == Some(batch)));
  let visitor = parts.iter().find(|p| p.table_name == "visitor_facts").unwrap();
  assert_eq!(visitor.row_count, 2);
}

#[tokio::test]
async fn key_totals_aggregate_categories_and_breakdowns() {
  let s = store().await;
  let r = region(&s, "Jura").await;
  s.write_chunk(chunk(r, 10, &[("0-19", 1.0)])).await.unwrap();

  let totals = s.key_totals(march()).await.unwrap();
  assert_eq!(totals.len(), 1);
  let t = &totals[0];
  assert_eq!(t.total_visitors, Some(10));
  assert_eq!(t.category_sum, 9);
  assert_eq!(t.category_rows, 1);
  assert!(t.has_demographics);
  assert!(!t.has_dwell_time);
}

// ─── Quality ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn quality_records_are_kept_per_batch() {
  let s = store().await;
  let record = |batch_id| QualityRecord {
    batch_id,
    fact_date: day(2),
    region_id: RegionId(1),
    total_visitors: 14,
    category_sum: 15,
    has_demographics: true,
    has_dwell_time: false,
    has_discrepancy: true,
    discrepancy_type: Some(DiscrepancyType::SumExceedsTotal),
    discrepancy_pct: 7.14,
    is_error: true,
    audited_at: Utc::now(),
  };
  let (b1, b2) = (Uuid::new_v4(), Uuid::new_v4());
  s.write_quality(vec![record(b1)]).await.unwrap();
  s.write_quality(vec![record(b1), record(b2)]).await.unwrap();

  let first = s.quality_records(b1).await.unwrap();
  assert_eq!(first.len(), 1);
  assert_eq!(first[0].discrepancy_type, Some(DiscrepancyType::SumExceedsTotal));
  assert_eq!(s.quality_records(b2).await.unwrap().len(), 1);
}

// ─── Ledger ──────────────────────────────────────────────────────────────────

fn new_run(process: &str) -> NewRun {
  NewRun { process_name: process.into(), source_system: Some("intervista".into()) }
}

#[tokio::test]
async fn run_moves_to_terminal_status_once() {
  let s = store().await;
  let run = s.start_run(new_run("load")).await.unwrap();
  assert_eq!(run.status, RunStatus::Running);

  let counts = RunCounts { read: 100, processed: 95, failed: 5, skipped: 0 };
  let done = s
    .finish_run(run.run_id, RunCompletion {
      status: RunStatus::Partial,
      counts,
      message: Some("5 unresolved".into()),
    })
    .await
    .unwrap();
  assert_eq!(done.status, RunStatus::Partial);
  assert_eq!(done.counts, counts);
  assert!(done.finished_at.is_some());

  let err = s
    .finish_run(run.run_id, RunCompletion {
      status: RunStatus::Completed,
      counts,
      message: None,
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::RunAlreadyFinished { status: RunStatus::Partial, .. }));

  let err = s
    .finish_run(Uuid::new_v4(), RunCompletion {
      status: RunStatus::Completed,
      counts,
      message: None,
    })
    .await
    .unwrap_err();
  assert!(matches!(err, Error::RunNotFound(_)));
}

#[tokio::test]
async fn stale_runs_are_failed_by_the_watchdog_query() {
  let s = store().await;
  let run = s.start_run(new_run("load")).await.unwrap();

  let none = s
    .fail_stale_runs(Utc::now() - Duration::hours(1), "stale".into())
    .await
    .unwrap();
  assert!(none.is_empty());

  let failed = s
    .fail_stale_runs(Utc::now() + Duration::seconds(1), "stale".into())
    .await
    .unwrap();
  assert_eq!(failed, vec![run.run_id]);

  let entry = s.get_run(run.run_id).await.unwrap().unwrap();
  assert_eq!(entry.status, RunStatus::Failed);
  assert_eq!(entry.message.as_deref(), Some("stale"));
}

#[tokio::test]
async fn summary_groups_by_process_and_status() {
  let s = store().await;
  for _ in 0..2 {
    let run = s.start_run(new_run("load")).await.unwrap();
    s.finish_run(run.run_id, RunCompletion {
      status:  RunStatus::Completed,
      counts:  RunCounts { read: 10, processed: 10, failed: 0, skipped: 0 },
      message: None,
    })
    .await
    .unwrap();
  }
  s.start_run(new_run("audit")).await.unwrap();

  let summary = s.run_summary().await.unwrap();
  assert_eq!(summary.len(), 2);
  let load = summary.iter().find(|r| r.process_name == "load").unwrap();
  assert_eq!(load.runs, 2);
  assert_eq!(load.records_processed, 20);
  assert_eq!(s.recent_runs(2).await.unwrap().len(), 2);
}

#[tokio::test]
async fn leases_exclude_other_holders_until_expiry() {
  let s = store().await;
  let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
  let request = |holder, ttl| LeaseRequest {
    source_system: "intervista".into(),
    job_kind: "load".into(),
    holder,
    ttl,
  };

  assert!(s.acquire_lease(request(a, Duration::minutes(5))).await.unwrap());
  assert!(!s.acquire_lease(request(b, Duration::minutes(5))).await.unwrap());
  // Re-entrant for the same holder.
  assert!(s.acquire_lease(request(a, Duration::minutes(5))).await.unwrap());

  s.release_lease("intervista".into(), "load".into(), a).await.unwrap();
  assert!(s.acquire_lease(request(b, Duration::seconds(-1))).await.unwrap());
  // b's lease is already expired, so a can take over.
  assert!(s.acquire_lease(request(a, Duration::minutes(5))).await.unwrap());
}
