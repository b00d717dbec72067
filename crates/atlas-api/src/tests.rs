//! Router tests against an in-memory `SqliteStore`.

use std::sync::Arc;

use atlas_core::{
  ledger::{NewRun, RunCompletion, RunCounts, RunStatus},
  quality::{QualityRecord, ScoreWeights},
  region::{NewRegion, RegionKind, UnmappedSighting},
  store::{DictionaryStore, LedgerStore, QualityStore, UnmappedStore},
};
use atlas_store_sqlite::SqliteStore;
use axum::{
  Router,
  body::{Body, to_bytes},
  http::{Request, StatusCode},
};
use chrono::{NaiveDate, Utc};
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use crate::api_router;

async fn setup() -> (Arc<SqliteStore>, Router) {
  let store = Arc::new(SqliteStore::open_in_memory().await.expect("in-memory store"));
  let router = api_router(Arc::clone(&store), ScoreWeights::default());
  (store, router)
}

async fn get(router: Router, uri: &str) -> (StatusCode, Value) {
  let response = router
    .oneshot(Request::get(uri).body(Body::empty()).unwrap())
    .await
    .unwrap();
  let status = response.status();
  let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
  (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn runs_are_listed_and_fetched() {
  let (store, router) = setup().await;
  let run = store
    .start_run(NewRun { process_name: "load".into(), source_system: Some("intervista".into()) })
    .await
    .unwrap();
  store
    .finish_run(run.run_id, RunCompletion {
      status:  RunStatus::Partial,
      counts:  RunCounts { read: 100, processed: 95, failed: 5, skipped: 0 },
      message: Some("5 of 100 records failed".into()),
    })
    .await
    .unwrap();

  let (status, body) = get(router.clone(), "/runs").await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body.as_array().unwrap().len(), 1);

  let (status, body) = get(router.clone(), &format!("/runs/{}", run.run_id)).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["status"], "partial");
  assert_eq!(body["counts"]["processed"], 95);

  let (status, body) = get(router, "/runs/summary").await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body[0]["records_failed"], 5);
}

#[tokio::test]
async fn unknown_run_is_404() {
  let (_, router) = setup().await;
  let (status, body) = get(router, &format!("/runs/{}", Uuid::new_v4())).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
  assert!(body["error"].as_str().unwrap().starts_with("run "));
}

#[tokio::test]
async fn zero_limit_is_rejected() {
  let (_, router) = setup().await;
  let (status, _) = get(router, "/runs?limit=0").await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn quality_summary_and_records() {
  let (store, router) = setup().await;
  let (region, _) = store
    .insert_region_if_absent(NewRegion::new("Luzern", RegionKind::Canton))
    .await
    .unwrap();
  let batch = Uuid::new_v4();
  store
    .write_quality(vec![QualityRecord {
      batch_id:         batch,
      fact_date:        NaiveDate::from_ymd_opt(2024, 7, 5).unwrap(),
      region_id:        region.region_id,
      total_visitors:   14,
      category_sum:     15,
      has_demographics: true,
      has_dwell_time:   true,
      has_discrepancy:  true,
      discrepancy_type: Some(atlas_core::quality::DiscrepancyType::SumExceedsTotal),
      discrepancy_pct:  100.0 / 14.0,
      is_error:         false,
      audited_at:       Utc::now(),
    }])
    .await
    .unwrap();

  let (status, body) = get(router.clone(), &format!("/quality/{batch}")).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body["total_records"], 1);
  assert_eq!(body["discrepancy_records"], 1);
  assert!((body["quality_score"].as_f64().unwrap() - 70.0).abs() < 1e-9);

  let (status, body) = get(router.clone(), &format!("/quality/{batch}/records")).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body[0]["discrepancy_type"], "sum_exceeds_total");

  let (status, _) = get(router, &format!("/quality/{}", Uuid::new_v4())).await;
  assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unmapped_queue_filters_by_occurrence() {
  let (store, router) = setup().await;
  let sighting = |raw: &str| UnmappedSighting {
    source_system: "intervista".into(),
    raw_name: raw.into(),
    kind: RegionKind::City,
    fact_date: None,
    run_id: None,
    reason: "no match".into(),
    suggestion: None,
    runner_up_score: None,
  };
  for raw in ["Atlantis", "Atlantis", "Lemuria"] {
    store.log_unmapped(sighting(raw)).await.unwrap();
  }
  store.absorb_unmapped_log(None).await.unwrap();

  let (status, body) = get(router.clone(), "/unmapped").await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(body.as_array().unwrap().len(), 2);
  assert_eq!(body[0]["raw_name"], "Atlantis");

  let (_, body) = get(router, "/unmapped?min_occurrences=2&source_system=intervista").await;
  assert_eq!(body.as_array().unwrap().len(), 1);
  assert_eq!(body[0]["occurrences"], 2);
}
