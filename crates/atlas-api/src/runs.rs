//! Handlers for `/runs` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/runs` | Optional `?limit=N` (default 50, max 1000) |
//! | `GET`  | `/runs/summary` | Per process, source and status |
//! | `GET`  | `/runs/:id` | 404 if not found |

use atlas_core::{
  ledger::{RunEntry, RunSummaryRow},
  store::LedgerStore,
};
use axum::{
  Json,
  extract::{Path, Query, State},
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{ApiState, error::ApiError};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct ListParams {
  pub limit: Option<usize>,
}

/// `GET /runs[?limit=N]`
pub async fn list<S>(
  State(state): State<ApiState<S>>,
  Query(params): Query<ListParams>,
) -> Result<Json<Vec<RunEntry>>, ApiError>
where
  S: LedgerStore,
{
  let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
  if limit == 0 || limit > MAX_LIMIT {
    return Err(ApiError::BadRequest(format!("limit must be between 1 and {MAX_LIMIT}")));
  }
  let runs = state.store.recent_runs(limit).await.map_err(ApiError::store)?;
  Ok(Json(runs))
}

/// `GET /runs/summary`
pub async fn summary<S>(
  State(state): State<ApiState<S>>,
) -> Result<Json<Vec<RunSummaryRow>>, ApiError>
where
  S: LedgerStore,
{
  let rows = state.store.run_summary().await.map_err(ApiError::store)?;
  Ok(Json(rows))
}

/// `GET /runs/:id`
pub async fn get_one<S>(
  State(state): State<ApiState<S>>,
  Path(id): Path<Uuid>,
) -> Result<Json<RunEntry>, ApiError>
where
  S: LedgerStore,
{
  state
    .store
    .get_run(id)
    .await
    .map_err(ApiError::store)?
    .map(Json)
    .ok_or_else(|| ApiError::NotFound(format!("run {id}")))
}
