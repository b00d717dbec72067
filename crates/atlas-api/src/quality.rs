//! Handlers for `/quality` endpoints.
//!
//! | Method | Path | Notes |
//! |--------|------|-------|
//! | `GET`  | `/quality/:batch` | Summary recomputed from stored records; 404 for an unknown batch |
//! | `GET`  | `/quality/:batch/records` | One record per `(date, region)` |

use atlas_core::{
  quality::{QualityRecord, QualitySummary},
  store::QualityStore,
};
use axum::{
  Json,
  extract::{Path, State},
};
use uuid::Uuid;

use crate::{ApiState, error::ApiError};

/// `GET /quality/:batch`
pub async fn summary<S>(
  State(state): State<ApiState<S>>,
  Path(batch): Path<Uuid>,
) -> Result<Json<QualitySummary>, ApiError>
where
  S: QualityStore,
{
  let records = state
    .store
    .quality_records(batch)
    .await
    .map_err(ApiError::store)?;
  if records.is_empty() {
    return Err(ApiError::NotFound(format!("quality batch {batch}")));
  }
  Ok(Json(QualitySummary::from_records(batch, &records, state.weights)))
}

/// `GET /quality/:batch/records`
pub async fn records<S>(
  State(state): State<ApiState<S>>,
  Path(batch): Path<Uuid>,
) -> Result<Json<Vec<QualityRecord>>, ApiError>
where
  S: QualityStore,
{
  let records = state
    .store
    .quality_records(batch)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(records))
}
