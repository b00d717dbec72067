//! `GET /unmapped[?source_system=..&min_occurrences=N&with_suggestion=true&limit=N]`
//!
//! Names that failed resolution, most frequent first, with any suggested
//! match attached.

use atlas_core::{
  region::{UnmappedEntry, UnmappedQuery},
  store::UnmappedStore,
};
use axum::{
  Json,
  extract::{Query, State},
};

use crate::{ApiState, error::ApiError};

pub async fn list<S>(
  State(state): State<ApiState<S>>,
  Query(query): Query<UnmappedQuery>,
) -> Result<Json<Vec<UnmappedEntry>>, ApiError>
where
  S: UnmappedStore,
{
  let entries = state
    .store
    .unmapped_entries(query)
    .await
    .map_err(ApiError::store)?;
  Ok(Json(entries))
}
