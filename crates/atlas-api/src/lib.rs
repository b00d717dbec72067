//! Read-only JSON views over the atlas warehouse.
//!
//! Exposes an axum [`Router`] over the run ledger, quality records and the
//! unmapped-name queue of any backend implementing the `atlas-core` storage
//! traits. Downstream consumers (dashboards, the analytic query service)
//! read through these views; nothing here writes.
//!
//! # Mounting
//!
//! ```rust,ignore
//! .nest("/api", atlas_api::api_router(store.clone(), weights))
//! ```

pub mod error;
pub mod quality;
pub mod runs;
pub mod unmapped;

use std::sync::Arc;

use atlas_core::{
  quality::ScoreWeights,
  store::{LedgerStore, QualityStore, UnmappedStore},
};
use axum::{Router, routing::get};

pub use error::ApiError;

/// Shared handler state.
pub struct ApiState<S> {
  pub store:   Arc<S>,
  /// Weights used when recomputing batch quality summaries.
  pub weights: ScoreWeights,
}

impl<S> Clone for ApiState<S> {
  fn clone(&self) -> Self { Self { store: Arc::clone(&self.store), weights: self.weights } }
}

/// Build a fully-materialised API router for `store`.
///
/// The returned `Router<()>` can be nested into any parent router regardless
/// of its own state type.
pub fn api_router<S>(store: Arc<S>, weights: ScoreWeights) -> Router<()>
where
  S: LedgerStore + QualityStore + UnmappedStore + 'static,
{
  Router::new()
    // Ledger
    .route("/runs", get(runs::list::<S>))
    .route("/runs/summary", get(runs::summary::<S>))
    .route("/runs/{id}", get(runs::get_one::<S>))
    // Quality
    .route("/quality/{batch}", get(quality::summary::<S>))
    .route("/quality/{batch}/records", get(quality::records::<S>))
    // Dictionary review queue
    .route("/unmapped", get(unmapped::list::<S>))
    .with_state(ApiState { store, weights })
}

#[cfg(test)]
mod tests;
