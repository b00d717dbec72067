//! Similarity scoring between normalised names.
//!
//! Scores are Sørensen–Dice coefficients over character bigrams, in
//! `0.0..=1.0`. Bigram overlap punishes short prefixes that merely share a
//! stem ("bern" vs "bernina") far harder than edit-distance style metrics,
//! which keeps accidental merges of distinct places rare.

use serde::{Deserialize, Serialize};

use crate::region::RegionId;

/// Similarity between two already-normalised keys.
pub fn similarity(a: &str, b: &str) -> f64 {
  if a == b {
    return 1.0;
  }
  strsim::sorensen_dice(a, b)
}

/// A fuzzy-match candidate returned by a bounded top-k search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
  pub region_id:    RegionId,
  pub display_name: String,
  pub score:        f64,
}

/// Sort candidates best-first; ties break on the lower region id so the
/// ordering is deterministic.
pub fn rank_candidates(candidates: &mut [MatchCandidate]) {
  candidates.sort_by(|a, b| {
    b.score
      .total_cmp(&a.score)
      .then_with(|| a.region_id.cmp(&b.region_id))
  });
}
