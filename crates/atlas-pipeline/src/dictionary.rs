//! Region Dictionary: resolves raw source names to canonical regions.
//!
//! Resolution runs in three steps, stopping at the first hit:
//!
//! 1. the exact `(source_system, raw_name)` alias;
//! 2. the normalised name, against canonical region keys and aliases from
//!    any source, restricted to the requested kind;
//! 3. a bounded fuzzy search over regions of the requested kind.
//!
//! A fuzzy match is only trusted when it clears the match threshold with no
//! runner-up inside the ambiguity margin. It is persisted as an alias only
//! at or above the stricter auto-accept threshold; weaker matches are
//! returned with their confidence and left to the caller.

use std::sync::Arc;

use atlas_core::{
  normalize::{display_form, normalize_report},
  region::{
    AliasOutcome, NewAlias, NewRegion, Region, RegionId, RegionKind, UnmappedSighting,
    VariantType,
  },
  similarity::{MatchCandidate, rank_candidates},
  store::{DictionaryStore, UnmappedStore},
};
use serde::Serialize;

use crate::{Error, Result, config::DictionaryConfig};

/// Parent chains longer than this are treated as cyclic.
const MAX_HIERARCHY_DEPTH: usize = 64;

/// How a [`Resolution::Matched`] region was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
  /// Exact `(source_system, raw_name)` alias.
  Alias,
  /// The normalised name equals the region's own key.
  Canonical,
  /// The normalised name equals an alias recorded for another source.
  NormalizedAlias,
  Fuzzy,
}

/// The outcome of resolving one raw name.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
  Matched {
    region_id:  RegionId,
    /// `1.0` for exact matches, the similarity score for fuzzy ones.
    confidence: f64,
    method:     MatchMethod,
  },
  /// A new region was created for a name never seen before.
  Created { region_id: RegionId },
  /// Two candidates scored too close to pick one.
  Ambiguous {
    best:      MatchCandidate,
    runner_up: MatchCandidate,
  },
  Unresolved {
    /// The best candidate below the match threshold, if any scored above
    /// the fuzzy floor.
    best: Option<MatchCandidate>,
  },
}

impl Resolution {
  pub fn region_id(&self) -> Option<RegionId> {
    match self {
      Self::Matched { region_id, .. } | Self::Created { region_id } => Some(*region_id),
      Self::Ambiguous { .. } | Self::Unresolved { .. } => None,
    }
  }

  pub fn confidence(&self) -> f64 {
    match self {
      Self::Matched { confidence, .. } => *confidence,
      Self::Created { .. } => 1.0,
      Self::Ambiguous { .. } | Self::Unresolved { .. } => 0.0,
    }
  }

  /// The closest candidate for a failed resolution, kept as a suggestion.
  pub fn suggestion(&self) -> Option<MatchCandidate> {
    match self {
      Self::Ambiguous { best, .. } => Some(best.clone()),
      Self::Unresolved { best } => best.clone(),
      Self::Matched { .. } | Self::Created { .. } => None,
    }
  }

  /// Score of the candidate that kept an ambiguous name from matching.
  pub fn runner_up_score(&self) -> Option<f64> {
    match self {
      Self::Ambiguous { runner_up, .. } => Some(runner_up.score),
      _ => None,
    }
  }
}

/// Decision over a ranked fuzzy candidate list.
#[derive(Debug, Clone, PartialEq)]
pub enum CandidateDecision {
  Accept(MatchCandidate),
  Ambiguous {
    best:      MatchCandidate,
    runner_up: MatchCandidate,
  },
  Miss { best: Option<MatchCandidate> },
}

/// Pick a candidate from a best-first list. The best candidate is accepted
/// if it reaches `threshold` and the runner-up trails it by at least
/// `margin`.
pub fn select_candidate(
  candidates: &[MatchCandidate],
  threshold: f64,
  margin: f64,
) -> CandidateDecision {
  let Some(best) = candidates.first() else {
    return CandidateDecision::Miss { best: None };
  };
  if best.score < threshold {
    return CandidateDecision::Miss { best: Some(best.clone()) };
  }
  match candidates.get(1) {
    Some(runner_up) if best.score - runner_up.score < margin => CandidateDecision::Ambiguous {
      best:      best.clone(),
      runner_up: runner_up.clone(),
    },
    _ => CandidateDecision::Accept(best.clone()),
  }
}

// ─── Dictionary ──────────────────────────────────────────────────────────────

pub struct Dictionary<S> {
  store:  Arc<S>,
  config: DictionaryConfig,
}

impl<S> Clone for Dictionary<S> {
  fn clone(&self) -> Self { Self { store: Arc::clone(&self.store), config: self.config } }
}

impl<S> Dictionary<S>
where
  S: DictionaryStore + UnmappedStore,
{
  pub fn new(store: Arc<S>, config: DictionaryConfig) -> Self { Self { store, config } }

  pub fn config(&self) -> &DictionaryConfig { &self.config }

  /// A copy with a different auto-accept threshold.
  pub fn with_auto_accept(mut self, auto_accept: f64) -> Self {
    self.config.auto_accept = auto_accept;
    self
  }

  /// Resolve `raw_name` as spelled by `source_system` to a region of `kind`.
  pub async fn resolve(
    &self,
    source_system: &str,
    raw_name: &str,
    kind: RegionKind,
  ) -> Result<Resolution> {
    // 1. Exact alias.
    let alias = self
      .store
      .find_alias(source_system.to_owned(), raw_name.to_owned())
      .await
      .map_err(Error::store)?;
    if let Some(alias) = alias {
      match self.store.get_region(alias.region_id).await.map_err(Error::store)? {
        Some(region) if region.active && region.kind == kind => {
          return Ok(Resolution::Matched {
            region_id:  region.region_id,
            confidence: 1.0,
            method:     MatchMethod::Alias,
          });
        }
        _ => tracing::debug!(
          source_system,
          raw_name,
          region_id = %alias.region_id,
          "alias points at a retired region or another kind"
        ),
      }
    }

    // 2. Normalised name.
    let normalized = normalize_report(raw_name);
    if normalized.unrepaired_corruption {
      tracing::warn!(source_system, raw_name, "name carries unrepaired encoding corruption");
    }
    let key = normalized.key;
    if key.is_empty() {
      return Ok(Resolution::Unresolved { best: None });
    }

    if let Some(region) = self
      .store
      .find_region(key.clone(), kind)
      .await
      .map_err(Error::store)?
    {
      self.cache_alias(source_system, raw_name, region.region_id).await;
      return Ok(Resolution::Matched {
        region_id:  region.region_id,
        confidence: 1.0,
        method:     MatchMethod::Canonical,
      });
    }

    let mut aliased: Vec<RegionId> = self
      .store
      .aliases_by_normalized(key.clone(), kind)
      .await
      .map_err(Error::store)?
      .into_iter()
      .map(|a| a.region_id)
      .collect();
    aliased.sort();
    aliased.dedup();
    match aliased.as_slice() {
      [region_id] => {
        self.cache_alias(source_system, raw_name, *region_id).await;
        return Ok(Resolution::Matched {
          region_id:  *region_id,
          confidence: 1.0,
          method:     MatchMethod::NormalizedAlias,
        });
      }
      [] => {}
      several => tracing::debug!(
        raw_name,
        regions = several.len(),
        "normalised name is an alias of several regions"
      ),
    }

    // 3. Fuzzy search.
    let candidates = self.candidates(&key, kind).await?;
    let resolution =
      match select_candidate(&candidates, self.config.match_threshold, self.config.ambiguity_margin)
      {
        CandidateDecision::Accept(best) => {
          if best.score >= self.config.auto_accept {
            self.cache_alias(source_system, raw_name, best.region_id).await;
          } else {
            tracing::debug!(
              raw_name,
              candidate = %best.display_name,
              score = best.score,
              "fuzzy match below auto-accept; not persisted"
            );
          }
          Resolution::Matched {
            region_id:  best.region_id,
            confidence: best.score,
            method:     MatchMethod::Fuzzy,
          }
        }
        CandidateDecision::Ambiguous { best, runner_up } => {
          Resolution::Ambiguous { best, runner_up }
        }
        CandidateDecision::Miss { best } => Resolution::Unresolved { best },
      };
    Ok(resolution)
  }

  /// Like [`resolve`](Self::resolve), but a name with no candidate at all
  /// becomes a new region keyed by its normalised name and `kind`. Names
  /// with a weak or ambiguous candidate are returned unresolved so the
  /// candidate can be reviewed instead of splitting the region.
  pub async fn resolve_or_create(
    &self,
    source_system: &str,
    raw_name: &str,
    kind: RegionKind,
  ) -> Result<Resolution> {
    let resolution = self.resolve(source_system, raw_name, kind).await?;
    if !matches!(resolution, Resolution::Unresolved { best: None }) {
      return Ok(resolution);
    }

    let display_name = display_form(raw_name);
    if display_name.is_empty() {
      return Ok(resolution);
    }
    let (region, created) = self.create_region(NewRegion::new(display_name, kind)).await?;
    self.cache_alias(source_system, raw_name, region.region_id).await;

    if created {
      tracing::info!(
        source_system,
        raw_name,
        region_id = %region.region_id,
        display_name = %region.display_name,
        kind = %kind,
        "created region"
      );
      Ok(Resolution::Created { region_id: region.region_id })
    } else {
      // Another worker created it between our lookup and insert.
      Ok(Resolution::Matched {
        region_id:  region.region_id,
        confidence: 1.0,
        method:     MatchMethod::Canonical,
      })
    }
  }

  /// Append a failed resolution to the resolution log. Never fails the
  /// caller; storage errors are logged.
  pub async fn record_unmapped(&self, sighting: UnmappedSighting) {
    let source_system = sighting.source_system.clone();
    let raw_name = sighting.raw_name.clone();
    if let Err(e) = self.store.log_unmapped(sighting).await {
      tracing::warn!(%source_system, %raw_name, error = %e, "could not record unmapped name");
    }
  }

  /// Bind `(raw_name, source_system)` to a region. Binding a pair that
  /// already maps to another region is a [`Error::ResolutionConflict`].
  pub async fn add_alias(&self, alias: NewAlias) -> Result<AliasOutcome> {
    if self.store.get_region(alias.region_id).await.map_err(Error::store)?.is_none() {
      return Err(Error::RegionNotFound(alias.region_id));
    }
    let requested = alias.region_id;
    let source_system = alias.source_system.clone();
    let raw_name = alias.raw_name.clone();

    match self.store.add_alias(alias).await.map_err(Error::store)? {
      AliasOutcome::Conflict { existing } => Err(Error::ResolutionConflict {
        source_system,
        raw_name,
        existing,
        requested,
      }),
      outcome => Ok(outcome),
    }
  }

  /// Create a region unless one with the same key and kind exists. Returns
  /// the region and whether it was created.
  pub async fn add_region(&self, region: NewRegion) -> Result<(Region, bool)> {
    if let Some(parent) = region.parent_id {
      if self.store.get_region(parent).await.map_err(Error::store)?.is_none() {
        return Err(Error::RegionNotFound(parent));
      }
    }
    self.create_region(region).await
  }

  /// Set or clear a region's parent, rejecting cycles.
  pub async fn set_parent(&self, child: RegionId, parent: Option<RegionId>) -> Result<Region> {
    if self.store.get_region(child).await.map_err(Error::store)?.is_none() {
      return Err(Error::RegionNotFound(child));
    }
    if let Some(parent) = parent {
      let mut cursor = Some(parent);
      let mut hops = 0;
      while let Some(id) = cursor {
        if id == child || hops > MAX_HIERARCHY_DEPTH {
          return Err(Error::CycleDetected { child, parent });
        }
        hops += 1;
        cursor = match self.store.get_region(id).await.map_err(Error::store)? {
          Some(region) => region.parent_id,
          None if id == parent => return Err(Error::RegionNotFound(parent)),
          None => None,
        };
      }
    }
    self.store.set_parent(child, parent).await.map_err(Error::store)
  }

  /// Retire a region. It stays referenced by facts and aliases but no longer
  /// takes part in resolution.
  pub async fn retire(&self, id: RegionId) -> Result<Region> {
    if self.store.get_region(id).await.map_err(Error::store)?.is_none() {
      return Err(Error::RegionNotFound(id));
    }
    let region = self.store.retire_region(id).await.map_err(Error::store)?;
    tracing::info!(region_id = %id, display_name = %region.display_name, "retired region");
    Ok(region)
  }

  /// Bounded, ranked fuzzy candidates of `kind` for a normalised key.
  pub async fn candidates(&self, key: &str, kind: RegionKind) -> Result<Vec<MatchCandidate>> {
    let mut candidates = self
      .store
      .fuzzy_candidates(key.to_owned(), kind, self.config.fuzzy_floor, self.config.fuzzy_limit)
      .await
      .map_err(Error::store)?;
    rank_candidates(&mut candidates);
    Ok(candidates)
  }

  /// Insert-if-absent by `(normalized_name, kind)`. A display name whose key
  /// is taken by a region of another kind gets the kind's qualifier.
  async fn create_region(&self, mut region: NewRegion) -> Result<(Region, bool)> {
    if let Some(existing) = self
      .store
      .find_region(region.normalized_name.clone(), region.kind)
      .await
      .map_err(Error::store)?
    {
      return Ok((existing, false));
    }

    let namesakes = self
      .store
      .regions_named(region.normalized_name.clone())
      .await
      .map_err(Error::store)?;
    if namesakes.iter().any(|r| r.kind != region.kind) {
      region.display_name = format!("{} ({})", region.display_name, region.kind.qualifier());
    }

    self.store.insert_region_if_absent(region).await.map_err(Error::store)
  }

  /// Remember a successful resolution as an alias. Failures only cost a
  /// slower lookup next time, so they are logged and ignored.
  async fn cache_alias(&self, source_system: &str, raw_name: &str, region_id: RegionId) {
    let alias = NewAlias {
      region_id,
      raw_name: raw_name.to_owned(),
      source_system: source_system.to_owned(),
      variant: VariantType::SourceSpecific,
      is_primary: false,
    };
    match self.store.add_alias(alias).await {
      Ok(AliasOutcome::Conflict { existing }) => tracing::debug!(
        source_system,
        raw_name,
        %existing,
        "alias already bound elsewhere; not cached"
      ),
      Ok(_) => {}
      Err(e) => tracing::warn!(source_system, raw_name, error = %e, "could not cache alias"),
    }
  }
}
