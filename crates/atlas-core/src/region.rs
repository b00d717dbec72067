//! Regions, aliases and unmapped names: the geographic dimension.
//!
//! A [`Region`] is the canonical, deduplicated representation of a place.
//! Every raw name any source uses for it is an [`Alias`]. Names no source
//! mapping could resolve are tracked as [`UnmappedEntry`] rows until an
//! alias is added for them.

use std::{collections::HashMap, fmt, str::FromStr};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{Error, normalize::normalize, similarity::MatchCandidate};

// ─── Identity ────────────────────────────────────────────────────────────────

/// Surrogate key of a region.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct RegionId(pub i64);

impl fmt::Display for RegionId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}", self.0) }
}

/// The canonical kind of a region.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  PartialOrd,
  Ord,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::IntoStaticStr,
  strum::EnumIter,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RegionKind {
  Country,
  /// A canton or state.
  Canton,
  TourismRegion,
  District,
  City,
  Municipality,
}

impl RegionKind {
  /// The qualifier appended to a display name that collides with a region of
  /// another kind, e.g. `"Zürich (City)"`.
  pub fn qualifier(self) -> &'static str {
    match self {
      Self::Country => "Country",
      Self::Canton => "Canton",
      Self::TourismRegion => "Tourism Region",
      Self::District => "District",
      Self::City => "City",
      Self::Municipality => "Municipality",
    }
  }

  pub fn as_str(self) -> &'static str { self.into() }

  pub fn parse(s: &str) -> crate::Result<Self> {
    Self::from_str(s).map_err(|_| Error::UnknownKind(s.to_owned()))
  }
}

// ─── Region ──────────────────────────────────────────────────────────────────

/// A canonical geographic entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
  pub region_id:       RegionId,
  pub display_name:    String,
  /// Lookup key; unique per kind among active regions.
  pub normalized_name: String,
  pub kind:            RegionKind,
  pub parent_id:       Option<RegionId>,
  pub code:            Option<String>,
  pub active:          bool,
  pub valid_from:      DateTime<Utc>,
  pub valid_to:        Option<DateTime<Utc>>,
}

/// Input to [`crate::store::DictionaryStore::insert_region_if_absent`].
#[derive(Debug, Clone)]
pub struct NewRegion {
  pub display_name:    String,
  pub normalized_name: String,
  pub kind:            RegionKind,
  pub parent_id:       Option<RegionId>,
  pub code:            Option<String>,
}

impl NewRegion {
  /// A region keyed by the normalised form of `display_name`.
  pub fn new(display_name: impl Into<String>, kind: RegionKind) -> Self {
    let display_name = display_name.into();
    Self {
      normalized_name: normalize(&display_name),
      display_name,
      kind,
      parent_id: None,
      code: None,
    }
  }

  pub fn with_code(mut self, code: impl Into<String>) -> Self {
    self.code = Some(code.into());
    self
  }

  pub fn with_parent(mut self, parent: RegionId) -> Self {
    self.parent_id = Some(parent);
    self
  }
}

// ─── Alias ───────────────────────────────────────────────────────────────────

/// How an alias relates to the region's canonical spelling.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Default,
  Serialize,
  Deserialize,
  strum::Display,
  strum::EnumString,
  strum::IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum VariantType {
  Canonical,
  /// A spelling in another national language.
  Language,
  #[default]
  SourceSpecific,
}

impl VariantType {
  pub fn parse(s: &str) -> crate::Result<Self> {
    Self::from_str(s).map_err(|_| Error::UnknownVariant(s.to_owned()))
  }
}

/// A `(source_system, raw_name)` pair bound to exactly one region.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alias {
  pub source_system:   String,
  pub raw_name:        String,
  pub normalized_name: String,
  pub region_id:       RegionId,
  pub variant:         VariantType,
  pub is_primary:      bool,
  pub created_at:      DateTime<Utc>,
}

/// Input to [`crate::store::DictionaryStore::add_alias`].
#[derive(Debug, Clone)]
pub struct NewAlias {
  pub region_id:     RegionId,
  pub raw_name:      String,
  pub source_system: String,
  pub variant:       VariantType,
  pub is_primary:    bool,
}

/// What happened when an alias was offered to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasOutcome {
  Inserted,
  /// The pair already mapped to the same region; nothing changed.
  AlreadyPresent,
  /// The pair already maps to `existing`; the new binding was rejected.
  Conflict { existing: RegionId },
}

// ─── Unmapped names ──────────────────────────────────────────────────────────

/// One failed resolution, appended to the resolution log by the loader.
#[derive(Debug, Clone)]
pub struct UnmappedSighting {
  pub source_system:   String,
  pub raw_name:        String,
  pub kind:            RegionKind,
  pub fact_date:       Option<NaiveDate>,
  pub run_id:          Option<Uuid>,
  pub reason:          String,
  /// A mid-confidence candidate worth reviewing, if resolution found one.
  pub suggestion:      Option<MatchCandidate>,
  /// Score of the candidate that tied with `suggestion`, if any.
  pub runner_up_score: Option<f64>,
}

/// A best-candidate suggestion attached to an unmapped entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
  pub region_id:       RegionId,
  pub score:           f64,
  /// Score of the second-best candidate, if any.
  pub runner_up_score: Option<f64>,
  pub suggested_at:    DateTime<Utc>,
}

impl Suggestion {
  /// Whether no runner-up lies within `margin` of the best score.
  pub fn is_unambiguous(&self, margin: f64) -> bool {
    self
      .runner_up_score
      .is_none_or(|runner_up| self.score - runner_up >= margin)
  }
}

/// An aggregated record of a name that failed resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnmappedEntry {
  pub entry_id:        i64,
  pub source_system:   String,
  pub raw_name:        String,
  pub normalized_name: String,
  pub kind:            RegionKind,
  pub occurrences:     u64,
  pub first_seen:      DateTime<Utc>,
  pub last_seen:       DateTime<Utc>,
  pub suggestion:      Option<Suggestion>,
}

/// Parameters for [`crate::store::UnmappedStore::unmapped_entries`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UnmappedQuery {
  pub source_system:   Option<String>,
  pub min_occurrences: Option<u64>,
  /// Only entries that already carry a suggestion.
  #[serde(default)]
  pub with_suggestion: bool,
  pub limit:           Option<usize>,
}

// ─── Kind mapping ────────────────────────────────────────────────────────────

/// Translates source-specific kind labels into canonical [`RegionKind`]s.
#[derive(Debug, Clone)]
pub struct KindMap {
  labels: HashMap<String, RegionKind>,
}

const BUILTIN_KIND_LABELS: &[(&str, RegionKind)] = &[
  ("country", RegionKind::Country),
  ("land", RegionKind::Country),
  ("pays", RegionKind::Country),
  ("canton", RegionKind::Canton),
  ("kanton", RegionKind::Canton),
  ("state", RegionKind::Canton),
  ("bundesland", RegionKind::Canton),
  ("tourism_region", RegionKind::TourismRegion),
  ("tourismusregion", RegionKind::TourismRegion),
  ("region_touristique", RegionKind::TourismRegion),
  ("destination", RegionKind::TourismRegion),
  ("district", RegionKind::District),
  ("bezirk", RegionKind::District),
  ("city", RegionKind::City),
  ("stadt", RegionKind::City),
  ("ville", RegionKind::City),
  ("municipality", RegionKind::Municipality),
  ("gemeinde", RegionKind::Municipality),
  ("commune", RegionKind::Municipality),
  ("msa", RegionKind::Municipality),
];

impl Default for KindMap {
  fn default() -> Self { Self::builtin() }
}

impl KindMap {
  pub fn builtin() -> Self {
    let labels = BUILTIN_KIND_LABELS
      .iter()
      .map(|(label, kind)| ((*label).to_owned(), *kind))
      .collect();
    Self { labels }
  }

  /// The built-in table with `overrides` layered on top.
  pub fn with_overrides(overrides: &HashMap<String, RegionKind>) -> Self {
    let mut map = Self::builtin();
    for (label, kind) in overrides {
      map.labels.insert(label_key(label), *kind);
    }
    map
  }

  /// Map a source label to its canonical kind. Labels are compared after
  /// normalisation, with spaces and hyphens folded to underscores.
  pub fn resolve(&self, label: &str) -> Option<RegionKind> {
    let key = label_key(label);
    self
      .labels
      .get(&key)
      .copied()
      .or_else(|| RegionKind::from_str(&key).ok())
  }
}

fn label_key(label: &str) -> String { normalize(label).replace(' ', "_") }

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn kind_round_trips_through_strings() {
    assert_eq!(RegionKind::TourismRegion.as_str(), "tourism_region");
    assert_eq!(RegionKind::parse("canton").unwrap(), RegionKind::Canton);
    assert!(matches!(
      RegionKind::parse("galaxy"),
      Err(Error::UnknownKind(_))
    ));
  }

  #[test]
  fn builtin_labels_cover_source_vocabularies() {
    let map = KindMap::builtin();
    assert_eq!(map.resolve("Kanton"), Some(RegionKind::Canton));
    assert_eq!(map.resolve("Tourism Region"), Some(RegionKind::TourismRegion));
    assert_eq!(map.resolve("tourism-region"), Some(RegionKind::TourismRegion));
    assert_eq!(map.resolve("Gemeinde"), Some(RegionKind::Municipality));
    assert_eq!(map.resolve("planet"), None);
  }

  #[test]
  fn overrides_win_over_builtin_labels() {
    let mut overrides = HashMap::new();
    overrides.insert("MSA".to_owned(), RegionKind::District);
    let map = KindMap::with_overrides(&overrides);
    assert_eq!(map.resolve("msa"), Some(RegionKind::District));
    assert_eq!(map.resolve("stadt"), Some(RegionKind::City));
  }

  #[test]
  fn new_region_derives_key_from_display_name() {
    let region = NewRegion::new("Zürich", RegionKind::Canton).with_code("ZH");
    assert_eq!(region.normalized_name, "zurich");
    assert_eq!(region.code.as_deref(), Some("ZH"));
  }

  #[test]
  fn suggestion_ambiguity_uses_margin() {
    let at = Utc::now();
    let clear = Suggestion {
      region_id:       RegionId(1),
      score:           0.95,
      runner_up_score: None,
      suggested_at:    at,
    };
    let tied = Suggestion { score: 0.75, runner_up_score: Some(0.74), ..clear.clone() };
    assert!(clear.is_unambiguous(0.05));
    assert!(!tied.is_unambiguous(0.05));
  }
}
