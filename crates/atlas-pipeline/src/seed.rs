//! Bulk region and alias import from a JSON document.
//!
//! ```json
//! {"regions": [
//!   {"name": "Schweiz", "kind": "country", "code": "CH"},
//!   {"name": "Zürich", "kind": "canton", "code": "ZH",
//!    "parent": {"name": "Schweiz", "kind": "country"},
//!    "aliases": [{"source_system": "mastercard", "raw_name": "Zurich"}]}
//! ]}
//! ```
//!
//! Parents must be listed before their children or already exist. Seeding
//! is idempotent: existing regions and aliases are left as they are.

use std::sync::Arc;

use atlas_core::{
  normalize::normalize,
  region::{AliasOutcome, NewAlias, NewRegion, RegionKind, VariantType},
  store::{DictionaryStore, UnmappedStore},
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result, dictionary::Dictionary};

#[derive(Debug, Clone, Deserialize)]
pub struct SeedDocument {
  pub regions: Vec<SeedRegion>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedRegion {
  pub name:    String,
  pub kind:    RegionKind,
  #[serde(default)]
  pub code:    Option<String>,
  #[serde(default)]
  pub parent:  Option<SeedRef>,
  #[serde(default)]
  pub aliases: Vec<SeedAlias>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedRef {
  pub name: String,
  pub kind: RegionKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedAlias {
  pub source_system: String,
  pub raw_name:      String,
  #[serde(default)]
  pub variant:       VariantType,
  #[serde(default)]
  pub is_primary:    bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeedReport {
  pub regions_created:  u64,
  pub regions_existing: u64,
  pub aliases_added:    u64,
  pub alias_conflicts:  u64,
}

impl SeedDocument {
  pub fn from_json(json: &str) -> Result<Self> {
    serde_json::from_str(json).map_err(|e| Error::Seed(e.to_string()))
  }
}

/// Apply `document` through the dictionary.
pub async fn seed<S>(
  store: Arc<S>,
  dictionary: &Dictionary<S>,
  document: SeedDocument,
) -> Result<SeedReport>
where
  S: DictionaryStore + UnmappedStore,
{
  let mut report = SeedReport::default();

  for entry in document.regions {
    let parent_id = match &entry.parent {
      Some(parent) => {
        let found = store
          .find_region(normalize(&parent.name), parent.kind)
          .await
          .map_err(Error::store)?
          .ok_or_else(|| {
            Error::Seed(format!(
              "parent {:?} ({}) of {:?} is not defined",
              parent.name, parent.kind, entry.name
            ))
          })?;
        Some(found.region_id)
      }
      None => None,
    };

    let mut new = NewRegion::new(entry.name.clone(), entry.kind);
    new.code = entry.code.clone();
    new.parent_id = parent_id;
    let (region, created) = dictionary.add_region(new).await?;
    if created {
      report.regions_created += 1;
    } else {
      report.regions_existing += 1;
      if parent_id.is_some() && region.parent_id != parent_id {
        dictionary.set_parent(region.region_id, parent_id).await?;
      }
    }

    for alias in entry.aliases {
      let outcome = dictionary
        .add_alias(NewAlias {
          region_id:     region.region_id,
          raw_name:      alias.raw_name,
          source_system: alias.source_system,
          variant:       alias.variant,
          is_primary:    alias.is_primary,
        })
        .await;
      match outcome {
        Ok(AliasOutcome::Inserted) => report.aliases_added += 1,
        Ok(_) => {}
        Err(e @ Error::ResolutionConflict { .. }) => {
          tracing::warn!(error = %e, "seed alias skipped");
          report.alias_conflicts += 1;
        }
        Err(e) => return Err(e),
      }
    }
  }

  tracing::info!(?report, "seed applied");
  Ok(report)
}
