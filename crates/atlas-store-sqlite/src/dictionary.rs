//! Region dictionary and unmapped-name persistence.

use atlas_core::{
  normalize::normalize,
  region::{
    Alias, AliasOutcome, NewAlias, NewRegion, Region, RegionId, RegionKind, Suggestion,
    UnmappedEntry, UnmappedQuery, UnmappedSighting,
  },
  similarity::MatchCandidate,
  store::{DictionaryStore, UnmappedStore},
};
use chrono::Utc;
use rusqlite::{OptionalExtension as _, params, types::Value};

use crate::{
  Error, Result, SqliteStore,
  encode::{
    ALIAS_COLUMNS, REGION_COLUMNS, RawAlias, RawRegion, RawUnmapped, UNMAPPED_COLUMNS,
    encode_date, encode_dt, encode_uuid,
  },
};

/// Insert-then-read rounds before giving up on a contended key.
const INSERT_ATTEMPTS: usize = 3;

/// Parent chains longer than this are treated as cyclic.
const MAX_HIERARCHY_DEPTH: usize = 64;

enum ParentOutcome {
  Updated(RawRegion),
  Missing(RegionId),
  Cycle,
}

/// `(log_id, source, raw, normalized, kind, region, score, runner_up, logged_at)`
type LogRow =
  (i64, String, String, String, String, Option<i64>, Option<f64>, Option<f64>, String);

impl SqliteStore {
  async fn select_regions(&self, sql: String, params: Vec<Value>) -> Result<Vec<Region>> {
    let raws: Vec<RawRegion> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), RawRegion::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawRegion::into_region).collect()
  }

  async fn select_aliases(&self, sql: String, params: Vec<Value>) -> Result<Vec<Alias>> {
    let raws: Vec<RawAlias> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), RawAlias::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;
    raws.into_iter().map(RawAlias::into_alias).collect()
  }
}

// ─── DictionaryStore impl ────────────────────────────────────────────────────

impl DictionaryStore for SqliteStore {
  async fn get_region(&self, id: RegionId) -> Result<Option<Region>> {
    let raw: Option<RawRegion> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {REGION_COLUMNS} FROM regions WHERE region_id = ?1"),
              params![id.0],
              RawRegion::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawRegion::into_region).transpose()
  }

  async fn find_region(
    &self,
    normalized_name: String,
    kind: RegionKind,
  ) -> Result<Option<Region>> {
    let mut found = self
      .select_regions(
        format!(
          "SELECT {REGION_COLUMNS} FROM regions
           WHERE normalized_name = ?1 AND kind = ?2 AND active = 1"
        ),
        vec![Value::Text(normalized_name), Value::Text(kind.as_str().to_owned())],
      )
      .await?;
    Ok(found.pop())
  }

  async fn regions_named(&self, normalized_name: String) -> Result<Vec<Region>> {
    self
      .select_regions(
        format!(
          "SELECT {REGION_COLUMNS} FROM regions
           WHERE normalized_name = ?1 AND active = 1 ORDER BY region_id"
        ),
        vec![Value::Text(normalized_name)],
      )
      .await
  }

  async fn list_regions(
    &self,
    kind: Option<RegionKind>,
    include_retired: bool,
  ) -> Result<Vec<Region>> {
    let mut sql = format!("SELECT {REGION_COLUMNS} FROM regions WHERE 1 = 1");
    let mut params = Vec::new();
    if let Some(k) = kind {
      params.push(Value::Text(k.as_str().to_owned()));
      sql.push_str(&format!(" AND kind = ?{}", params.len()));
    }
    if !include_retired {
      sql.push_str(" AND active = 1");
    }
    sql.push_str(" ORDER BY kind, display_name, region_id");
    self.select_regions(sql, params).await
  }

  async fn insert_region_if_absent(&self, region: NewRegion) -> Result<(Region, bool)> {
    let normalized_name = region.normalized_name.clone();
    let kind = region.kind;
    let now = encode_dt(Utc::now());

    let outcome: Option<(RawRegion, bool)> = self
      .conn
      .call(move |conn| {
        let select_key = format!(
          "SELECT {REGION_COLUMNS} FROM regions
           WHERE normalized_name = ?1 AND kind = ?2 AND active = 1"
        );
        // A concurrent writer may win the insert; the loser reads its row.
        for _ in 0..INSERT_ATTEMPTS {
          let existing = conn
            .query_row(
              &select_key,
              params![region.normalized_name, region.kind.as_str()],
              RawRegion::from_row,
            )
            .optional()?;
          if let Some(existing) = existing {
            return Ok(Some((existing, false)));
          }

          let inserted = conn.execute(
            "INSERT OR IGNORE INTO regions (
               display_name, normalized_name, kind, parent_id, code, active, valid_from
             ) VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
            params![
              region.display_name,
              region.normalized_name,
              region.kind.as_str(),
              region.parent_id.map(|p| p.0),
              region.code,
              now,
            ],
          )?;
          if inserted == 1 {
            let id = conn.last_insert_rowid();
            let raw = conn.query_row(
              &format!("SELECT {REGION_COLUMNS} FROM regions WHERE region_id = ?1"),
              params![id],
              RawRegion::from_row,
            )?;
            return Ok(Some((raw, true)));
          }
        }
        Ok(None)
      })
      .await?;

    match outcome {
      Some((raw, created)) => Ok((raw.into_region()?, created)),
      None => Err(Error::RegionInsertConflict { normalized_name, kind }),
    }
  }

  async fn set_parent(&self, child: RegionId, parent: Option<RegionId>) -> Result<Region> {
    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let exists = |id: RegionId| -> rusqlite::Result<bool> {
          Ok(
            tx.query_row(
              "SELECT 1 FROM regions WHERE region_id = ?1",
              params![id.0],
              |_| Ok(()),
            )
            .optional()?
            .is_some(),
          )
        };

        if !exists(child)? {
          return Ok(ParentOutcome::Missing(child));
        }
        if let Some(p) = parent {
          if !exists(p)? {
            return Ok(ParentOutcome::Missing(p));
          }
          // Walk up from the new parent; reaching the child closes a loop.
          let mut cursor = Some(p.0);
          let mut hops = 0;
          while let Some(id) = cursor {
            if id == child.0 || hops > MAX_HIERARCHY_DEPTH {
              return Ok(ParentOutcome::Cycle);
            }
            hops += 1;
            cursor = tx
              .query_row(
                "SELECT parent_id FROM regions WHERE region_id = ?1",
                params![id],
                |row| row.get::<_, Option<i64>>(0),
              )
              .optional()?
              .flatten();
          }
        }

        tx.execute(
          "UPDATE regions SET parent_id = ?1 WHERE region_id = ?2",
          params![parent.map(|p| p.0), child.0],
        )?;
        let raw = tx.query_row(
          &format!("SELECT {REGION_COLUMNS} FROM regions WHERE region_id = ?1"),
          params![child.0],
          RawRegion::from_row,
        )?;
        tx.commit()?;
        Ok(ParentOutcome::Updated(raw))
      })
      .await?;

    match outcome {
      ParentOutcome::Updated(raw) => raw.into_region(),
      ParentOutcome::Missing(id) => Err(Error::RegionNotFound(id)),
      ParentOutcome::Cycle => Err(Error::CycleDetected {
        child,
        parent: parent.unwrap_or(child),
      }),
    }
  }

  async fn retire_region(&self, id: RegionId) -> Result<Region> {
    let now = encode_dt(Utc::now());
    let raw: Option<RawRegion> = self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE regions SET active = 0, valid_to = ?1 WHERE region_id = ?2 AND active = 1",
          params![now, id.0],
        )?;
        Ok(
          conn
            .query_row(
              &format!("SELECT {REGION_COLUMNS} FROM regions WHERE region_id = ?1"),
              params![id.0],
              RawRegion::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.ok_or(Error::RegionNotFound(id))?.into_region()
  }

  async fn find_alias(&self, source_system: String, raw_name: String) -> Result<Option<Alias>> {
    let mut found = self
      .select_aliases(
        format!(
          "SELECT {ALIAS_COLUMNS} FROM region_aliases a
           WHERE a.source_system = ?1 AND a.raw_name = ?2"
        ),
        vec![Value::Text(source_system), Value::Text(raw_name)],
      )
      .await?;
    Ok(found.pop())
  }

  async fn aliases_by_normalized(
    &self,
    normalized_name: String,
    kind: RegionKind,
  ) -> Result<Vec<Alias>> {
    self
      .select_aliases(
        format!(
          "SELECT {ALIAS_COLUMNS} FROM region_aliases a
           JOIN regions r ON r.region_id = a.region_id
           WHERE a.normalized_name = ?1 AND r.kind = ?2 AND r.active = 1
           ORDER BY a.region_id, a.source_system"
        ),
        vec![Value::Text(normalized_name), Value::Text(kind.as_str().to_owned())],
      )
      .await
  }

  async fn aliases_for(&self, region: RegionId) -> Result<Vec<Alias>> {
    self
      .select_aliases(
        format!(
          "SELECT {ALIAS_COLUMNS} FROM region_aliases a
           WHERE a.region_id = ?1 ORDER BY a.source_system, a.raw_name"
        ),
        vec![Value::Integer(region.0)],
      )
      .await
  }

  async fn add_alias(&self, alias: NewAlias) -> Result<AliasOutcome> {
    let region_id = alias.region_id;
    let normalized = normalize(&alias.raw_name);
    let variant = alias.variant.to_string();
    let now = encode_dt(Utc::now());

    let outcome: Option<AliasOutcome> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let region_exists = tx
          .query_row(
            "SELECT 1 FROM regions WHERE region_id = ?1",
            params![alias.region_id.0],
            |_| Ok(()),
          )
          .optional()?
          .is_some();
        if !region_exists {
          return Ok(None);
        }

        let existing: Option<i64> = tx
          .query_row(
            "SELECT region_id FROM region_aliases WHERE raw_name = ?1 AND source_system = ?2",
            params![alias.raw_name, alias.source_system],
            |row| row.get(0),
          )
          .optional()?;

        let outcome = match existing {
          Some(id) if id == alias.region_id.0 => AliasOutcome::AlreadyPresent,
          Some(id) => AliasOutcome::Conflict { existing: RegionId(id) },
          None => {
            if alias.is_primary {
              tx.execute(
                "UPDATE region_aliases SET is_primary = 0 WHERE region_id = ?1",
                params![alias.region_id.0],
              )?;
            }
            tx.execute(
              "INSERT INTO region_aliases (
                 source_system, raw_name, normalized_name, region_id,
                 variant, is_primary, created_at
               ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
              params![
                alias.source_system,
                alias.raw_name,
                normalized,
                alias.region_id.0,
                variant,
                alias.is_primary,
                now,
              ],
            )?;
            tx.execute(
              "DELETE FROM unmapped_names WHERE source_system = ?1 AND raw_name = ?2",
              params![alias.source_system, alias.raw_name],
            )?;
            AliasOutcome::Inserted
          }
        };
        tx.commit()?;
        Ok(Some(outcome))
      })
      .await?;

    outcome.ok_or(Error::RegionNotFound(region_id))
  }

  async fn fuzzy_candidates(
    &self,
    normalized_name: String,
    kind: RegionKind,
    floor: f64,
    limit: usize,
  ) -> Result<Vec<MatchCandidate>> {
    let kind_str = kind.as_str();
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let rows: Vec<(i64, String, f64)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT region_id, display_name, score FROM (
             SELECT region_id, display_name, similarity(normalized_name, ?1) AS score
             FROM regions
             WHERE kind = ?2 AND active = 1
           )
           WHERE score >= ?3
           ORDER BY score DESC, region_id ASC
           LIMIT ?4",
        )?;
        let rows = stmt
          .query_map(params![normalized_name, kind_str, floor, limit], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    Ok(
      rows
        .into_iter()
        .map(|(id, display_name, score)| MatchCandidate {
          region_id: RegionId(id),
          display_name,
          score,
        })
        .collect(),
    )
  }
}

// ─── UnmappedStore impl ──────────────────────────────────────────────────────

impl UnmappedStore for SqliteStore {
  async fn log_unmapped(&self, sighting: UnmappedSighting) -> Result<()> {
    let normalized = normalize(&sighting.raw_name);
    let fact_date = sighting.fact_date.map(encode_date);
    let run_id = sighting.run_id.map(encode_uuid);
    let (suggested_region, suggested_score) = sighting
      .suggestion
      .as_ref()
      .map(|c| (Some(c.region_id.0), Some(c.score)))
      .unwrap_or((None, None));
    let now = encode_dt(Utc::now());

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO unmapped_log (
             source_system, raw_name, normalized_name, kind, fact_date, run_id,
             reason, suggested_region_id, suggested_score, runner_up_score, logged_at
           ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
          params![
            sighting.source_system,
            sighting.raw_name,
            normalized,
            sighting.kind.as_str(),
            fact_date,
            run_id,
            sighting.reason,
            suggested_region,
            suggested_score,
            sighting.runner_up_score,
            now,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn absorb_unmapped_log(&self, source_system: Option<String>) -> Result<u64> {
    let consumed = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let pending: Vec<LogRow> = {
          let mut stmt = tx.prepare(
            "SELECT log_id, source_system, raw_name, normalized_name, kind,
                    suggested_region_id, suggested_score, runner_up_score, logged_at
             FROM unmapped_log
             WHERE ?1 IS NULL OR source_system = ?1
             ORDER BY log_id",
          )?;
          stmt
            .query_map(params![source_system], |row| {
              Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
              ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };

        for (log_id, source, raw, normalized, kind, region, score, runner_up, logged_at) in &pending {
          // Names aliased since they were logged are no longer unmapped.
          let aliased = tx
            .query_row(
              "SELECT 1 FROM region_aliases WHERE raw_name = ?1 AND source_system = ?2",
              params![raw, source],
              |_| Ok(()),
            )
            .optional()?
            .is_some();

          if !aliased {
            tx.execute(
              "INSERT INTO unmapped_names (
                 source_system, raw_name, normalized_name, kind,
                 occurrences, first_seen, last_seen
               ) VALUES (?1, ?2, ?3, ?4, 1, ?5, ?5)
               ON CONFLICT (source_system, raw_name, kind) DO UPDATE SET
                 occurrences = occurrences + 1,
                 first_seen  = MIN(first_seen, excluded.first_seen),
                 last_seen   = MAX(last_seen, excluded.last_seen)",
              params![source, raw, normalized, kind, logged_at],
            )?;
            if let (Some(region), Some(score)) = (region, score) {
              tx.execute(
                "UPDATE unmapped_names
                 SET suggested_region_id = ?1, suggested_score = ?2,
                     runner_up_score = ?3, suggested_at = ?4
                 WHERE source_system = ?5 AND raw_name = ?6 AND kind = ?7
                   AND (suggested_score IS NULL OR suggested_score < ?2)",
                params![region, score, runner_up, logged_at, source, raw, kind],
              )?;
            }
          }
          tx.execute("DELETE FROM unmapped_log WHERE log_id = ?1", params![log_id])?;
        }

        tx.commit()?;
        Ok(pending.len() as u64)
      })
      .await?;

    if consumed > 0 {
      tracing::debug!(consumed, "absorbed resolution log");
    }
    Ok(consumed)
  }

  async fn unmapped_entries(&self, query: UnmappedQuery) -> Result<Vec<UnmappedEntry>> {
    let mut sql = format!("SELECT {UNMAPPED_COLUMNS} FROM unmapped_names WHERE 1 = 1");
    let mut params: Vec<Value> = Vec::new();

    if let Some(source) = query.source_system {
      params.push(Value::Text(source));
      sql.push_str(&format!(" AND source_system = ?{}", params.len()));
    }
    if let Some(min) = query.min_occurrences {
      params.push(Value::Integer(i64::try_from(min).unwrap_or(i64::MAX)));
      sql.push_str(&format!(" AND occurrences >= ?{}", params.len()));
    }
    if query.with_suggestion {
      sql.push_str(" AND suggested_region_id IS NOT NULL");
    }
    sql.push_str(" ORDER BY occurrences DESC, entry_id ASC");
    if let Some(limit) = query.limit {
      params.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
      sql.push_str(&format!(" LIMIT ?{}", params.len()));
    }

    let raws: Vec<RawUnmapped> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(rusqlite::params_from_iter(params), RawUnmapped::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawUnmapped::into_entry).collect()
  }

  async fn get_unmapped(&self, entry_id: i64) -> Result<Option<UnmappedEntry>> {
    let raw: Option<RawUnmapped> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {UNMAPPED_COLUMNS} FROM unmapped_names WHERE entry_id = ?1"),
              params![entry_id],
              RawUnmapped::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawUnmapped::into_entry).transpose()
  }

  async fn set_suggestion(&self, entry_id: i64, suggestion: Suggestion) -> Result<()> {
    let at = encode_dt(suggestion.suggested_at);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "UPDATE unmapped_names
           SET suggested_region_id = ?1, suggested_score = ?2,
               runner_up_score = ?3, suggested_at = ?4
           WHERE entry_id = ?5",
          params![
            suggestion.region_id.0,
            suggestion.score,
            suggestion.runner_up_score,
            at,
            entry_id,
          ],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }

  async fn clear_unmapped(&self, source_system: String, raw_name: String) -> Result<u64> {
    let removed = self
      .conn
      .call(move |conn| {
        Ok(conn.execute(
          "DELETE FROM unmapped_names WHERE source_system = ?1 AND raw_name = ?2",
          params![source_system, raw_name],
        )?)
      })
      .await?;
    Ok(removed as u64)
  }
}
