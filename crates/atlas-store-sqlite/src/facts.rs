//! Landing reads, partitioned fact tables and quality records.

use std::collections::BTreeSet;

use atlas_core::{
  observation::{
    BreakdownKind, BreakdownRow, BreakdownSet, ChunkWrite, FactChunk, FactCounts, FactKey,
    ObservationKey, PartitionInfo, RawRecord, SpendingFact, VisitorDerived, VisitorFact,
    partition_key,
  },
  quality::{KeyTotals, QualityRecord},
  region::RegionId,
  store::{DateRange, FactStore, QualityStore, RawSource},
};
use chrono::{NaiveDate, Utc};
use rusqlite::params;
use uuid::Uuid;

use crate::{
  Result, SqliteStore,
  encode::{
    QUALITY_COLUMNS, RawQuality, decode_count, decode_date, decode_uuid, encode_date, encode_dt,
    encode_uuid,
  },
};

/// Fact tables tracked by the partition registry.
const FACT_TABLES: [&str; 4] =
  ["visitor_facts", "visitor_breakdowns", "visitor_derived", "spending_facts"];

/// Bind values shared by every range query: partition bounds first so the
/// partition index prunes, then the exact date bounds and source filter.
struct RangeParams {
  partition_from: String,
  partition_to:   String,
  from:           String,
  to:             String,
  source_system:  Option<String>,
}

impl From<&DateRange> for RangeParams {
  fn from(range: &DateRange) -> Self {
    Self {
      partition_from: partition_key(range.from),
      partition_to:   partition_key(range.to),
      from:           encode_date(range.from),
      to:             encode_date(range.to),
      source_system:  range.source_system.clone(),
    }
  }
}

/// `WHERE` clause matching [`RangeParams`] bound as `?1..?5`.
const RANGE_FILTER: &str = "partition_key BETWEEN ?1 AND ?2
     AND fact_date BETWEEN ?3 AND ?4
     AND (?5 IS NULL OR source_system = ?5)";

// ─── RawSource impl ──────────────────────────────────────────────────────────

impl RawSource for SqliteStore {
  async fn fetch_raw(
    &self,
    source_system: String,
    date: NaiveDate,
    after: i64,
    limit: usize,
  ) -> Result<Vec<RawRecord>> {
    let date_str = encode_date(date);
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);

    let rows: Vec<(i64, String, String)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT record_id, source_system, payload FROM raw_records
           WHERE source_system = ?1 AND fact_date = ?2 AND record_id > ?3
           ORDER BY record_id
           LIMIT ?4",
        )?;
        let rows = stmt
          .query_map(params![source_system, date_str, after, limit], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    Ok(
      rows
        .into_iter()
        .map(|(record_id, source_system, payload)| RawRecord {
          record_id,
          source_system,
          fact_date: date,
          payload,
        })
        .collect(),
    )
  }
}

// ─── FactStore impl ──────────────────────────────────────────────────────────

impl FactStore for SqliteStore {
  async fn write_chunk(&self, chunk: FactChunk) -> Result<ChunkWrite> {
    let batch = encode_uuid(chunk.batch_id);
    let now = encode_dt(Utc::now());

    let write = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut write = ChunkWrite::default();
        let mut touched: BTreeSet<(&'static str, String)> = BTreeSet::new();

        {
          let mut upsert = tx.prepare_cached(
            "INSERT INTO visitor_facts (
               fact_date, region_id, category, source_system,
               partition_key, visitors, batch_id, loaded_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (fact_date, region_id, category, source_system) DO UPDATE SET
               visitors  = excluded.visitors,
               batch_id  = excluded.batch_id,
               loaded_at = excluded.loaded_at",
          )?;
          for fact in &chunk.visitor_facts {
            let partition = partition_key(fact.key.fact_date);
            write.visitor_rows += upsert.execute(params![
              encode_date(fact.key.fact_date),
              fact.key.region_id.0,
              fact.key.category,
              fact.key.source_system,
              partition,
              fact.visitors,
              batch,
              now,
            ])? as u64;
            touched.insert(("visitor_facts", partition));
          }
        }

        {
          let mut delete = tx.prepare_cached(
            "DELETE FROM visitor_breakdowns
             WHERE fact_date = ?1 AND region_id = ?2 AND source_system = ?3 AND breakdown = ?4",
          )?;
          let mut insert = tx.prepare_cached(
            "INSERT INTO visitor_breakdowns (
               fact_date, region_id, source_system, breakdown, rank, label, value,
               partition_key, batch_id, loaded_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
          )?;
          for set in &chunk.breakdowns {
            let date = encode_date(set.key.fact_date);
            let partition = partition_key(set.key.fact_date);
            delete.execute(params![
              date,
              set.key.region_id.0,
              set.key.source_system,
              set.kind.as_str(),
            ])?;
            for row in &set.rows {
              write.breakdown_rows += insert.execute(params![
                date,
                set.key.region_id.0,
                set.key.source_system,
                set.kind.as_str(),
                row.rank,
                row.label,
                row.value,
                partition,
                batch,
                now,
              ])? as u64;
            }
            touched.insert(("visitor_breakdowns", partition));
          }
        }

        {
          let mut upsert = tx.prepare_cached(
            "INSERT INTO visitor_derived (
               fact_date, region_id, source_system, partition_key,
               avg_dwell_minutes, batch_id, loaded_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (fact_date, region_id, source_system) DO UPDATE SET
               avg_dwell_minutes = excluded.avg_dwell_minutes,
               batch_id          = excluded.batch_id,
               loaded_at         = excluded.loaded_at",
          )?;
          for derived in &chunk.derived {
            let partition = partition_key(derived.key.fact_date);
            write.derived_rows += upsert.execute(params![
              encode_date(derived.key.fact_date),
              derived.key.region_id.0,
              derived.key.source_system,
              partition,
              derived.avg_dwell_minutes,
              batch,
              now,
            ])? as u64;
            touched.insert(("visitor_derived", partition));
          }
        }

        {
          let mut upsert = tx.prepare_cached(
            "INSERT INTO spending_facts (
               fact_date, region_id, category, source_system, partition_key,
               transactions, amount, avg_ticket, batch_id, loaded_at
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT (fact_date, region_id, category, source_system) DO UPDATE SET
               transactions = excluded.transactions,
               amount       = excluded.amount,
               avg_ticket   = excluded.avg_ticket,
               batch_id     = excluded.batch_id,
               loaded_at    = excluded.loaded_at",
          )?;
          for fact in &chunk.spending_facts {
            let partition = partition_key(fact.key.fact_date);
            write.spending_rows += upsert.execute(params![
              encode_date(fact.key.fact_date),
              fact.key.region_id.0,
              fact.key.category,
              fact.key.source_system,
              partition,
              fact.transactions,
              fact.amount,
              fact.avg_ticket,
              batch,
              now,
            ])? as u64;
            touched.insert(("spending_facts", partition));
          }
        }

        for (table, partition) in &touched {
          let rows: i64 = tx.query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE partition_key = ?1"),
            params![partition],
            |row| row.get(0),
          )?;
          tx.execute(
            "INSERT INTO fact_partitions (
               table_name, partition_key, row_count, last_batch_id, updated_at
             ) VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (table_name, partition_key) DO UPDATE SET
               row_count     = excluded.row_count,
               last_batch_id = excluded.last_batch_id,
               updated_at    = excluded.updated_at",
            params![table, partition, rows, batch, now],
          )?;
        }

        tx.commit()?;
        Ok(write)
      })
      .await?;

    Ok(write)
  }

  async fn visitor_facts(&self, range: DateRange) -> Result<Vec<VisitorFact>> {
    let p = RangeParams::from(&range);
    let rows: Vec<(String, i64, String, String, i64)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT fact_date, region_id, category, source_system, visitors
           FROM visitor_facts
           WHERE {RANGE_FILTER}
           ORDER BY fact_date, region_id, source_system, category"
        ))?;
        let rows = stmt
          .query_map(
            params![p.partition_from, p.partition_to, p.from, p.to, p.source_system],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(date, region, category, source_system, visitors)| -> Result<VisitorFact> {
        Ok(VisitorFact {
          key: FactKey {
            fact_date: decode_date(&date)?,
            region_id: RegionId(region),
            category,
            source_system,
          },
          visitors,
        })
      })
      .collect()
  }

  async fn spending_facts(&self, range: DateRange) -> Result<Vec<SpendingFact>> {
    let p = RangeParams::from(&range);
    let rows: Vec<(String, i64, String, String, i64, f64, Option<f64>)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT fact_date, region_id, category, source_system,
                  transactions, amount, avg_ticket
           FROM spending_facts
           WHERE {RANGE_FILTER}
           ORDER BY fact_date, region_id, source_system, category"
        ))?;
        let rows = stmt
          .query_map(
            params![p.partition_from, p.partition_to, p.from, p.to, p.source_system],
            |row| {
              Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
              ))
            },
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(date, region, category, source_system, transactions, amount, avg_ticket)| -> Result<SpendingFact> {
        Ok(SpendingFact {
          key: FactKey {
            fact_date: decode_date(&date)?,
            region_id: RegionId(region),
            category,
            source_system,
          },
          transactions,
          amount,
          avg_ticket,
        })
      })
      .collect()
  }

  async fn breakdowns(&self, key: ObservationKey) -> Result<Vec<BreakdownSet>> {
    let date = encode_date(key.fact_date);
    let region = key.region_id.0;
    let source = key.source_system.clone();

    let rows: Vec<(String, u32, String, f64)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(
          "SELECT breakdown, rank, label, value FROM visitor_breakdowns
           WHERE fact_date = ?1 AND region_id = ?2 AND source_system = ?3
           ORDER BY breakdown, rank",
        )?;
        let rows = stmt
          .query_map(params![date, region, source], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    let mut sets: Vec<BreakdownSet> = Vec::new();
    for (breakdown, rank, label, value) in rows {
      let kind = BreakdownKind::parse(&breakdown)?;
      let row = BreakdownRow { label, rank, value };
      match sets.last_mut() {
        Some(set) if set.kind == kind => set.rows.push(row),
        _ => sets.push(BreakdownSet { key: key.clone(), kind, rows: vec![row] }),
      }
    }
    Ok(sets)
  }

  async fn derived_metrics(&self, range: DateRange) -> Result<Vec<VisitorDerived>> {
    let p = RangeParams::from(&range);
    let rows: Vec<(String, i64, String, Option<f64>)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT fact_date, region_id, source_system, avg_dwell_minutes
           FROM visitor_derived
           WHERE {RANGE_FILTER}
           ORDER BY fact_date, region_id, source_system"
        ))?;
        let rows = stmt
          .query_map(
            params![p.partition_from, p.partition_to, p.from, p.to, p.source_system],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(date, region, source_system, avg_dwell_minutes)| -> Result<VisitorDerived> {
        Ok(VisitorDerived {
          key: ObservationKey {
            fact_date: decode_date(&date)?,
            region_id: RegionId(region),
            source_system,
          },
          avg_dwell_minutes,
        })
      })
      .collect()
  }

  async fn key_totals(&self, range: DateRange) -> Result<Vec<KeyTotals>> {
    let p = RangeParams::from(&range);
    let rows: Vec<(String, i64, Option<i64>, i64, i64, bool, bool)> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT t.fact_date, t.region_id, t.total, t.category_sum, t.category_rows,
                  EXISTS (
                    SELECT 1 FROM visitor_breakdowns b
                    WHERE b.fact_date = t.fact_date AND b.region_id = t.region_id
                      AND b.breakdown IN ('age_group', 'gender')
                      AND (?5 IS NULL OR b.source_system = ?5)
                  ),
                  EXISTS (
                    SELECT 1 FROM visitor_breakdowns b
                    WHERE b.fact_date = t.fact_date AND b.region_id = t.region_id
                      AND b.breakdown = 'dwell_time'
                      AND (?5 IS NULL OR b.source_system = ?5)
                  )
           FROM (
             SELECT fact_date, region_id,
                    SUM(CASE WHEN category = 'total' THEN visitors END)              AS total,
                    COALESCE(SUM(CASE WHEN category <> 'total' THEN visitors END), 0) AS category_sum,
                    COUNT(CASE WHEN category <> 'total' THEN 1 END)                  AS category_rows
             FROM visitor_facts
             WHERE {RANGE_FILTER}
             GROUP BY fact_date, region_id
           ) t
           ORDER BY t.fact_date, t.region_id"
        ))?;
        let rows = stmt
          .query_map(
            params![p.partition_from, p.partition_to, p.from, p.to, p.source_system],
            |row| {
              Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
              ))
            },
          )?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(date, region, total, sum, category_rows, demo, dwell)| -> Result<KeyTotals> {
        Ok(KeyTotals {
          fact_date:        decode_date(&date)?,
          region_id:        RegionId(region),
          total_visitors:   total,
          category_sum:     sum,
          category_rows:    decode_count(category_rows),
          has_demographics: demo,
          has_dwell_time:   dwell,
        })
      })
      .collect()
  }

  async fn fact_counts(&self, range: DateRange) -> Result<FactCounts> {
    let p = RangeParams::from(&range);
    let counts: [i64; 4] = self
      .conn
      .call(move |conn| {
        let mut counts = [0_i64; 4];
        for (slot, table) in counts.iter_mut().zip(FACT_TABLES) {
          *slot = conn.query_row(
            &format!("SELECT COUNT(*) FROM {table} WHERE {RANGE_FILTER}"),
            params![p.partition_from, p.partition_to, p.from, p.to, p.source_system],
            |row| row.get(0),
          )?;
        }
        Ok(counts)
      })
      .await?;

    Ok(FactCounts {
      visitor_rows:   decode_count(counts[0]),
      breakdown_rows: decode_count(counts[1]),
      derived_rows:   decode_count(counts[2]),
      spending_rows:  decode_count(counts[3]),
    })
  }

  async fn partitions(&self) -> Result<Vec<PartitionInfo>> {
    let rows: Vec<(String, String, i64, Option<String>)> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT table_name, partition_key, row_count, last_batch_id
           FROM fact_partitions ORDER BY table_name, partition_key",
        )?;
        let rows = stmt
          .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)))?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(table_name, partition_key, row_count, last_batch)| -> Result<PartitionInfo> {
        Ok(PartitionInfo {
          table_name,
          partition_key,
          row_count: decode_count(row_count),
          last_batch_id: last_batch.as_deref().map(decode_uuid).transpose()?,
        })
      })
      .collect()
  }
}

// ─── QualityStore impl ───────────────────────────────────────────────────────

impl QualityStore for SqliteStore {
  async fn write_quality(&self, records: Vec<QualityRecord>) -> Result<u64> {
    let written = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let mut written = 0_u64;
        {
          let mut upsert = tx.prepare_cached(&format!(
            "INSERT INTO quality_records ({QUALITY_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT (batch_id, fact_date, region_id) DO UPDATE SET
               total_visitors   = excluded.total_visitors,
               category_sum     = excluded.category_sum,
               has_demographics = excluded.has_demographics,
               has_dwell_time   = excluded.has_dwell_time,
               has_discrepancy  = excluded.has_discrepancy,
               discrepancy_type = excluded.discrepancy_type,
               discrepancy_pct  = excluded.discrepancy_pct,
               is_error         = excluded.is_error,
               audited_at       = excluded.audited_at"
          ))?;
          for r in &records {
            written += upsert.execute(params![
              encode_uuid(r.batch_id),
              encode_date(r.fact_date),
              r.region_id.0,
              r.total_visitors,
              r.category_sum,
              r.has_demographics,
              r.has_dwell_time,
              r.has_discrepancy,
              r.discrepancy_type.map(|t| t.as_str()),
              r.discrepancy_pct,
              r.is_error,
              encode_dt(r.audited_at),
            ])? as u64;
          }
        }
        tx.commit()?;
        Ok(written)
      })
      .await?;
    Ok(written)
  }

  async fn quality_records(&self, batch_id: Uuid) -> Result<Vec<QualityRecord>> {
    let batch = encode_uuid(batch_id);
    let raws: Vec<RawQuality> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {QUALITY_COLUMNS} FROM quality_records
           WHERE batch_id = ?1 ORDER BY fact_date, region_id"
        ))?;
        let rows = stmt
          .query_map(params![batch], RawQuality::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawQuality::into_record).collect()
  }
}
