//! Run ledger and advisory job leases.

use atlas_core::{
  ledger::{LeaseRequest, NewRun, RunCompletion, RunEntry, RunStatus, RunSummaryRow},
  store::LedgerStore,
};
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension as _, params};
use uuid::Uuid;

use crate::{
  Error, Result, SqliteStore,
  encode::{RUN_COLUMNS, RawRun, decode_count, decode_dt, decode_uuid, encode_dt, encode_uuid},
};

enum FinishOutcome {
  Finished(RawRun),
  Missing,
  NotRunning(String),
}

impl LedgerStore for SqliteStore {
  async fn start_run(&self, run: NewRun) -> Result<RunEntry> {
    let entry = RunEntry {
      run_id:        Uuid::new_v4(),
      process_name:  run.process_name,
      source_system: run.source_system,
      status:        RunStatus::Running,
      started_at:    Utc::now(),
      finished_at:   None,
      counts:        Default::default(),
      message:       None,
    };

    let id_str = encode_uuid(entry.run_id);
    let started = encode_dt(entry.started_at);
    let process = entry.process_name.clone();
    let source = entry.source_system.clone();

    self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO pipeline_runs (run_id, process_name, source_system, status, started_at)
           VALUES (?1, ?2, ?3, 'running', ?4)",
          params![id_str, process, source, started],
        )?;
        Ok(())
      })
      .await?;

    tracing::debug!(run_id = %entry.run_id, process = %entry.process_name, "run started");
    Ok(entry)
  }

  async fn finish_run(&self, run_id: Uuid, completion: RunCompletion) -> Result<RunEntry> {
    let id_str = encode_uuid(run_id);
    let finished = encode_dt(Utc::now());
    let status = completion.status.as_str();
    let counts = completion.counts;
    let message = completion.message;

    let outcome = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let current: Option<String> = tx
          .query_row(
            "SELECT status FROM pipeline_runs WHERE run_id = ?1",
            params![id_str],
            |row| row.get(0),
          )
          .optional()?;

        match current.as_deref() {
          None => return Ok(FinishOutcome::Missing),
          Some("running") => {}
          Some(other) => return Ok(FinishOutcome::NotRunning(other.to_owned())),
        }

        tx.execute(
          "UPDATE pipeline_runs SET
             status = ?1, finished_at = ?2,
             records_read = ?3, records_processed = ?4,
             records_failed = ?5, records_skipped = ?6,
             message = ?7
           WHERE run_id = ?8",
          params![
            status,
            finished,
            counts.read,
            counts.processed,
            counts.failed,
            counts.skipped,
            message,
            id_str,
          ],
        )?;
        let raw = tx.query_row(
          &format!("SELECT {RUN_COLUMNS} FROM pipeline_runs WHERE run_id = ?1"),
          params![id_str],
          RawRun::from_row,
        )?;
        tx.commit()?;
        Ok(FinishOutcome::Finished(raw))
      })
      .await?;

    match outcome {
      FinishOutcome::Finished(raw) => raw.into_entry(),
      FinishOutcome::Missing => Err(Error::RunNotFound(run_id)),
      FinishOutcome::NotRunning(status) => Err(Error::RunAlreadyFinished {
        run_id,
        status: RunStatus::parse(&status)?,
      }),
    }
  }

  async fn get_run(&self, run_id: Uuid) -> Result<Option<RunEntry>> {
    let id_str = encode_uuid(run_id);
    let raw: Option<RawRun> = self
      .conn
      .call(move |conn| {
        Ok(
          conn
            .query_row(
              &format!("SELECT {RUN_COLUMNS} FROM pipeline_runs WHERE run_id = ?1"),
              params![id_str],
              RawRun::from_row,
            )
            .optional()?,
        )
      })
      .await?;

    raw.map(RawRun::into_entry).transpose()
  }

  async fn recent_runs(&self, limit: usize) -> Result<Vec<RunEntry>> {
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let raws: Vec<RawRun> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {RUN_COLUMNS} FROM pipeline_runs
           ORDER BY started_at DESC, run_id ASC
           LIMIT ?1"
        ))?;
        let rows = stmt
          .query_map(params![limit], RawRun::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawRun::into_entry).collect()
  }

  async fn run_summary(&self) -> Result<Vec<RunSummaryRow>> {
    type Row = (String, Option<String>, String, i64, i64, i64, Option<String>);
    let rows: Vec<Row> = self
      .conn
      .call(|conn| {
        let mut stmt = conn.prepare(
          "SELECT process_name, source_system, status, COUNT(*),
                  COALESCE(SUM(records_processed), 0),
                  COALESCE(SUM(records_failed), 0),
                  MAX(finished_at)
           FROM pipeline_runs
           GROUP BY process_name, source_system, status
           ORDER BY process_name, source_system, status",
        )?;
        let rows = stmt
          .query_map([], |row| {
            Ok((
              row.get(0)?,
              row.get(1)?,
              row.get(2)?,
              row.get(3)?,
              row.get(4)?,
              row.get(5)?,
              row.get(6)?,
            ))
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .into_iter()
      .map(|(process_name, source_system, status, runs, processed, failed, last)| -> Result<_> {
        Ok(RunSummaryRow {
          process_name,
          source_system,
          status: RunStatus::parse(&status)?,
          runs: decode_count(runs),
          records_processed: decode_count(processed),
          records_failed: decode_count(failed),
          last_finished_at: last.as_deref().map(decode_dt).transpose()?,
        })
      })
      .collect()
  }

  async fn fail_stale_runs(
    &self,
    started_before: DateTime<Utc>,
    message: String,
  ) -> Result<Vec<Uuid>> {
    let cutoff = encode_dt(started_before);
    let now = encode_dt(Utc::now());

    let ids: Vec<String> = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let ids = {
          let mut stmt = tx.prepare(
            "SELECT run_id FROM pipeline_runs
             WHERE status = 'running' AND started_at < ?1
             ORDER BY started_at",
          )?;
          stmt
            .query_map(params![cutoff], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?
        };
        for id in &ids {
          tx.execute(
            "UPDATE pipeline_runs
             SET status = 'failed', finished_at = ?1, message = ?2
             WHERE run_id = ?3 AND status = 'running'",
            params![now, message, id],
          )?;
        }
        tx.commit()?;
        Ok(ids)
      })
      .await?;

    ids.iter().map(|s| decode_uuid(s)).collect()
  }

  async fn acquire_lease(&self, request: LeaseRequest) -> Result<bool> {
    let now = Utc::now();
    let now_str = encode_dt(now);
    let expires = encode_dt(now + request.ttl);
    let holder = encode_uuid(request.holder);

    let acquired = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let current: Option<(String, String)> = tx
          .query_row(
            "SELECT holder, expires_at FROM job_leases
             WHERE source_system = ?1 AND job_kind = ?2",
            params![request.source_system, request.job_kind],
            |row| Ok((row.get(0)?, row.get(1)?)),
          )
          .optional()?;

        let free = match current {
          None => true,
          Some((owner, expires_at)) => owner == holder || expires_at <= now_str,
        };
        if free {
          tx.execute(
            "INSERT INTO job_leases (source_system, job_kind, holder, acquired_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (source_system, job_kind) DO UPDATE SET
               holder      = excluded.holder,
               acquired_at = excluded.acquired_at,
               expires_at  = excluded.expires_at",
            params![request.source_system, request.job_kind, holder, now_str, expires],
          )?;
        }
        tx.commit()?;
        Ok(free)
      })
      .await?;

    Ok(acquired)
  }

  async fn release_lease(
    &self,
    source_system: String,
    job_kind: String,
    holder: Uuid,
  ) -> Result<()> {
    let holder = encode_uuid(holder);
    self
      .conn
      .call(move |conn| {
        conn.execute(
          "DELETE FROM job_leases
           WHERE source_system = ?1 AND job_kind = ?2 AND holder = ?3",
          params![source_system, job_kind, holder],
        )?;
        Ok(())
      })
      .await?;
    Ok(())
  }
}
