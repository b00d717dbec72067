//! [`SqliteStore`]: the SQLite implementation of the atlas storage traits.
//!
//! The trait impls live next to the tables they own: `dictionary.rs`,
//! `facts.rs` and `ledger.rs`.

use std::path::Path;

use atlas_core::{similarity::similarity, store::Backend};
use chrono::{NaiveDate, Utc};
use rusqlite::functions::FunctionFlags;

use crate::{
  Error, Result,
  encode::{encode_date, encode_dt},
  schema::SCHEMA,
};

/// An atlas warehouse backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  pub(crate) conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  /// Open an in-memory store for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    let store = Self { conn };
    store.init_schema().await?;
    Ok(store)
  }

  async fn init_schema(&self) -> Result<()> {
    self
      .conn
      .call(|conn| {
        // `similarity(a, b)` lets fuzzy search rank and cut candidates inside
        // the query instead of shipping every region back.
        conn.create_scalar_function(
          "similarity",
          2,
          FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
          |ctx| {
            let a = ctx.get::<String>(0)?;
            let b = ctx.get::<String>(1)?;
            Ok(similarity(&a, &b))
          },
        )?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    tracing::debug!("sqlite schema initialised");
    Ok(())
  }

  /// Append a record to the landing table and return its id.
  ///
  /// Production landing rows are written by an external ingestion process;
  /// this exists for seeding demos and tests.
  pub async fn land_raw_record(
    &self,
    source_system: &str,
    fact_date: NaiveDate,
    payload: &str,
  ) -> Result<i64> {
    let source = source_system.to_owned();
    let date = encode_date(fact_date);
    let payload = payload.to_owned();
    let now = encode_dt(Utc::now());

    let id = self
      .conn
      .call(move |conn| {
        conn.execute(
          "INSERT INTO raw_records (source_system, fact_date, payload, landed_at)
           VALUES (?1, ?2, ?3, ?4)",
          rusqlite::params![source, date, payload, now],
        )?;
        Ok(conn.last_insert_rowid())
      })
      .await?;
    Ok(id)
  }
}

impl Backend for SqliteStore {
  type Error = Error;
}
