//! SQL schema for the atlas SQLite store.
//!
//! Executed once at connection startup. Fact tables carry a `partition_key`
//! (`YYYY-MM` of the fact date) standing in for monthly partitions; the
//! `fact_partitions` registry tracks which partitions exist.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

-- ── Dimension ──────────────────────────────────────────────────────────────

-- Regions are never deleted; retirement clears `active`.
CREATE TABLE IF NOT EXISTS regions (
    region_id       INTEGER PRIMARY KEY AUTOINCREMENT,
    display_name    TEXT NOT NULL,
    normalized_name TEXT NOT NULL,
    kind            TEXT NOT NULL,   -- RegionKind, snake case
    parent_id       INTEGER REFERENCES regions(region_id),
    code            TEXT,
    active          INTEGER NOT NULL DEFAULT 1,
    valid_from      TEXT NOT NULL,
    valid_to        TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS regions_key_idx
    ON regions(normalized_name, kind) WHERE active = 1;
CREATE UNIQUE INDEX IF NOT EXISTS regions_display_idx
    ON regions(display_name, kind) WHERE active = 1;
CREATE INDEX IF NOT EXISTS regions_kind_idx ON regions(kind, active);

CREATE TABLE IF NOT EXISTS region_aliases (
    source_system   TEXT NOT NULL,
    raw_name        TEXT NOT NULL,
    normalized_name TEXT NOT NULL,
    region_id       INTEGER NOT NULL REFERENCES regions(region_id),
    variant         TEXT NOT NULL DEFAULT 'source_specific',
    is_primary      INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL,
    PRIMARY KEY (raw_name, source_system)
);

CREATE INDEX IF NOT EXISTS aliases_normalized_idx ON region_aliases(normalized_name);
CREATE INDEX IF NOT EXISTS aliases_region_idx     ON region_aliases(region_id);

-- Append-only resolution log written by loaders; folded into
-- `unmapped_names` by the maintainer.
CREATE TABLE IF NOT EXISTS unmapped_log (
    log_id              INTEGER PRIMARY KEY AUTOINCREMENT,
    source_system       TEXT NOT NULL,
    raw_name            TEXT NOT NULL,
    normalized_name     TEXT NOT NULL,
    kind                TEXT NOT NULL,
    fact_date           TEXT,
    run_id              TEXT,
    reason              TEXT NOT NULL,
    suggested_region_id INTEGER,
    suggested_score     REAL,
    runner_up_score     REAL,
    logged_at           TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS unmapped_names (
    entry_id            INTEGER PRIMARY KEY AUTOINCREMENT,
    source_system       TEXT NOT NULL,
    raw_name            TEXT NOT NULL,
    normalized_name     TEXT NOT NULL,
    kind                TEXT NOT NULL,
    occurrences         INTEGER NOT NULL DEFAULT 0,
    first_seen          TEXT NOT NULL,
    last_seen           TEXT NOT NULL,
    suggested_region_id INTEGER REFERENCES regions(region_id),
    suggested_score     REAL,
    runner_up_score     REAL,
    suggested_at        TEXT,
    UNIQUE (source_system, raw_name, kind)
);

-- ── Landing ────────────────────────────────────────────────────────────────

-- Written by an external ingestion process; loaders only read it.
CREATE TABLE IF NOT EXISTS raw_records (
    record_id     INTEGER PRIMARY KEY AUTOINCREMENT,
    source_system TEXT NOT NULL,
    fact_date     TEXT NOT NULL,   -- YYYY-MM-DD
    payload       TEXT NOT NULL,
    landed_at     TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS raw_records_source_date_idx
    ON raw_records(source_system, fact_date, record_id);

-- ── Facts ──────────────────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS visitor_facts (
    fact_date     TEXT NOT NULL,
    region_id     INTEGER NOT NULL REFERENCES regions(region_id),
    category      TEXT NOT NULL,   -- 'total' or a visitor category
    source_system TEXT NOT NULL,
    partition_key TEXT NOT NULL,
    visitors      INTEGER NOT NULL,
    batch_id      TEXT NOT NULL,
    loaded_at     TEXT NOT NULL,
    PRIMARY KEY (fact_date, region_id, category, source_system)
);

CREATE INDEX IF NOT EXISTS visitor_facts_partition_idx
    ON visitor_facts(partition_key, fact_date);

-- Replaced as a whole per (date, region, source, breakdown).
CREATE TABLE IF NOT EXISTS visitor_breakdowns (
    fact_date     TEXT NOT NULL,
    region_id     INTEGER NOT NULL REFERENCES regions(region_id),
    source_system TEXT NOT NULL,
    breakdown     TEXT NOT NULL,   -- BreakdownKind, snake case
    rank          INTEGER NOT NULL,
    label         TEXT NOT NULL,
    value         REAL NOT NULL,
    partition_key TEXT NOT NULL,
    batch_id      TEXT NOT NULL,
    loaded_at     TEXT NOT NULL,
    PRIMARY KEY (fact_date, region_id, source_system, breakdown, rank)
);

CREATE INDEX IF NOT EXISTS visitor_breakdowns_partition_idx
    ON visitor_breakdowns(partition_key, fact_date);

CREATE TABLE IF NOT EXISTS visitor_derived (
    fact_date         TEXT NOT NULL,
    region_id         INTEGER NOT NULL REFERENCES regions(region_id),
    source_system     TEXT NOT NULL,
    partition_key     TEXT NOT NULL,
    avg_dwell_minutes REAL,
    batch_id          TEXT NOT NULL,
    loaded_at         TEXT NOT NULL,
    PRIMARY KEY (fact_date, region_id, source_system)
);

CREATE TABLE IF NOT EXISTS spending_facts (
    fact_date     TEXT NOT NULL,
    region_id     INTEGER NOT NULL REFERENCES regions(region_id),
    category      TEXT NOT NULL,   -- industry
    source_system TEXT NOT NULL,
    partition_key TEXT NOT NULL,
    transactions  INTEGER NOT NULL,
    amount        REAL NOT NULL,
    avg_ticket    REAL,
    batch_id      TEXT NOT NULL,
    loaded_at     TEXT NOT NULL,
    PRIMARY KEY (fact_date, region_id, category, source_system)
);

CREATE INDEX IF NOT EXISTS spending_facts_partition_idx
    ON spending_facts(partition_key, fact_date);

CREATE TABLE IF NOT EXISTS fact_partitions (
    table_name    TEXT NOT NULL,
    partition_key TEXT NOT NULL,
    row_count     INTEGER NOT NULL DEFAULT 0,
    last_batch_id TEXT,
    updated_at    TEXT NOT NULL,
    PRIMARY KEY (table_name, partition_key)
);

-- ── Quality ────────────────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS quality_records (
    batch_id         TEXT NOT NULL,
    fact_date        TEXT NOT NULL,
    region_id        INTEGER NOT NULL,
    total_visitors   INTEGER NOT NULL,
    category_sum     INTEGER NOT NULL,
    has_demographics INTEGER NOT NULL,
    has_dwell_time   INTEGER NOT NULL,
    has_discrepancy  INTEGER NOT NULL,
    discrepancy_type TEXT,
    discrepancy_pct  REAL NOT NULL,
    is_error         INTEGER NOT NULL,
    audited_at       TEXT NOT NULL,
    PRIMARY KEY (batch_id, fact_date, region_id)
);

-- ── Ledger ─────────────────────────────────────────────────────────────────

CREATE TABLE IF NOT EXISTS pipeline_runs (
    run_id            TEXT PRIMARY KEY,
    process_name      TEXT NOT NULL,
    source_system     TEXT,
    status            TEXT NOT NULL,   -- 'running' | 'completed' | 'failed' | 'partial'
    started_at        TEXT NOT NULL,
    finished_at       TEXT,
    records_read      INTEGER NOT NULL DEFAULT 0,
    records_processed INTEGER NOT NULL DEFAULT 0,
    records_failed    INTEGER NOT NULL DEFAULT 0,
    records_skipped   INTEGER NOT NULL DEFAULT 0,
    message           TEXT
);

CREATE INDEX IF NOT EXISTS pipeline_runs_status_idx ON pipeline_runs(status, started_at);

CREATE TABLE IF NOT EXISTS job_leases (
    source_system TEXT NOT NULL,
    job_kind      TEXT NOT NULL,
    holder        TEXT NOT NULL,
    acquired_at   TEXT NOT NULL,
    expires_at    TEXT NOT NULL,
    PRIMARY KEY (source_system, job_kind)
);

PRAGMA user_version = 1;
";
