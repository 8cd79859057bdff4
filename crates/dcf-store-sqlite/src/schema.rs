//! SQL schema for the DCF SQLite store.
//!
//! Executed once at connection startup. `PRAGMA user_version` records the
//! schema revision so later migrations can be gated on it.

pub const SCHEMA_VERSION: i64 = 1;

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- Raw provider inputs, one row per (ticker, fiscal year).
CREATE TABLE IF NOT EXISTS financial_data (
    ticker             TEXT    NOT NULL,
    year               INTEGER NOT NULL,
    fcf                REAL,
    total_debt         REAL,
    tax_rate           REAL,
    interest_expense   REAL,
    shares_outstanding REAL,
    market_cap         REAL,
    beta               REAL,
    share_price        REAL,
    PRIMARY KEY (ticker, year)
);

-- Projected cash flows; terminal values only on the final horizon year.
CREATE TABLE IF NOT EXISTS dcf_table (
    ticker         TEXT    NOT NULL,
    year           INTEGER NOT NULL,
    projected_fcf  REAL    NOT NULL,
    discounted_fcf REAL    NOT NULL,
    projected_tv   REAL,
    discounted_tv  REAL,
    PRIMARY KEY (ticker, year)
);

-- One row per ticker per run; `date` is the run start, RFC 3339 UTC.
CREATE TABLE IF NOT EXISTS results_table (
    ticker           TEXT NOT NULL,
    date             TEXT NOT NULL,
    share_price      REAL NOT NULL,
    estimated_price  REAL NOT NULL,
    margin_of_safety REAL NOT NULL,
    run_id           TEXT NOT NULL,
    PRIMARY KEY (ticker, date)
);

CREATE TABLE IF NOT EXISTS data_status (
    table_name   TEXT PRIMARY KEY,
    last_updated TEXT
);

CREATE INDEX IF NOT EXISTS results_run_idx ON results_table(run_id);

PRAGMA user_version = 1;
";
