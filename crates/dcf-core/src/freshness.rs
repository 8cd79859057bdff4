//! The freshness gate: decide whether cached facts must be refetched.
//!
//! Every failure mode here errs toward refetching. A missing record, a null
//! or unparseable stamp, or a store read error all count as stale.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
  Result,
  record::{Record, Row, Table, encode_dt},
  store::{FactStore, FreshnessLedger},
};

// ─── Record ──────────────────────────────────────────────────────────────────

/// One row of `data_status`. `last_updated` is kept as raw text; it is only
/// interpreted by the gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessRecord {
  pub table_name:   String,
  pub last_updated: Option<String>,
}

impl FreshnessRecord {
  pub fn stamped(table_name: impl Into<String>, at: DateTime<Utc>) -> Self {
    Self {
      table_name:   table_name.into(),
      last_updated: Some(encode_dt(at)),
    }
  }

  /// The stamp as UTC, if present and parseable.
  pub fn last_updated_utc(&self) -> Option<DateTime<Utc>> {
    self.last_updated.as_deref().and_then(parse_timestamp)
  }
}

impl Record for FreshnessRecord {
  const TABLE: Table = Table::DataStatus;
  const KEY_COLUMNS: &'static [&'static str] = &["table_name"];
  const COLUMNS: &'static [&'static str] = &["table_name", "last_updated"];

  fn to_row(&self) -> Row {
    Row::new()
      .with("table_name", self.table_name.as_str())
      .with("last_updated", self.last_updated.clone())
  }

  fn from_row(row: &Row) -> Result<Self> {
    Ok(Self {
      table_name:   row.text(Self::TABLE, "table_name")?,
      last_updated: row.opt_text(Self::TABLE, "last_updated")?,
    })
  }
}

/// Parse a stored stamp. Offsets are honoured; naive stamps are taken to be
/// UTC already.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
  const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

  let raw = raw.trim();
  if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
    return Some(dt.with_timezone(&Utc));
  }
  if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f%:z") {
    return Some(dt.with_timezone(&Utc));
  }
  for format in NAIVE_FORMATS {
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
      return Some(naive.and_utc());
    }
  }
  NaiveDate::parse_from_str(raw, "%Y-%m-%d")
    .ok()
    .and_then(|d| d.and_hms_opt(0, 0, 0))
    .map(|naive| naive.and_utc())
}

// ─── Gate ────────────────────────────────────────────────────────────────────

/// Why the gate decided what it did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Freshness {
  /// At least one requested entity has no facts at all.
  ColdStart { tickers: Vec<String> },
  /// The dataset has never been marked refreshed.
  NeverRefreshed,
  /// A record exists but its stamp is null or unreadable.
  UnreadableStamp { raw: Option<String> },
  Stale { last_updated: DateTime<Utc> },
  Fresh { last_updated: DateTime<Utc> },
  /// The store could not be read.
  Unknown { reason: String },
}

impl Freshness {
  pub fn needs_refresh(&self) -> bool { !matches!(self, Self::Fresh { .. }) }
}

/// Assess `dataset` against `requested` entities at time `now`.
///
/// Cold start takes precedence: a requested entity with zero facts forces a
/// refresh regardless of the stamp.
pub async fn assess_at<S, L>(
  store: &S,
  ledger: &L,
  requested: &[String],
  dataset: &str,
  max_staleness_days: i64,
  now: DateTime<Utc>,
) -> Freshness
where
  S: FactStore,
  L: FreshnessLedger,
{
  let mut missing = Vec::new();
  for ticker in requested {
    match store.fact_count(ticker).await {
      Ok(0) => missing.push(ticker.clone()),
      Ok(_) => {}
      Err(e) => {
        warn!(%ticker, error = %e, "fact count failed, treating as stale");
        return Freshness::Unknown { reason: e.to_string() };
      }
    }
  }
  if !missing.is_empty() {
    return Freshness::ColdStart { tickers: missing };
  }

  let record = match ledger.freshness(dataset).await {
    Ok(Some(record)) => record,
    Ok(None) => return Freshness::NeverRefreshed,
    Err(e) => {
      warn!(%dataset, error = %e, "freshness lookup failed, treating as stale");
      return Freshness::Unknown { reason: e.to_string() };
    }
  };

  let Some(last_updated) = record.last_updated_utc() else {
    return Freshness::UnreadableStamp { raw: record.last_updated };
  };

  // A window too large for `TimeDelta` never expires.
  match TimeDelta::try_days(max_staleness_days) {
    Some(window) if now - last_updated > window => Freshness::Stale { last_updated },
    _ => Freshness::Fresh { last_updated },
  }
}

/// [`assess_at`] against the current time.
pub async fn assess<S, L>(
  store: &S,
  ledger: &L,
  requested: &[String],
  dataset: &str,
  max_staleness_days: i64,
) -> Freshness
where
  S: FactStore,
  L: FreshnessLedger,
{
  assess_at(store, ledger, requested, dataset, max_staleness_days, Utc::now()).await
}

/// Whether the fact store must be refreshed before valuing `requested`.
pub async fn needs_refresh<S, L>(
  store: &S,
  ledger: &L,
  requested: &[String],
  dataset: &str,
  max_staleness_days: i64,
) -> bool
where
  S: FactStore,
  L: FreshnessLedger,
{
  let verdict = assess(store, ledger, requested, dataset, max_staleness_days).await;
  debug!(%dataset, ?verdict, "freshness assessed");
  verdict.needs_refresh()
}

/// Stamp `dataset` as refreshed now. Call only after the refreshed facts are
/// persisted.
pub async fn mark_refreshed<L: FreshnessLedger>(
  ledger: &L,
  dataset: &str,
) -> std::result::Result<FreshnessRecord, L::Error> {
  let record = FreshnessRecord::stamped(dataset, Utc::now());
  ledger.put_freshness(record.clone()).await?;
  info!(%dataset, "marked refreshed");
  Ok(record)
}
