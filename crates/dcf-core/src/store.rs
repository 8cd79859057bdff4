//! The `FactStore` and `FreshnessLedger` traits.
//!
//! Implemented by storage backends (`dcf-store-sqlite`, and [`MemoryStore`]
//! for tests). The pipeline depends on these abstractions, not on any
//! concrete backend.
//!
//! [`MemoryStore`]: crate::memory::MemoryStore

use std::future::Future;

use crate::{
  fact::FinancialFact,
  freshness::FreshnessRecord,
  record::{Record, Row, Table},
  result::ValuationResult,
  valuation::ProjectedCashFlow,
};

// ─── Fact store ──────────────────────────────────────────────────────────────

/// Persistent tables of facts, projections and results.
///
/// All methods return `Send` futures so the trait can be used in
/// multi-threaded async runtimes.
pub trait FactStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  // ── Writes ────────────────────────────────────────────────────────────

  /// Replace every existing row of `table` that shares its `key_columns`
  /// values with one of `rows`, and insert the rest. Rows with keys outside
  /// `rows` are untouched. Runs in a single transaction; returns the number
  /// of rows written.
  fn upsert_rows(
    &self,
    table: Table,
    key_columns: &'static [&'static str],
    rows: Vec<Row>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + '_;

  /// Delete every row of `table` whose `scope_column` holds one of `scope`,
  /// then insert `rows`, in a single transaction. Returns the number of rows
  /// inserted.
  fn replace_rows<'a>(
    &'a self,
    table: Table,
    key_columns: &'static [&'static str],
    scope_column: &'static str,
    scope: &'a [String],
    rows: Vec<Row>,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + 'a;

  // ── Reads ─────────────────────────────────────────────────────────────

  /// Number of `financial_data` rows stored for `ticker`.
  fn fact_count<'a>(
    &'a self,
    ticker: &'a str,
  ) -> impl Future<Output = Result<usize, Self::Error>> + Send + 'a;

  /// Facts for `tickers`, ticker ascending then year descending.
  fn facts_for<'a>(
    &'a self,
    tickers: &'a [String],
  ) -> impl Future<Output = Result<Vec<FinancialFact>, Self::Error>> + Send + 'a;

  /// Stored projection rows for `ticker`, year ascending.
  fn projections_for<'a>(
    &'a self,
    ticker: &'a str,
  ) -> impl Future<Output = Result<Vec<ProjectedCashFlow>, Self::Error>> + Send + 'a;

  /// Stored valuation results for `ticker`, newest first.
  fn results_for<'a>(
    &'a self,
    ticker: &'a str,
  ) -> impl Future<Output = Result<Vec<ValuationResult>, Self::Error>> + Send + 'a;
}

/// Upsert typed records into their table, keyed on [`Record::KEY_COLUMNS`].
pub async fn upsert<S, R>(store: &S, rows: &[R]) -> Result<usize, S::Error>
where
  S: FactStore,
  R: Record,
{
  let encoded: Vec<Row> = rows.iter().map(Record::to_row).collect();
  store.upsert_rows(R::TABLE, R::KEY_COLUMNS, encoded).await
}

/// Replace every stored `R` whose `scope_column` is in `scope` with `rows`.
pub async fn replace<S, R>(
  store: &S,
  scope_column: &'static str,
  scope: &[String],
  rows: &[R],
) -> Result<usize, S::Error>
where
  S: FactStore,
  R: Record,
{
  let encoded: Vec<Row> = rows.iter().map(Record::to_row).collect();
  store
    .replace_rows(R::TABLE, R::KEY_COLUMNS, scope_column, scope, encoded)
    .await
}

// ─── Freshness ledger ────────────────────────────────────────────────────────

/// A small key-value store of "last refreshed" stamps, keyed by dataset name.
pub trait FreshnessLedger: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// The record for `dataset`, or `None` if it was never refreshed.
  fn freshness<'a>(
    &'a self,
    dataset: &'a str,
  ) -> impl Future<Output = Result<Option<FreshnessRecord>, Self::Error>> + Send + 'a;

  /// Write `record`, overwriting any previous record for the same dataset.
  fn put_freshness(
    &self,
    record: FreshnessRecord,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}
