//! [`MemoryStore`], an in-process implementation of both store traits.
//!
//! Rows are kept exactly as backends see them, keyed by their key-column
//! values, so upsert semantics match the SQLite backend.

use std::{
  collections::BTreeMap,
  sync::{Arc, Mutex, MutexGuard},
};

use crate::{
  Error, Result,
  fact::{FinancialFact, sort_facts},
  freshness::FreshnessRecord,
  record::{Record, Row, Table},
  result::ValuationResult,
  store::{FactStore, FreshnessLedger},
  valuation::ProjectedCashFlow,
};

type TableRows = BTreeMap<Vec<String>, Row>;

/// Cloning is cheap; clones share the same tables.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
  tables: Arc<Mutex<BTreeMap<Table, TableRows>>>,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }

  fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<Table, TableRows>>> {
    self.tables.lock().map_err(|_| Error::Poisoned)
  }

  /// Total rows currently held in `table`.
  pub fn row_count(&self, table: Table) -> Result<usize> {
    Ok(self.lock()?.get(&table).map_or(0, BTreeMap::len))
  }

  fn decode_where<R: Record>(&self, keep: impl Fn(&Row) -> bool) -> Result<Vec<R>> {
    let tables = self.lock()?;
    tables
      .get(&R::TABLE)
      .into_iter()
      .flat_map(BTreeMap::values)
      .filter(|row| keep(row))
      .map(R::from_row)
      .collect()
  }
}

/// Pair each row with its key. Every key is checked before any write so a
/// bad row cannot leave a partial write behind.
fn keyed_rows(
  table: Table,
  key_columns: &[&str],
  rows: Vec<Row>,
) -> Result<Vec<(Vec<String>, Row)>> {
  rows
    .into_iter()
    .map(|row| {
      let key = row
        .key(table, key_columns)?
        .iter()
        .map(|v| v.key_repr())
        .collect();
      Ok((key, row))
    })
    .collect()
}

fn ticker_is(row: &Row, ticker: &str) -> bool {
  row.get("ticker").and_then(|v| v.as_str()) == Some(ticker)
}

impl FactStore for MemoryStore {
  type Error = Error;

  async fn upsert_rows(
    &self,
    table: Table,
    key_columns: &'static [&'static str],
    rows: Vec<Row>,
  ) -> Result<usize> {
    let keyed = keyed_rows(table, key_columns, rows)?;
    let written = keyed.len();
    let mut tables = self.lock()?;
    let target = tables.entry(table).or_default();
    for (key, row) in keyed {
      target.insert(key, row);
    }
    Ok(written)
  }

  async fn replace_rows(
    &self,
    table: Table,
    key_columns: &'static [&'static str],
    scope_column: &'static str,
    scope: &[String],
    rows: Vec<Row>,
  ) -> Result<usize> {
    let keyed = keyed_rows(table, key_columns, rows)?;
    let written = keyed.len();
    let mut tables = self.lock()?;
    let target = tables.entry(table).or_default();
    target.retain(|_, row| {
      let in_scope = row
        .get(scope_column)
        .and_then(|v| v.as_str())
        .is_some_and(|v| scope.iter().any(|s| s == v));
      !in_scope
    });
    target.extend(keyed);
    Ok(written)
  }

  async fn fact_count(&self, ticker: &str) -> Result<usize> {
    let tables = self.lock()?;
    Ok(
      tables
        .get(&Table::FinancialData)
        .map_or(0, |rows| rows.values().filter(|r| ticker_is(r, ticker)).count()),
    )
  }

  async fn facts_for(&self, tickers: &[String]) -> Result<Vec<FinancialFact>> {
    let mut facts: Vec<FinancialFact> =
      self.decode_where(|row| tickers.iter().any(|t| ticker_is(row, t)))?;
    sort_facts(&mut facts);
    Ok(facts)
  }

  async fn projections_for(&self, ticker: &str) -> Result<Vec<ProjectedCashFlow>> {
    let mut rows: Vec<ProjectedCashFlow> = self.decode_where(|row| ticker_is(row, ticker))?;
    rows.sort_by_key(|p| p.year);
    Ok(rows)
  }

  async fn results_for(&self, ticker: &str) -> Result<Vec<ValuationResult>> {
    let mut rows: Vec<ValuationResult> = self.decode_where(|row| ticker_is(row, ticker))?;
    rows.sort_by(|a, b| b.date.cmp(&a.date));
    Ok(rows)
  }
}

impl FreshnessLedger for MemoryStore {
  type Error = Error;

  async fn freshness(&self, dataset: &str) -> Result<Option<FreshnessRecord>> {
    let records: Vec<FreshnessRecord> = self.decode_where(|row| {
      row.get("table_name").and_then(|v| v.as_str()) == Some(dataset)
    })?;
    Ok(records.into_iter().next())
  }

  async fn put_freshness(&self, record: FreshnessRecord) -> Result<()> {
    self
      .upsert_rows(
        FreshnessRecord::TABLE,
        FreshnessRecord::KEY_COLUMNS,
        vec![record.to_row()],
      )
      .await?;
    Ok(())
  }
}
