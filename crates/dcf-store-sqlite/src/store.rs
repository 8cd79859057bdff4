//! [`SqliteStore`], the SQLite implementation of the store traits.

use std::path::Path;

use rusqlite::{params_from_iter, types::Value as SqlValue};
use tracing::debug;

use dcf_core::{
  fact::FinancialFact,
  freshness::FreshnessRecord,
  record::{Record, Row, Table},
  result::ValuationResult,
  store::{FactStore, FreshnessLedger},
  valuation::ProjectedCashFlow,
};

use crate::{
  Error, Result,
  encode::{placeholders, read_row, to_sql},
  schema::{SCHEMA, SCHEMA_VERSION},
};

// ─── Store ───────────────────────────────────────────────────────────────────

/// A DCF store backed by a single SQLite file.
///
/// Cloning is cheap; the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  /// Missing parent directories are created.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
      std::fs::create_dir_all(parent)?;
    }
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
    let found = self
      .conn
      .call(|conn| {
        let found: i64 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
        if found <= SCHEMA_VERSION {
          conn.execute_batch(SCHEMA)?;
        }
        Ok(found)
      })
      .await?;

    if found > SCHEMA_VERSION {
      return Err(Error::SchemaVersion {
        found,
        supported: SCHEMA_VERSION,
      });
    }
    Ok(())
  }

  /// Total rows in `table`.
  pub async fn row_count(&self, table: Table) -> Result<usize> {
    let sql = format!("SELECT COUNT(*) FROM {}", table.name());
    let n: i64 = self
      .conn
      .call(move |conn| Ok(conn.query_row(&sql, [], |r| r.get(0))?))
      .await?;
    Ok(usize::try_from(n).unwrap_or_default())
  }

  /// Select `R::COLUMNS` from `R::TABLE`, decoding each row.
  async fn select<R>(
    &self,
    filter: String,
    params: Vec<SqlValue>,
    order: &'static str,
  ) -> Result<Vec<R>>
  where
    R: Record + 'static,
  {
    let sql = format!(
      "SELECT {} FROM {} {filter} ORDER BY {order}",
      R::COLUMNS.join(", "),
      R::TABLE.name(),
    );

    let rows: Vec<Row> = self
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
          .query_map(params_from_iter(params.iter()), |row| {
            read_row(row, R::COLUMNS)
          })?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    rows
      .iter()
      .map(|row| R::from_row(row).map_err(Error::from))
      .collect()
  }
}

fn key_predicate(key_columns: &[&str]) -> String {
  key_columns
    .iter()
    .enumerate()
    .map(|(i, column)| format!("{column} = ?{}", i + 1))
    .collect::<Vec<_>>()
    .join(" AND ")
}

fn insert_row(tx: &rusqlite::Transaction<'_>, table: &str, row: &Row) -> rusqlite::Result<usize> {
  let columns: Vec<&str> = row.columns().collect();
  let insert = format!(
    "INSERT INTO {table} ({}) VALUES ({})",
    columns.join(", "),
    placeholders(columns.len()),
  );
  tx.prepare_cached(&insert)?
    .execute(params_from_iter(row.values().map(to_sql)))
}

// ─── FactStore impl ──────────────────────────────────────────────────────────

impl FactStore for SqliteStore {
  type Error = Error;

  async fn upsert_rows(
    &self,
    table: Table,
    key_columns: &'static [&'static str],
    rows: Vec<Row>,
  ) -> Result<usize> {
    if rows.is_empty() {
      return Ok(0);
    }

    // Every key is checked before the transaction opens.
    let keyed = rows
      .into_iter()
      .map(|row| -> Result<_> {
        let key = row.key(table, key_columns)?;
        Ok((key, row))
      })
      .collect::<Result<Vec<_>>>()?;

    let name = table.name();
    let delete = format!("DELETE FROM {name} WHERE {}", key_predicate(key_columns));

    let written = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        {
          let mut delete = tx.prepare(&delete)?;
          for (key, row) in &keyed {
            delete.execute(params_from_iter(key.iter().map(to_sql)))?;
            insert_row(&tx, name, row)?;
          }
        }
        tx.commit()?;
        Ok(keyed.len())
      })
      .await?;

    debug!(table = %table, rows = written, "upserted");
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
    if scope.is_empty() && rows.is_empty() {
      return Ok(0);
    }
    for row in &rows {
      row.key(table, key_columns)?;
    }

    let name = table.name();
    let clear = format!(
      "DELETE FROM {name} WHERE {scope_column} IN ({})",
      placeholders(scope.len()),
    );
    let scope: Vec<SqlValue> = scope.iter().cloned().map(SqlValue::Text).collect();

    let (cleared, written) = self
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let cleared = if scope.is_empty() {
          0
        } else {
          tx.execute(&clear, params_from_iter(scope.iter()))?
        };
        for row in &rows {
          insert_row(&tx, name, row)?;
        }
        tx.commit()?;
        Ok((cleared, rows.len()))
      })
      .await?;

    debug!(table = %table, cleared, rows = written, "replaced");
    Ok(written)
  }

  async fn fact_count(&self, ticker: &str) -> Result<usize> {
    let ticker = ticker.to_owned();
    let n: i64 = self
      .conn
      .call(move |conn| {
        Ok(conn.query_row(
          "SELECT COUNT(*) FROM financial_data WHERE ticker = ?1",
          rusqlite::params![ticker],
          |r| r.get(0),
        )?)
      })
      .await?;
    Ok(usize::try_from(n).unwrap_or_default())
  }

  async fn facts_for(&self, tickers: &[String]) -> Result<Vec<FinancialFact>> {
    if tickers.is_empty() {
      return Ok(Vec::new());
    }
    let filter = format!("WHERE ticker IN ({})", placeholders(tickers.len()));
    let params = tickers.iter().cloned().map(SqlValue::Text).collect();
    self.select(filter, params, "ticker ASC, year DESC").await
  }

  async fn projections_for(&self, ticker: &str) -> Result<Vec<ProjectedCashFlow>> {
    let params = vec![SqlValue::Text(ticker.to_owned())];
    self.select("WHERE ticker = ?1".into(), params, "year ASC").await
  }

  async fn results_for(&self, ticker: &str) -> Result<Vec<ValuationResult>> {
    let params = vec![SqlValue::Text(ticker.to_owned())];
    self.select("WHERE ticker = ?1".into(), params, "date DESC").await
  }
}

// ─── FreshnessLedger impl ────────────────────────────────────────────────────

impl FreshnessLedger for SqliteStore {
  type Error = Error;

  async fn freshness(&self, dataset: &str) -> Result<Option<FreshnessRecord>> {
    let params = vec![SqlValue::Text(dataset.to_owned())];
    let records: Vec<FreshnessRecord> = self
      .select("WHERE table_name = ?1".into(), params, "table_name")
      .await?;
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

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn key_predicate_binds_in_key_order() {
    assert_eq!(key_predicate(&["ticker", "year"]), "ticker = ?1 AND year = ?2");
  }
}
