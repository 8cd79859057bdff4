//! Row-level plumbing shared by every store backend.
//!
//! Each persisted type converts to and from a flat [`Row`] of named
//! [`Value`]s. Backends only ever see rows, so a single upsert routine keyed
//! by column names serves all four tables.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr};

use crate::{Error, Result};

// ─── Tables ──────────────────────────────────────────────────────────────────

/// The four logical tables of the persistent store.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
  Display,
  EnumIter,
  EnumString,
  IntoStaticStr,
  Serialize,
  Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Table {
  FinancialData,
  DcfTable,
  ResultsTable,
  DataStatus,
}

impl Table {
  pub fn name(self) -> &'static str { self.into() }
}

// ─── Values ──────────────────────────────────────────────────────────────────

/// A single cell. Mirrors the SQLite storage classes we actually use.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
  Null,
  Integer(i64),
  Real(f64),
  Text(String),
}

impl Value {
  pub fn is_null(&self) -> bool { matches!(self, Self::Null) }

  pub fn kind(&self) -> &'static str {
    match self {
      Self::Null => "null",
      Self::Integer(_) => "integer",
      Self::Real(_) => "real",
      Self::Text(_) => "text",
    }
  }

  /// Integers widen to `f64`; SQLite may hand back whole-number reals as
  /// integers.
  pub fn as_f64(&self) -> Option<f64> {
    match self {
      Self::Real(v) => Some(*v),
      Self::Integer(v) => Some(*v as f64),
      _ => None,
    }
  }

  pub fn as_i64(&self) -> Option<i64> {
    match self {
      Self::Integer(v) => Some(*v),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    match self {
      Self::Text(v) => Some(v),
      _ => None,
    }
  }

  /// Stable textual form used to compare key cells.
  pub fn key_repr(&self) -> String {
    match self {
      Self::Null => "n:".to_owned(),
      Self::Integer(v) => format!("i:{v}"),
      Self::Real(v) => format!("r:{v}"),
      Self::Text(v) => format!("t:{v}"),
    }
  }
}

impl From<f64> for Value {
  fn from(v: f64) -> Self { Self::Real(v) }
}

impl From<i64> for Value {
  fn from(v: i64) -> Self { Self::Integer(v) }
}

impl From<i32> for Value {
  fn from(v: i32) -> Self { Self::Integer(i64::from(v)) }
}

impl From<String> for Value {
  fn from(v: String) -> Self { Self::Text(v) }
}

impl From<&str> for Value {
  fn from(v: &str) -> Self { Self::Text(v.to_owned()) }
}

impl From<DateTime<Utc>> for Value {
  fn from(v: DateTime<Utc>) -> Self { Self::Text(encode_dt(v)) }
}

impl<T: Into<Value>> From<Option<T>> for Value {
  fn from(v: Option<T>) -> Self { v.map_or(Self::Null, Into::into) }
}

/// All timestamps are written as RFC 3339 UTC with microsecond precision so
/// that lexical order matches chronological order.
pub fn encode_dt(dt: DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|_| Error::Timestamp(s.to_owned()))
}

// ─── Rows ────────────────────────────────────────────────────────────────────

/// An ordered list of `(column, value)` pairs for one table row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
  cells: Vec<(&'static str, Value)>,
}

impl Row {
  pub fn new() -> Self { Self::default() }

  pub fn with(mut self, column: &'static str, value: impl Into<Value>) -> Self {
    self.push(column, value);
    self
  }

  /// Set `column`, replacing any previous value under the same name.
  pub fn push(&mut self, column: &'static str, value: impl Into<Value>) {
    let value = value.into();
    match self.cells.iter_mut().find(|(c, _)| *c == column) {
      Some(cell) => cell.1 = value,
      None => self.cells.push((column, value)),
    }
  }

  pub fn get(&self, column: &str) -> Option<&Value> {
    self
      .cells
      .iter()
      .find(|(c, _)| *c == column)
      .map(|(_, v)| v)
  }

  pub fn columns(&self) -> impl Iterator<Item = &'static str> + '_ {
    self.cells.iter().map(|(c, _)| *c)
  }

  pub fn values(&self) -> impl Iterator<Item = &Value> + '_ {
    self.cells.iter().map(|(_, v)| v)
  }

  pub fn len(&self) -> usize { self.cells.len() }

  pub fn is_empty(&self) -> bool { self.cells.is_empty() }

  /// The values of `key_columns`, in key order.
  pub fn key(&self, table: Table, key_columns: &[&str]) -> Result<Vec<Value>> {
    key_columns
      .iter()
      .map(|column| self.required(table, column).cloned())
      .collect()
  }

  fn required(&self, table: Table, column: &str) -> Result<&Value> {
    self.get(column).ok_or_else(|| Error::MissingColumn {
      table,
      column: column.to_owned(),
    })
  }

  fn mismatch(
    table: Table,
    column: &str,
    expected: &'static str,
    found: &Value,
  ) -> Error {
    Error::ColumnType {
      table,
      column: column.to_owned(),
      expected,
      found: found.kind(),
    }
  }

  // ── Typed accessors used by `Record::from_row` ────────────────────────────

  pub fn real(&self, table: Table, column: &str) -> Result<f64> {
    let value = self.required(table, column)?;
    value
      .as_f64()
      .ok_or_else(|| Self::mismatch(table, column, "real", value))
  }

  pub fn opt_real(&self, table: Table, column: &str) -> Result<Option<f64>> {
    match self.get(column) {
      None | Some(Value::Null) => Ok(None),
      Some(value) => value
        .as_f64()
        .map(Some)
        .ok_or_else(|| Self::mismatch(table, column, "real", value)),
    }
  }

  pub fn integer(&self, table: Table, column: &str) -> Result<i64> {
    let value = self.required(table, column)?;
    value
      .as_i64()
      .ok_or_else(|| Self::mismatch(table, column, "integer", value))
  }

  pub fn text(&self, table: Table, column: &str) -> Result<String> {
    let value = self.required(table, column)?;
    value
      .as_str()
      .map(str::to_owned)
      .ok_or_else(|| Self::mismatch(table, column, "text", value))
  }

  pub fn opt_text(&self, table: Table, column: &str) -> Result<Option<String>> {
    match self.get(column) {
      None | Some(Value::Null) => Ok(None),
      Some(Value::Text(s)) => Ok(Some(s.clone())),
      Some(value) => Err(Self::mismatch(table, column, "text", value)),
    }
  }
}

// ─── Record ──────────────────────────────────────────────────────────────────

/// A type persisted as one row of a [`Table`].
pub trait Record: Sized {
  const TABLE: Table;
  /// Columns whose values identify a row; upserts replace on these.
  const KEY_COLUMNS: &'static [&'static str];
  /// Every column, in the order `to_row` emits them.
  const COLUMNS: &'static [&'static str];

  fn to_row(&self) -> Row;

  fn from_row(row: &Row) -> Result<Self>;
}
