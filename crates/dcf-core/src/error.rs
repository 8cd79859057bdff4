//! Error types for `dcf-core`.

use thiserror::Error;

use crate::record::Table;

#[derive(Debug, Error)]
pub enum Error {
  #[error("invalid configuration: {0}")]
  InvalidConfig(String),

  #[error("row for {table} is missing column {column:?}")]
  MissingColumn { table: Table, column: String },

  #[error("column {column:?} in {table} holds {found}, expected {expected}")]
  ColumnType {
    table:    Table,
    column:   String,
    expected: &'static str,
    found:    &'static str,
  },

  #[error("unparseable timestamp: {0:?}")]
  Timestamp(String),

  #[error("uuid parse error: {0}")]
  Uuid(#[from] uuid::Error),

  #[error("in-memory store lock poisoned")]
  Poisoned,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
