//! Conversions between core [`Value`]s and SQLite values.

use rusqlite::types::Value as SqlValue;

use dcf_core::record::{Row, Value};

pub fn to_sql(value: &Value) -> SqlValue {
  match value {
    Value::Null => SqlValue::Null,
    Value::Integer(v) => SqlValue::Integer(*v),
    Value::Real(v) => SqlValue::Real(*v),
    Value::Text(v) => SqlValue::Text(v.clone()),
  }
}

pub fn from_sql(value: SqlValue) -> Value {
  match value {
    SqlValue::Null => Value::Null,
    SqlValue::Integer(v) => Value::Integer(v),
    SqlValue::Real(v) => Value::Real(v),
    SqlValue::Text(v) => Value::Text(v),
    // Nothing we write is a blob; read one as text rather than fail.
    SqlValue::Blob(bytes) => Value::Text(String::from_utf8_lossy(&bytes).into_owned()),
  }
}

/// Read `columns` positionally out of a result row.
pub fn read_row(
  row: &rusqlite::Row<'_>,
  columns: &'static [&'static str],
) -> rusqlite::Result<Row> {
  let mut out = Row::new();
  for (i, column) in columns.iter().enumerate() {
    out.push(*column, from_sql(row.get::<_, SqlValue>(i)?));
  }
  Ok(out)
}

/// `?1, ?2, ... ?n`
pub fn placeholders(n: usize) -> String {
  (1..=n).map(|i| format!("?{i}")).collect::<Vec<_>>().join(", ")
}
