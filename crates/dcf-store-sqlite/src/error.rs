//! Error type for `dcf-store-sqlite`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] dcf_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("cannot create store directory: {0}")]
  Io(#[from] std::io::Error),

  /// The file was written by a newer schema than this build understands.
  #[error("unsupported schema version {found}, expected at most {supported}")]
  SchemaVersion { found: i64, supported: i64 },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
