//! Error type for `dcf-yahoo`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("http error: {0}")]
  Http(#[from] reqwest::Error),

  #[error("{endpoint} returned {status}")]
  Status {
    endpoint: &'static str,
    status:   reqwest::StatusCode,
  },

  #[error("yahoo error: {0}")]
  Yahoo(#[from] yahoo_finance_api::YahooError),

  #[error("date out of range: {0}")]
  Timestamp(#[from] time::error::ComponentRange),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  /// The endpoint answered with an error object or an unexpected shape.
  #[error("{endpoint}: {message}")]
  Api {
    endpoint: &'static str,
    message:  String,
  },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
