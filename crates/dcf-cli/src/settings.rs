//! Layered configuration: built-in defaults, then `dcf.toml`, then `DCF_*`
//! environment variables.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use dcf_core::config::PipelineConfig;
use dcf_yahoo::YahooConfig;
use serde::Deserialize;

/// Everything the binary reads from configuration.
///
/// ```toml
/// store_path = "db/dcf.db"
///
/// [pipeline]
/// tickers      = ["CAST.ST", "SAGA-B.ST"]
/// refresh_days = 7
///
/// [pipeline.valuation]
/// growth_rate = 0.05
///
/// [pipeline.fields.cashflow]
/// FreeCashFlow = "fcf"
///
/// [yahoo]
/// timeout_secs = 30
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub store_path: PathBuf,
  pub pipeline:   PipelineConfig,
  pub yahoo:      YahooConfig,
}

impl Default for Settings {
  fn default() -> Self {
    Self {
      store_path: PathBuf::from("db/dcf.db"),
      pipeline:   PipelineConfig::default(),
      yahoo:      YahooConfig::default(),
    }
  }
}

impl Settings {
  /// Load from `path` (optional) and the environment.
  ///
  /// Environment keys use `__` between nesting levels, for example
  /// `DCF_PIPELINE__VALUATION__GROWTH_RATE=0.04` or
  /// `DCF_PIPELINE__TICKERS=CAST.ST,SAGA-B.ST`.
  pub fn load(path: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(path).required(false))
      .add_source(
        config::Environment::with_prefix("DCF")
          .prefix_separator("_")
          .separator("__")
          .list_separator(",")
          .with_list_parse_key("pipeline.tickers")
          .try_parsing(true),
      )
      .build()
      .with_context(|| format!("failed to read config file {}", path.display()))?;

    let mut loaded: Settings = settings
      .try_deserialize()
      .context("failed to deserialise settings")?;
    loaded.store_path = expand_tilde(&loaded.store_path);
    Ok(loaded)
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
