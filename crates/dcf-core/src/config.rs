//! Run configuration passed explicitly into the pipeline.

use serde::{Deserialize, Serialize};

use crate::{Error, Result, fetch::FieldMap};

/// Dataset name recorded in the freshness ledger for `financial_data`.
pub const DEFAULT_DATASET: &str = "financial_data";

// ─── ValuationConfig ─────────────────────────────────────────────────────────

/// Externally supplied model constants. Defaults match the assumptions the
/// tool has always shipped with.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValuationConfig {
  /// Annual growth applied to the latest free cash flow.
  pub growth_rate:          f64,
  /// Discount rate used when WACC cannot be computed.
  pub discount_rate:        f64,
  pub terminal_growth_rate: f64,
  /// Projection horizon in years.
  pub years:                u32,
  pub risk_free_rate:       f64,
  pub market_return:        f64,
}

impl Default for ValuationConfig {
  fn default() -> Self {
    Self {
      growth_rate:          0.05,
      discount_rate:        0.10,
      terminal_growth_rate: 0.02,
      years:                5,
      risk_free_rate:       0.025,
      market_return:        0.08,
    }
  }
}

impl ValuationConfig {
  /// Reject parameter sets that would make every valuation meaningless.
  ///
  /// Terminal growth must sit below the base `discount_rate`. An entity whose
  /// computed WACC is still at or below terminal growth is rejected by the
  /// engine when it is valued.
  pub fn validate(&self) -> Result<()> {
    let rates = [
      ("growth_rate", self.growth_rate),
      ("discount_rate", self.discount_rate),
      ("terminal_growth_rate", self.terminal_growth_rate),
      ("risk_free_rate", self.risk_free_rate),
      ("market_return", self.market_return),
    ];
    if let Some((name, value)) = rates.iter().find(|(_, v)| !v.is_finite()) {
      return Err(Error::InvalidConfig(format!("{name} must be finite, got {value}")));
    }
    if self.years == 0 {
      return Err(Error::InvalidConfig("years must be at least 1".into()));
    }
    if self.terminal_growth_rate >= self.discount_rate {
      return Err(Error::InvalidConfig(format!(
        "terminal_growth_rate ({}) must be below discount_rate ({})",
        self.terminal_growth_rate, self.discount_rate
      )));
    }
    Ok(())
  }
}

// ─── PipelineConfig ──────────────────────────────────────────────────────────

/// Everything one pipeline run needs besides its collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  pub tickers:       Vec<String>,
  /// Freshness-ledger key guarding the fact table.
  pub dataset:       String,
  /// Maximum age of cached facts, in days.
  pub refresh_days:  i64,
  /// Skip the freshness gate and always refetch.
  pub force_refresh: bool,
  pub valuation:     ValuationConfig,
  pub fields:        FieldMap,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      tickers:       ["BALD-B.ST", "CORE-B.ST", "SAGA-B.ST", "CAST.ST"]
        .into_iter()
        .map(str::to_owned)
        .collect(),
      dataset:       DEFAULT_DATASET.to_owned(),
      refresh_days:  7,
      force_refresh: false,
      valuation:     ValuationConfig::default(),
      fields:        FieldMap::default(),
    }
  }
}

impl PipelineConfig {
  pub fn validate(&self) -> Result<()> {
    if self.refresh_days < 0 {
      return Err(Error::InvalidConfig(format!(
        "refresh_days must not be negative, got {}",
        self.refresh_days
      )));
    }
    if self.dataset.trim().is_empty() {
      return Err(Error::InvalidConfig("dataset must not be empty".into()));
    }
    if self.tickers.iter().any(|t| t.trim().is_empty()) {
      return Err(Error::InvalidConfig("tickers must not be blank".into()));
    }
    self.valuation.validate()
  }

  /// Requested tickers, sorted ascending and de-duplicated.
  pub fn entities(&self) -> Vec<String> {
    let mut tickers = self.tickers.clone();
    tickers.sort();
    tickers.dedup();
    tickers
  }
}
