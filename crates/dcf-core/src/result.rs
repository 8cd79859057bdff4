//! Valuation results and the aggregator that produces them.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::{
  Result,
  record::{Record, Row, Table, decode_dt},
  valuation::{MissingInput, Valuation, ValuationError},
};

// ─── Run identity ────────────────────────────────────────────────────────────

/// One execution of the pipeline. Every result row it writes carries the same
/// `started_at` timestamp and `run_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValuationRun {
  pub run_id:     Uuid,
  pub started_at: DateTime<Utc>,
}

impl ValuationRun {
  /// Timestamps are truncated to the microsecond precision they are
  /// stored at.
  pub fn start() -> Self {
    Self {
      run_id:     Uuid::new_v4(),
      started_at: Utc::now().trunc_subsecs(6),
    }
  }
}

// ─── ValuationResult ─────────────────────────────────────────────────────────

/// One row of `results_table`.
///
/// `margin_of_safety` is derived, never independently set: it always equals
/// `(estimated_price - share_price) / estimated_price * 100`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationResult {
  pub ticker:           String,
  /// Run timestamp.
  pub date:             DateTime<Utc>,
  /// Observed market share price.
  pub share_price:      f64,
  pub estimated_price:  f64,
  /// Percent.
  pub margin_of_safety: f64,
  pub run_id:           Uuid,
}

impl ValuationResult {
  pub fn new(
    ticker: impl Into<String>,
    run: &ValuationRun,
    share_price: f64,
    estimated_price: f64,
  ) -> Self {
    Self {
      ticker: ticker.into(),
      date: run.started_at,
      share_price,
      estimated_price,
      margin_of_safety: margin_of_safety(estimated_price, share_price),
      run_id: run.run_id,
    }
  }

  /// Positive when the market price sits below the estimate.
  pub fn is_undervalued(&self) -> bool { self.margin_of_safety > 0.0 }
}

pub fn margin_of_safety(estimated: f64, market: f64) -> f64 {
  (estimated - market) / estimated * 100.0
}

impl Record for ValuationResult {
  const TABLE: Table = Table::ResultsTable;
  const KEY_COLUMNS: &'static [&'static str] = &["ticker", "date"];
  const COLUMNS: &'static [&'static str] = &[
    "ticker",
    "date",
    "share_price",
    "estimated_price",
    "margin_of_safety",
    "run_id",
  ];

  fn to_row(&self) -> Row {
    Row::new()
      .with("ticker", self.ticker.as_str())
      .with("date", self.date)
      .with("share_price", self.share_price)
      .with("estimated_price", self.estimated_price)
      .with("margin_of_safety", self.margin_of_safety)
      .with("run_id", self.run_id.hyphenated().to_string())
  }

  fn from_row(row: &Row) -> Result<Self> {
    Ok(Self {
      ticker:           row.text(Self::TABLE, "ticker")?,
      date:             decode_dt(&row.text(Self::TABLE, "date")?)?,
      share_price:      row.real(Self::TABLE, "share_price")?,
      estimated_price:  row.real(Self::TABLE, "estimated_price")?,
      margin_of_safety: row.real(Self::TABLE, "margin_of_safety")?,
      run_id:           Uuid::parse_str(&row.text(Self::TABLE, "run_id")?)?,
    })
  }
}

// ─── Aggregation ─────────────────────────────────────────────────────────────

/// An entity that produced no result, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityFailure {
  pub ticker: String,
  pub error:  ValuationError,
}

/// The comparative result set for one run. Every input entity lands in
/// exactly one of `results` or `failures`.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet {
  pub run:      ValuationRun,
  pub results:  Vec<ValuationResult>,
  pub failures: Vec<EntityFailure>,
}

impl ResultSet {
  pub fn result_for(&self, ticker: &str) -> Option<&ValuationResult> {
    self.results.iter().find(|r| r.ticker == ticker)
  }

  pub fn failure_for(&self, ticker: &str) -> Option<&EntityFailure> {
    self.failures.iter().find(|f| f.ticker == ticker)
  }
}

/// Pair each successful valuation with its observed market price.
///
/// An entity is moved to `failures` when its valuation failed, when the base
/// fact row has no market price, or when the estimate is zero (the margin of
/// safety would be undefined).
pub fn aggregate<I>(outcomes: I, run: &ValuationRun) -> ResultSet
where
  I: IntoIterator<Item = (String, std::result::Result<Valuation, ValuationError>)>,
{
  let mut results = Vec::new();
  let mut failures = Vec::new();

  for (ticker, outcome) in outcomes {
    let priced = outcome.and_then(|valuation| {
      let market = valuation
        .market_share_price
        .ok_or(MissingInput::SharePrice)?;
      if valuation.estimated_share_price == 0.0 {
        return Err(MissingInput::ZeroEstimate.into());
      }
      Ok(ValuationResult::new(
        ticker.as_str(),
        run,
        market,
        valuation.estimated_share_price,
      ))
    });

    match priced {
      Ok(result) => results.push(result),
      Err(error) => {
        warn!(%ticker, %error, "entity excluded from results");
        failures.push(EntityFailure { ticker, error });
      }
    }
  }

  ResultSet { run: *run, results, failures }
}
