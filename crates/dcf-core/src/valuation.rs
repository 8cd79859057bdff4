//! The DCF valuation engine.
//!
//! Pure functions: given one entity's facts (most recent fiscal year first)
//! and a [`ValuationConfig`], derive a discount rate, project free cash
//! flows, add a Gordon-growth terminal value and divide the present value by
//! shares outstanding.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::{
  Result as CoreResult,
  config::ValuationConfig,
  fact::FinancialFact,
  record::{Record, Row, Table},
};

/// Discount rates computed from WACC are never allowed below this.
pub const WACC_FLOOR: f64 = 0.08;

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Inputs whose absence makes one entity impossible to value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingInput {
  #[error("no financial facts")]
  NoFacts,
  #[error("free cash flow is missing")]
  FreeCashFlow,
  #[error("shares outstanding is missing or zero")]
  SharesOutstanding,
  #[error("total debt is zero, cost of debt is undefined")]
  ZeroTotalDebt,
  #[error("market share price is missing")]
  SharePrice,
  #[error("estimated share price is zero")]
  ZeroEstimate,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValuationError {
  /// Scoped to one entity; the batch carries on.
  #[error("missing input: {0}")]
  MissingInput(#[from] MissingInput),

  /// A configuration problem; aborts the whole run.
  #[error("invalid parameter: {0}")]
  InvalidParameter(String),
}

impl ValuationError {
  pub fn is_run_fatal(&self) -> bool { matches!(self, Self::InvalidParameter(_)) }
}

pub type Result<T, E = ValuationError> = std::result::Result<T, E>;

// ─── Discount rate ───────────────────────────────────────────────────────────

/// The components of a computed WACC, before flooring.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WaccBreakdown {
  pub cost_of_debt:   f64,
  pub cost_of_equity: f64,
  pub weight_debt:    f64,
  pub weight_equity:  f64,
  pub wacc:           f64,
}

/// The rate a valuation was discounted at, and where it came from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum DiscountRate {
  /// WACC floored at [`WACC_FLOOR`].
  Wacc { rate: f64, breakdown: WaccBreakdown },
  /// WACC inputs were missing; the configured base rate is used verbatim.
  Fallback { rate: f64 },
}

impl DiscountRate {
  pub fn rate(&self) -> f64 {
    match self {
      Self::Wacc { rate, .. } | Self::Fallback { rate } => *rate,
    }
  }

  pub fn is_fallback(&self) -> bool { matches!(self, Self::Fallback { .. }) }
}

/// Select the discount rate from the latest fact row.
///
/// `total_debt == 0` is a missing-input error. Any other gap in the inputs
/// (a null field, zero total capital, a non-finite result) falls back to
/// `config.discount_rate`.
pub fn discount_rate(
  latest: &FinancialFact,
  config: &ValuationConfig,
) -> Result<DiscountRate> {
  let fallback = DiscountRate::Fallback { rate: config.discount_rate };

  if latest.total_debt == Some(0.0) {
    return Err(MissingInput::ZeroTotalDebt.into());
  }

  let (Some(debt), Some(interest), Some(tax), Some(market_cap), Some(beta)) = (
    latest.total_debt,
    latest.interest_expense,
    latest.tax_rate,
    latest.market_cap,
    latest.beta,
  ) else {
    debug!(ticker = %latest.ticker, "WACC inputs incomplete, using base rate");
    return Ok(fallback);
  };

  let capital = debt + market_cap;
  if capital == 0.0 {
    return Ok(fallback);
  }

  let cost_of_debt = interest / debt;
  let cost_of_equity = config.risk_free_rate
    + beta * (config.market_return - config.risk_free_rate);
  let weight_debt = debt / capital;
  let weight_equity = 1.0 - weight_debt;
  let wacc = cost_of_debt * (1.0 - tax) * weight_debt + cost_of_equity * weight_equity;

  if !wacc.is_finite() {
    return Ok(fallback);
  }

  Ok(DiscountRate::Wacc {
    rate:      wacc.max(WACC_FLOOR),
    breakdown: WaccBreakdown {
      cost_of_debt,
      cost_of_equity,
      weight_debt,
      weight_equity,
      wacc,
    },
  })
}

// ─── Projection ──────────────────────────────────────────────────────────────

/// One row of `dcf_table`. Terminal fields are set on the final year only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectedCashFlow {
  pub ticker:         String,
  /// Calendar year: latest fiscal year + projection offset.
  pub year:           i32,
  pub projected_fcf:  f64,
  pub discounted_fcf: f64,
  pub projected_tv:   Option<f64>,
  pub discounted_tv:  Option<f64>,
}

impl Record for ProjectedCashFlow {
  const TABLE: Table = Table::DcfTable;
  const KEY_COLUMNS: &'static [&'static str] = &["ticker", "year"];
  const COLUMNS: &'static [&'static str] = &[
    "ticker",
    "year",
    "projected_fcf",
    "discounted_fcf",
    "projected_tv",
    "discounted_tv",
  ];

  fn to_row(&self) -> Row {
    Row::new()
      .with("ticker", self.ticker.as_str())
      .with("year", self.year)
      .with("projected_fcf", self.projected_fcf)
      .with("discounted_fcf", self.discounted_fcf)
      .with("projected_tv", self.projected_tv)
      .with("discounted_tv", self.discounted_tv)
  }

  fn from_row(row: &Row) -> CoreResult<Self> {
    Ok(Self {
      ticker:         row.text(Self::TABLE, "ticker")?,
      year:           row.integer(Self::TABLE, "year")? as i32,
      projected_fcf:  row.real(Self::TABLE, "projected_fcf")?,
      discounted_fcf: row.real(Self::TABLE, "discounted_fcf")?,
      projected_tv:   row.opt_real(Self::TABLE, "projected_tv")?,
      discounted_tv:  row.opt_real(Self::TABLE, "discounted_tv")?,
    })
  }
}

/// Project `years` of free cash flow from `latest_fcf`, discount each at
/// `rate`, and attach the terminal value to the final year.
pub fn project(
  ticker: &str,
  base_year: i32,
  latest_fcf: f64,
  rate: f64,
  config: &ValuationConfig,
) -> Result<Vec<ProjectedCashFlow>> {
  let years = config.years;
  let terminal_growth = config.terminal_growth_rate;

  if years == 0 {
    return Err(ValuationError::InvalidParameter(
      "projection horizon must be at least one year".into(),
    ));
  }
  if terminal_growth >= rate {
    return Err(ValuationError::InvalidParameter(format!(
      "terminal growth {terminal_growth} is not below discount rate {rate}"
    )));
  }

  let rows = (1..=years)
    .map(|i| {
      let n = i as i32;
      let projected_fcf = latest_fcf * (1.0 + config.growth_rate).powi(n);
      let discount_factor = (1.0 + rate).powi(n);
      let discounted_fcf = projected_fcf / discount_factor;

      let (projected_tv, discounted_tv) = if i == years {
        let tv = projected_fcf * (1.0 + terminal_growth) / (rate - terminal_growth);
        (Some(tv), Some(tv / discount_factor))
      } else {
        (None, None)
      };

      ProjectedCashFlow {
        ticker: ticker.to_owned(),
        year: base_year + n,
        projected_fcf,
        discounted_fcf,
        projected_tv,
        discounted_tv,
      }
    })
    .collect();

  Ok(rows)
}

// ─── Valuation ───────────────────────────────────────────────────────────────

/// The full output of valuing one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Valuation {
  pub ticker:                String,
  /// Fiscal year of the fact row the projection is based on.
  pub base_year:             i32,
  pub discount_rate:         DiscountRate,
  pub projections:           Vec<ProjectedCashFlow>,
  pub total_present_value:   f64,
  pub estimated_share_price: f64,
  /// Observed price on the base fact row, if the provider supplied one.
  pub market_share_price:    Option<f64>,
}

/// Value one entity from its latest fiscal year in `facts`.
pub fn valuate(
  facts: &[FinancialFact],
  config: &ValuationConfig,
) -> Result<Valuation> {
  let latest = facts
    .iter()
    .reduce(|best, f| if f.year > best.year { f } else { best })
    .ok_or(MissingInput::NoFacts)?;

  let fcf = latest.fcf.ok_or(MissingInput::FreeCashFlow)?;
  let shares = match latest.shares_outstanding {
    Some(s) if s != 0.0 && s.is_finite() => s,
    _ => return Err(MissingInput::SharesOutstanding.into()),
  };

  let discount = discount_rate(latest, config)?;
  let projections = project(&latest.ticker, latest.year, fcf, discount.rate(), config)?;

  let discounted_fcf: f64 = projections.iter().map(|p| p.discounted_fcf).sum();
  let discounted_tv = projections
    .last()
    .and_then(|p| p.discounted_tv)
    .unwrap_or(0.0);
  let total_present_value = discounted_fcf + discounted_tv;
  let estimated_share_price = total_present_value / shares;

  debug!(
    ticker = %latest.ticker,
    rate = discount.rate(),
    fallback = discount.is_fallback(),
    estimated_share_price,
    "valuation computed"
  );

  Ok(Valuation {
    ticker: latest.ticker.clone(),
    base_year: latest.year,
    discount_rate: discount,
    projections,
    total_present_value,
    estimated_share_price,
    market_share_price: latest.share_price,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fact::FactColumn;

  fn close(a: f64, b: f64, tol: f64) -> bool { (a - b).abs() <= tol }

  /// Beta missing, so WACC falls back to the 10% base rate exactly.
  fn example_fact() -> FinancialFact {
    FinancialFact::new("EX", 2024)
      .with(FactColumn::Fcf, 100.0)
      .with(FactColumn::SharesOutstanding, 10.0)
      .with(FactColumn::SharePrice, 120.0)
  }

  fn example_config() -> ValuationConfig {
    ValuationConfig {
      growth_rate: 0.05,
      discount_rate: 0.10,
      terminal_growth_rate: 0.02,
      years: 2,
      ..ValuationConfig::default()
    }
  }

  fn full_fact(debt: f64, interest: f64, market_cap: f64, beta: f64) -> FinancialFact {
    FinancialFact::new("W", 2023)
      .with(FactColumn::Fcf, 50.0)
      .with(FactColumn::SharesOutstanding, 5.0)
      .with(FactColumn::TotalDebt, debt)
      .with(FactColumn::InterestExpense, interest)
      .with(FactColumn::TaxRate, 0.21)
      .with(FactColumn::MarketCap, market_cap)
      .with(FactColumn::Beta, beta)
  }

  #[test]
  fn worked_example() {
    let v = valuate(&[example_fact()], &example_config()).unwrap();

    assert_eq!(v.discount_rate, DiscountRate::Fallback { rate: 0.10 });
    assert_eq!(v.projections.len(), 2);
    assert!(close(v.projections[0].projected_fcf, 105.0, 1e-9));
    assert!(close(v.projections[1].projected_fcf, 110.25, 1e-9));
    assert!(close(v.projections[0].discounted_fcf, 95.45, 0.01));
    assert!(close(v.projections[1].discounted_fcf, 91.12, 0.01));

    let last = &v.projections[1];
    assert!(close(last.projected_tv.unwrap(), 1405.6875, 1e-6));
    assert!(close(last.discounted_tv.unwrap(), 1161.73, 0.01));
    assert!(close(v.total_present_value, 1348.30, 0.01));
    assert!(close(v.estimated_share_price, 134.83, 0.01));
    assert_eq!(v.market_share_price, Some(120.0));
  }

  #[test]
  fn rows_are_labelled_by_calendar_year() {
    let v = valuate(&[example_fact()], &example_config()).unwrap();
    let years: Vec<_> = v.projections.iter().map(|p| p.year).collect();
    assert_eq!(years, [2025, 2026]);
  }

  #[test]
  fn terminal_value_only_on_final_year() {
    let cfg = ValuationConfig { years: 5, ..example_config() };
    let v = valuate(&[example_fact()], &cfg).unwrap();
    let (last, rest) = v.projections.split_last().unwrap();
    assert!(last.projected_tv.is_some() && last.discounted_tv.is_some());
    assert!(rest.iter().all(|p| p.projected_tv.is_none() && p.discounted_tv.is_none()));
  }

  #[test]
  fn discounting_identity_holds_for_every_year() {
    let cfg = ValuationConfig { years: 7, ..ValuationConfig::default() };
    let fact = full_fact(400.0, 20.0, 1_000.0, 1.3);
    let v = valuate(&[fact], &cfg).unwrap();
    let rate = v.discount_rate.rate();
    for (i, p) in v.projections.iter().enumerate() {
      let n = i as i32 + 1;
      assert_eq!(p.discounted_fcf, p.projected_fcf / (1.0 + rate).powi(n));
    }
  }

  #[test]
  fn only_the_latest_fact_drives_the_projection() {
    let older = FinancialFact::new("EX", 2023)
      .with(FactColumn::Fcf, 9_999.0)
      .with(FactColumn::SharesOutstanding, 1.0);
    let v = valuate(&[example_fact(), older], &example_config()).unwrap();
    assert_eq!(v.base_year, 2024);
    assert!(close(v.estimated_share_price, 134.83, 0.01));
  }

  #[test]
  fn wacc_components() {
    let cfg = ValuationConfig::default();
    let rate = discount_rate(&full_fact(250.0, 25.0, 750.0, 1.5), &cfg).unwrap();
    let DiscountRate::Wacc { rate, breakdown } = rate else {
      panic!("expected computed WACC");
    };
    assert!(close(breakdown.cost_of_debt, 0.10, 1e-12));
    assert!(close(breakdown.cost_of_equity, 0.025 + 1.5 * 0.055, 1e-12));
    assert!(close(breakdown.weight_debt, 0.25, 1e-12));
    assert!(close(breakdown.weight_equity, 0.75, 1e-12));
    let expected = 0.10 * 0.79 * 0.25 + 0.1075 * 0.75;
    assert!(close(breakdown.wacc, expected, 1e-12));
    assert!(close(rate, expected, 1e-12));
  }

  #[test]
  fn wacc_is_never_below_floor() {
    let cfg = ValuationConfig::default();
    for beta in [-1.0, 0.0, 0.2, 0.8, 1.0, 2.5] {
      for (debt, interest) in [(1.0, 0.0), (100.0, 1.0), (900.0, 5.0), (-50.0, 3.0)] {
        for market_cap in [1.0, 100.0, 10_000.0] {
          let rate = discount_rate(&full_fact(debt, interest, market_cap, beta), &cfg).unwrap();
          if !rate.is_fallback() {
            assert!(rate.rate() >= WACC_FLOOR, "beta={beta} debt={debt} cap={market_cap}");
          }
        }
      }
    }
  }

  #[test]
  fn low_wacc_is_floored() {
    let rate = discount_rate(&full_fact(100.0, 1.0, 100.0, 0.1), &ValuationConfig::default())
      .unwrap();
    assert_eq!(rate.rate(), WACC_FLOOR);
    assert!(matches!(rate, DiscountRate::Wacc { breakdown, .. } if breakdown.wacc < WACC_FLOOR));
  }

  #[test]
  fn missing_wacc_input_falls_back_exactly() {
    let cfg = ValuationConfig { discount_rate: 0.0731, ..ValuationConfig::default() };
    let mut fact = full_fact(100.0, 5.0, 500.0, 1.0);
    fact.tax_rate = None;
    let rate = discount_rate(&fact, &cfg).unwrap();
    assert_eq!(rate, DiscountRate::Fallback { rate: 0.0731 });
  }

  #[test]
  fn zero_total_capital_falls_back() {
    let rate = discount_rate(&full_fact(-100.0, 5.0, 100.0, 1.0), &ValuationConfig::default())
      .unwrap();
    assert!(rate.is_fallback());
  }

  #[test]
  fn zero_total_debt_is_a_missing_input() {
    let fact = full_fact(0.0, 5.0, 500.0, 1.0);
    let err = valuate(&[fact], &ValuationConfig::default()).unwrap_err();
    assert_eq!(err, ValuationError::MissingInput(MissingInput::ZeroTotalDebt));
    assert!(!err.is_run_fatal());
  }

  #[test]
  fn zero_shares_is_a_missing_input() {
    let mut fact = example_fact();
    fact.shares_outstanding = Some(0.0);
    let err = valuate(&[fact], &example_config()).unwrap_err();
    assert_eq!(err, ValuationError::from(MissingInput::SharesOutstanding));
  }

  #[test]
  fn missing_fcf_is_a_missing_input() {
    let mut fact = example_fact();
    fact.fcf = None;
    let err = valuate(&[fact], &example_config()).unwrap_err();
    assert_eq!(err, ValuationError::from(MissingInput::FreeCashFlow));
  }

  #[test]
  fn no_facts_is_a_missing_input() {
    let err = valuate(&[], &example_config()).unwrap_err();
    assert_eq!(err, ValuationError::from(MissingInput::NoFacts));
  }

  #[test]
  fn terminal_growth_at_rate_is_run_fatal() {
    let cfg = ValuationConfig { terminal_growth_rate: 0.10, ..example_config() };
    let err = valuate(&[example_fact()], &cfg).unwrap_err();
    assert!(err.is_run_fatal());
  }

  #[test]
  fn base_is_latest_year_whatever_the_order() {
    let older = FinancialFact::new("EX", 2022).with(FactColumn::Fcf, 1.0);
    let v = valuate(&[older, example_fact()], &example_config()).unwrap();

    assert_eq!(v.base_year, 2024);
    assert!(close(v.estimated_share_price, 134.83, 0.01));
  }

  #[test]
  fn projection_row_roundtrip() {
    let v = valuate(&[example_fact()], &example_config()).unwrap();
    for p in &v.projections {
      assert_eq!(&ProjectedCashFlow::from_row(&p.to_row()).unwrap(), p);
    }
  }
}
