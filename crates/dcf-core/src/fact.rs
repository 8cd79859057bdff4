//! Financial facts: the raw per-(ticker, fiscal year) inputs to a valuation.
//!
//! Every numeric field is optional: the market-data provider resolves a
//! missing field to `None` rather than failing, and the valuation engine
//! decides which absences are fatal for an entity.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::{
  Result,
  record::{Record, Row, Table},
};

// ─── Columns ─────────────────────────────────────────────────────────────────

/// The nullable numeric columns of `financial_data`. These are the internal
/// names the fetch field map targets.
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
pub enum FactColumn {
  Fcf,
  TotalDebt,
  TaxRate,
  InterestExpense,
  SharesOutstanding,
  MarketCap,
  Beta,
  SharePrice,
}

impl FactColumn {
  pub fn name(self) -> &'static str { self.into() }
}

// ─── FinancialFact ───────────────────────────────────────────────────────────

/// One row of `financial_data`. `(ticker, year)` is unique.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FinancialFact {
  pub ticker:             String,
  /// Calendar year of the fiscal period end.
  pub year:               i32,
  /// Free cash flow.
  pub fcf:                Option<f64>,
  pub total_debt:         Option<f64>,
  pub tax_rate:           Option<f64>,
  pub interest_expense:   Option<f64>,
  pub shares_outstanding: Option<f64>,
  pub market_cap:         Option<f64>,
  pub beta:               Option<f64>,
  /// Closing share price on (or near) the fiscal period end.
  pub share_price:        Option<f64>,
}

impl FinancialFact {
  /// A fact with every numeric field unset.
  pub fn new(ticker: impl Into<String>, year: i32) -> Self {
    Self { ticker: ticker.into(), year, ..Self::default() }
  }

  pub fn get(&self, column: FactColumn) -> Option<f64> {
    match column {
      FactColumn::Fcf => self.fcf,
      FactColumn::TotalDebt => self.total_debt,
      FactColumn::TaxRate => self.tax_rate,
      FactColumn::InterestExpense => self.interest_expense,
      FactColumn::SharesOutstanding => self.shares_outstanding,
      FactColumn::MarketCap => self.market_cap,
      FactColumn::Beta => self.beta,
      FactColumn::SharePrice => self.share_price,
    }
  }

  pub fn set(&mut self, column: FactColumn, value: Option<f64>) {
    let slot = match column {
      FactColumn::Fcf => &mut self.fcf,
      FactColumn::TotalDebt => &mut self.total_debt,
      FactColumn::TaxRate => &mut self.tax_rate,
      FactColumn::InterestExpense => &mut self.interest_expense,
      FactColumn::SharesOutstanding => &mut self.shares_outstanding,
      FactColumn::MarketCap => &mut self.market_cap,
      FactColumn::Beta => &mut self.beta,
      FactColumn::SharePrice => &mut self.share_price,
    };
    *slot = value;
  }

  pub fn with(mut self, column: FactColumn, value: f64) -> Self {
    self.set(column, Some(value));
    self
  }
}

impl Record for FinancialFact {
  const TABLE: Table = Table::FinancialData;
  const KEY_COLUMNS: &'static [&'static str] = &["ticker", "year"];
  const COLUMNS: &'static [&'static str] = &[
    "ticker",
    "year",
    "fcf",
    "total_debt",
    "tax_rate",
    "interest_expense",
    "shares_outstanding",
    "market_cap",
    "beta",
    "share_price",
  ];

  fn to_row(&self) -> Row {
    let mut row = Row::new()
      .with("ticker", self.ticker.as_str())
      .with("year", self.year);
    for column in FactColumn::iter() {
      row.push(column.name(), self.get(column));
    }
    row
  }

  fn from_row(row: &Row) -> Result<Self> {
    let year = row.integer(Self::TABLE, "year")?;
    let mut fact = Self::new(
      row.text(Self::TABLE, "ticker")?,
      i32::try_from(year).map_err(|_| crate::Error::ColumnType {
        table:    Self::TABLE,
        column:   "year".to_owned(),
        expected: "32-bit year",
        found:    "integer",
      })?,
    );
    for column in FactColumn::iter() {
      fact.set(column, row.opt_real(Self::TABLE, column.name())?);
    }
    Ok(fact)
  }
}

// ─── Ordering ────────────────────────────────────────────────────────────────

/// Sort ticker ascending, then year descending, so that index 0 of every
/// entity's slice is its latest fiscal year.
pub fn sort_facts(facts: &mut [FinancialFact]) {
  facts.sort_by(|a, b| a.ticker.cmp(&b.ticker).then(b.year.cmp(&a.year)));
}

/// Group already-fetched facts by ticker, each group most recent first.
pub fn group_by_ticker(
  facts: Vec<FinancialFact>,
) -> BTreeMap<String, Vec<FinancialFact>> {
  let mut grouped: BTreeMap<String, Vec<FinancialFact>> = BTreeMap::new();
  for fact in facts {
    grouped.entry(fact.ticker.clone()).or_default().push(fact);
  }
  for group in grouped.values_mut() {
    group.sort_by(|a, b| b.year.cmp(&a.year));
  }
  grouped
}
