//! The boundary to the external market-data provider.
//!
//! A provider receives a declarative [`FieldMap`] and answers with one
//! [`FinancialFact`] per fiscal year it knows about. Fields it cannot read
//! resolve to `None`; only a provider that cannot describe the entity at all
//! reports an error, and that error stays scoped to the one entity.

use std::{collections::BTreeMap, future::Future};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};
use tracing::{debug, info, warn};

use crate::fact::{FactColumn, FinancialFact, sort_facts};

// ─── Field map ───────────────────────────────────────────────────────────────

/// Where a provider field lives. Statement categories are time series keyed
/// by fiscal period; `info` is a point-in-time snapshot; `custom` fields are
/// derived by the provider itself.
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
  Serialize,
  Deserialize,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
#[serde(rename_all = "lowercase")]
pub enum Category {
  Cashflow,
  Balancesheet,
  Financials,
  Info,
  Custom,
}

impl Category {
  /// Statement categories in the order their period dates define fiscal
  /// years.
  pub const FISCAL_PRIORITY: [Category; 3] =
    [Category::Financials, Category::Balancesheet, Category::Cashflow];

  pub fn is_statement(self) -> bool {
    matches!(self, Self::Cashflow | Self::Balancesheet | Self::Financials)
  }
}

/// `{category: {provider_field: internal_column}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMap(BTreeMap<Category, BTreeMap<String, FactColumn>>);

impl Default for FieldMap {
  fn default() -> Self {
    Self::from_entries([
      (Category::Cashflow, "FreeCashFlow", FactColumn::Fcf),
      (Category::Balancesheet, "NetDebt", FactColumn::TotalDebt),
      (Category::Financials, "TaxRateForCalcs", FactColumn::TaxRate),
      (Category::Financials, "InterestExpense", FactColumn::InterestExpense),
      (Category::Info, "impliedSharesOutstanding", FactColumn::SharesOutstanding),
      (Category::Info, "marketCap", FactColumn::MarketCap),
      (Category::Info, "beta", FactColumn::Beta),
      (Category::Custom, "share_price", FactColumn::SharePrice),
    ])
  }
}

impl FieldMap {
  pub fn from_entries<'a>(
    entries: impl IntoIterator<Item = (Category, &'a str, FactColumn)>,
  ) -> Self {
    let mut map: BTreeMap<Category, BTreeMap<String, FactColumn>> = BTreeMap::new();
    for (category, field, column) in entries {
      map.entry(category).or_default().insert(field.to_owned(), column);
    }
    Self(map)
  }

  /// `(provider_field, column)` pairs configured for `category`.
  pub fn fields(
    &self,
    category: Category,
  ) -> impl Iterator<Item = (&str, FactColumn)> + '_ {
    self
      .0
      .get(&category)
      .into_iter()
      .flat_map(|fields| fields.iter().map(|(f, c)| (f.as_str(), *c)))
  }

  pub fn categories(&self) -> impl Iterator<Item = Category> + '_ {
    self.0.keys().copied()
  }

  pub fn is_empty(&self) -> bool { self.0.values().all(BTreeMap::is_empty) }
}

// ─── Provider trait ──────────────────────────────────────────────────────────

/// Abstraction over a market-data source.
pub trait FactProvider: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Fetch every fiscal year the provider reports for `ticker`, filling the
  /// columns named in `fields`. Unreadable fields are `None`.
  fn fetch_entity<'a>(
    &'a self,
    ticker: &'a str,
    fields: &'a FieldMap,
  ) -> impl Future<Output = Result<Vec<FinancialFact>, Self::Error>> + Send + 'a;
}

// ─── Batch fetch ─────────────────────────────────────────────────────────────

/// An entity whose facts could not be fetched at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchFailure {
  pub ticker: String,
  pub reason: String,
}

/// Result of fetching a batch of entities.
#[derive(Debug, Clone, Default)]
pub struct FetchOutcome {
  /// Sorted ticker ascending, year descending.
  pub facts:    Vec<FinancialFact>,
  pub failures: Vec<FetchFailure>,
}

impl FetchOutcome {
  pub fn is_complete(&self) -> bool { self.failures.is_empty() }
}

/// Fetch each ticker in turn. One entity's failure never aborts the others.
pub async fn fetch_all<P: FactProvider>(
  provider: &P,
  tickers: &[String],
  fields: &FieldMap,
) -> FetchOutcome {
  let mut outcome = FetchOutcome::default();

  for ticker in tickers {
    match provider.fetch_entity(ticker, fields).await {
      Ok(facts) if facts.is_empty() => {
        warn!(%ticker, "provider reported no fiscal years");
        outcome.failures.push(FetchFailure {
          ticker: ticker.clone(),
          reason: "provider reported no fiscal years".into(),
        });
      }
      Ok(facts) => {
        debug!(%ticker, years = facts.len(), "fetched facts");
        outcome.facts.extend(facts.into_iter().map(|mut fact| {
          fact.ticker.clone_from(ticker);
          fact
        }));
      }
      Err(e) => {
        warn!(%ticker, error = %e, "fetch failed");
        outcome.failures.push(FetchFailure {
          ticker: ticker.clone(),
          reason: e.to_string(),
        });
      }
    }
  }

  sort_facts(&mut outcome.facts);
  info!(
    rows = outcome.facts.len(),
    failed = outcome.failures.len(),
    "fetch complete"
  );
  outcome
}
