//! End-to-end pipeline tests against [`MemoryStore`] and a scripted provider.

use std::{
  collections::BTreeMap,
  sync::atomic::{AtomicUsize, Ordering},
};

use crate::{
  config::PipelineConfig,
  fact::{FactColumn, FinancialFact},
  fetch::{FactProvider, FieldMap},
  memory::MemoryStore,
  pipeline::{PipelineError, run},
  record::Table,
  store::{FactStore, FreshnessLedger},
  valuation::{MissingInput, ValuationError},
};

// ─── Scripted provider ───────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct ScriptError(String);

/// Answers from a fixed table and counts how often it was asked.
#[derive(Default)]
struct ScriptedProvider {
  answers: BTreeMap<String, Result<Vec<FinancialFact>, String>>,
  calls:   AtomicUsize,
}

impl ScriptedProvider {
  fn answer(mut self, ticker: &str, facts: Vec<FinancialFact>) -> Self {
    self.answers.insert(ticker.into(), Ok(facts));
    self
  }

  fn fail(mut self, ticker: &str, reason: &str) -> Self {
    self.answers.insert(ticker.into(), Err(reason.into()));
    self
  }

  fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

impl FactProvider for ScriptedProvider {
  type Error = ScriptError;

  async fn fetch_entity(
    &self,
    ticker: &str,
    _fields: &FieldMap,
  ) -> Result<Vec<FinancialFact>, ScriptError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    match self.answers.get(ticker) {
      Some(Ok(facts)) => Ok(facts.clone()),
      Some(Err(reason)) => Err(ScriptError(reason.clone())),
      None => Err(ScriptError(format!("unknown ticker {ticker}"))),
    }
  }
}

// ─── Fixtures ────────────────────────────────────────────────────────────────

/// Two fiscal years of complete inputs. The ticker is filled in by the fetch
/// step, so it is left blank here.
fn healthy() -> Vec<FinancialFact> {
  let year = |y: i32, fcf: f64| {
    FinancialFact::new("", y)
      .with(FactColumn::Fcf, fcf)
      .with(FactColumn::TotalDebt, 50.0)
      .with(FactColumn::InterestExpense, 2.5)
      .with(FactColumn::TaxRate, 0.2)
      .with(FactColumn::MarketCap, 1000.0)
      .with(FactColumn::Beta, 1.0)
      .with(FactColumn::SharesOutstanding, 10.0)
      .with(FactColumn::SharePrice, 120.0)
  };
  vec![year(2024, 100.0), year(2023, 90.0)]
}

/// Beta 1.5 lifts WACC to about 10.4%, well above the floor.
fn high_beta() -> Vec<FinancialFact> {
  healthy()
    .into_iter()
    .map(|f| f.with(FactColumn::Beta, 1.5))
    .collect()
}

fn zero_debt() -> Vec<FinancialFact> {
  healthy()
    .into_iter()
    .map(|f| f.with(FactColumn::TotalDebt, 0.0))
    .collect()
}

fn config(tickers: &[&str]) -> PipelineConfig {
  PipelineConfig {
    tickers: tickers.iter().map(|t| (*t).to_owned()).collect(),
    ..PipelineConfig::default()
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[tokio::test]
async fn first_run_fetches_and_marks_fresh() {
  let store = MemoryStore::new();
  let provider = ScriptedProvider::default()
    .answer("AAA", healthy())
    .answer("BBB", healthy());

  let report = run(&config(&["BBB", "AAA"]), &store, &provider).await.unwrap();

  assert!(report.refreshed);
  assert!(report.marked_fresh);
  assert_eq!(provider.calls(), 2);
  assert_eq!(report.results.results.len(), 2);
  assert!(report.results.failures.is_empty());
  assert!(store.freshness("financial_data").await.unwrap().is_some());

  assert_eq!(store.fact_count("AAA").await.unwrap(), 2);
  assert_eq!(store.projections_for("AAA").await.unwrap().len(), 5);
  let history = store.results_for("AAA").await.unwrap();
  assert_eq!(history.len(), 1);
  assert_eq!(history[0].run_id, report.run.run_id);
  assert_eq!(history[0].share_price, 120.0);
}

#[tokio::test]
async fn fresh_cache_skips_the_provider() {
  let store = MemoryStore::new();
  let provider = ScriptedProvider::default().answer("AAA", healthy());
  let cfg = config(&["AAA"]);

  run(&cfg, &store, &provider).await.unwrap();
  let second = run(&cfg, &store, &provider).await.unwrap();

  assert!(!second.refreshed);
  assert_eq!(provider.calls(), 1);
  assert_eq!(second.results.results.len(), 1);
}

#[tokio::test]
async fn force_refresh_bypasses_the_gate() {
  let store = MemoryStore::new();
  let provider = ScriptedProvider::default().answer("AAA", healthy());
  let mut cfg = config(&["AAA"]);

  run(&cfg, &store, &provider).await.unwrap();
  cfg.force_refresh = true;
  let second = run(&cfg, &store, &provider).await.unwrap();

  assert!(second.refreshed);
  assert_eq!(provider.calls(), 2);
}

#[tokio::test]
async fn failed_fetch_is_scoped_to_its_entity() {
  let store = MemoryStore::new();
  let provider = ScriptedProvider::default()
    .answer("AAA", healthy())
    .fail("BBB", "HTTP 404");
  let cfg = config(&["AAA", "BBB"]);

  let report = run(&cfg, &store, &provider).await.unwrap();

  assert!(report.refreshed);
  assert!(!report.marked_fresh);
  assert_eq!(report.fetch_failures.len(), 1);
  assert_eq!(report.fetch_failures[0].ticker, "BBB");
  assert!(report.results.result_for("AAA").is_some());
  assert_eq!(
    report.results.failure_for("BBB").unwrap().error,
    ValuationError::from(MissingInput::NoFacts)
  );
  assert!(store.freshness("financial_data").await.unwrap().is_none());

  // BBB is still cold, so the next run asks again.
  run(&cfg, &store, &provider).await.unwrap();
  assert_eq!(provider.calls(), 4);
}

#[tokio::test]
async fn zero_debt_entity_is_reported_not_fatal() {
  let store = MemoryStore::new();
  let provider = ScriptedProvider::default()
    .answer("AAA", healthy())
    .answer("ZERO", zero_debt());

  let report = run(&config(&["AAA", "ZERO"]), &store, &provider)
    .await
    .unwrap();

  let counts = report.counts();
  assert_eq!((counts.entities, counts.results, counts.failures), (2, 1, 1));
  assert_eq!(
    report.results.failure_for("ZERO").unwrap().error,
    ValuationError::from(MissingInput::ZeroTotalDebt)
  );
  assert!(store.projections_for("ZERO").await.unwrap().is_empty());
}

#[tokio::test]
async fn invalid_config_aborts_before_any_work() {
  let store = MemoryStore::new();
  let provider = ScriptedProvider::default().answer("AAA", healthy());
  let mut cfg = config(&["AAA"]);
  cfg.valuation.terminal_growth_rate = 0.12;

  let err = run(&cfg, &store, &provider).await.unwrap_err();

  assert!(matches!(err, PipelineError::Config(_)));
  assert_eq!(provider.calls(), 0);
  assert_eq!(store.row_count(Table::FinancialData).unwrap(), 0);
}

#[tokio::test]
async fn rerun_does_not_duplicate_keyed_rows() {
  let store = MemoryStore::new();
  let provider = ScriptedProvider::default().answer("AAA", healthy());
  let mut cfg = config(&["AAA"]);
  cfg.force_refresh = true;

  run(&cfg, &store, &provider).await.unwrap();
  let facts = store.row_count(Table::FinancialData).unwrap();
  let projections = store.row_count(Table::DcfTable).unwrap();

  run(&cfg, &store, &provider).await.unwrap();
  assert_eq!(store.row_count(Table::FinancialData).unwrap(), facts);
  assert_eq!(store.row_count(Table::DcfTable).unwrap(), projections);
  assert_eq!(store.row_count(Table::DataStatus).unwrap(), 1);
}

#[tokio::test]
async fn shorter_horizon_replaces_old_projections() {
  let store = MemoryStore::new();
  let provider = ScriptedProvider::default().answer("AAA", healthy());
  let mut cfg = config(&["AAA"]);

  run(&cfg, &store, &provider).await.unwrap();
  cfg.valuation.years = 3;
  run(&cfg, &store, &provider).await.unwrap();

  let years: Vec<_> = store
    .projections_for("AAA")
    .await
    .unwrap()
    .iter()
    .map(|p| p.year)
    .collect();
  assert_eq!(years, [2025, 2026, 2027]);
}

#[tokio::test]
async fn oversized_refresh_window_keeps_cache() {
  let store = MemoryStore::new();
  let provider = ScriptedProvider::default().answer("AAA", healthy());
  let mut cfg = config(&["AAA"]);
  cfg.refresh_days = i64::MAX;

  run(&cfg, &store, &provider).await.unwrap();
  let second = run(&cfg, &store, &provider).await.unwrap();

  assert!(!second.refreshed);
  assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn terminal_growth_only_needs_to_clear_the_rate_used() {
  let store = MemoryStore::new();
  let provider = ScriptedProvider::default()
    .answer("AAA", high_beta())
    .answer("LOW", healthy());
  let mut cfg = config(&["AAA"]);
  cfg.valuation.terminal_growth_rate = 0.085;

  let report = run(&cfg, &store, &provider).await.unwrap();
  let valuation = &report.valuations[0];
  assert!(valuation.discount_rate.rate() > 0.085);
  assert!(report.results.result_for("AAA").is_some());

  // Floored at 8%, this entity's rate is below terminal growth.
  cfg.tickers = vec!["LOW".into()];
  let err = run(&cfg, &store, &provider).await.unwrap_err();
  assert!(matches!(err, PipelineError::InvalidParameter { ticker, .. } if ticker == "LOW"));
}
