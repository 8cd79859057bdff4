//! The end-to-end valuation run.
//!
//! Strictly sequential: gate, fetch and persist facts if stale, value each
//! entity, persist projections, persist results. Each write is its own
//! transaction.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{Instrument as _, info, info_span, warn};

use crate::{
  config::PipelineConfig,
  fact::group_by_ticker,
  fetch::{FactProvider, FetchFailure, fetch_all},
  freshness::{assess, mark_refreshed},
  result::{ResultSet, ValuationRun, aggregate},
  store::{FactStore, FreshnessLedger, replace, upsert},
  valuation::{MissingInput, Valuation, ValuationError, valuate},
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum PipelineError {
  #[error(transparent)]
  Config(#[from] crate::Error),

  /// Raised by the engine for a parameter problem that affects every entity.
  #[error("valuing {ticker}: {source}")]
  InvalidParameter {
    ticker: String,
    source: ValuationError,
  },

  #[error("store failed while {stage}: {source}")]
  Store {
    stage:  &'static str,
    source: BoxError,
  },
}

fn store_error<E>(stage: &'static str) -> impl FnOnce(E) -> PipelineError
where
  E: std::error::Error + Send + Sync + 'static,
{
  move |e| PipelineError::Store { stage, source: Box::new(e) }
}

/// What one run did.
#[derive(Debug, Clone)]
pub struct RunReport {
  pub run:            ValuationRun,
  /// Whether the provider was consulted.
  pub refreshed:      bool,
  /// Whether the dataset was stamped fresh afterwards.
  pub marked_fresh:   bool,
  pub fetch_failures: Vec<FetchFailure>,
  /// Successful valuations, ticker ascending.
  pub valuations:     Vec<Valuation>,
  pub results:        ResultSet,
}

/// Cheap summary for logs and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunCounts {
  pub entities:       usize,
  pub results:        usize,
  pub failures:       usize,
  pub fetch_failures: usize,
}

impl RunReport {
  pub fn counts(&self) -> RunCounts {
    RunCounts {
      entities:       self.results.results.len() + self.results.failures.len(),
      results:        self.results.results.len(),
      failures:       self.results.failures.len(),
      fetch_failures: self.fetch_failures.len(),
    }
  }
}

/// Execute one valuation run over every configured entity.
///
/// Per-entity problems (a failed fetch, a missing input) are collected into
/// the report. Invalid configuration and store write failures abort the run.
pub async fn run<S, P>(
  config: &PipelineConfig,
  store: &S,
  provider: &P,
) -> Result<RunReport, PipelineError>
where
  S: FactStore + FreshnessLedger,
  P: FactProvider,
{
  config.validate()?;
  let run = ValuationRun::start();
  let span = info_span!("valuation_run", run_id = %run.run_id);
  execute(config, store, provider, run).instrument(span).await
}

async fn execute<S, P>(
  config: &PipelineConfig,
  store: &S,
  provider: &P,
  run: ValuationRun,
) -> Result<RunReport, PipelineError>
where
  S: FactStore + FreshnessLedger,
  P: FactProvider,
{
  let entities = config.entities();
  info!(entities = entities.len(), dataset = %config.dataset, "run started");

  // ── Gate ──────────────────────────────────────────────────────────────
  let refreshed = if config.force_refresh {
    info!("refresh forced");
    true
  } else {
    let verdict = assess(
      store,
      store,
      &entities,
      &config.dataset,
      config.refresh_days,
    )
    .await;
    info!(?verdict, "freshness assessed");
    verdict.needs_refresh()
  };

  // ── Fetch and persist facts ───────────────────────────────────────────
  let mut fetch_failures = Vec::new();
  let mut marked_fresh = false;
  if refreshed {
    let outcome = fetch_all(provider, &entities, &config.fields).await;
    let written = upsert(store, &outcome.facts)
      .await
      .map_err(store_error("persisting facts"))?;
    info!(rows = written, "facts persisted");

    if outcome.is_complete() {
      mark_refreshed(store, &config.dataset)
        .await
        .map_err(store_error("marking the dataset refreshed"))?;
      marked_fresh = true;
    } else {
      warn!(
        failed = outcome.failures.len(),
        "some entities failed to fetch, dataset left stale"
      );
    }
    fetch_failures = outcome.failures;
  }

  // ── Value ─────────────────────────────────────────────────────────────
  let facts = store
    .facts_for(&entities)
    .await
    .map_err(store_error("reading facts"))?;
  let mut grouped = group_by_ticker(facts);

  let mut outcomes = Vec::with_capacity(entities.len());
  let mut valuations = Vec::new();
  for ticker in &entities {
    let facts = grouped.remove(ticker).unwrap_or_default();
    let outcome = if facts.is_empty() {
      Err(ValuationError::from(MissingInput::NoFacts))
    } else {
      valuate(&facts, &config.valuation)
    };

    match outcome {
      Ok(valuation) => {
        valuations.push(valuation.clone());
        outcomes.push((ticker.clone(), Ok(valuation)));
      }
      Err(e) if e.is_run_fatal() => {
        return Err(PipelineError::InvalidParameter {
          ticker: ticker.clone(),
          source: e,
        });
      }
      Err(e) => outcomes.push((ticker.clone(), Err(e))),
    }
  }

  // ── Persist projections ───────────────────────────────────────────────
  // Projections of every valued entity are replaced wholesale.
  let valued: Vec<String> = valuations.iter().map(|v| v.ticker.clone()).collect();
  let projections: Vec<_> = valuations
    .iter()
    .flat_map(|v| v.projections.iter().cloned())
    .collect();
  let written = replace(store, "ticker", &valued, &projections)
    .await
    .map_err(store_error("persisting projections"))?;
  info!(rows = written, "projections persisted");

  // ── Aggregate and persist results ─────────────────────────────────────
  let results = aggregate(outcomes, &run);
  let written = upsert(store, &results.results)
    .await
    .map_err(store_error("persisting results"))?;
  info!(
    rows = written,
    failures = results.failures.len(),
    "results persisted"
  );

  Ok(RunReport {
    run,
    refreshed,
    marked_fresh,
    fetch_failures,
    valuations,
    results,
  })
}
