//! `dcf`: discounted cash flow valuation of listed companies.
//!
//! Reads `dcf.toml` (or the path given with `--config`), opens the SQLite
//! store, and runs one of the subcommands below.
//!
//! # Usage
//!
//! ```
//! dcf run                          # value every configured ticker
//! dcf run --force-refresh --ticker CAST.ST
//! dcf status                       # cache freshness and fact counts
//! dcf history CAST.ST              # stored results, newest first
//! ```

mod report;
mod settings;

use std::path::PathBuf;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use dcf_core::{
  freshness::assess,
  pipeline,
  store::{FactStore, FreshnessLedger},
};
use dcf_store_sqlite::SqliteStore;
use dcf_yahoo::YahooProvider;
use settings::Settings;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Discounted cash flow valuation of listed companies")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "dcf.toml")]
  config: PathBuf,

  /// SQLite store path; overrides `store_path` from the config file.
  #[arg(long, value_name = "PATH")]
  store: Option<PathBuf>,

  /// Log at DEBUG instead of INFO (`RUST_LOG` still wins).
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Refresh facts if stale, value every ticker and store the results.
  Run {
    /// Refetch facts even when the cache is fresh.
    #[arg(long)]
    force_refresh: bool,

    /// Value only these tickers instead of the configured list.
    #[arg(long = "ticker", value_name = "TICKER")]
    tickers: Vec<String>,
  },

  /// Show when facts were last refreshed and what is cached per ticker.
  Status,

  /// Show stored valuation results for one ticker.
  History {
    ticker: String,

    /// Maximum number of results to print.
    #[arg(short, long, default_value_t = 10)]
    limit: usize,
  },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let cli = Cli::parse();

  // Initialise tracing.
  let level = if cli.verbose { LevelFilter::DEBUG } else { LevelFilter::INFO };
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy(),
    )
    .init();

  let mut settings = Settings::load(&cli.config)?;
  if let Some(path) = &cli.store {
    settings.store_path = settings::expand_tilde(path);
  }

  let store = SqliteStore::open(&settings.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", settings.store_path))?;

  match cli.command {
    Command::Run { force_refresh, tickers } => run(settings, store, force_refresh, tickers).await,
    Command::Status => status(&settings, &store).await,
    Command::History { ticker, limit } => history(&store, &ticker, limit).await,
  }
}

async fn run(
  mut settings: Settings,
  store: SqliteStore,
  force_refresh: bool,
  tickers: Vec<String>,
) -> anyhow::Result<()> {
  let pipeline_cfg = &mut settings.pipeline;
  pipeline_cfg.force_refresh |= force_refresh;
  if !tickers.is_empty() {
    pipeline_cfg.tickers = tickers;
  }

  let provider =
    YahooProvider::new(settings.yahoo.clone()).context("failed to build HTTP client")?;
  let report = pipeline::run(&settings.pipeline, &store, &provider)
    .await
    .context("valuation run failed")?;

  let counts = report.counts();
  tracing::info!(
    run_id = %report.run.run_id,
    results = counts.results,
    failures = counts.failures,
    "run finished"
  );

  println!("{}", report::results(&report));
  if let Some(failures) = report::failures(&report) {
    println!("\nFailures\n{failures}");
  }
  Ok(())
}

async fn status(settings: &Settings, store: &SqliteStore) -> anyhow::Result<()> {
  let pipeline_cfg = &settings.pipeline;
  let entities = pipeline_cfg.entities();

  let record = store
    .freshness(&pipeline_cfg.dataset)
    .await
    .context("failed to read freshness record")?;
  let verdict = assess(
    store,
    store,
    &entities,
    &pipeline_cfg.dataset,
    pipeline_cfg.refresh_days,
  )
  .await;

  let mut counts = Vec::with_capacity(entities.len());
  for ticker in entities {
    let count = store
      .fact_count(&ticker)
      .await
      .with_context(|| format!("failed to count facts for {ticker}"))?;
    counts.push((ticker, count));
  }

  println!("store: {}", settings.store_path.display());
  println!("{}", report::freshness_line(record.as_ref(), &verdict));
  println!("{}", report::status(&counts));
  Ok(())
}

async fn history(store: &SqliteStore, ticker: &str, limit: usize) -> anyhow::Result<()> {
  let mut results = store
    .results_for(ticker)
    .await
    .with_context(|| format!("failed to read results for {ticker}"))?;
  if results.is_empty() {
    println!("no stored results for {ticker}");
    return Ok(());
  }
  results.truncate(limit);
  println!("{}", report::history(&results));
  Ok(())
}
