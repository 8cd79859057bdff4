//! Tabular terminal output.

use comfy_table::{Cell, CellAlignment, Color, ContentArrangement, Table, presets::UTF8_FULL};
use dcf_core::{
  freshness::{Freshness, FreshnessRecord},
  pipeline::RunReport,
  result::ValuationResult,
  valuation::DiscountRate,
};

fn table(header: &[&str]) -> Table {
  let mut table = Table::new();
  table
    .load_preset(UTF8_FULL)
    .set_content_arrangement(ContentArrangement::Dynamic)
    .set_header(header.to_vec());
  table
}

fn number(value: f64) -> Cell {
  Cell::new(format!("{value:.2}")).set_alignment(CellAlignment::Right)
}

/// Margin of safety, green when the market price sits below the estimate.
fn margin(value: f64) -> Cell {
  let color = if value > 0.0 { Color::Green } else { Color::Red };
  Cell::new(format!("{value:.1}%"))
    .set_alignment(CellAlignment::Right)
    .fg(color)
}

fn rate(rate: &DiscountRate) -> String {
  match rate {
    DiscountRate::Wacc { rate, .. } => format!("{:.2}% wacc", rate * 100.0),
    DiscountRate::Fallback { rate } => format!("{:.2}% base", rate * 100.0),
  }
}

/// One row per valued entity, ticker ascending.
pub fn results(report: &RunReport) -> Table {
  let mut out = table(&[
    "Ticker",
    "Base year",
    "Market",
    "Estimate",
    "Margin",
    "Discount rate",
  ]);
  for result in &report.results.results {
    let valuation = report.valuations.iter().find(|v| v.ticker == result.ticker);
    out.add_row(vec![
      Cell::new(&result.ticker),
      Cell::new(valuation.map_or_else(String::new, |v| v.base_year.to_string())),
      number(result.share_price),
      number(result.estimated_price),
      margin(result.margin_of_safety),
      Cell::new(valuation.map_or_else(String::new, |v| rate(&v.discount_rate))),
    ]);
  }
  out
}

/// Fetch and valuation failures, or `None` when the run had none.
pub fn failures(report: &RunReport) -> Option<Table> {
  if report.fetch_failures.is_empty() && report.results.failures.is_empty() {
    return None;
  }
  let mut out = table(&["Ticker", "Stage", "Reason"]);
  for failure in &report.fetch_failures {
    out.add_row(vec![
      Cell::new(&failure.ticker),
      Cell::new("fetch"),
      Cell::new(&failure.reason),
    ]);
  }
  for failure in &report.results.failures {
    out.add_row(vec![
      Cell::new(&failure.ticker),
      Cell::new("valuation"),
      Cell::new(failure.error.to_string()),
    ]);
  }
  Some(out)
}

/// Stored results for one ticker, newest first.
pub fn history(results: &[ValuationResult]) -> Table {
  let mut out = table(&["Date", "Market", "Estimate", "Margin", "Run"]);
  for result in results {
    out.add_row(vec![
      Cell::new(result.date.format("%Y-%m-%d %H:%M").to_string()),
      number(result.share_price),
      number(result.estimated_price),
      margin(result.margin_of_safety),
      Cell::new(result.run_id.simple().to_string()[..8].to_owned()),
    ]);
  }
  out
}

/// Cached fact counts per ticker.
pub fn status(counts: &[(String, usize)]) -> Table {
  let mut out = table(&["Ticker", "Fiscal years"]);
  for (ticker, count) in counts {
    out.add_row(vec![
      Cell::new(ticker),
      Cell::new(count).set_alignment(CellAlignment::Right),
    ]);
  }
  out
}

/// One-line description of the freshness record and the gate's verdict.
pub fn freshness_line(record: Option<&FreshnessRecord>, verdict: &Freshness) -> String {
  let stamp = record
    .and_then(|r| r.last_updated.as_deref())
    .unwrap_or("never");
  let decision = match verdict {
    Freshness::Fresh { .. } => "fresh, next run uses cached facts".to_owned(),
    Freshness::Stale { .. } => "stale, next run refetches".to_owned(),
    Freshness::ColdStart { tickers } => {
      format!("no facts for {}, next run refetches", tickers.join(", "))
    }
    Freshness::NeverRefreshed => "never refreshed, next run refetches".to_owned(),
    Freshness::UnreadableStamp { .. } => "unreadable stamp, next run refetches".to_owned(),
    Freshness::Unknown { reason } => format!("store unreadable ({reason}), next run refetches"),
  };
  format!("last refreshed: {stamp} ({decision})")
}

#[cfg(test)]
mod tests {
  use dcf_core::{
    fetch::FetchFailure,
    result::{EntityFailure, ResultSet, ValuationRun},
    valuation::{MissingInput, Valuation, ValuationError},
  };

  use super::*;

  fn report() -> RunReport {
    let run = ValuationRun::start();
    let valuation = Valuation {
      ticker:                "CAST.ST".into(),
      base_year:             2024,
      discount_rate:         DiscountRate::Fallback { rate: 0.1 },
      projections:           vec![],
      total_present_value:   1348.3,
      estimated_share_price: 134.83,
      market_share_price:    Some(120.0),
    };
    RunReport {
      run,
      refreshed: true,
      marked_fresh: false,
      fetch_failures: vec![FetchFailure {
        ticker: "SAGA-B.ST".into(),
        reason: "timeseries returned 404 Not Found".into(),
      }],
      valuations: vec![valuation],
      results: ResultSet {
        run,
        results: vec![ValuationResult::new("CAST.ST", &run, 120.0, 134.83)],
        failures: vec![EntityFailure {
          ticker: "SAGA-B.ST".into(),
          error:  ValuationError::from(MissingInput::NoFacts),
        }],
      },
    }
  }

  #[test]
  fn results_table_shows_prices_and_rate() {
    let rendered = results(&report()).to_string();
    assert!(rendered.contains("CAST.ST"));
    assert!(rendered.contains("134.83"));
    assert!(rendered.contains("120.00"));
    assert!(rendered.contains("11.0%"));
    assert!(rendered.contains("10.00% base"));
  }

  #[test]
  fn failures_table_lists_both_stages() {
    let rendered = failures(&report()).unwrap().to_string();
    assert!(rendered.contains("fetch"));
    assert!(rendered.contains("valuation"));
    assert!(rendered.contains("no financial facts"));
  }

  #[test]
  fn clean_run_has_no_failures_table() {
    let mut clean = report();
    clean.fetch_failures.clear();
    clean.results.failures.clear();
    assert!(failures(&clean).is_none());
  }

  #[test]
  fn freshness_line_names_the_missing_tickers() {
    let line = freshness_line(
      None,
      &Freshness::ColdStart { tickers: vec!["CAST.ST".into()] },
    );
    assert_eq!(line, "last refreshed: never (no facts for CAST.ST, next run refetches)");
  }
}
