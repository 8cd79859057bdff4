//! Pure parsing of Yahoo Finance responses into financial facts.
//!
//! Field names are matched case-insensitively throughout, so a field map
//! whose keys were lowercased by a configuration loader still resolves.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, TimeDelta};
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Map, Value as Json};
use tracing::debug;

use dcf_core::{
  fact::FinancialFact,
  fetch::{Category, FieldMap},
};

use crate::{Error, Result};

/// Half-width of the window searched for a close around a fiscal date.
pub const PRICE_WINDOW_DAYS: i64 = 5;

/// The only derived field the provider knows how to compute.
pub const SHARE_PRICE_FIELD: &str = "share_price";

/// Statement series whose exact spelling is known. Requests for these are
/// sent in canonical case whatever case the field map used.
const KNOWN_SERIES: &[&str] = &[
  "BasicEPS",
  "CapitalExpenditure",
  "CashAndCashEquivalents",
  "DilutedEPS",
  "EBIT",
  "EBITDA",
  "FreeCashFlow",
  "GrossProfit",
  "InterestExpense",
  "NetDebt",
  "NetIncome",
  "OperatingCashFlow",
  "OperatingIncome",
  "OrdinarySharesNumber",
  "PretaxIncome",
  "ShareIssued",
  "StockholdersEquity",
  "TaxProvision",
  "TaxRateForCalcs",
  "TotalAssets",
  "TotalDebt",
  "TotalRevenue",
];

/// Lowercased with whitespace removed, so `Free Cash Flow`, `FreeCashFlow`
/// and `freecashflow` all name the same field.
fn key(name: &str) -> String {
  name
    .chars()
    .filter(|c| !c.is_whitespace())
    .map(|c| c.to_ascii_lowercase())
    .collect()
}

/// The fundamentals-timeseries `type` for a statement field.
pub fn series_type(field: &str) -> String {
  let wanted = key(field);
  let canonical = KNOWN_SERIES
    .iter()
    .find(|known| known.eq_ignore_ascii_case(&wanted))
    .map_or_else(|| field.split_whitespace().collect::<String>(), |k| (*k).to_owned());
  format!("annual{canonical}")
}

// ─── Envelope ────────────────────────────────────────────────────────────────

/// `{"<root>": {"result": [...], "error": ...}}`.
#[derive(Debug, Deserialize)]
struct ResultList<T> {
  result: Option<Vec<T>>,
  error:  Option<Json>,
}

fn unwrap_envelope<T: DeserializeOwned>(
  body: &str,
  root: &'static str,
) -> Result<Vec<T>> {
  let mut doc: Map<String, Json> = serde_json::from_str(body)?;
  let inner = doc.remove(root).ok_or_else(|| Error::Api {
    endpoint: root,
    message:  format!("response has no {root:?} object"),
  })?;
  let list: ResultList<T> = serde_json::from_value(inner)?;

  if let Some(error) = list.error.filter(|e| !e.is_null()) {
    let message = error
      .get("description")
      .and_then(Json::as_str)
      .map_or_else(|| error.to_string(), str::to_owned);
    return Err(Error::Api { endpoint: root, message });
  }
  Ok(list.result.unwrap_or_default())
}

// ─── Statements ──────────────────────────────────────────────────────────────

/// One reported value of a statement series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
  pub as_of: NaiveDate,
  pub value: Option<f64>,
}

/// Annual statement series, keyed by lowercased field name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statements {
  series: BTreeMap<String, Vec<Observation>>,
}

impl Statements {
  pub fn series(&self, field: &str) -> &[Observation] {
    self.series.get(&key(field)).map(Vec::as_slice).unwrap_or_default()
  }

  /// The value reported for the latest period ending in `year`.
  pub fn value_in_year(&self, field: &str, year: i32) -> Option<f64> {
    self
      .series(field)
      .iter()
      .filter(|o| o.as_of.year() == year)
      .max_by_key(|o| o.as_of)
      .and_then(|o| o.value)
  }

  pub fn is_empty(&self) -> bool { self.series.values().all(Vec::is_empty) }
}

#[derive(Debug, Deserialize)]
struct TimeseriesEntry {
  #[serde(rename = "asOfDate")]
  as_of_date:     NaiveDate,
  #[serde(rename = "reportedValue", default)]
  reported_value: Option<RawNumber>,
}

#[derive(Debug, Deserialize)]
struct RawNumber {
  #[serde(default)]
  raw: Option<f64>,
}

/// Parse a fundamentals-timeseries response.
pub fn parse_timeseries(body: &str) -> Result<Statements> {
  let results: Vec<Map<String, Json>> = unwrap_envelope(body, "timeseries")?;
  let mut statements = Statements::default();

  for mut result in results {
    let Some(kind) = result
      .get("meta")
      .and_then(|m| m.get("type"))
      .and_then(|t| t.get(0))
      .and_then(Json::as_str)
      .map(str::to_owned)
    else {
      continue;
    };
    let field = kind.strip_prefix("annual").unwrap_or(&kind);

    let entries: Vec<Option<TimeseriesEntry>> = match result.remove(&kind) {
      Some(series) => serde_json::from_value(series)?,
      None => Vec::new(),
    };
    let observations = entries
      .into_iter()
      .flatten()
      .map(|e| Observation {
        as_of: e.as_of_date,
        value: e.reported_value.and_then(|v| v.raw),
      })
      .collect::<Vec<_>>();

    debug!(field, periods = observations.len(), "parsed series");
    statements
      .series
      .entry(key(field))
      .or_default()
      .extend(observations);
  }

  Ok(statements)
}

/// Map each fiscal year to the period-end date that defines it.
///
/// Categories are consulted in [`Category::FISCAL_PRIORITY`] order; the first
/// category reporting a year fixes its date, and within a category the latest
/// period ending in that year wins.
pub fn fiscal_dates(statements: &Statements, fields: &FieldMap) -> BTreeMap<i32, NaiveDate> {
  let mut dates = BTreeMap::new();
  for category in Category::FISCAL_PRIORITY {
    let mut observed: Vec<NaiveDate> = fields
      .fields(category)
      .flat_map(|(field, _)| statements.series(field).iter().map(|o| o.as_of))
      .collect();
    observed.sort_unstable_by(|a, b| b.cmp(a));
    for date in observed {
      dates.entry(date.year()).or_insert(date);
    }
  }
  dates
}

// ─── Info ────────────────────────────────────────────────────────────────────

/// Point-in-time numeric fields from the quote summary, keyed by lowercased
/// name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Info {
  values: BTreeMap<String, f64>,
}

impl Info {
  /// Build from `(field, value)` pairs, skipping absent values. The first
  /// pair naming a field wins.
  pub fn from_entries<'a>(entries: impl IntoIterator<Item = (&'a str, Option<f64>)>) -> Self {
    let mut info = Self::default();
    for (field, value) in entries {
      if let Some(v) = value.filter(|v| v.is_finite()) {
        info.values.entry(key(field)).or_insert(v);
      }
    }
    info
  }

  pub fn get(&self, field: &str) -> Option<f64> { self.values.get(&key(field)).copied() }

  pub fn len(&self) -> usize { self.values.len() }

  pub fn is_empty(&self) -> bool { self.values.is_empty() }
}

// ─── Prices ──────────────────────────────────────────────────────────────────

/// Daily closes in exchange-local wall time, oldest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DailyCloses(Vec<(NaiveDateTime, f64)>);

impl DailyCloses {
  /// Build from `(unix seconds, close)` sessions, shifting each timestamp by
  /// the exchange's `gmt_offset` in seconds. Non-finite closes are dropped.
  pub fn from_sessions(sessions: impl IntoIterator<Item = (i64, f64)>, gmt_offset: i64) -> Self {
    let mut points: Vec<(NaiveDateTime, f64)> = sessions
      .into_iter()
      .filter(|(_, close)| close.is_finite())
      .filter_map(|(ts, close)| {
        let at = DateTime::from_timestamp(ts.checked_add(gmt_offset)?, 0)?;
        Some((at.naive_utc(), close))
      })
      .collect();
    points.sort_by_key(|(at, _)| *at);
    Self(points)
  }

  pub fn len(&self) -> usize { self.0.len() }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  /// The close nearest `target` within ±[`PRICE_WINDOW_DAYS`]. The window end
  /// is exclusive; ties go to the earlier session.
  pub fn closest_to(&self, target: NaiveDate) -> Option<f64> {
    let target = target.and_time(chrono::NaiveTime::MIN);
    let window = TimeDelta::days(PRICE_WINDOW_DAYS);
    let (start, end) = (target - window, target + window);

    self
      .0
      .iter()
      .filter(|(at, _)| *at >= start && *at < end)
      .min_by_key(|(at, _)| (*at - target).abs())
      .map(|(_, close)| *close)
  }
}

// ─── Assembly ────────────────────────────────────────────────────────────────

/// Whether `fields` asks for the derived share price.
pub fn wants_share_price(fields: &FieldMap) -> bool {
  fields
    .fields(Category::Custom)
    .any(|(name, _)| name.eq_ignore_ascii_case(SHARE_PRICE_FIELD))
}

/// Build one fact per fiscal year, most recent first.
///
/// Statement fields take the value reported for that year; `info` fields are
/// point-in-time and repeat on every row; the custom share price is the close
/// nearest the year's fiscal date. Anything unavailable is `None`.
pub fn assemble(
  ticker: &str,
  fields: &FieldMap,
  statements: &Statements,
  info: &Info,
  fiscal: &BTreeMap<i32, NaiveDate>,
  closes: &DailyCloses,
) -> Vec<FinancialFact> {
  let mut facts = Vec::with_capacity(fiscal.len());

  for (&year, &fiscal_date) in fiscal.iter().rev() {
    let mut fact = FinancialFact::new(ticker, year);
    for category in fields.categories() {
      for (field, column) in fields.fields(category) {
        let value = match category {
          Category::Info => info.get(field),
          Category::Custom if field.eq_ignore_ascii_case(SHARE_PRICE_FIELD) => {
            closes.closest_to(fiscal_date)
          }
          Category::Custom => {
            debug!(field, "unknown custom field");
            None
          }
          _ => statements.value_in_year(field, year),
        };
        fact.set(column, value);
      }
    }
    facts.push(fact);
  }

  facts
}

#[cfg(test)]
mod tests {
  use chrono::NaiveDate;
  use dcf_core::fact::FactColumn;

  use super::*;

  fn date(y: i32, m: u32, d: u32) -> NaiveDate { NaiveDate::from_ymd_opt(y, m, d).unwrap() }

  const TIMESERIES: &str = r#"{
    "timeseries": {
      "result": [
        {
          "meta": {"symbol": ["CAST.ST"], "type": ["annualFreeCashFlow"]},
          "timestamp": [1672444800, 1703980800],
          "annualFreeCashFlow": [
            {"asOfDate": "2022-12-31", "periodType": "12M",
             "reportedValue": {"raw": 3100000000.0, "fmt": "3.1B"}},
            {"asOfDate": "2023-12-31", "periodType": "12M",
             "reportedValue": {"raw": 3400000000.0, "fmt": "3.4B"}}
          ]
        },
        {
          "meta": {"symbol": ["CAST.ST"], "type": ["annualTaxRateForCalcs"]},
          "timestamp": [1703980800],
          "annualTaxRateForCalcs": [
            null,
            {"asOfDate": "2023-12-31", "periodType": "12M",
             "reportedValue": {"raw": 0.206, "fmt": "0.21"}}
          ]
        },
        {
          "meta": {"symbol": ["CAST.ST"], "type": ["annualNetDebt"]}
        }
      ],
      "error": null
    }
  }"#;

  fn info() -> Info {
    Info::from_entries([
      ("impliedSharesOutstanding", Some(492_000_000.0)),
      ("marketCap", Some(55_000_000_000.0)),
      ("beta", Some(1.31)),
      ("beta", Some(9.99)),
      ("trailingPE", None),
    ])
  }

  // 2023-12-27 .. 2024-01-04 sessions at 08:00 UTC, Stockholm (+1h). The
  // 12-29 session has no usable close.
  fn closes() -> DailyCloses {
    DailyCloses::from_sessions(
      [
        (1_703_664_000, 101.0),
        (1_703_750_400, 102.0),
        (1_703_836_800, f64::NAN),
        (1_704_182_400, 104.0),
        (1_704_268_800, 105.0),
        (1_704_355_200, 106.0),
      ],
      3600,
    )
  }

  fn field_map() -> FieldMap {
    FieldMap::from_entries([
      (Category::Cashflow, "freecashflow", FactColumn::Fcf),
      (Category::Balancesheet, "NetDebt", FactColumn::TotalDebt),
      (Category::Financials, "TaxRateForCalcs", FactColumn::TaxRate),
      (Category::Info, "impliedsharesoutstanding", FactColumn::SharesOutstanding),
      (Category::Info, "beta", FactColumn::Beta),
      (Category::Info, "trailingPE", FactColumn::MarketCap),
      (Category::Custom, "share_price", FactColumn::SharePrice),
    ])
  }

  #[test]
  fn series_type_restores_canonical_case() {
    assert_eq!(series_type("freecashflow"), "annualFreeCashFlow");
    assert_eq!(series_type("NetDebt"), "annualNetDebt");
    assert_eq!(series_type("Tax Rate For Calcs"), "annualTaxRateForCalcs");
    assert_eq!(series_type("SomethingNew"), "annualSomethingNew");
  }

  #[test]
  fn timeseries_values_by_year() {
    let s = parse_timeseries(TIMESERIES).unwrap();
    assert_eq!(s.value_in_year("FreeCashFlow", 2023), Some(3.4e9));
    assert_eq!(s.value_in_year("freecashflow", 2022), Some(3.1e9));
    assert_eq!(s.value_in_year("Free Cash Flow", 2022), Some(3.1e9));
    assert_eq!(s.value_in_year("TaxRateForCalcs", 2022), None);
    assert!(s.series("NetDebt").is_empty());
  }

  #[test]
  fn timeseries_error_object_is_reported() {
    let body = r#"{"timeseries":{"result":null,
      "error":{"code":"Bad Request","description":"Invalid symbol"}}}"#;
    let err = parse_timeseries(body).unwrap_err();
    assert!(matches!(err, Error::Api { message, .. } if message == "Invalid symbol"));
  }

  #[test]
  fn fiscal_dates_prefer_income_statement() {
    let s = parse_timeseries(TIMESERIES).unwrap();
    let dates = fiscal_dates(&s, &field_map());
    assert_eq!(dates.len(), 2);
    assert_eq!(dates[&2023], date(2023, 12, 31));
    assert_eq!(dates[&2022], date(2022, 12, 31));
  }

  #[test]
  fn fiscal_dates_empty_without_statements() {
    let dates = fiscal_dates(&Statements::default(), &field_map());
    assert!(dates.is_empty());
  }

  #[test]
  fn info_keeps_first_value_and_skips_missing() {
    let info = info();
    assert_eq!(info.len(), 3);
    assert_eq!(info.get("impliedsharesoutstanding"), Some(492_000_000.0));
    assert_eq!(info.get("MARKETCAP"), Some(55_000_000_000.0));
    assert_eq!(info.get("beta"), Some(1.31));
    assert_eq!(info.get("trailingPE"), None);
  }

  #[test]
  fn timeseries_without_error_key_parses() {
    let body = r#"{"timeseries":{"result":[]}}"#;
    assert!(parse_timeseries(body).unwrap().is_empty());
  }

  #[test]
  fn closest_close_within_window() {
    let closes = closes();
    assert_eq!(closes.len(), 5);

    // 12-29 has no close, leaving 01-02 09:00 nearer than 12-28 09:00.
    assert_eq!(closes.closest_to(date(2023, 12, 31)), Some(104.0));
    assert_eq!(closes.closest_to(date(2024, 1, 3)), Some(105.0));
    assert_eq!(closes.closest_to(date(2023, 6, 30)), None);
  }

  #[test]
  fn assemble_builds_one_fact_per_year() {
    let statements = parse_timeseries(TIMESERIES).unwrap();
    let info = info();
    let closes = closes();
    let fields = field_map();
    let fiscal = fiscal_dates(&statements, &fields);

    let facts = assemble("CAST.ST", &fields, &statements, &info, &fiscal, &closes);

    assert_eq!(facts.len(), 2);
    let latest = &facts[0];
    assert_eq!(latest.year, 2023);
    assert_eq!(latest.fcf, Some(3.4e9));
    assert_eq!(latest.tax_rate, Some(0.206));
    assert_eq!(latest.total_debt, None);
    assert_eq!(latest.beta, Some(1.31));
    assert_eq!(latest.market_cap, None);
    assert_eq!(latest.share_price, Some(104.0));

    let prior = &facts[1];
    assert_eq!(prior.year, 2022);
    assert_eq!(prior.tax_rate, None);
    assert_eq!(prior.shares_outstanding, Some(492_000_000.0));
    assert_eq!(prior.share_price, None);
  }

  #[test]
  fn wants_share_price_ignores_case() {
    assert!(wants_share_price(&field_map()));
    assert!(!wants_share_price(&FieldMap::from_entries([(
      Category::Custom,
      "SHARE-PRICE",
      FactColumn::SharePrice,
    )])));
  }
}
