//! [`YahooProvider`]: Yahoo Finance access for the pipeline.
//!
//! Statement series come from the fundamentals-timeseries endpoint over
//! `reqwest`. The quote summary and daily price history go through
//! [`yahoo_finance_api::YahooConnector`], which handles the cookie and crumb
//! the quote summary requires.

use std::{sync::Arc, time::Duration};

use chrono::{NaiveDate, NaiveTime, TimeDelta, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use yahoo_finance_api::YahooConnector;

use dcf_core::{
  fact::FinancialFact,
  fetch::{Category, FactProvider, FieldMap},
};

use crate::{
  Error, Result,
  parse::{
    DailyCloses, Info, PRICE_WINDOW_DAYS, Statements, assemble, fiscal_dates, parse_timeseries,
    series_type, wants_share_price,
  },
};

/// Earliest period requested from the time-series endpoint (mid 1985).
const SERIES_START: i64 = 493_590_046;

/// Connection settings for the fundamentals-timeseries endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YahooConfig {
  pub base_url:     String,
  pub timeout_secs: u64,
  pub user_agent:   String,
}

impl Default for YahooConfig {
  fn default() -> Self {
    Self {
      base_url:     "https://query2.finance.yahoo.com".into(),
      timeout_secs: 30,
      user_agent:   concat!("Mozilla/5.0 (compatible; dcf/", env!("CARGO_PKG_VERSION"), ")")
        .into(),
    }
  }
}

/// Fetches financial facts from Yahoo Finance.
///
/// Cheap to clone; clones share the HTTP client and the Yahoo session.
#[derive(Clone)]
pub struct YahooProvider {
  client:    Client,
  /// `get_ticker_info` refreshes the crumb and needs `&mut`.
  connector: Arc<Mutex<YahooConnector>>,
  config:    YahooConfig,
}

impl YahooProvider {
  pub fn new(config: YahooConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .user_agent(config.user_agent.clone())
      .build()?;
    let connector = YahooConnector::new()?;
    Ok(Self {
      client,
      connector: Arc::new(Mutex::new(connector)),
      config,
    })
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
  }

  async fn get_text(
    &self,
    endpoint: &'static str,
    path: &str,
    query: &[(&str, String)],
  ) -> Result<String> {
    let resp = self.client.get(self.url(path)).query(query).send().await?;
    let status = resp.status();
    if !status.is_success() {
      return Err(Error::Status { endpoint, status });
    }
    Ok(resp.text().await?)
  }

  // ── Endpoints ─────────────────────────────────────────────────────────────

  /// `GET /ws/fundamentals-timeseries/v1/finance/timeseries/<ticker>` for
  /// every statement field in `fields`.
  pub async fn statements(&self, ticker: &str, fields: &FieldMap) -> Result<Statements> {
    let types: Vec<String> = Category::FISCAL_PRIORITY
      .into_iter()
      .flat_map(|category| fields.fields(category).map(|(field, _)| series_type(field)))
      .collect();
    if types.is_empty() {
      return Ok(Statements::default());
    }

    let body = self
      .get_text(
        "timeseries",
        &format!("/ws/fundamentals-timeseries/v1/finance/timeseries/{ticker}"),
        &[
          ("symbol", ticker.to_owned()),
          ("type", types.join(",")),
          ("period1", SERIES_START.to_string()),
          ("period2", Utc::now().timestamp().to_string()),
        ],
      )
      .await?;
    parse_timeseries(&body)
  }

  /// Market cap, beta and share count from the quote summary.
  ///
  /// Yahoo only reports the current share count, so it also answers for
  /// `impliedSharesOutstanding`.
  pub async fn info(&self, ticker: &str) -> Result<Info> {
    let summary = {
      let mut connector = self.connector.lock().await;
      connector.get_ticker_info(ticker).await?
    };

    let data = summary
      .quote_summary
      .and_then(|q| q.result)
      .and_then(|r| r.into_iter().next())
      .ok_or_else(|| Error::Api {
        endpoint: "quoteSummary",
        message:  format!("no summary for {ticker}"),
      })?;

    let detail = data.summary_detail.as_ref();
    let stats = data.default_key_statistics.as_ref();
    let shares = stats.and_then(|s| s.shares_outstanding).map(|v| v as f64);

    Ok(Info::from_entries([
      ("marketCap", detail.and_then(|d| d.market_cap).map(|v| v as f64)),
      ("beta", detail.and_then(|d| d.beta)),
      ("sharesOutstanding", shares),
      ("impliedSharesOutstanding", shares),
    ]))
  }

  /// Daily closes between two dates.
  pub async fn daily_closes(
    &self,
    ticker: &str,
    from: NaiveDate,
    to: NaiveDate,
  ) -> Result<DailyCloses> {
    let unix = |d: NaiveDate| {
      OffsetDateTime::from_unix_timestamp(d.and_time(NaiveTime::MIN).and_utc().timestamp())
    };
    let (start, end) = (unix(from)?, unix(to)?);

    let response = {
      let connector = self.connector.lock().await;
      connector.get_quote_history(ticker, start, end).await?
    };
    let gmt_offset = response
      .metadata()
      .map(|meta| meta.gmtoffset as i64)
      .unwrap_or_default();
    let quotes = response.quotes()?;

    Ok(DailyCloses::from_sessions(
      quotes.iter().map(|q| (q.timestamp as i64, q.close)),
      gmt_offset,
    ))
  }
}

impl FactProvider for YahooProvider {
  type Error = Error;

  /// Statements must load; a failed info or price request only leaves the
  /// fields it would have filled empty.
  async fn fetch_entity(&self, ticker: &str, fields: &FieldMap) -> Result<Vec<FinancialFact>> {
    let statements = self.statements(ticker, fields).await?;

    let info = if fields.fields(Category::Info).next().is_some() {
      self.info(ticker).await.unwrap_or_else(|e| {
        warn!(%ticker, error = %e, "info unavailable, leaving info fields empty");
        Info::default()
      })
    } else {
      Info::default()
    };

    let fiscal = fiscal_dates(&statements, fields);
    let span = fiscal.values().min().copied().zip(fiscal.values().max().copied());
    let closes = match span {
      Some((first, last)) if wants_share_price(fields) => {
        let window = TimeDelta::days(PRICE_WINDOW_DAYS);
        self
          .daily_closes(ticker, first - window, last + window)
          .await
          .unwrap_or_else(|e| {
            warn!(%ticker, error = %e, "price history unavailable, leaving share price empty");
            DailyCloses::default()
          })
      }
      _ => DailyCloses::default(),
    };

    let facts = assemble(ticker, fields, &statements, &info, &fiscal, &closes);
    debug!(
      %ticker,
      years = facts.len(),
      info_fields = info.len(),
      sessions = closes.len(),
      "assembled facts"
    );
    Ok(facts)
  }
}
