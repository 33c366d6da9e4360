use chrono::{DateTime, NaiveDate};
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ClassifiedError, ErrorKind};

use super::classify::malformed_body;
use super::decode::{split_results, BodyStatus};

/// One trading day of OHLCV data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub vwap: Option<f64>,
    pub transactions: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceHistory {
    pub ticker: String,
    pub bars: Vec<DailyBar>,
    /// The provider flagged the data as delayed for the current plan.
    pub delayed: bool,
    pub adjusted: bool,
}

impl PriceHistory {
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn first_close(&self) -> Option<f64> {
        self.bars.first().map(|bar| bar.close)
    }

    pub fn last_close(&self) -> Option<f64> {
        self.bars.last().map(|bar| bar.close)
    }
}

#[derive(Debug, Deserialize)]
struct RawBar {
    o: f64,
    h: f64,
    l: f64,
    c: f64,
    #[serde(default)]
    v: f64,
    #[serde(default)]
    vw: Option<f64>,
    #[serde(default)]
    n: Option<u64>,
    /// Start of the aggregate window, Unix epoch milliseconds.
    t: i64,
}

impl RawBar {
    fn into_bar(self) -> Option<DailyBar> {
        let date = DateTime::from_timestamp_millis(self.t)?.date_naive();
        Some(DailyBar {
            date,
            open: self.o,
            high: self.h,
            low: self.l,
            close: self.c,
            volume: self.v,
            vwap: self.vw,
            transactions: self.n,
        })
    }
}

/// Normalize an aggregates response into a [`PriceHistory`] sorted by date.
///
/// Any row that is not a well-formed bar fails the whole response with `API_ERROR`.
pub fn decode_daily_bars(body: &str, ticker: &str) -> Result<PriceHistory, ClassifiedError> {
    let (root, status, rows) = split_results(body)?;

    let mut bars = rows
        .into_iter()
        .map(decode_bar)
        .collect::<Result<Vec<_>, _>>()?;
    bars.sort_by(|a, b| a.date.cmp(&b.date));
    debug!("decoded {} bars for {ticker}", bars.len());

    Ok(PriceHistory {
        ticker: ticker.to_string(),
        bars,
        delayed: status == BodyStatus::Delayed,
        adjusted: root.get("adjusted").and_then(Value::as_bool).unwrap_or(true),
    })
}

fn decode_bar(row: Value) -> Result<DailyBar, ClassifiedError> {
    let raw: RawBar = serde_json::from_value(row).map_err(|err| malformed_body(&err))?;
    let timestamp = raw.t;
    raw.into_bar().ok_or_else(|| {
        ClassifiedError::new(
            ErrorKind::ApiError,
            format!("Bar timestamp {timestamp} is out of range"),
        )
    })
}
