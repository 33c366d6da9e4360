use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ClassifiedError;

use super::classify::malformed_body;
use super::decode::{split_results, BodyStatus};

const DEFAULT_MARKET: &str = "stocks";
const DEFAULT_LIMIT: u32 = 100;
/// Largest page size the reference endpoint serves.
pub const MAX_LIMIT: u32 = 1000;

/// Filters for the tradable-instrument listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickerQuery {
    pub search: Option<String>,
    pub market: String,
    /// Provider instrument type code, e.g. `CS` for common stock or `ETF`.
    pub ticker_type: Option<String>,
    pub active: bool,
    pub limit: u32,
}

impl Default for TickerQuery {
    fn default() -> Self {
        Self {
            search: None,
            market: DEFAULT_MARKET.to_string(),
            ticker_type: None,
            active: true,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl TickerQuery {
    pub fn search(term: impl Into<String>) -> Self {
        Self {
            search: Some(term.into()),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, ticker_type: impl Into<String>) -> Self {
        self.ticker_type = Some(ticker_type.into());
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = limit.clamp(1, MAX_LIMIT);
        self
    }

    pub fn including_inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerInfo {
    pub ticker: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub locale: String,
    #[serde(default)]
    pub primary_exchange: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub active: bool,
    #[serde(rename = "currency_name", default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct TickerPage {
    pub tickers: Vec<TickerInfo>,
    /// Cursor URL for the following page, without credentials.
    pub next_url: Option<String>,
    pub delayed: bool,
}

impl TickerPage {
    pub fn has_more(&self) -> bool {
        self.next_url.is_some()
    }
}

pub fn decode_ticker_page(body: &str) -> Result<TickerPage, ClassifiedError> {
    let (root, status, rows) = split_results(body)?;

    let tickers = rows
        .into_iter()
        .map(|row| serde_json::from_value::<TickerInfo>(row).map_err(|err| malformed_body(&err)))
        .collect::<Result<Vec<_>, _>>()?;

    let next_url = root
        .get("next_url")
        .and_then(Value::as_str)
        .filter(|url| !url.is_empty())
        .map(str::to_string);

    Ok(TickerPage {
        tickers,
        next_url,
        delayed: status == BodyStatus::Delayed,
    })
}
