use chrono::NaiveDate;
use reqwest::Url;

use crate::error::{AppError, Context};

use super::tickers::TickerQuery;
use super::FetchResult;

const API_KEY_PARAM: &str = "apiKey";
/// Upper bound the provider accepts for aggregate rows in one response.
const AGGREGATES_LIMIT: &str = "50000";

pub fn daily_bars_url(
    base_url: &str,
    api_key: &str,
    ticker: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> FetchResult<Url> {
    let from = from.format("%Y-%m-%d").to_string();
    let to = to.format("%Y-%m-%d").to_string();
    let mut url = endpoint(
        base_url,
        &["v2", "aggs", "ticker", ticker, "range", "1", "day", &from, &to],
    )?;

    url.query_pairs_mut()
        .append_pair("adjusted", "true")
        .append_pair("sort", "asc")
        .append_pair("limit", AGGREGATES_LIMIT)
        .append_pair(API_KEY_PARAM, api_key);

    Ok(url)
}

pub fn tickers_url(base_url: &str, api_key: &str, query: &TickerQuery) -> FetchResult<Url> {
    let mut url = endpoint(base_url, &["v3", "reference", "tickers"])?;

    {
        let mut pairs = url.query_pairs_mut();
        pairs.append_pair("market", &query.market);
        if let Some(kind) = &query.ticker_type {
            pairs.append_pair("type", kind);
        }
        pairs.append_pair("active", if query.active { "true" } else { "false" });
        if let Some(search) = query.search.as_deref().map(str::trim) {
            if !search.is_empty() {
                pairs.append_pair("search", search);
            }
        }
        pairs
            .append_pair("sort", "ticker")
            .append_pair("order", "asc")
            .append_pair("limit", &query.limit.to_string())
            .append_pair(API_KEY_PARAM, api_key);
    }

    Ok(url)
}

/// Attach the credential to a pagination cursor returned by the provider, which omits it.
pub fn with_api_key(next_url: &str, api_key: &str) -> FetchResult<Url> {
    let mut url = Url::parse(next_url)
        .with_context(|| format!("Invalid pagination URL returned by provider: {next_url}"))?;

    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != API_KEY_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    url.query_pairs_mut()
        .clear()
        .extend_pairs(retained)
        .append_pair(API_KEY_PARAM, api_key);

    Ok(url)
}

/// Render `url` for logs with the credential stripped.
pub fn redact(url: &Url) -> String {
    let mut shown = url.clone();
    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| key != API_KEY_PARAM)
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    if retained.is_empty() {
        shown.set_query(None);
    } else {
        shown.query_pairs_mut().clear().extend_pairs(retained);
    }
    shown.to_string()
}

/// Upper-case and trim a ticker, refusing empty input.
pub fn normalize_ticker(ticker: &str) -> FetchResult<String> {
    let normalized = ticker.trim().to_uppercase();
    if normalized.is_empty() {
        return Err(AppError::message("Ticker symbol must not be empty"));
    }
    Ok(normalized)
}

fn endpoint(base_url: &str, segments: &[&str]) -> FetchResult<Url> {
    let mut url = Url::parse(base_url)
        .with_context(|| format!("Invalid provider base URL: {base_url}"))?;

    url.path_segments_mut()
        .map_err(|_| AppError::config(format!("Provider base URL cannot carry a path: {base_url}")))?
        .pop_if_empty()
        .extend(segments);

    Ok(url)
}
