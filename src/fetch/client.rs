use std::sync::Arc;
use std::time::Duration;

use chrono::NaiveDate;
use log::{debug, warn};
use reqwest::{Client, Url};

use crate::config::ProviderConfig;
use crate::error::{AppError, ClassifiedError, Context};
use crate::scheduler::{CompletionHandle, Dispatcher};

use super::classify::{classify_status, classify_transport};
use super::history::{decode_daily_bars, PriceHistory};
use super::request::{daily_bars_url, normalize_ticker, redact, tickers_url, with_api_key};
use super::tickers::{decode_ticker_page, TickerPage, TickerQuery};
use super::FetchResult;

/// Market data provider client. Every request it makes waits its turn in the shared [`Dispatcher`].
#[derive(Clone)]
pub struct MarketDataClient {
    http: Client,
    config: Arc<ProviderConfig>,
    dispatcher: Dispatcher,
}

impl MarketDataClient {
    pub fn new(config: ProviderConfig, dispatcher: Dispatcher) -> FetchResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to construct market data HTTP client")?;
        Self::with_http_client(config, dispatcher, http)
    }

    /// Use a preconfigured HTTP client. The configured timeout is still applied per request.
    pub fn with_http_client(
        config: ProviderConfig,
        dispatcher: Dispatcher,
        http: Client,
    ) -> FetchResult<Self> {
        if config.api_key.trim().is_empty() {
            return Err(AppError::MissingCredential);
        }

        Ok(Self {
            http,
            config: Arc::new(config),
            dispatcher,
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub async fn search_tickers(&self, query: &TickerQuery) -> FetchResult<TickerPage> {
        let url = tickers_url(&self.config.base_url, &self.config.api_key, query)?;
        self.submit(url, decode_ticker_page).await
    }

    /// Follow the `next_url` cursor of a previous [`TickerPage`].
    pub async fn next_ticker_page(&self, next_url: &str) -> FetchResult<TickerPage> {
        let url = with_api_key(next_url, &self.config.api_key)?;
        self.submit(url, decode_ticker_page).await
    }

    /// Daily bars for `ticker` between `from` and `to`, both inclusive.
    pub async fn daily_bars(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> FetchResult<PriceHistory> {
        let ticker = normalize_ticker(ticker)?;
        if from > to {
            return Err(AppError::message(format!(
                "Start date {from} is after end date {to}"
            )));
        }

        let url = daily_bars_url(&self.config.base_url, &self.config.api_key, &ticker, from, to)?;
        self.submit(url, move |body| decode_daily_bars(body, &ticker))
            .await
    }

    fn submit<T, D>(&self, url: Url, decode: D) -> CompletionHandle<T>
    where
        T: Send + 'static,
        D: FnOnce(&str) -> Result<T, ClassifiedError> + Send + 'static,
    {
        let http = self.http.clone();
        let timeout = self.config.timeout;
        self.dispatcher.schedule(move || async move {
            let body = perform(&http, url, timeout).await?;
            Ok::<T, AppError>(decode(&body)?)
        })
    }
}

async fn perform(http: &Client, url: Url, timeout: Duration) -> FetchResult<String> {
    let label = redact(&url);
    debug!("GET {label}");

    let response = http
        .get(url)
        .timeout(timeout)
        .send()
        .await
        .map_err(classify_transport)?;
    let status = response.status();
    let body = response.text().await.map_err(classify_transport)?;

    if !status.is_success() {
        let err = classify_status(status, &body);
        warn!("{label} failed: {err}");
        return Err(err.into());
    }

    Ok(body)
}
