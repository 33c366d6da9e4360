use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::NaiveDate;
use futures::future::join_all;
use log::{debug, info};
use tokio::time::Instant;

use crate::app::{Comparison, ComparisonSelection};
use crate::error::Result;
use crate::fetch::request::normalize_ticker;
use crate::fetch::{MarketDataClient, PriceHistory, TickerPage, TickerQuery};

use super::retry::RetryPolicy;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HistoryKey {
    ticker: String,
    from: NaiveDate,
    to: NaiveDate,
}

struct CachedHistory {
    fetched_at: Instant,
    history: Arc<PriceHistory>,
}

/// Caching, retrying front for price history lookups.
///
/// Retries go back through the client, and therefore through the dispatcher queue, so they
/// count against the quota like any other call.
pub struct HistoryService {
    client: MarketDataClient,
    retry: RetryPolicy,
    ttl: Duration,
    cache: Mutex<HashMap<HistoryKey, CachedHistory>>,
}

impl HistoryService {
    pub fn new(client: MarketDataClient) -> Self {
        Self {
            client,
            retry: RetryPolicy::default(),
            ttl: DEFAULT_CACHE_TTL,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn client(&self) -> &MarketDataClient {
        &self.client
    }

    pub async fn daily_bars(
        &self,
        ticker: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Arc<PriceHistory>> {
        let key = HistoryKey {
            ticker: normalize_ticker(ticker)?,
            from,
            to,
        };

        if let Some(history) = self.cached(&key) {
            debug!("history cache hit for {} {}..{}", key.ticker, from, to);
            return Ok(history);
        }

        let history = self
            .with_retry(|| self.client.daily_bars(&key.ticker, from, to))
            .await?;
        if history.delayed {
            info!("{} history is delayed on the current plan", key.ticker);
        }

        let history = Arc::new(history);
        let mut cache = self.lock();
        cache.retain(|_, entry| entry.fetched_at.elapsed() < self.ttl);
        cache.insert(
            key,
            CachedHistory {
                fetched_at: Instant::now(),
                history: Arc::clone(&history),
            },
        );
        Ok(history)
    }

    pub async fn search_tickers(&self, query: &TickerQuery) -> Result<TickerPage> {
        self.with_retry(|| self.client.search_tickers(query)).await
    }

    /// Follow a pagination cursor under the same retry policy as the first page.
    pub async fn next_ticker_page(&self, next_url: &str) -> Result<TickerPage> {
        self.with_retry(|| self.client.next_ticker_page(next_url))
            .await
    }

    /// Fetch every selected ticker and line the closes up for comparison.
    ///
    /// Requests are queued in selection order; the dispatcher spaces them out as the quota requires.
    pub async fn compare(&self, selection: &ComparisonSelection) -> Result<Comparison> {
        let lookups = selection
            .tickers()
            .iter()
            .map(|ticker| self.daily_bars(ticker, selection.from(), selection.to()));

        let histories = join_all(lookups)
            .await
            .into_iter()
            .map(|result| result.map(|history| history.as_ref().clone()))
            .collect::<Result<Vec<_>>>()?;

        Ok(Comparison::build(selection, &histories))
    }

    pub fn cached_entries(&self) -> usize {
        self.lock().len()
    }

    pub fn invalidate(&self) {
        self.lock().clear();
    }

    /// Retry under the configured policy, giving up as soon as the dispatcher queue is cleared.
    async fn with_retry<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let dispatcher = self.client.dispatcher();
        let generation = dispatcher.clear_generation();
        self.retry
            .run_unless(|| dispatcher.clear_generation() != generation, operation)
            .await
    }

    fn cached(&self, key: &HistoryKey) -> Option<Arc<PriceHistory>> {
        let mut cache = self.lock();
        let fresh = cache
            .get(key)
            .filter(|entry| entry.fetched_at.elapsed() < self.ttl)
            .map(|entry| Arc::clone(&entry.history));
        if fresh.is_none() {
            cache.remove(key);
        }
        fresh
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<HistoryKey, CachedHistory>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
