use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use stock_compare::app::ComparisonSelection;
use stock_compare::config::{ProviderConfig, RateLimitConfig};
use stock_compare::fetch::TickerQuery;
use stock_compare::services::{HistoryService, RetryPolicy};
use stock_compare::{AppError, Dispatcher, ErrorKind, MarketDataClient};

/// Local stand-in for the provider: serves canned responses in order, repeating the last.
struct MockProvider {
    base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockProvider {
    async fn start(responses: Vec<(u16, &'static str)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));

        let seen = Arc::clone(&requests);
        tokio::spawn(async move {
            let mut served = 0;
            while let Ok((mut socket, _)) = listener.accept().await {
                let request_line = read_request_line(&mut socket).await;
                seen.lock().unwrap().push(request_line);

                let (status, body) = responses[served.min(responses.len() - 1)];
                served += 1;
                let response = format!(
                    "HTTP/1.1 {status} STATUS\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        Self { base_url, requests }
    }

    fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, index: usize) -> String {
        self.requests.lock().unwrap()[index].clone()
    }
}

async fn read_request_line(socket: &mut TcpStream) -> String {
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 1024];
    while !buffer.windows(4).any(|window| window == b"\r\n\r\n") {
        match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(read) => buffer.extend_from_slice(&chunk[..read]),
        }
    }
    String::from_utf8_lossy(&buffer)
        .lines()
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Accepts connections and never answers; returns the base URL and an accept counter.
async fn silent_provider() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let accepted = Arc::new(AtomicUsize::new(0));

    let counter = Arc::clone(&accepted);
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            counter.fetch_add(1, Ordering::SeqCst);
            held.push(socket);
        }
    });

    (base_url, accepted)
}

fn client_for(base_url: &str, timeout: Duration) -> MarketDataClient {
    let dispatcher =
        Dispatcher::new(RateLimitConfig::new(100, Duration::from_secs(1)).unwrap()).unwrap();
    let config = ProviderConfig::new("test-key")
        .with_base_url(base_url)
        .with_timeout(timeout);
    let http = reqwest::Client::builder().no_proxy().build().unwrap();
    MarketDataClient::with_http_client(config, dispatcher, http).unwrap()
}

fn date(raw: &str) -> NaiveDate {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap()
}

const ONE_BAR_DELAYED: &str = r#"{"ticker":"AAPL","status":"DELAYED","adjusted":true,"resultsCount":1,"results":[{"v":100,"vw":10.5,"o":10,"c":11,"h":12,"l":9,"t":1704171600000,"n":5}]}"#;
const EMPTY_RESULTS: &str = r#"{"ticker":"AAPL","status":"OK","resultsCount":0,"results":[]}"#;
const RATE_LIMITED: &str =
    r#"{"status":"ERROR","request_id":"abc","error":"You've exceeded the maximum requests per minute"}"#;

#[tokio::test]
async fn missing_api_key_fails_at_construction() {
    let dispatcher = Dispatcher::new(RateLimitConfig::free_tier()).unwrap();
    let result = MarketDataClient::new(ProviderConfig::new("  "), dispatcher);
    assert!(matches!(result, Err(AppError::MissingCredential)));
}

#[tokio::test]
async fn rate_limited_response_is_classified_and_not_retried() {
    let provider = MockProvider::start(vec![(429, RATE_LIMITED)]).await;
    let client = client_for(&provider.base_url, Duration::from_secs(5));
    let service = HistoryService::new(client)
        .with_retry_policy(RetryPolicy::new(2, Duration::from_millis(10)));

    let err = service
        .daily_bars("AAPL", date("2024-01-02"), date("2024-01-31"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), Some(ErrorKind::RateLimit));
    assert!(!RetryPolicy::default().should_retry(&err, 0));
    assert_eq!(provider.request_count(), 1);
}

#[tokio::test]
async fn empty_results_resolve_to_empty_history() {
    let provider = MockProvider::start(vec![(200, EMPTY_RESULTS)]).await;
    let client = client_for(&provider.base_url, Duration::from_secs(5));

    let history = client
        .daily_bars("aapl", date("2024-01-02"), date("2024-01-31"))
        .await
        .unwrap();

    assert!(history.is_empty());
    assert!(!history.delayed);
    let request = provider.request(0);
    assert!(request.starts_with("GET /v2/aggs/ticker/AAPL/range/1/day/2024-01-02/2024-01-31?"));
    assert!(request.contains("apiKey=test-key"));
}

#[tokio::test]
async fn delayed_status_carries_flag_and_bar() {
    let provider = MockProvider::start(vec![(200, ONE_BAR_DELAYED)]).await;
    let client = client_for(&provider.base_url, Duration::from_secs(5));

    let history = client
        .daily_bars("AAPL", date("2024-01-02"), date("2024-01-03"))
        .await
        .unwrap();

    assert!(history.delayed);
    assert_eq!(history.bars.len(), 1);
    assert_eq!(history.bars[0].date, date("2024-01-02"));
    assert_eq!(client.dispatcher().status().requests_in_window, 1);
}

#[tokio::test]
async fn status_codes_map_onto_error_kinds() {
    let provider = MockProvider::start(vec![
        (401, r#"{"status":"ERROR","error":"Unknown API Key"}"#),
        (404, "not found"),
        (500, "<html>oops</html>"),
        (200, "this is not json"),
    ])
    .await;
    let client = client_for(&provider.base_url, Duration::from_secs(5));
    let (from, to) = (date("2024-01-02"), date("2024-01-03"));

    let mut kinds = Vec::new();
    for _ in 0..4 {
        let err = client.daily_bars("ZZZZ", from, to).await.unwrap_err();
        kinds.push(err.kind());
    }

    assert_eq!(
        kinds,
        vec![
            Some(ErrorKind::Unauthorized),
            Some(ErrorKind::NotFound),
            Some(ErrorKind::ApiError),
            Some(ErrorKind::ApiError),
        ]
    );
}

#[tokio::test]
async fn slow_provider_times_out_as_network_error() {
    let (base_url, _) = silent_provider().await;
    let client = client_for(&base_url, Duration::from_millis(200));

    let err = client
        .daily_bars("AAPL", date("2024-01-02"), date("2024-01-03"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), Some(ErrorKind::NetworkError));
}

#[tokio::test]
async fn server_errors_are_retried_twice_then_surface() {
    let provider = MockProvider::start(vec![(502, "bad gateway")]).await;
    let client = client_for(&provider.base_url, Duration::from_secs(5));
    let service = HistoryService::new(client)
        .with_retry_policy(RetryPolicy::new(2, Duration::from_millis(10)));

    let err = service
        .daily_bars("AAPL", date("2024-01-02"), date("2024-01-03"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), Some(ErrorKind::ApiError));
    assert_eq!(provider.request_count(), 3);
}

#[tokio::test]
async fn cached_history_skips_the_provider() {
    let provider = MockProvider::start(vec![(200, ONE_BAR_DELAYED)]).await;
    let client = client_for(&provider.base_url, Duration::from_secs(5));
    let service = HistoryService::new(client);
    let (from, to) = (date("2024-01-02"), date("2024-01-03"));

    let first = service.daily_bars("AAPL", from, to).await.unwrap();
    let second = service.daily_bars("aapl", from, to).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(provider.request_count(), 1);
    assert_eq!(service.cached_entries(), 1);

    service.invalidate();
    service.daily_bars("AAPL", from, to).await.unwrap();
    assert_eq!(provider.request_count(), 2);
}

#[tokio::test]
async fn comparison_fetches_each_ticker_in_order() {
    let provider = MockProvider::start(vec![(200, ONE_BAR_DELAYED), (200, EMPTY_RESULTS)]).await;
    let client = client_for(&provider.base_url, Duration::from_secs(5));
    let service = HistoryService::new(client);
    let selection =
        ComparisonSelection::new(["AAPL", "MSFT"], date("2024-01-02"), date("2024-01-03")).unwrap();

    let comparison = service.compare(&selection).await.unwrap();

    assert_eq!(comparison.series.len(), 2);
    assert!(comparison.any_delayed());
    assert!(provider.request(0).contains("/ticker/AAPL/"));
    assert!(provider.request(1).contains("/ticker/MSFT/"));
}

#[tokio::test]
async fn ticker_pagination_reattaches_credentials() {
    let provider = MockProvider::start(vec![(
        200,
        r#"{"status":"OK","count":1,"results":[{"ticker":"AAPL","name":"Apple Inc.","market":"stocks","locale":"us","type":"CS","active":true}]}"#,
    )])
    .await;
    let client = client_for(&provider.base_url, Duration::from_secs(5));

    let page = client
        .search_tickers(&TickerQuery::search("apple"))
        .await
        .unwrap();
    assert_eq!(page.tickers[0].ticker, "AAPL");
    assert!(provider.request(0).contains("search=apple"));

    let cursor = format!("{}/v3/reference/tickers?cursor=next", provider.base_url);
    client.next_ticker_page(&cursor).await.unwrap();
    let second = provider.request(1);
    assert!(second.contains("cursor=next"));
    assert!(second.contains("apiKey=test-key"));
}

#[tokio::test]
async fn clearing_the_queue_stops_pending_retries() {
    let (base_url, accepted) = silent_provider().await;
    let client = client_for(&base_url, Duration::from_millis(200));
    let dispatcher = client.dispatcher().clone();
    let service = HistoryService::new(client)
        .with_retry_policy(RetryPolicy::new(2, Duration::from_millis(10)));

    let lookup = service.daily_bars("AAPL", date("2024-01-02"), date("2024-01-03"));
    let cancel = async {
        while accepted.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        dispatcher.clear()
    };
    let (result, cleared) = tokio::join!(lookup, cancel);

    assert_eq!(cleared, 0);
    assert!(matches!(result, Err(AppError::QueueCleared)));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn expired_entries_are_swept_on_insert() {
    let provider = MockProvider::start(vec![(200, ONE_BAR_DELAYED)]).await;
    let client = client_for(&provider.base_url, Duration::from_secs(5));
    let service = HistoryService::new(client).with_ttl(Duration::from_millis(50));
    let (from, to) = (date("2024-01-02"), date("2024-01-03"));

    service.daily_bars("AAPL", from, to).await.unwrap();
    service.daily_bars("MSFT", from, to).await.unwrap();
    assert_eq!(service.cached_entries(), 2);

    tokio::time::sleep(Duration::from_millis(100)).await;
    service.daily_bars("GOOG", from, to).await.unwrap();
    assert_eq!(service.cached_entries(), 1);
}

#[tokio::test]
async fn later_pages_are_retried_like_the_first() {
    let provider = MockProvider::start(vec![
        (502, "bad gateway"),
        (200, r#"{"status":"OK","results":[{"ticker":"MSFT","name":"Microsoft Corp"}]}"#),
    ])
    .await;
    let client = client_for(&provider.base_url, Duration::from_secs(5));
    let service = HistoryService::new(client)
        .with_retry_policy(RetryPolicy::new(2, Duration::from_millis(10)));

    let cursor = format!("{}/v3/reference/tickers?cursor=next", provider.base_url);
    let page = service.next_ticker_page(&cursor).await.unwrap();

    assert_eq!(page.tickers[0].ticker, "MSFT");
    assert_eq!(provider.request_count(), 2);
}
