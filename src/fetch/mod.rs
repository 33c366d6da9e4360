use crate::error::Result;

pub mod classify;
pub mod client;
pub mod decode;
pub mod history;
pub mod request;
pub mod tickers;

pub use client::MarketDataClient;
pub use history::{DailyBar, PriceHistory};
pub use tickers::{TickerInfo, TickerPage, TickerQuery};

pub type FetchResult<T> = Result<T>;
