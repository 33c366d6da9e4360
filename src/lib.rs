pub mod app;
pub mod config;
pub mod error;
pub mod fetch;
pub mod scheduler;
pub mod services;

pub use error::{AppError, ClassifiedError, ErrorKind, Result};
pub use fetch::MarketDataClient;
pub use scheduler::Dispatcher;
