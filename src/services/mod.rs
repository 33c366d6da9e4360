pub mod history;
pub mod retry;

pub use history::HistoryService;
pub use retry::RetryPolicy;
