//! Sliding-window admission control for calls to the market data provider.
//!
//! Every provider request is submitted through [`Dispatcher::schedule`]. A single worker
//! drains the queue in submission order, dispatching at most one request at a time and
//! never more than `max_requests` per rolling `window`.

pub mod dispatcher;
pub mod queue;
pub mod window;

pub use dispatcher::{Dispatcher, DispatcherState, StatusSnapshot, MIN_WAIT};
pub use queue::{CompletionHandle, QueueStats};
pub use window::WindowTracker;
