use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{AppError, Result};

/// Type-erased unit of work together with the sender that settles its caller.
pub(crate) trait Job: Send {
    /// Execute the work and deliver its outcome to the waiting caller.
    fn run(self: Box<Self>) -> BoxFuture<'static, ()>;

    /// Settle the caller with `error` without executing the work.
    fn reject(self: Box<Self>, error: AppError);
}

struct ScheduledJob<F, T> {
    execute: F,
    sender: oneshot::Sender<Result<T>>,
}

impl<F, Fut, T> Job for ScheduledJob<F, T>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    fn run(self: Box<Self>) -> BoxFuture<'static, ()> {
        let ScheduledJob { execute, sender } = *self;
        async move {
            let outcome = AssertUnwindSafe(async move { execute().await })
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(AppError::message("scheduled request panicked")));
            // The caller may have dropped its handle; nothing left to notify.
            let _ = sender.send(outcome);
        }
        .boxed()
    }

    fn reject(self: Box<Self>, error: AppError) {
        let _ = self.sender.send(Err(error));
    }
}

pub(crate) struct WorkItem {
    pub id: u64,
    pub enqueued_at: Instant,
    pub job: Box<dyn Job>,
}

impl WorkItem {
    /// Package `execute` as a queued item and hand back the caller's side of the channel.
    pub fn new<F, Fut, T>(id: u64, enqueued_at: Instant, execute: F) -> (Self, CompletionHandle<T>)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let item = Self {
            id,
            enqueued_at,
            job: Box::new(ScheduledJob { execute, sender }),
        };
        (item, CompletionHandle { id, receiver })
    }
}

/// Awaitable result of a scheduled request.
///
/// Resolves with whatever the work produced, with [`AppError::QueueCleared`] when the
/// queue was cleared before dispatch, or [`AppError::DispatcherStopped`] when the
/// dispatcher went away first.
#[derive(Debug)]
pub struct CompletionHandle<T> {
    id: u64,
    receiver: oneshot::Receiver<Result<T>>,
}

impl<T> CompletionHandle<T> {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<T> Future for CompletionHandle<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.receiver).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(AppError::DispatcherStopped)),
            Poll::Pending => Poll::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub total_queued: usize,
    pub average_wait_time: Duration,
    pub oldest_request_age: Duration,
}

/// FIFO of work that has not been dispatched yet.
#[derive(Default)]
pub(crate) struct PendingQueue {
    items: VecDeque<WorkItem>,
}

impl PendingQueue {
    pub fn push(&mut self, item: WorkItem) {
        self.items.push_back(item);
    }

    pub fn pop_front(&mut self) -> Option<WorkItem> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn drain(&mut self) -> Vec<WorkItem> {
        self.items.drain(..).collect()
    }

    pub fn stats(&self, now: Instant) -> QueueStats {
        if self.items.is_empty() {
            return QueueStats {
                total_queued: 0,
                average_wait_time: Duration::ZERO,
                oldest_request_age: Duration::ZERO,
            };
        }

        let ages = self
            .items
            .iter()
            .map(|item| now.saturating_duration_since(item.enqueued_at));
        let total: Duration = ages.clone().sum();
        let oldest = ages.max().unwrap_or_default();

        QueueStats {
            total_queued: self.items.len(),
            average_wait_time: total / self.items.len() as u32,
            oldest_request_age: oldest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejected_item_settles_handle_with_error() {
        let (item, handle) = WorkItem::new(7, Instant::now(), || async { Ok(1_u32) });
        assert_eq!(handle.id(), 7);

        item.job.reject(AppError::QueueCleared);
        assert!(matches!(handle.await, Err(AppError::QueueCleared)));
    }

    #[tokio::test]
    async fn dropped_item_reports_stopped_dispatcher() {
        let (item, handle) = WorkItem::new(1, Instant::now(), || async { Ok(()) });
        drop(item);
        assert!(matches!(handle.await, Err(AppError::DispatcherStopped)));
    }

    #[tokio::test]
    async fn panicking_work_is_settled_as_error() {
        let (item, handle) = WorkItem::new(1, Instant::now(), || async {
            if true {
                panic!("boom");
            }
            Ok(())
        });
        item.job.run().await;
        assert!(matches!(handle.await, Err(AppError::Message(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn stats_track_queued_ages() {
        let mut queue = PendingQueue::default();
        let start = Instant::now();
        assert_eq!(queue.stats(start).total_queued, 0);
        assert_eq!(queue.stats(start).average_wait_time, Duration::ZERO);

        let (first, _h1) = WorkItem::new(1, start, || async { Ok(()) });
        let (second, _h2) =
            WorkItem::new(2, start + Duration::from_millis(200), || async { Ok(()) });
        queue.push(first);
        queue.push(second);

        let stats = queue.stats(start + Duration::from_millis(400));
        assert_eq!(stats.total_queued, 2);
        assert_eq!(stats.average_wait_time, Duration::from_millis(300));
        assert_eq!(stats.oldest_request_age, Duration::from_millis(400));

        assert_eq!(queue.pop_front().map(|item| item.id), Some(1));
        assert_eq!(queue.len(), 1);
    }
}
