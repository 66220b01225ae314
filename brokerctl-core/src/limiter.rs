use futures::stream::{self, StreamExt};
use std::future::Future;

/// Default cap on simultaneous broker operations issued from one batch.
pub const DEFAULT_CONCURRENCY: usize = 250;

/// Bounded-concurrency fan-out over a batch of items.
///
/// Every item is attempted; at most `limit` futures are polled at once and the batch completes
/// when all of them did. Outputs are returned in input order. Operations are expected to handle
/// their own failures, so one failing item never stops its siblings.
#[derive(Debug, Clone, Copy)]
pub struct Limiter {
    limit: usize,
}

impl Default for Limiter {
    fn default() -> Self {
        Limiter::new(DEFAULT_CONCURRENCY)
    }
}

impl Limiter {
    pub fn new(limit: usize) -> Self {
        Limiter {
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub async fn run<I, F, Fut>(&self, items: I, f: F) -> Vec<Fut::Output>
    where
        I: IntoIterator,
        F: FnMut(I::Item) -> Fut,
        Fut: Future,
    {
        // the futures are built before the stream so a borrowing `f` does not end up inside it
        let futs: Vec<Fut> = items.into_iter().map(f).collect();
        stream::iter(futs).buffered(self.limit).collect().await
    }
}
