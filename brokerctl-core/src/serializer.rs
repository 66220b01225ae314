use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Duration, Instant};
use tracing::{debug, warn};

/// Runs an asynchronous operation serially in a background task.
///
/// Triggers collapse: while an execution is in flight any number of [`Serializer::trigger`]
/// calls queue exactly one re-run. A failed execution is retried once after `retry_delay`,
/// unless a new trigger arrives first, in which case the trigger runs it immediately and the
/// pending retry is dropped. A zero `retry_delay` disables retries.
#[derive(Debug)]
pub struct Serializer {
    name: &'static str,
    notify: Arc<Notify>,
    handle: JoinHandle<()>,
}

impl Serializer {
    pub fn spawn<F, Fut, E>(name: &'static str, retry_delay: Duration, op: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let notify = Arc::new(Notify::new());
        let wakeup = Arc::clone(&notify);

        let handle = tokio::spawn(async move {
            let mut retry_at: Option<Instant> = None;
            loop {
                match retry_at {
                    Some(deadline) => {
                        tokio::select! {
                            _ = wakeup.notified() => {}
                            _ = sleep_until(deadline) => {
                                debug!(name, "retrying failed serialized operation");
                            }
                        }
                    }
                    None => wakeup.notified().await,
                }
                retry_at = None;

                if let Err(e) = op().await {
                    if retry_delay.is_zero() {
                        warn!(name, error = %e, "serialized operation failed");
                    } else {
                        warn!(
                            name,
                            error = %e,
                            retry_in_ms = retry_delay.as_millis() as u64,
                            "rescheduling failed serialized operation"
                        );
                        retry_at = Some(Instant::now() + retry_delay);
                    }
                }
            }
        });

        Serializer {
            name,
            notify,
            handle,
        }
    }

    /// Requests an execution; cancels any scheduled retry.
    pub fn trigger(&self) {
        self.notify.notify_one();
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl Drop for Serializer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
