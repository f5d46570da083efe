use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::clock::Clock;
use super::transport::TransportError;

const DEFAULT_INITIAL_DELAY_MS: u64 = 1000;
const DEFAULT_MAX_DELAY_MS: u64 = 15_000;
const DEFAULT_GROWTH_FACTOR: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollerOptions {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub growth_factor: f64,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_millis(DEFAULT_MAX_DELAY_MS),
            growth_factor: DEFAULT_GROWTH_FACTOR,
        }
    }
}

/// Delay between polls: reset on success, multiplied on failure up to a cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    growth: f64,
    current: Duration,
    failures: u32,
}

impl Backoff {
    pub fn new(options: &PollerOptions) -> Self {
        Self {
            initial: options.initial_delay,
            max: options.max_delay.max(options.initial_delay),
            growth: options.growth_factor.max(1.0),
            current: options.initial_delay,
            failures: 0,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures
    }

    pub fn on_success(&mut self) {
        self.current = self.initial;
        self.failures = 0;
    }

    pub fn on_failure(&mut self) {
        self.failures = self.failures.saturating_add(1);
        let grown = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.growth)
            .unwrap_or(self.max);
        self.current = grown.min(self.max);
    }
}

/// Cancels the polling loop it was returned with.
#[derive(Debug)]
pub struct PollerHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl PollerHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancels and waits for the loop to exit. An in-flight fetch is allowed to settle.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                log::warn!("[POLL] poller task ended abnormally: {}", err);
            }
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Self-rescheduling poll loop; a fetch never starts before the previous one settled.
#[derive(Clone)]
pub struct AdaptivePoller {
    clock: Arc<dyn Clock>,
    options: PollerOptions,
}

impl AdaptivePoller {
    pub fn new(clock: Arc<dyn Clock>, options: PollerOptions) -> Self {
        Self { clock, options }
    }

    pub fn options(&self) -> &PollerOptions {
        &self.options
    }

    /// Spawns the loop under `session`; tearing the session down also stops it.
    pub fn start<T, F, Fut, R>(
        &self,
        session: &CancellationToken,
        fetch_one: F,
        on_result: R,
    ) -> PollerHandle
    where
        T: Send + 'static,
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, TransportError>> + Send,
        R: FnMut(T) + Send + 'static,
    {
        let cancel = session.child_token();
        let poller = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { poller.run(token, fetch_one, on_result).await });
        PollerHandle {
            cancel,
            task: Some(task),
        }
    }

    /// Drives the loop on the current task until `cancel` fires.
    ///
    /// The first fetch happens immediately. After every fetch the loop sleeps
    /// for the current delay, then updates the delay for the following round
    /// from that fetch's outcome. Results that settle after cancellation are
    /// dropped.
    pub async fn run<T, F, Fut, R>(
        &self,
        cancel: CancellationToken,
        mut fetch_one: F,
        mut on_result: R,
    ) where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
        R: FnMut(T),
    {
        let mut backoff = Backoff::new(&self.options);

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let outcome = fetch_one().await;
            if cancel.is_cancelled() {
                log::debug!("[POLL] discarding result that settled after cancel");
                break;
            }

            let succeeded = match outcome {
                Ok(value) => {
                    if backoff.consecutive_failures() > 0 {
                        log::info!(
                            "[POLL] recovered after {} failed polls",
                            backoff.consecutive_failures()
                        );
                    }
                    on_result(value);
                    true
                }
                Err(err) if err.is_cancelled() => break,
                Err(err) => {
                    log::debug!(
                        "[POLL] poll failed ({} in a row): {}; next in {}ms",
                        backoff.consecutive_failures() + 1,
                        err,
                        backoff.current().as_millis()
                    );
                    false
                }
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = self.clock.sleep(backoff.current()) => {}
            }

            if succeeded {
                backoff.on_success();
            } else {
                backoff.on_failure();
            }
        }
    }
}
