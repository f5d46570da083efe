use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::clock::Clock;

const DEFAULT_ATTEMPTS: u32 = 3;
const DEFAULT_BASE_DELAY_MS: u64 = 400;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    Network(String),
    Status { code: u16, message: Option<String> },
    Decode(String),
    Cancelled,
}

impl TransportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TransportError::Cancelled)
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TransportError::Network(e) => write!(f, "network error: {}", e),
            TransportError::Status {
                code,
                message: Some(message),
            } => write!(f, "HTTP {}: {}", code, message),
            TransportError::Status { code, message: None } => write!(f, "HTTP {}", code),
            TransportError::Decode(e) => write!(f, "unexpected response: {}", e),
            TransportError::Cancelled => write!(f, "request cancelled"),
        }
    }
}

impl std::error::Error for TransportError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_ATTEMPTS,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts,
            base_delay,
        }
    }

    /// One attempt, no waits. Used where an outer loop owns the retry cadence.
    pub fn single() -> Self {
        Self {
            attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Wait before retry number `attempt_index + 1`: `base_delay * 2^attempt_index`.
    pub fn delay_for(&self, attempt_index: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt_index))
    }
}

/// Runs a request with bounded retries and pure exponential delay between attempts.
#[derive(Clone)]
pub struct RetryingTransport {
    clock: Arc<dyn Clock>,
}

impl RetryingTransport {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Retries without an abort signal; the caller discards late results itself.
    pub async fn execute<T, F, Fut>(
        &self,
        label: &str,
        policy: RetryPolicy,
        op: F,
    ) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let never = CancellationToken::new();
        self.execute_with_abort(label, policy, &never, op).await
    }

    /// Same as [`execute`](Self::execute), but `abort` drops the in-flight attempt
    /// or pending wait and resolves to `TransportError::Cancelled` without retrying.
    pub async fn execute_with_abort<T, F, Fut>(
        &self,
        label: &str,
        policy: RetryPolicy,
        abort: &CancellationToken,
        mut op: F,
    ) -> Result<T, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let attempts = policy.attempts.max(1);
        let mut attempt = 0u32;

        loop {
            if abort.is_cancelled() {
                return Err(TransportError::Cancelled);
            }

            let result = tokio::select! {
                biased;
                _ = abort.cancelled() => return Err(TransportError::Cancelled),
                result = op() => result,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) => err,
            };

            attempt += 1;
            if attempt >= attempts {
                if attempts > 1 {
                    log::warn!(
                        "[TRANSPORT] {} failed after {} attempts: {}",
                        label,
                        attempts,
                        err
                    );
                }
                return Err(err);
            }

            let delay = policy.delay_for(attempt - 1);
            log::debug!(
                "[TRANSPORT] {} attempt {}/{} failed ({}); retrying in {}ms",
                label,
                attempt,
                attempts,
                err,
                delay.as_millis()
            );

            tokio::select! {
                biased;
                _ = abort.cancelled() => return Err(TransportError::Cancelled),
                _ = self.clock.sleep(delay) => {}
            }
        }
    }
}
