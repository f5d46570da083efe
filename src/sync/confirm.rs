use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use super::clock::Clock;
use super::transport::{RetryPolicy, RetryingTransport, TransportError};
use crate::ports::bot_api::BotApi;

const DEFAULT_CONFIRM_TIMEOUT_MS: u64 = 6000;
const DEFAULT_POLL_INTERVAL_MS: u64 = 400;
const DEFAULT_MIN_VISIBLE_MS: u64 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmOptions {
    pub confirm_timeout: Duration,
    pub poll_interval: Duration,
    pub min_visible: Duration,
}

impl Default for ConfirmOptions {
    fn default() -> Self {
        Self {
            confirm_timeout: Duration::from_millis(DEFAULT_CONFIRM_TIMEOUT_MS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            min_visible: Duration::from_millis(DEFAULT_MIN_VISIBLE_MS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmation {
    Confirmed,
    /// The start/stop request itself never got a 2xx.
    ActionFailed(TransportError),
    /// Request accepted, but status never reported the target state before the deadline.
    Unconfirmed,
    Cancelled,
}

impl Confirmation {
    pub fn is_confirmed(&self) -> bool {
        matches!(self, Confirmation::Confirmed)
    }
}

/// In-flight start or stop waiting for the status endpoint to agree.
#[derive(Debug, Clone, Copy)]
pub struct PendingAction {
    pub expected_running: bool,
    pub deadline: Instant,
}

impl PendingAction {
    fn remaining(&self, now: Instant) -> Option<Duration> {
        let left = self.deadline.saturating_duration_since(now);
        (!left.is_zero()).then_some(left)
    }
}

pub struct ActionConfirmer {
    api: Arc<dyn BotApi>,
    transport: RetryingTransport,
    clock: Arc<dyn Clock>,
    action_policy: RetryPolicy,
}

impl ActionConfirmer {
    pub fn new(
        api: Arc<dyn BotApi>,
        transport: RetryingTransport,
        clock: Arc<dyn Clock>,
        action_policy: RetryPolicy,
    ) -> Self {
        Self {
            api,
            transport,
            clock,
            action_policy,
        }
    }

    /// Runs `action` and reports whether the bot reached `expected_running` in time.
    pub async fn confirm<F, Fut>(
        &self,
        expected_running: bool,
        action: F,
        options: &ConfirmOptions,
        session: &CancellationToken,
    ) -> bool
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), TransportError>>,
    {
        self.confirm_detailed(expected_running, action, options, session)
            .await
            .is_confirmed()
    }

    /// Like [`confirm`](Self::confirm) but keeps the reason for a negative outcome.
    ///
    /// The busy period lasts at least `options.min_visible`; the padding is added
    /// after the outcome is known. `session` is checked between polls only, an
    /// in-flight request is never interrupted.
    pub async fn confirm_detailed<F, Fut>(
        &self,
        expected_running: bool,
        action: F,
        options: &ConfirmOptions,
        session: &CancellationToken,
    ) -> Confirmation
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), TransportError>>,
    {
        let started = self.clock.now();
        let outcome = self
            .resolve(expected_running, action, options, session)
            .await;
        if outcome == Confirmation::Cancelled {
            return outcome;
        }

        let busy = self.clock.now().saturating_duration_since(started);
        if busy < options.min_visible {
            self.clock.sleep(options.min_visible - busy).await;
        }
        outcome
    }

    async fn resolve<F, Fut>(
        &self,
        expected_running: bool,
        action: F,
        options: &ConfirmOptions,
        session: &CancellationToken,
    ) -> Confirmation
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), TransportError>>,
    {
        let label = if expected_running { "start" } else { "stop" };

        if let Err(err) = self
            .transport
            .execute(label, self.action_policy, action)
            .await
        {
            if err.is_cancelled() {
                return Confirmation::Cancelled;
            }
            log::warn!("[CONFIRM] {} request failed: {}", label, err);
            return Confirmation::ActionFailed(err);
        }

        let pending = PendingAction {
            expected_running,
            deadline: self.clock.now() + options.confirm_timeout,
        };
        let api = self.api.as_ref();
        let mut polls = 0u32;

        loop {
            if session.is_cancelled() {
                return Confirmation::Cancelled;
            }
            if pending.remaining(self.clock.now()).is_none() {
                log::warn!(
                    "[CONFIRM] {} accepted but running={} not observed after {} polls",
                    label,
                    pending.expected_running,
                    polls
                );
                return Confirmation::Unconfirmed;
            }

            polls += 1;
            let observed = self
                .transport
                .execute("status", RetryPolicy::single(), || api.get_status())
                .await;

            // a status that settles at or past the deadline does not count
            let Some(left) = pending.remaining(self.clock.now()) else {
                log::warn!(
                    "[CONFIRM] {} status poll {} settled after the deadline",
                    label,
                    polls
                );
                return Confirmation::Unconfirmed;
            };

            match observed {
                Ok(status) if status.running == pending.expected_running => {
                    log::info!("[CONFIRM] {} confirmed after {} polls", label, polls);
                    return Confirmation::Confirmed;
                }
                Ok(_) => {}
                Err(err) => {
                    log::debug!("[CONFIRM] status poll {} failed: {}", polls, err);
                }
            }

            self.clock.sleep(options.poll_interval.min(left)).await;
        }
    }
}
