//! Exponential backoff retry around a single-attempt transport.
//!
//! An event gets one initial attempt plus up to `max_retries` retries. The
//! wait before retry `k` is `initial_delay * 2^(k-1)`. When every attempt
//! fails the event is dropped and logged; there is no dead-letter storage.

use std::{sync::Arc, time::Duration};

use stagecast_core::{Clock, DeliverySettings, SettingsProvider, StageEvent};
use tokio_util::sync::CancellationToken;

use crate::{
    client::Transport,
    error::{DeliveryError, ErrorCategory},
};

const MAX_BACKOFF_EXPONENT: u32 = 31;

/// Retry limits captured from one settings snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Wait before the first retry.
    pub initial_delay: Duration,
}

impl RetryPolicy {
    /// Captures the retry limits from a settings snapshot.
    pub fn from_settings(settings: &DeliverySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_delay: settings.initial_retry_delay(),
        }
    }

    /// Total attempts allowed, the initial one included.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Wait before retry number `retry` (1-based).
    ///
    /// Saturates at `Duration::MAX` instead of overflowing.
    pub fn delay_before_retry(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        self.initial_delay.checked_mul(1_u32 << exponent).unwrap_or(Duration::MAX)
    }

    /// Decides what follows a failed attempt.
    ///
    /// `attempts_made` counts every attempt so far, the failed one included.
    pub fn decide(&self, attempts_made: u32, error: &DeliveryError) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::GiveUp { reason: format!("non-retryable error: {error}") };
        }

        if attempts_made >= self.max_attempts() {
            return RetryDecision::GiveUp {
                reason: format!("maximum attempts ({}) exhausted", self.max_attempts()),
            };
        }

        RetryDecision::Retry { delay: self.delay_before_retry(attempts_made) }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&DeliverySettings::default())
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait for `delay`, then try again.
    Retry {
        /// Backoff before the next attempt
        delay: Duration,
    },
    /// Stop trying.
    GiveUp {
        /// Why no further attempt is made
        reason: String,
    },
}

/// Final result of delivering one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The collector accepted the event.
    Delivered {
        /// Attempts used, the successful one included
        attempts: u32,
    },
    /// Delivery was disabled when the event was picked up.
    Skipped,
    /// Every allowed attempt failed, or the failure was not retryable.
    Dropped {
        /// Attempts used
        attempts: u32,
        /// Error from the last attempt
        last_error: DeliveryError,
    },
    /// Shutdown interrupted the backoff wait.
    Abandoned {
        /// Attempts made before the interruption
        attempts: u32,
    },
}

impl DeliveryOutcome {
    /// Attempts made for this event.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Delivered { attempts }
            | Self::Dropped { attempts, .. }
            | Self::Abandoned { attempts } => *attempts,
            Self::Skipped => 0,
        }
    }
}

/// Delivers one event with retries, honouring a shutdown signal.
///
/// Cheap to clone; clones share the transport, settings source and clock.
#[derive(Clone)]
pub struct RetryingDelivery {
    transport: Arc<dyn Transport>,
    settings: Arc<dyn SettingsProvider>,
    clock: Arc<dyn Clock>,
    abort: CancellationToken,
}

impl RetryingDelivery {
    /// Creates a retry engine.
    ///
    /// Cancelling `abort` cuts any backoff wait short and ends delivery of
    /// the current event without another attempt.
    pub fn new(
        transport: Arc<dyn Transport>,
        settings: Arc<dyn SettingsProvider>,
        clock: Arc<dyn Clock>,
        abort: CancellationToken,
    ) -> Self {
        Self { transport, settings, clock, abort }
    }

    /// Delivers `event`, retrying transient failures with backoff.
    ///
    /// The retry policy is captured once from the settings at the start.
    /// Each attempt takes a fresh snapshot, so endpoint, token and timeout
    /// changes apply from the next attempt on.
    pub async fn deliver(&self, event: &StageEvent) -> DeliveryOutcome {
        let policy = RetryPolicy::from_settings(&self.settings.snapshot());
        let mut attempts = 0;

        loop {
            let settings = self.settings.snapshot();
            attempts += 1;

            let error = match self.transport.send(event, &settings).await {
                Ok(receipt) => {
                    tracing::debug!(
                        stage_id = %event.stage_id(),
                        event_type = %event.event_type(),
                        attempts,
                        status = receipt.status_code,
                        "stage event delivered"
                    );
                    return DeliveryOutcome::Delivered { attempts };
                },
                Err(DeliveryError::Disabled) => {
                    tracing::trace!(stage_id = %event.stage_id(), "delivery disabled, skipping");
                    return DeliveryOutcome::Skipped;
                },
                Err(error) => error,
            };

            match policy.decide(attempts, &error) {
                RetryDecision::Retry { delay } => {
                    tracing::warn!(
                        stage_id = %event.stage_id(),
                        event_type = %event.event_type(),
                        attempt = attempts,
                        max_attempts = policy.max_attempts(),
                        category = %ErrorCategory::from(&error),
                        retry_in_ms = delay.as_millis(),
                        error = %error,
                        "delivery attempt failed, retrying"
                    );

                    if !self.backoff(delay).await {
                        tracing::info!(
                            stage_id = %event.stage_id(),
                            attempts,
                            "shutdown interrupted retry backoff, abandoning event"
                        );
                        return DeliveryOutcome::Abandoned { attempts };
                    }
                },
                RetryDecision::GiveUp { reason } => {
                    tracing::error!(
                        stage_id = %event.stage_id(),
                        event_type = %event.event_type(),
                        attempts,
                        category = %ErrorCategory::from(&error),
                        error = %error,
                        reason = %reason,
                        "failed to deliver stage event, dropping it"
                    );
                    return DeliveryOutcome::Dropped { attempts, last_error: error };
                },
            }
        }
    }

    /// Waits out a backoff. Returns `false` if shutdown cut it short.
    async fn backoff(&self, delay: Duration) -> bool {
        if self.abort.is_cancelled() {
            return false;
        }

        tokio::select! {
            biased;
            () = self.abort.cancelled() => false,
            () = self.clock.sleep(delay) => !self.abort.is_cancelled(),
        }
    }
}

impl std::fmt::Debug for RetryingDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryingDelivery")
            .field("clock", &self.clock)
            .field("aborted", &self.abort.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32, initial_secs: u64) -> RetryPolicy {
        RetryPolicy { max_retries, initial_delay: Duration::from_secs(initial_secs) }
    }

    #[test]
    fn backoff_doubles_from_initial_delay() {
        let policy = policy(3, 2);

        let delays: Vec<_> = (1..=3).map(|k| policy.delay_before_retry(k).as_secs()).collect();

        assert_eq!(delays, vec![2, 4, 8]);
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let policy = policy(100, 2);
        assert_eq!(policy.delay_before_retry(80), Duration::MAX);
    }

    #[test]
    fn retries_until_attempts_exhausted() {
        let policy = policy(2, 1);
        let error = DeliveryError::unexpected_status(500);

        let retry_after = |secs| RetryDecision::Retry { delay: Duration::from_secs(secs) };
        assert_eq!(policy.decide(1, &error), retry_after(1));
        assert_eq!(policy.decide(2, &error), retry_after(2));
        assert!(matches!(policy.decide(3, &error), RetryDecision::GiveUp { .. }));
    }

    #[test]
    fn zero_retries_means_single_attempt() {
        let policy = policy(0, 2);

        assert_eq!(policy.max_attempts(), 1);
        assert!(matches!(
            policy.decide(1, &DeliveryError::network("refused")),
            RetryDecision::GiveUp { .. }
        ));
    }

    #[test]
    fn non_retryable_errors_give_up_immediately() {
        let decision = policy(3, 2).decide(1, &DeliveryError::serialization("bad"));

        match decision {
            RetryDecision::GiveUp { reason } => assert!(reason.contains("non-retryable")),
            other => panic!("expected GiveUp, got {other:?}"),
        }
    }

    #[test]
    fn policy_from_settings_uses_configured_values() {
        let settings = DeliverySettings {
            max_retries: 5,
            initial_retry_delay_seconds: 7,
            ..DeliverySettings::default()
        };

        assert_eq!(RetryPolicy::from_settings(&settings), policy(5, 7));
        assert_eq!(RetryPolicy::default(), policy(3, 2));
    }

    #[test]
    fn outcome_reports_attempts() {
        assert_eq!(DeliveryOutcome::Delivered { attempts: 2 }.attempts(), 2);
        assert_eq!(DeliveryOutcome::Skipped.attempts(), 0);
    }
}
