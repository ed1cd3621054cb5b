//! In-memory transport double with scripted results.

use std::{
    collections::VecDeque,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU32, Ordering},
        Mutex,
    },
    time::Duration,
};

use stagecast_core::{DeliverySettings, StageEvent};
use stagecast_delivery::{DeliveryError, SendReceipt, Transport};

/// One recorded call to [`ScriptedTransport::send`].
#[derive(Debug, Clone)]
pub struct SentAttempt {
    /// Event passed to the transport.
    pub event: StageEvent,
    /// Endpoint from the settings snapshot used for the attempt.
    pub endpoint: Option<String>,
    /// Whether the snapshot carried a bearer token.
    pub authenticated: bool,
}

/// Transport returning pre-programmed results, one per attempt.
///
/// Once the script runs out every attempt gets the fallback result, which
/// is success unless [`ScriptedTransport::always_failing`] was used. A
/// disabled endpoint yields [`DeliveryError::Disabled`] without consuming
/// the script, like the HTTP transport.
#[derive(Debug)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Result<u16, DeliveryError>>>,
    fallback: Result<u16, DeliveryError>,
    latency: Option<Duration>,
    attempts: AtomicU32,
    sent: Mutex<Vec<SentAttempt>>,
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::succeeding()
    }
}

impl ScriptedTransport {
    /// Accepts every event with 200.
    pub fn succeeding() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Ok(200),
            latency: None,
            attempts: AtomicU32::new(0),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Fails every attempt with `error`.
    pub fn always_failing(error: DeliveryError) -> Self {
        Self { fallback: Err(error), ..Self::succeeding() }
    }

    /// Fails the next `times` attempts with `error`.
    pub fn failing_times(self, times: usize, error: DeliveryError) -> Self {
        self.lock_script().extend(std::iter::repeat(Err(error)).take(times));
        self
    }

    /// Holds every attempt for `latency` before answering.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Attempts made against an enabled endpoint.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Every attempt made against an enabled endpoint, in order.
    pub fn sent(&self) -> Vec<SentAttempt> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }

    fn lock_script(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<u16, DeliveryError>>> {
        self.script.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_result(&self) -> Result<u16, DeliveryError> {
        self.lock_script().pop_front().unwrap_or_else(|| self.fallback.clone())
    }
}

impl Transport for ScriptedTransport {
    fn send<'a>(
        &'a self,
        event: &'a StageEvent,
        settings: &'a DeliverySettings,
    ) -> Pin<Box<dyn Future<Output = Result<SendReceipt, DeliveryError>> + Send + 'a>> {
        Box::pin(async move {
            let Some(endpoint) = settings.endpoint() else {
                return Err(DeliveryError::Disabled);
            };

            self.attempts.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut sent) = self.sent.lock() {
                sent.push(SentAttempt {
                    event: event.clone(),
                    endpoint: Some(endpoint.to_string()),
                    authenticated: settings.token().is_some(),
                });
            }

            if let Some(latency) = self.latency {
                tokio::time::sleep(latency).await;
            }

            self.next_result()
                .map(|status_code| SendReceipt { status_code, duration: Duration::ZERO })
        })
    }
}
