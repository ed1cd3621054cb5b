//! HTTP transport for stage events.
//!
//! Posts one JSON document per event and classifies the outcome for the
//! retry engine. Endpoint, credential and timeouts are taken from the
//! settings snapshot passed with every call, so a reload applies to the next
//! transmission without rebuilding the transport.

use std::{
    future::Future,
    pin::Pin,
    sync::Mutex,
    time::{Duration, Instant},
};

use bytes::Bytes;
use reqwest::header::CONTENT_TYPE;
use stagecast_core::{DeliverySettings, StageEvent};
use tracing::{info_span, Instrument};
use uuid::Uuid;

use crate::error::{DeliveryError, Result};

/// Outcome of a transmission the collector accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReceipt {
    /// HTTP status code, always in `200..300`.
    pub status_code: u16,
    /// Wall time spent on the request, body included.
    pub duration: Duration,
}

/// Sends a single event to the collector.
///
/// Implementations perform exactly one attempt. Retrying is the caller's
/// concern.
pub trait Transport: Send + Sync + 'static {
    /// Transmits `event` using the endpoint and credentials in `settings`.
    ///
    /// # Errors
    ///
    /// - [`DeliveryError::Disabled`] when no endpoint is configured
    /// - [`DeliveryError::UnexpectedStatus`] for any non-2xx response
    /// - [`DeliveryError::Timeout`] or [`DeliveryError::NetworkError`] when
    ///   the request or the response body could not be completed
    fn send<'a>(
        &'a self,
        event: &'a StageEvent,
        settings: &'a DeliverySettings,
    ) -> Pin<Box<dyn Future<Output = Result<SendReceipt>> + Send + 'a>>;
}

/// Static HTTP client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { user_agent: concat!("stagecast/", env!("CARGO_PKG_VERSION")).to_string() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct TimeoutKey {
    connect: Duration,
    read: Duration,
}

/// [`Transport`] posting events with `reqwest`.
///
/// Keeps one pooled client per timeout pair and rebuilds it only when the
/// configured timeouts change.
#[derive(Debug)]
pub struct HttpTransport {
    config: ClientConfig,
    cached: Mutex<Option<(TimeoutKey, reqwest::Client)>>,
}

impl HttpTransport {
    /// Creates a transport with the given static configuration.
    pub fn new(config: ClientConfig) -> Self {
        Self { config, cached: Mutex::new(None) }
    }

    /// Creates a transport with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(ClientConfig::default())
    }

    fn client_for(&self, settings: &DeliverySettings) -> Result<reqwest::Client> {
        let key =
            TimeoutKey { connect: settings.connect_timeout(), read: settings.read_timeout() };
        let mut cached = self.cached.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some((cached_key, client)) = cached.as_ref() {
            if *cached_key == key {
                return Ok(client.clone());
            }
        }

        let client = reqwest::Client::builder()
            .connect_timeout(key.connect)
            .read_timeout(key.read)
            .user_agent(&self.config.user_agent)
            // A followed redirect turns the POST into a body-less GET.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        *cached = Some((key, client.clone()));
        Ok(client)
    }

    async fn post(
        &self,
        event: &StageEvent,
        settings: &DeliverySettings,
        endpoint: &str,
    ) -> Result<SendReceipt> {
        let client = self.client_for(settings)?;
        let body = Bytes::from(
            event.to_json().map_err(|e| DeliveryError::serialization(e.to_string()))?,
        );

        let mut request =
            client.post(endpoint).header(CONTENT_TYPE, "application/json").body(body);
        if let Some(token) = settings.token() {
            request = request.bearer_auth(token.expose());
        }

        let start_time = Instant::now();
        let response =
            request.send().await.map_err(|e| classify(&e, settings, start_time.elapsed()))?;
        let status = response.status();

        // The collector's body is drained so the connection can be reused.
        response.bytes().await.map_err(|e| classify(&e, settings, start_time.elapsed()))?;

        let duration = start_time.elapsed();
        tracing::debug!(
            status = status.as_u16(),
            duration_ms = duration.as_millis(),
            "received collector response"
        );

        if !status.is_success() {
            return Err(DeliveryError::unexpected_status(status.as_u16()));
        }

        Ok(SendReceipt { status_code: status.as_u16(), duration })
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl Transport for HttpTransport {
    fn send<'a>(
        &'a self,
        event: &'a StageEvent,
        settings: &'a DeliverySettings,
    ) -> Pin<Box<dyn Future<Output = Result<SendReceipt>> + Send + 'a>> {
        Box::pin(async move {
            let Some(endpoint) = settings.endpoint() else {
                return Err(DeliveryError::Disabled);
            };

            let span = info_span!(
                "stage_event_delivery",
                delivery_id = %Uuid::new_v4(),
                event_type = %event.event_type(),
                stage_id = %event.stage_id(),
                url = %endpoint,
            );

            self.post(event, settings, endpoint).instrument(span).await
        })
    }
}

fn classify(
    error: &reqwest::Error,
    settings: &DeliverySettings,
    elapsed: Duration,
) -> DeliveryError {
    tracing::debug!(duration_ms = elapsed.as_millis(), error = %error, "request failed");

    if error.is_timeout() {
        let limit =
            if error.is_connect() { settings.connect_timeout() } else { settings.read_timeout() };
        return DeliveryError::timeout(limit.as_secs());
    }
    if error.is_connect() {
        return DeliveryError::network(format!("connection failed: {error}"));
    }
    DeliveryError::network(error.to_string())
}

#[cfg(test)]
mod tests {
    use stagecast_core::{BuildContext, EventEnvelope};
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn event() -> StageEvent {
        let build = BuildContext::new("team/app", 42, "job/team/app/42/");
        StageEvent::stage_start(EventEnvelope::new(build, "7", "Build", 1_700_000_000_000))
    }

    #[tokio::test]
    async fn disabled_endpoint_sends_nothing() {
        let transport = HttpTransport::with_defaults();

        let result = transport.send(&event(), &DeliverySettings::default()).await;

        assert_eq!(result, Err(DeliveryError::Disabled));
    }

    #[tokio::test]
    async fn client_is_reused_while_timeouts_unchanged() {
        let transport = HttpTransport::with_defaults();
        let settings = DeliverySettings::with_endpoint("http://127.0.0.1:1/");

        transport.client_for(&settings).unwrap();
        let first = transport.cached.lock().unwrap().as_ref().map(|(key, _)| *key);
        let changed = DeliverySettings { read_timeout_seconds: 5, ..settings.clone() };
        transport.client_for(&changed).unwrap();
        let second = transport.cached.lock().unwrap().as_ref().map(|(key, _)| *key);

        assert_eq!(first.map(|k| k.read), Some(Duration::from_secs(30)));
        assert_eq!(second.map(|k| k.read), Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn accepted_status_yields_receipt() {
        let mock_server = MockServer::start().await;
        Mock::given(matchers::method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .mount(&mock_server)
            .await;

        let transport = HttpTransport::with_defaults();
        let settings = DeliverySettings::with_endpoint(mock_server.uri());

        let receipt = transport.send(&event(), &settings).await.unwrap();

        assert_eq!(receipt.status_code, 202);
    }

    #[test]
    fn default_user_agent_names_the_crate() {
        assert!(ClientConfig::default().user_agent.starts_with("stagecast/"));
    }
}
