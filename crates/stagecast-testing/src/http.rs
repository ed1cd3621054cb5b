//! Mock event collector backed by wiremock.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde_json::Value;
use stagecast_core::DeliverySettings;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, Request, ResponseTemplate,
};

/// Path the collector accepts events on.
pub const EVENTS_PATH: &str = "/events";

/// HTTP collector double recording every event posted to it.
pub struct MockCollector {
    server: MockServer,
}

impl MockCollector {
    /// Starts a collector on a random local port.
    pub async fn start() -> Self {
        Self { server: MockServer::start().await }
    }

    /// Base URL of the server.
    pub fn url(&self) -> String {
        self.server.uri()
    }

    /// Full URL events should be posted to.
    pub fn endpoint_url(&self) -> String {
        format!("{}{EVENTS_PATH}", self.server.uri())
    }

    /// Default settings pointing at this collector.
    pub fn settings(&self) -> DeliverySettings {
        DeliverySettings::with_endpoint(self.endpoint_url())
    }

    /// Answers every event with `status`.
    pub async fn respond_with_status(&self, status: u16) {
        Mock::given(method("POST"))
            .and(path(EVENTS_PATH))
            .respond_with(ResponseTemplate::new(status))
            .mount(&self.server)
            .await;
    }

    /// Redirects every event to `landing_path` with a 302, which serves 200.
    pub async fn redirect_to(&self, landing_path: &str) {
        Mock::given(method("POST"))
            .and(path(EVENTS_PATH))
            .respond_with(ResponseTemplate::new(302).insert_header("location", landing_path))
            .mount(&self.server)
            .await;
        Mock::given(path(landing_path))
            .respond_with(ResponseTemplate::new(200))
            .mount(&self.server)
            .await;
    }

    /// Answers the first `failures` events with `status`, then with 200.
    pub async fn fail_then_succeed(&self, failures: u64, status: u16) {
        Mock::given(method("POST"))
            .and(path(EVENTS_PATH))
            .respond_with(ResponseTemplate::new(status))
            .up_to_n_times(failures)
            .with_priority(1)
            .mount(&self.server)
            .await;

        self.respond_with_status(200).await;
    }

    /// Answers with `status` after holding the response for `delay`.
    pub async fn respond_after(&self, delay: Duration, status: u16) {
        Mock::given(method("POST"))
            .and(path(EVENTS_PATH))
            .respond_with(ResponseTemplate::new(status).set_delay(delay))
            .mount(&self.server)
            .await;
    }

    /// Every request received so far, in arrival order.
    pub async fn received_requests(&self) -> Vec<Request> {
        self.server.received_requests().await.unwrap_or_default()
    }

    /// Bodies of every request received so far, parsed as JSON.
    pub async fn received_events(&self) -> Result<Vec<Value>> {
        self.received_requests()
            .await
            .iter()
            .map(|request| request.body_json::<Value>().context("request body is not JSON"))
            .collect()
    }

    /// Waits until at least `count` requests arrived.
    ///
    /// # Errors
    ///
    /// Fails when `timeout` elapses first.
    pub async fn wait_for_requests(&self, count: usize, timeout: Duration) -> Result<Vec<Request>> {
        let waited = tokio::time::timeout(timeout, async {
            loop {
                let requests = self.received_requests().await;
                if requests.len() >= count {
                    return requests;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;

        match waited {
            Ok(requests) => Ok(requests),
            Err(_) => bail!(
                "expected {count} requests within {timeout:?}, received {}",
                self.received_requests().await.len()
            ),
        }
    }
}

/// Assertions on recorded requests.
pub mod assertions {
    use wiremock::Request;

    /// Asserts that `request` carries header `key` with `value`.
    pub fn assert_header(request: &Request, key: &str, value: &str) {
        let header = request
            .headers
            .get(key)
            .unwrap_or_else(|| panic!("header '{key}' not present"))
            .to_str()
            .unwrap_or_else(|_| panic!("header '{key}' is not valid text"));

        assert_eq!(header, value, "header '{key}' has unexpected value");
    }

    /// Asserts that `request` has no header `key`.
    pub fn assert_header_absent(request: &Request, key: &str) {
        assert!(request.headers.get(key).is_none(), "header '{key}' unexpectedly present");
    }
}
