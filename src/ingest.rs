//! Newline-delimited JSON event ingress.
//!
//! Stdin is read on a dedicated OS thread so a blocked read never holds up
//! runtime shutdown. Lines travel to the async side over a bounded channel.

use std::{io::BufRead, time::Duration};

use stagecast_core::StageEvent;
use stagecast_delivery::DeliveryService;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// What happened to a single input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineOutcome {
    /// Empty or whitespace-only line.
    Blank,
    /// Not a valid stage event.
    Malformed,
    /// Buffered for delivery.
    Accepted,
    /// Valid, but the service refused it.
    Refused,
}

/// Totals for one ingress run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Lines buffered for delivery.
    pub accepted: u64,
    /// Valid events the service refused.
    pub refused: u64,
    /// Lines that did not decode.
    pub malformed: u64,
}

impl IngestSummary {
    fn record(&mut self, outcome: LineOutcome) {
        match outcome {
            LineOutcome::Blank => {},
            LineOutcome::Malformed => self.malformed += 1,
            LineOutcome::Accepted => self.accepted += 1,
            LineOutcome::Refused => self.refused += 1,
        }
    }
}

/// Decodes one line and offers the event to `service`.
pub fn ingest_line(service: &DeliveryService, line_number: u64, line: &str) -> LineOutcome {
    let line = line.trim();
    if line.is_empty() {
        return LineOutcome::Blank;
    }

    let event = match StageEvent::from_json(line.as_bytes()) {
        Ok(event) => event,
        Err(e) => {
            warn!(line_number, error = %e, "ignoring malformed event line");
            return LineOutcome::Malformed;
        },
    };

    let stage_id = event.stage_id().to_owned();
    if service.enqueue(event) {
        LineOutcome::Accepted
    } else {
        debug!(line_number, stage_id = %stage_id, "event refused by delivery service");
        LineOutcome::Refused
    }
}

/// Feeds every received line to `service` until the sender side closes.
pub async fn forward(
    mut lines: mpsc::Receiver<String>,
    service: &DeliveryService,
) -> IngestSummary {
    let mut summary = IngestSummary::default();
    let mut line_number = 0;

    while let Some(line) = lines.recv().await {
        line_number += 1;
        summary.record(ingest_line(service, line_number, &line));
    }

    summary
}

/// Resolves once every accepted event has reached a final outcome.
pub async fn wait_until_settled(service: &DeliveryService, poll_interval: Duration) {
    loop {
        let unsettled = service.stats().unsettled();
        if unsettled == 0 {
            return;
        }
        debug!(unsettled, "waiting for deliveries to settle");
        tokio::time::sleep(poll_interval).await;
    }
}

/// Starts reading stdin line by line on a background thread.
///
/// The returned receiver closes at end of input or on a read error.
pub fn spawn_stdin_reader(buffer: usize) -> std::io::Result<mpsc::Receiver<String>> {
    let (sender, receiver) = mpsc::channel(buffer.max(1));

    std::thread::Builder::new().name("stdin-reader".to_string()).spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if sender.blocking_send(line).is_err() {
                        break;
                    }
                },
                Err(e) => {
                    error!(error = %e, "failed to read stdin");
                    break;
                },
            }
        }
    })?;

    Ok(receiver)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use stagecast_core::DeliverySettings;
    use stagecast_delivery::ServiceConfig;
    use stagecast_testing::{EventBuilder, ScriptedTransport, TestClock};

    use super::*;

    fn service(max_queue_size: usize) -> DeliveryService {
        DeliveryService::new(
            Arc::new(DeliverySettings {
                max_queue_size,
                ..DeliverySettings::with_endpoint("http://collector.test/events")
            }),
            Arc::new(ScriptedTransport::succeeding()),
            Arc::new(TestClock::new()),
            ServiceConfig::default(),
        )
    }

    fn event_line(node: &str) -> String {
        String::from_utf8(EventBuilder::new().node(node).start().to_json().unwrap()).unwrap()
    }

    #[test]
    fn classifies_each_line() {
        let service = service(1);

        assert_eq!(ingest_line(&service, 1, "   "), LineOutcome::Blank);
        assert_eq!(ingest_line(&service, 2, "{not json"), LineOutcome::Malformed);
        assert_eq!(ingest_line(&service, 3, &event_line("1")), LineOutcome::Accepted);
        assert_eq!(ingest_line(&service, 4, &event_line("2")), LineOutcome::Refused);
    }

    #[test]
    fn wrong_schema_version_is_malformed() {
        let service = service(10);
        let line = event_line("1").replace("\"1.0\"", "\"2.0\"");

        assert_eq!(ingest_line(&service, 1, &line), LineOutcome::Malformed);
    }

    #[tokio::test]
    async fn forward_totals_until_sender_closes() {
        let service = service(10);
        let (sender, receiver) = mpsc::channel(8);

        for line in [event_line("1"), String::new(), "garbage".to_string(), event_line("2")] {
            sender.send(line).await.unwrap();
        }
        drop(sender);

        let summary = forward(receiver, &service).await;

        assert_eq!(summary, IngestSummary { accepted: 2, refused: 0, malformed: 1 });
        assert_eq!(service.queue_len(), 2);
    }

    #[tokio::test]
    async fn settles_after_queued_events_are_delivered() {
        let service = service(10);
        assert_eq!(ingest_line(&service, 1, &event_line("1")), LineOutcome::Accepted);
        assert_eq!(ingest_line(&service, 2, &event_line("2")), LineOutcome::Accepted);

        service.start().await;
        tokio::time::timeout(
            Duration::from_secs(5),
            wait_until_settled(&service, Duration::from_millis(10)),
        )
        .await
        .unwrap();
        service.stop().await;

        assert_eq!(service.stats().delivered, 2);
    }
}
