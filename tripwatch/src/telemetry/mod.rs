//! Poll-cycle telemetry.
//!
//! Every scheduler cycle produces one [`TelemetryRecord`] handed to a
//! [`TelemetrySink`]. Recording is fire-and-forget: sinks never block the
//! scheduler, never retry, and swallow their own errors.
//!
//! # Architecture
//!
//! ```text
//! Scheduler ─► PollCycleOutcome ─► TelemetryRecord ─► TelemetrySink
//!                                                     ├─ TracingTelemetrySink (log line)
//!                                                     ├─ ChannelTelemetrySink (in-process consumer)
//!                                                     ├─ HttpTelemetrySink    (POST, spawned)
//!                                                     └─ NullTelemetrySink
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::pipeline::PollCycleOutcome;
use crate::provider::AsyncHttpClient;

/// Kind of telemetry event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TelemetryEvent {
    PollSuccess,
    PollError,
}

/// One fire-and-forget telemetry record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryRecord {
    pub event: TelemetryEvent,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl TelemetryRecord {
    /// Builds the record for a finished cycle.
    pub fn from_outcome(outcome: &PollCycleOutcome) -> Self {
        let duration_ms = Some(outcome.duration.as_millis() as u64);
        match &outcome.result {
            Ok(_) => Self {
                event: TelemetryEvent::PollSuccess,
                participant_count: Some(outcome.entity_count),
                duration_ms,
                error: None,
                timestamp: Utc::now(),
            },
            Err(e) => Self {
                event: TelemetryEvent::PollError,
                participant_count: Some(outcome.entity_count),
                duration_ms,
                error: Some(e.to_string()),
                timestamp: Utc::now(),
            },
        }
    }
}

/// Receives telemetry records.
///
/// `record` must return promptly and must not panic on delivery failure.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, record: TelemetryRecord);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullTelemetrySink;

impl TelemetrySink for NullTelemetrySink {
    fn record(&self, _record: TelemetryRecord) {}
}

/// Writes each record as a structured log event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingTelemetrySink;

impl TelemetrySink for TracingTelemetrySink {
    fn record(&self, record: TelemetryRecord) {
        match record.event {
            TelemetryEvent::PollSuccess => info!(
                target: "tripwatch::telemetry",
                participants = record.participant_count,
                duration_ms = record.duration_ms,
                "poll_success"
            ),
            TelemetryEvent::PollError => warn!(
                target: "tripwatch::telemetry",
                participants = record.participant_count,
                duration_ms = record.duration_ms,
                error = record.error.as_deref().unwrap_or("unknown"),
                "poll_error"
            ),
        }
    }
}

/// Forwards records to an unbounded channel.
///
/// A closed receiver is ignored.
#[derive(Debug, Clone)]
pub struct ChannelTelemetrySink {
    tx: mpsc::UnboundedSender<TelemetryRecord>,
}

impl ChannelTelemetrySink {
    /// Creates the sink and the receiving end.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TelemetryRecord>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl TelemetrySink for ChannelTelemetrySink {
    fn record(&self, record: TelemetryRecord) {
        let _ = self.tx.send(record);
    }
}

/// POSTs each record as JSON from a spawned task.
///
/// Outside a tokio runtime records are dropped.
pub struct HttpTelemetrySink<C: AsyncHttpClient + 'static> {
    client: Arc<C>,
    url: Arc<str>,
}

impl<C: AsyncHttpClient + 'static> HttpTelemetrySink<C> {
    pub fn new(client: Arc<C>, url: impl Into<String>) -> Self {
        Self {
            client,
            url: Arc::from(url.into()),
        }
    }
}

impl<C: AsyncHttpClient + 'static> TelemetrySink for HttpTelemetrySink<C> {
    fn record(&self, record: TelemetryRecord) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("No runtime, telemetry record dropped");
            return;
        };
        let body = match serde_json::to_value(&record) {
            Ok(body) => body,
            Err(e) => {
                debug!(error = %e, "Telemetry record not serializable");
                return;
            }
        };
        let client = Arc::clone(&self.client);
        let url = Arc::clone(&self.url);
        handle.spawn(async move {
            if let Err(e) = client.post_json(&url, &body).await {
                debug!(error = %e, "Telemetry delivery failed");
            }
        });
    }
}
