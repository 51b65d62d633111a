//! Position publishing.

use reqwest::Url;
use serde::Serialize;
use tracing::debug;

use super::{PositionError, PositionSample};
use crate::provider::{AsyncHttpClient, BoxFuture};

/// Placeholder the backend replaces with its own receive time.
///
/// Serializes as `{".sv":"timestamp"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServerTimestamp {
    #[serde(rename = ".sv")]
    sentinel: &'static str,
}

impl Default for ServerTimestamp {
    fn default() -> Self {
        Self {
            sentinel: "timestamp",
        }
    }
}

/// The record written for one published position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionRecord {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub lat: f64,
    pub lng: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heading: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f64>,
    pub server_timestamp: ServerTimestamp,
    /// Capture time on this device, milliseconds since the Unix epoch.
    pub client_timestamp: i64,
}

impl PositionRecord {
    pub fn from_sample(id: &str, name: Option<&str>, sample: &PositionSample) -> Self {
        Self {
            id: id.to_string(),
            name: name.map(str::to_string),
            lat: sample.point.lat,
            lng: sample.point.lng,
            accuracy: sample.accuracy_m,
            heading: sample.heading_deg,
            speed: sample.speed_mps,
            server_timestamp: ServerTimestamp::default(),
            client_timestamp: sample.captured_at.timestamp_millis(),
        }
    }
}

/// Writes position records somewhere others can read them.
pub trait PositionPublisher: Send + Sync {
    fn publish<'a>(&'a self, record: &'a PositionRecord) -> BoxFuture<'a, Result<(), PositionError>>;
}

/// Publishes by PUTting JSON to `{base}/sessions/{session}/positions/{id}.json`.
pub struct HttpPositionPublisher<C: AsyncHttpClient> {
    client: C,
    base_url: String,
    session_id: String,
}

impl<C: AsyncHttpClient> HttpPositionPublisher<C> {
    pub fn new(client: C, base_url: impl Into<String>, session_id: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client,
            base_url,
            session_id: session_id.into(),
        }
    }

    /// Location of `id`'s record. Path segments are percent-encoded.
    pub fn record_url(&self, id: &str) -> Result<Url, PositionError> {
        check_key(&self.session_id)?;
        check_key(id)?;

        let file = format!("{}.json", id);
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| PositionError::InvalidUrl(format!("{}: {}", self.base_url, e)))?;
        url.path_segments_mut()
            .map_err(|_| PositionError::InvalidUrl(format!("{}: not a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(["sessions", self.session_id.as_str(), "positions", file.as_str()]);
        Ok(url)
    }
}

/// Characters the backend treats as structure inside a key.
const RESERVED_KEY_CHARS: [char; 6] = ['.', '/', '#', '$', '[', ']'];

fn check_key(key: &str) -> Result<(), PositionError> {
    if key.is_empty() || key.chars().any(|c| RESERVED_KEY_CHARS.contains(&c) || c.is_control()) {
        return Err(PositionError::InvalidKey(key.to_string()));
    }
    Ok(())
}

impl<C: AsyncHttpClient> PositionPublisher for HttpPositionPublisher<C> {
    fn publish<'a>(&'a self, record: &'a PositionRecord) -> BoxFuture<'a, Result<(), PositionError>> {
        Box::pin(async move {
            let body = serde_json::to_value(record)
                .map_err(|e| PositionError::Serialize(e.to_string()))?;
            let url = self.record_url(&record.id)?;
            self.client.put_json(url.as_str(), &body).await?;
            debug!(id = %record.id, "Position published");
            Ok(())
        })
    }
}

impl<C: AsyncHttpClient> std::fmt::Debug for HttpPositionPublisher<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpPositionPublisher")
            .field("base_url", &self.base_url)
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coord::GeoPoint;
    use crate::provider::{MockHttpClient, ProviderError};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn sample() -> PositionSample {
        PositionSample {
            point: GeoPoint::new(48.1, 11.5),
            accuracy_m: Some(12.0),
            heading_deg: None,
            speed_mps: Some(3.5),
            captured_at: Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
        }
    }

    fn publisher_at(base: &str, session: &str) -> HttpPositionPublisher<MockHttpClient> {
        HttpPositionPublisher::new(MockHttpClient::json(json!(null)), base, session)
    }

    #[test]
    fn test_record_wire_format() {
        let record = PositionRecord::from_sample("u1", Some("Ana"), &sample());
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(
            value,
            json!({
                "id": "u1",
                "name": "Ana",
                "lat": 48.1,
                "lng": 11.5,
                "accuracy": 12.0,
                "speed": 3.5,
                "server_timestamp": { ".sv": "timestamp" },
                "client_timestamp": 1_700_000_000_000i64
            })
        );
    }

    #[tokio::test]
    async fn test_http_publisher_puts_record() {
        let client = MockHttpClient::json(json!(null));
        let publisher = HttpPositionPublisher::new(client, "https://rt.test/", "trip-7");
        let record = PositionRecord::from_sample("u1", None, &sample());

        publisher.publish(&record).await.unwrap();

        let recorded = publisher.client.recorded();
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].0, "PUT");
        assert_eq!(recorded[0].1, "https://rt.test/sessions/trip-7/positions/u1.json");
        assert_eq!(recorded[0].2["server_timestamp"][".sv"], "timestamp");
        assert!(recorded[0].2.get("name").is_none());
    }

    #[test]
    fn test_record_url_encodes_segments() {
        let publisher = publisher_at("https://rt.test/db", "trip 7");
        assert_eq!(
            publisher.record_url("Zoë?").unwrap().as_str(),
            "https://rt.test/db/sessions/trip%207/positions/Zo%C3%AB%3F.json"
        );
    }

    #[tokio::test]
    async fn test_reserved_key_characters_are_rejected() {
        let publisher = publisher_at("https://rt.test", "trip-7");

        for id in ["a/b", "a.b", "..", "a#b", "a$b", "[a]", ""] {
            let record = PositionRecord::from_sample(id, None, &sample());
            let err = publisher.publish(&record).await.unwrap_err();
            assert!(matches!(err, PositionError::InvalidKey(_)), "{id} accepted");
        }
        assert!(publisher.client.recorded().is_empty());

        let publisher = publisher_at("https://rt.test", "../admin");
        assert!(matches!(
            publisher.record_url("u1"),
            Err(PositionError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_record_url_rejects_bad_base() {
        let publisher = publisher_at("not a url", "trip-7");
        assert!(matches!(
            publisher.record_url("u1"),
            Err(PositionError::InvalidUrl(_))
        ));
    }

    #[tokio::test]
    async fn test_http_publisher_surfaces_failure() {
        let client = MockHttpClient::new(Err(ProviderError::Status {
            status: 401,
            url: "x".into(),
        }));
        let publisher = HttpPositionPublisher::new(client, "https://rt.test", "trip-7");
        let record = PositionRecord::from_sample("u1", None, &sample());

        let err = publisher.publish(&record).await.unwrap_err();
        assert!(matches!(err, PositionError::Publish(_)));
    }
}
