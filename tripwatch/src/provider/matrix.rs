//! HTTP travel-time provider.
//!
//! Talks JSON to two endpoints: a matrix endpoint that answers many origins
//! against one destination, and a route endpoint that answers a single
//! origin. Both are plain POSTs; an optional API key is appended as a `key`
//! query parameter.
//!
//! # Request bodies
//!
//! ```text
//! matrix: { "destination": {lat, lng}, "origins": [{id, lat, lng}, ...] }
//! route:  { "origin": {lat, lng}, "destination": {lat, lng} }
//! ```

use serde_json::{json, Value};

use super::http::{AsyncHttpClient, BoxFuture};
use super::types::{ProviderError, TravelTimeProvider};
use crate::coord::{GeoPoint, TrackedEntity};

/// Endpoint settings for [`HttpTravelTimeProvider`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderEndpoints {
    /// Batched travel-time endpoint.
    pub matrix_url: String,
    /// Single-route endpoint.
    pub route_url: String,
    /// Optional API key sent as `key=...`.
    pub api_key: Option<String>,
}

impl ProviderEndpoints {
    pub fn new(matrix_url: impl Into<String>, route_url: impl Into<String>) -> Self {
        Self {
            matrix_url: matrix_url.into(),
            route_url: route_url.into(),
            api_key: None,
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

/// Travel-time provider backed by two JSON-over-HTTP endpoints.
///
/// # Example
///
/// ```no_run
/// use tripwatch::provider::{HttpTravelTimeProvider, ProviderEndpoints, ReqwestClient};
///
/// let client = ReqwestClient::new().unwrap();
/// let endpoints = ProviderEndpoints::new(
///     "https://eta.example.com/v1/matrix",
///     "https://eta.example.com/v1/route",
/// );
/// let provider = HttpTravelTimeProvider::new(client, endpoints);
/// ```
pub struct HttpTravelTimeProvider<C: AsyncHttpClient> {
    http_client: C,
    endpoints: ProviderEndpoints,
}

impl<C: AsyncHttpClient> HttpTravelTimeProvider<C> {
    pub fn new(http_client: C, endpoints: ProviderEndpoints) -> Self {
        Self {
            http_client,
            endpoints,
        }
    }

    /// Appends the API key, if any.
    fn build_url(&self, base: &str) -> String {
        match &self.endpoints.api_key {
            Some(key) => {
                let separator = if base.contains('?') { '&' } else { '?' };
                format!("{}{}key={}", base, separator, key)
            }
            None => base.to_string(),
        }
    }

    fn matrix_body(destination: GeoPoint, origins: &[TrackedEntity]) -> Value {
        let origins: Vec<Value> = origins
            .iter()
            .map(|o| json!({ "id": o.id, "lat": o.lat, "lng": o.lng }))
            .collect();
        json!({
            "destination": { "lat": destination.lat, "lng": destination.lng },
            "origins": origins,
        })
    }

    fn route_body(origin: GeoPoint, destination: GeoPoint) -> Value {
        json!({
            "origin": { "lat": origin.lat, "lng": origin.lng },
            "destination": { "lat": destination.lat, "lng": destination.lng },
        })
    }

    async fn post(&self, base: &str, body: Value) -> Result<Value, ProviderError> {
        let url = self.build_url(base);
        let bytes = self.http_client.post_json(&url, &body).await?;
        serde_json::from_slice(&bytes).map_err(|e| ProviderError::InvalidResponse(e.to_string()))
    }
}

impl<C: AsyncHttpClient> TravelTimeProvider for HttpTravelTimeProvider<C> {
    fn batch_travel_times<'a>(
        &'a self,
        destination: GeoPoint,
        origins: &'a [TrackedEntity],
    ) -> BoxFuture<'a, Result<Value, ProviderError>> {
        Box::pin(async move {
            let body = Self::matrix_body(destination, origins);
            self.post(&self.endpoints.matrix_url, body).await
        })
    }

    fn route<'a>(
        &'a self,
        origin: GeoPoint,
        destination: GeoPoint,
    ) -> BoxFuture<'a, Result<Value, ProviderError>> {
        Box::pin(async move {
            let body = Self::route_body(origin, destination);
            self.post(&self.endpoints.route_url, body).await
        })
    }

    fn name(&self) -> &str {
        "HTTP"
    }
}
