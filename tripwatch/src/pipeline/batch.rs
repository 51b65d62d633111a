//! Batch stage - one travel-time request for every tracked entity.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::coord::{GeoPoint, TrackedEntity};
use crate::provider::{Normalized, ProviderError, ResponseNormalizer, TravelTimeProvider};

/// Issues the batched request and normalizes its response.
///
/// The output always has one slot per input entity, in input order. A
/// transport failure is returned as an error; an unexpected response shape
/// is not, it simply leaves slots empty.
pub struct BatchEstimator {
    provider: Arc<dyn TravelTimeProvider>,
    normalizer: Arc<ResponseNormalizer>,
}

impl BatchEstimator {
    pub fn new(provider: Arc<dyn TravelTimeProvider>, normalizer: Arc<ResponseNormalizer>) -> Self {
        Self {
            provider,
            normalizer,
        }
    }

    /// Estimates every entity against `destination` with a single call.
    #[instrument(skip(self, entities), fields(provider = self.provider.name(), count = entities.len()))]
    pub async fn estimate(
        &self,
        destination: GeoPoint,
        entities: &[TrackedEntity],
    ) -> Result<Normalized, ProviderError> {
        if entities.is_empty() {
            return Ok(Normalized {
                strategy: None,
                estimates: Vec::new(),
            });
        }

        let response = self
            .provider
            .batch_travel_times(destination, entities)
            .await?;
        let normalized = self.normalizer.normalize_batch(&response, entities.len());

        match normalized.strategy {
            Some(strategy) => debug!(
                strategy,
                resolved = normalized.resolved(),
                "Batch response normalized"
            ),
            None => warn!(
                count = entities.len(),
                "Batch response unparseable, all entities left unresolved"
            ),
        }

        Ok(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimate::RawEstimate;
    use crate::provider::{HttpTravelTimeProvider, MockHttpClient, ProviderEndpoints};
    use serde_json::json;

    fn estimator(client: MockHttpClient) -> BatchEstimator {
        let provider = HttpTravelTimeProvider::new(
            client,
            ProviderEndpoints::new("https://eta.test/matrix", "https://eta.test/route"),
        );
        BatchEstimator::new(Arc::new(provider), Arc::new(ResponseNormalizer::default()))
    }

    fn entities() -> Vec<TrackedEntity> {
        vec![
            TrackedEntity::new("a", 1.0, 1.0),
            TrackedEntity::new("b", 2.0, 2.0),
        ]
    }

    #[tokio::test]
    async fn test_estimate_preserves_order() {
        let client = MockHttpClient::json(json!({
            "rows": [
                { "elements": [{ "duration": { "value": 300 }, "distance": { "value": 2500 } }] },
                { "elements": [] }
            ]
        }));
        let normalized = estimator(client)
            .estimate(GeoPoint::new(0.0, 0.0), &entities())
            .await
            .unwrap();

        assert_eq!(
            normalized.estimates,
            vec![Some(RawEstimate::new(Some(300.0), Some(2500.0))), None]
        );
    }

    #[tokio::test]
    async fn test_unparseable_response_is_not_an_error() {
        let client = MockHttpClient::json(json!({ "message": "maintenance" }));
        let normalized = estimator(client)
            .estimate(GeoPoint::new(0.0, 0.0), &entities())
            .await
            .unwrap();

        assert!(normalized.is_unparseable());
        assert_eq!(normalized.estimates, vec![None, None]);
    }

    #[tokio::test]
    async fn test_transport_failure_is_an_error() {
        let client = MockHttpClient::new(Err(ProviderError::Timeout("matrix".into())));
        let result = estimator(client)
            .estimate(GeoPoint::new(0.0, 0.0), &entities())
            .await;
        assert_eq!(result, Err(ProviderError::Timeout("matrix".into())));
    }

    #[tokio::test]
    async fn test_no_entities_makes_no_call() {
        let client = MockHttpClient::json(json!({}));
        let estimator = estimator(client);
        let normalized = estimator
            .estimate(GeoPoint::new(0.0, 0.0), &[])
            .await
            .unwrap();
        assert!(normalized.estimates.is_empty());
    }
}
