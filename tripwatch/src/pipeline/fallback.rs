//! Fallback stage - per-entity route requests for what the batch missed.

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::coord::{GeoPoint, TrackedEntity};
use crate::estimate::RawEstimate;
use crate::provider::{ResponseNormalizer, TravelTimeProvider};

/// Counters for one fallback pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FallbackStats {
    /// Route requests issued.
    pub attempted: usize,
    /// Requests that yielded a distance.
    pub resolved: usize,
    /// Requests that failed outright.
    pub failed: usize,
}

/// Resolves a distance for each entity the batch call left empty.
///
/// Requests are issued one at a time, in entity order, so a cycle never
/// bursts more than one request at the provider. Only the distance is
/// filled in; the travel time is synthesized downstream.
pub struct FallbackResolver {
    provider: Arc<dyn TravelTimeProvider>,
    normalizer: Arc<ResponseNormalizer>,
}

impl FallbackResolver {
    pub fn new(provider: Arc<dyn TravelTimeProvider>, normalizer: Arc<ResponseNormalizer>) -> Self {
        Self {
            provider,
            normalizer,
        }
    }

    /// Fills every `None` slot it can. `slots` and `entities` are parallel.
    ///
    /// A failed request is logged and leaves its slot empty; it never aborts
    /// the pass.
    #[instrument(skip_all, fields(provider = self.provider.name()))]
    pub async fn resolve(
        &self,
        destination: GeoPoint,
        entities: &[TrackedEntity],
        slots: &mut [Option<RawEstimate>],
    ) -> FallbackStats {
        let mut stats = FallbackStats::default();

        for (entity, slot) in entities.iter().zip(slots.iter_mut()) {
            if slot.is_some() {
                continue;
            }
            stats.attempted += 1;

            match self.provider.route(entity.position(), destination).await {
                Ok(response) => match self.normalizer.route_distance(&response) {
                    Some(distance) => {
                        debug!(id = %entity.id, distance_m = distance, "Fallback distance resolved");
                        *slot = Some(RawEstimate::distance(distance));
                        stats.resolved += 1;
                    }
                    None => {
                        debug!(id = %entity.id, "Fallback response carried no distance");
                    }
                },
                Err(e) => {
                    warn!(id = %entity.id, error = %e, "Fallback route request failed");
                    stats.failed += 1;
                }
            }
        }

        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{BoxFuture, ProviderError};
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    /// Route-only provider answering from a script, one entry per call.
    struct ScriptedRoutes {
        answers: Mutex<Vec<Result<Value, ProviderError>>>,
        calls: Mutex<Vec<GeoPoint>>,
    }

    impl ScriptedRoutes {
        fn new(mut answers: Vec<Result<Value, ProviderError>>) -> Self {
            answers.reverse();
            Self {
                answers: Mutex::new(answers),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl TravelTimeProvider for ScriptedRoutes {
        fn batch_travel_times<'a>(
            &'a self,
            _destination: GeoPoint,
            _origins: &'a [TrackedEntity],
        ) -> BoxFuture<'a, Result<Value, ProviderError>> {
            Box::pin(async { Err(ProviderError::HttpError("unused".into())) })
        }

        fn route<'a>(
            &'a self,
            origin: GeoPoint,
            _destination: GeoPoint,
        ) -> BoxFuture<'a, Result<Value, ProviderError>> {
            Box::pin(async move {
                self.calls.lock().push(origin);
                self.answers
                    .lock()
                    .pop()
                    .unwrap_or_else(|| Err(ProviderError::HttpError("script exhausted".into())))
            })
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn entities() -> Vec<TrackedEntity> {
        vec![
            TrackedEntity::new("a", 1.0, 1.0),
            TrackedEntity::new("b", 2.0, 2.0),
            TrackedEntity::new("c", 3.0, 3.0),
        ]
    }

    #[tokio::test]
    async fn test_only_empty_slots_are_requested() {
        let provider = Arc::new(ScriptedRoutes::new(vec![Ok(json!({
            "routes": [{ "summary": { "lengthInMeters": 2000 } }]
        }))]));
        let resolver = FallbackResolver::new(provider.clone(), Arc::new(ResponseNormalizer::default()));

        let mut slots = vec![
            Some(RawEstimate::eta(60.0)),
            Some(RawEstimate::eta(90.0)),
            None,
        ];
        let stats = resolver
            .resolve(GeoPoint::new(0.0, 0.0), &entities(), &mut slots)
            .await;

        assert_eq!(
            stats,
            FallbackStats {
                attempted: 1,
                resolved: 1,
                failed: 0
            }
        );
        assert_eq!(slots[2], Some(RawEstimate::distance(2000.0)));
        assert_eq!(*provider.calls.lock(), vec![GeoPoint::new(3.0, 3.0)]);
    }

    #[tokio::test]
    async fn test_failure_is_not_fatal() {
        let provider = Arc::new(ScriptedRoutes::new(vec![
            Err(ProviderError::Timeout("route".into())),
            Ok(json!({ "routes": [{ "distance": 500 }] })),
            Ok(json!({ "routes": [] })),
        ]));
        let resolver = FallbackResolver::new(provider.clone(), Arc::new(ResponseNormalizer::default()));

        let mut slots = vec![None, None, None];
        let stats = resolver
            .resolve(GeoPoint::new(0.0, 0.0), &entities(), &mut slots)
            .await;

        assert_eq!(stats.attempted, 3);
        assert_eq!(stats.resolved, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(slots, vec![None, Some(RawEstimate::distance(500.0)), None]);
        // Requests went out in entity order
        assert_eq!(
            *provider.calls.lock(),
            vec![
                GeoPoint::new(1.0, 1.0),
                GeoPoint::new(2.0, 2.0),
                GeoPoint::new(3.0, 3.0)
            ]
        );
    }
}
