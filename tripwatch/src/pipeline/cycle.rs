//! One poll cycle: batch, fallback, blend, apply.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use super::batch::BatchEstimator;
use super::fallback::{FallbackResolver, FallbackStats};
use crate::coord::{GeoPoint, TrackedEntity};
use crate::estimate::{blend, synthesize_eta, RawEstimate};
use crate::provider::{ProviderError, ResponseNormalizer, TravelTimeProvider};
use crate::store::SmoothingStore;

/// Errors that abort a cycle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    /// The batched request failed; nothing was applied.
    #[error("Batch travel-time request failed: {0}")]
    Batch(#[from] ProviderError),
}

/// Decides whether results may still be written to the store.
///
/// Checked before each write, after all network calls for the cycle settled.
#[derive(Debug, Clone, Default)]
pub struct ApplyGuard {
    cancellation: Option<CancellationToken>,
}

impl ApplyGuard {
    /// Results are always applied.
    pub fn always() -> Self {
        Self { cancellation: None }
    }

    /// Results are dropped once `token` is cancelled.
    pub fn unless_cancelled(token: CancellationToken) -> Self {
        Self {
            cancellation: Some(token),
        }
    }

    pub fn allows(&self) -> bool {
        self.cancellation
            .as_ref()
            .map_or(true, |token| !token.is_cancelled())
    }
}

/// What one successful cycle did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CycleReport {
    /// Entities in the cycle.
    pub entity_count: usize,
    /// Normalization strategy used for the batch response.
    pub strategy: Option<&'static str>,
    /// Slots the batch call filled.
    pub batch_resolved: usize,
    /// Fallback pass counters.
    pub fallback: FallbackStats,
    /// Updates written to the store.
    pub applied: usize,
    /// Entities with no usable estimate this cycle.
    pub skipped: usize,
    /// Updates rejected by the store as older than its current value.
    pub stale: usize,
    /// Updates dropped because the guard closed.
    pub discarded: usize,
}

/// Outcome of one cycle as seen by the scheduler and telemetry.
#[derive(Debug, Clone)]
pub struct PollCycleOutcome {
    pub result: Result<CycleReport, PipelineError>,
    pub duration: Duration,
    pub entity_count: usize,
}

impl PollCycleOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// The per-cycle estimation pipeline.
///
/// ```text
/// entities ─► BatchEstimator ─► FallbackResolver ─► blend ─► SmoothingStore
///             (1 request)       (1 per gap, serial)
/// ```
pub struct EtaPipeline {
    batch: BatchEstimator,
    fallback: FallbackResolver,
    store: Arc<SmoothingStore>,
}

impl EtaPipeline {
    pub fn new(
        provider: Arc<dyn TravelTimeProvider>,
        normalizer: Arc<ResponseNormalizer>,
        store: Arc<SmoothingStore>,
    ) -> Self {
        Self {
            batch: BatchEstimator::new(Arc::clone(&provider), Arc::clone(&normalizer)),
            fallback: FallbackResolver::new(provider, normalizer),
            store,
        }
    }

    pub fn store(&self) -> &Arc<SmoothingStore> {
        &self.store
    }

    /// Runs one cycle and returns its outcome; never panics on bad data.
    pub async fn poll(
        &self,
        destination: GeoPoint,
        entities: &[TrackedEntity],
        guard: &ApplyGuard,
    ) -> PollCycleOutcome {
        let started = Instant::now();
        let result = self.run_cycle(destination, entities, guard).await;
        PollCycleOutcome {
            result,
            duration: started.elapsed(),
            entity_count: entities.len(),
        }
    }

    /// Runs one cycle.
    ///
    /// A batch failure aborts the cycle before anything is written. Every
    /// other problem degrades to "no update" for the affected entity.
    #[instrument(skip_all, fields(count = entities.len()))]
    pub async fn run_cycle(
        &self,
        destination: GeoPoint,
        entities: &[TrackedEntity],
        guard: &ApplyGuard,
    ) -> Result<CycleReport, PipelineError> {
        let observed_at = Instant::now();

        let normalized = self.batch.estimate(destination, entities).await?;
        let mut report = CycleReport {
            entity_count: entities.len(),
            strategy: normalized.strategy,
            batch_resolved: normalized.resolved(),
            ..Default::default()
        };

        let mut slots = normalized.estimates;
        report.fallback = self
            .fallback
            .resolve(destination, entities, &mut slots)
            .await;

        let speed = self.store.config().assumed_speed_kmph;
        for (entity, slot) in entities.iter().zip(slots) {
            let raw = slot.unwrap_or_default();
            let distance_eta = raw
                .distance_meters
                .and_then(|d| synthesize_eta(d, speed));
            let Some(eta) = blend(raw.eta_seconds, distance_eta) else {
                report.skipped += 1;
                continue;
            };

            if !guard.allows() {
                report.discarded += 1;
                continue;
            }

            let update = RawEstimate::new(Some(eta), raw.distance_meters);
            if self.store.update_observed(&entity.id, update, observed_at) {
                report.applied += 1;
            } else {
                report.stale += 1;
            }
        }

        if report.discarded > 0 {
            info!(
                discarded = report.discarded,
                "Cycle finished after stop, results discarded"
            );
        }
        debug!(
            applied = report.applied,
            skipped = report.skipped,
            batch_resolved = report.batch_resolved,
            fallback_resolved = report.fallback.resolved,
            fallback_failed = report.fallback.failed,
            "Cycle complete"
        );

        Ok(report)
    }
}
