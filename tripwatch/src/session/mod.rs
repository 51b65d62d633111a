//! Tracking sessions.
//!
//! A [`TrackingSession`] wires one store, one pipeline and one scheduler
//! around a [`Roster`]. Everything is constructed per session and passed
//! in explicitly, so two sessions never share estimates.

mod roster;

pub use roster::Roster;

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::coord::{CoordError, GeoPoint, TrackedEntity};
use crate::pipeline::EtaPipeline;
use crate::position::{
    LocationProvider, PositionConfig, PositionError, PositionPublisher, PositionSource,
};
use crate::provider::{ResponseNormalizer, TravelTimeProvider};
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::store::{SmoothingStore, StoreConfig, StoreError};
use crate::telemetry::TelemetrySink;

/// Errors raised while building or driving a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Coord(#[from] CoordError),

    #[error(transparent)]
    Position(#[from] PositionError),
}

/// Settings for the estimation side of a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackingConfig {
    pub scheduler: SchedulerConfig,
    pub store: StoreConfig,
    /// Whether the last-resort recursive search runs on unknown shapes.
    pub deep_search: bool,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            store: StoreConfig::default(),
            deep_search: true,
        }
    }
}

impl TrackingConfig {
    pub fn with_scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }

    pub fn with_deep_search(mut self, enabled: bool) -> Self {
        self.deep_search = enabled;
        self
    }
}

/// One live tracking session.
pub struct TrackingSession {
    id: String,
    roster: Arc<Roster>,
    store: Arc<SmoothingStore>,
    pipeline: Arc<EtaPipeline>,
    scheduler: Scheduler,
    position: Option<PositionSource>,
}

impl TrackingSession {
    pub fn new(
        id: impl Into<String>,
        provider: Arc<dyn TravelTimeProvider>,
        telemetry: Arc<dyn TelemetrySink>,
        config: TrackingConfig,
    ) -> Result<Self, SessionError> {
        let store = Arc::new(SmoothingStore::new(config.store)?);
        let normalizer = Arc::new(ResponseNormalizer::new(config.deep_search));
        let pipeline = Arc::new(EtaPipeline::new(provider, normalizer, Arc::clone(&store)));
        let roster = Arc::new(Roster::new());
        let scheduler = Scheduler::new(
            Arc::clone(&pipeline),
            Arc::clone(&roster),
            telemetry,
            config.scheduler,
        );

        Ok(Self {
            id: id.into(),
            roster,
            store,
            pipeline,
            scheduler,
            position: None,
        })
    }

    /// Publishes the local participant's position and mirrors it into the roster.
    pub fn attach_position(
        &mut self,
        provider: Arc<dyn LocationProvider>,
        publisher: Arc<dyn PositionPublisher>,
        config: PositionConfig,
    ) -> &PositionSource {
        if let Some(previous) = self.position.take() {
            previous.stop();
        }
        let source =
            PositionSource::new(provider, publisher, config).with_roster(Arc::clone(&self.roster));
        self.position.insert(source)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn roster(&self) -> &Arc<Roster> {
        &self.roster
    }

    pub fn store(&self) -> &Arc<SmoothingStore> {
        &self.store
    }

    pub fn pipeline(&self) -> &Arc<EtaPipeline> {
        &self.pipeline
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn position(&self) -> Option<&PositionSource> {
        self.position.as_ref()
    }

    pub fn set_destination(&self, destination: Option<GeoPoint>) {
        self.roster.set_destination(destination);
    }

    /// Replaces the tracked set and forgets estimates of entities that left.
    pub fn set_entities(&self, entities: Vec<TrackedEntity>) -> Result<(), SessionError> {
        self.roster.set_entities(entities)?;
        let ids: Vec<String> = self.roster.entities().into_iter().map(|e| e.id).collect();
        let removed = self.store.retain(ids.iter().map(String::as_str));
        if removed > 0 {
            info!(session = %self.id, removed, "Estimates of departed entities dropped");
        }
        Ok(())
    }

    /// Starts the position watch (if attached) and the scheduler.
    ///
    /// Returns whether the scheduler started. A position source that
    /// fails to start is logged and does not block polling.
    pub fn start(&self) -> bool {
        if let Some(position) = &self.position {
            match position.start() {
                Ok(_) | Err(PositionError::AlreadyRunning) => {}
                Err(e) => warn!(session = %self.id, error = %e, "Position watch not started"),
            }
        }
        let started = self.scheduler.start();
        if started {
            info!(session = %self.id, entities = self.roster.len(), "Tracking session started");
        }
        started
    }

    pub fn stop(&self) {
        self.scheduler.stop();
        if let Some(position) = &self.position {
            position.stop();
        }
    }

    /// Stops everything and waits for background tasks to finish.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
        if let Some(position) = &self.position {
            position.shutdown().await;
        }
        info!(session = %self.id, "Tracking session stopped");
    }
}

impl std::fmt::Debug for TrackingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingSession")
            .field("id", &self.id)
            .field("entities", &self.roster.len())
            .field("estimates", &self.store.len())
            .field("scheduler", &self.scheduler)
            .finish_non_exhaustive()
    }
}
