//! Externally supplied entity set and shared destination.

use parking_lot::RwLock;
use tracing::debug;

use crate::coord::{CoordError, GeoPoint, TrackedEntity};

#[derive(Debug, Default)]
struct RosterState {
    destination: Option<GeoPoint>,
    entities: Vec<TrackedEntity>,
}

/// Who is being tracked and where they are heading.
///
/// Owned by the session and updated by whoever learns about new positions.
/// The scheduler takes a snapshot at the start of every cycle, so changes
/// apply from the next cycle on.
#[derive(Debug, Default)]
pub struct Roster {
    state: RwLock<RosterState>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_destination(&self, destination: Option<GeoPoint>) {
        self.state.write().destination = destination;
    }

    /// Replaces the entity set. Later duplicates of an id are dropped.
    pub fn set_entities(&self, entities: Vec<TrackedEntity>) -> Result<(), CoordError> {
        for entity in &entities {
            entity.validate()?;
        }
        let mut unique: Vec<TrackedEntity> = Vec::with_capacity(entities.len());
        for entity in entities {
            if unique.iter().any(|e| e.id == entity.id) {
                debug!(id = %entity.id, "Duplicate entity id ignored");
                continue;
            }
            unique.push(entity);
        }
        self.state.write().entities = unique;
        Ok(())
    }

    /// Inserts an entity or moves an existing one, keeping its position in order.
    pub fn upsert(&self, entity: TrackedEntity) -> Result<(), CoordError> {
        entity.validate()?;
        let mut state = self.state.write();
        match state.entities.iter_mut().find(|e| e.id == entity.id) {
            Some(existing) => *existing = entity,
            None => state.entities.push(entity),
        }
        Ok(())
    }

    pub fn entities(&self) -> Vec<TrackedEntity> {
        self.state.read().entities.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entities.is_empty()
    }

    /// True when there is a destination and at least one entity.
    pub fn is_ready(&self) -> bool {
        let state = self.state.read();
        state.destination.is_some() && !state.entities.is_empty()
    }

    /// Destination and entities for one cycle, or `None` if not ready.
    pub fn snapshot(&self) -> Option<(GeoPoint, Vec<TrackedEntity>)> {
        let state = self.state.read();
        let destination = state.destination?;
        if state.entities.is_empty() {
            return None;
        }
        Some((destination, state.entities.clone()))
    }
}
