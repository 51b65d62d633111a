//! Estimate records passed between pipeline stages.

use std::time::Instant;

use serde::Serialize;

/// A partial travel estimate for one entity.
///
/// Either field may be missing; the batch call usually fills both, the
/// per-entity route fallback only fills the distance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RawEstimate {
    /// Travel time in seconds.
    pub eta_seconds: Option<f64>,
    /// Route distance in metres.
    pub distance_meters: Option<f64>,
}

impl RawEstimate {
    pub fn new(eta_seconds: Option<f64>, distance_meters: Option<f64>) -> Self {
        Self {
            eta_seconds,
            distance_meters,
        }
    }

    /// An estimate carrying only a travel time.
    pub fn eta(eta_seconds: f64) -> Self {
        Self::new(Some(eta_seconds), None)
    }

    /// An estimate carrying only a distance.
    pub fn distance(distance_meters: f64) -> Self {
        Self::new(None, Some(distance_meters))
    }

    /// True when neither field holds a usable (finite, non-negative) value.
    pub fn is_empty(&self) -> bool {
        let usable = |v: Option<f64>| v.is_some_and(|v| v.is_finite() && v >= 0.0);
        !usable(self.eta_seconds) && !usable(self.distance_meters)
    }
}

/// The smoothed, display-ready estimate for one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedEstimate {
    /// Smoothed time remaining in whole seconds.
    pub eta_seconds: u64,
    /// Distance from the most recent update that carried one.
    pub distance_meters: Option<f64>,
    /// When the value was last written.
    pub last_updated: Instant,
    /// Start instant of the cycle whose result produced this value.
    ///
    /// Writes observed before this instant are rejected.
    pub observed_at: Instant,
    /// Number of updates folded into this value.
    pub samples: u64,
}

impl SmoothedEstimate {
    /// Seconds elapsed since the value was last written.
    pub fn age(&self) -> std::time::Duration {
        self.last_updated.elapsed()
    }
}
