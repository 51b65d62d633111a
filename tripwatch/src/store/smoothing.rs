//! Exponential smoothing store with an observer registry.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use thiserror::Error;
use tracing::trace;

use crate::estimate::{synthesize_eta, RawEstimate, SmoothedEstimate};

/// Default smoothing factor applied to each new observation.
pub const DEFAULT_ALPHA: f64 = 0.25;

/// Default speed used to turn a bare distance into a travel time.
pub const DEFAULT_ASSUMED_SPEED_KMPH: f64 = 40.0;

/// Errors raised when constructing a store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("Smoothing factor must be in (0, 1], got {0}")]
    InvalidAlpha(f64),

    #[error("Assumed speed must be finite, got {0}")]
    InvalidSpeed(f64),
}

/// Store configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreConfig {
    /// Weight of the newest observation, in `(0, 1]`.
    pub alpha: f64,
    /// Speed used when an update carries only a distance.
    pub assumed_speed_kmph: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            assumed_speed_kmph: DEFAULT_ASSUMED_SPEED_KMPH,
        }
    }
}

impl StoreConfig {
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_assumed_speed_kmph(mut self, speed: f64) -> Self {
        self.assumed_speed_kmph = speed;
        self
    }

    fn validate(&self) -> Result<(), StoreError> {
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(StoreError::InvalidAlpha(self.alpha));
        }
        if !self.assumed_speed_kmph.is_finite() {
            return Err(StoreError::InvalidSpeed(self.assumed_speed_kmph));
        }
        Ok(())
    }
}

/// Handle returned by [`SmoothingStore::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Notification delivered to subscribers after every successful update.
#[derive(Debug, Clone)]
pub struct StoreUpdate {
    /// Entity that changed.
    pub id: String,
    /// Its new smoothed value.
    pub estimate: SmoothedEstimate,
}

type Listener = Arc<dyn Fn(&StoreUpdate) + Send + Sync>;

/// Holds one smoothed estimate per entity id.
///
/// Writes go through [`update_raw`](Self::update_raw) or
/// [`update_observed`](Self::update_observed); reads return cloned
/// snapshots so callers never hold the internal lock.
///
/// Listeners are invoked synchronously on the writing task, after the lock is
/// released, once per applied update and regardless of which entity changed.
pub struct SmoothingStore {
    config: StoreConfig,
    entries: RwLock<HashMap<String, SmoothedEstimate>>,
    listeners: RwLock<Vec<(SubscriptionId, Listener)>>,
    next_subscription: AtomicU64,
}

impl std::fmt::Debug for SmoothingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmoothingStore")
            .field("config", &self.config)
            .field("entries", &self.entries.read().len())
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl SmoothingStore {
    /// Creates an empty store.
    pub fn new(config: StoreConfig) -> Result<Self, StoreError> {
        config.validate()?;
        Ok(Self {
            config,
            entries: RwLock::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Folds a raw estimate into the entity's smoothed value.
    ///
    /// Prefers `eta_seconds`, otherwise synthesizes a travel time from
    /// `distance_meters`. An update with neither is dropped silently.
    ///
    /// Returns `true` when the store changed.
    pub fn update_raw(&self, id: &str, raw: RawEstimate) -> bool {
        self.update_observed(id, raw, Instant::now())
    }

    /// Like [`update_raw`](Self::update_raw), tagged with the instant the
    /// producing computation started.
    ///
    /// A write observed before the stored value's own observation instant is
    /// rejected, so a slow in-flight result can never roll back a newer one.
    pub fn update_observed(&self, id: &str, raw: RawEstimate, observed_at: Instant) -> bool {
        let Some(composed) = self.compose(&raw) else {
            trace!(id, "Update carried no usable estimate, dropped");
            return false;
        };

        let now = Instant::now();
        let snapshot = {
            let mut entries = self.entries.write();
            let next = match entries.get(id) {
                Some(previous) if observed_at < previous.observed_at => {
                    trace!(id, "Stale update rejected");
                    return false;
                }
                Some(previous) => {
                    let alpha = self.config.alpha;
                    let smoothed =
                        (alpha * composed + (1.0 - alpha) * previous.eta_seconds as f64).round();
                    SmoothedEstimate {
                        eta_seconds: smoothed.max(0.0) as u64,
                        distance_meters: usable(raw.distance_meters).or(previous.distance_meters),
                        last_updated: now,
                        observed_at,
                        samples: previous.samples + 1,
                    }
                }
                None => SmoothedEstimate {
                    eta_seconds: composed.round() as u64,
                    distance_meters: usable(raw.distance_meters),
                    last_updated: now,
                    observed_at,
                    samples: 1,
                },
            };
            entries.insert(id.to_string(), next.clone());
            next
        };

        self.notify(&StoreUpdate {
            id: id.to_string(),
            estimate: snapshot,
        });
        true
    }

    fn compose(&self, raw: &RawEstimate) -> Option<f64> {
        usable(raw.eta_seconds).or_else(|| {
            usable(raw.distance_meters)
                .and_then(|d| synthesize_eta(d, self.config.assumed_speed_kmph))
        })
    }

    /// Returns a copy of the entity's smoothed estimate, if it was ever updated.
    pub fn get_smoothed(&self, id: &str) -> Option<SmoothedEstimate> {
        self.entries.read().get(id).cloned()
    }

    /// Copies every entry, sorted by id.
    pub fn snapshot(&self) -> Vec<(String, SmoothedEstimate)> {
        let mut all: Vec<_> = self
            .entries
            .read()
            .iter()
            .map(|(id, e)| (id.clone(), e.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    /// Registers a listener called after every applied update.
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&StoreUpdate) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push((id, Arc::new(listener)));
        id
    }

    /// Removes a listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(sid, _)| *sid != id);
        listeners.len() != before
    }

    fn notify(&self, update: &StoreUpdate) {
        // Clone out so listeners can call back into the store.
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(update);
        }
    }

    /// Drops the estimate for one entity.
    pub fn forget(&self, id: &str) -> bool {
        self.entries.write().remove(id).is_some()
    }

    /// Keeps only the entities in `ids`. Returns how many were dropped.
    pub fn retain<'a>(&self, ids: impl IntoIterator<Item = &'a str>) -> usize {
        let keep: HashSet<&str> = ids.into_iter().collect();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|id, _| keep.contains(id.as_str()));
        before - entries.len()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

fn usable(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v >= 0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn store() -> SmoothingStore {
        SmoothingStore::new(StoreConfig::default()).unwrap()
    }

    #[test]
    fn test_first_update_stored_directly() {
        let store = store();
        assert!(store.update_raw("a", RawEstimate::eta(120.0)));
        assert_eq!(store.get_smoothed("a").unwrap().eta_seconds, 120);
    }

    #[test]
    fn test_second_update_is_smoothed() {
        let store = store();
        store.update_raw("a", RawEstimate::eta(120.0));
        store.update_raw("a", RawEstimate::eta(100.0));
        // round(0.25 * 100 + 0.75 * 120)
        let smoothed = store.get_smoothed("a").unwrap();
        assert_eq!(smoothed.eta_seconds, 115);
        assert_eq!(smoothed.samples, 2);
    }

    #[test]
    fn test_alpha_one_tracks_latest() {
        let store = SmoothingStore::new(StoreConfig::default().with_alpha(1.0)).unwrap();
        store.update_raw("a", RawEstimate::eta(120.0));
        store.update_raw("a", RawEstimate::eta(30.0));
        assert_eq!(store.get_smoothed("a").unwrap().eta_seconds, 30);
    }

    #[test]
    fn test_distance_only_is_synthesized() {
        let config = StoreConfig::default().with_assumed_speed_kmph(36.0);
        let store = SmoothingStore::new(config).unwrap();
        assert!(store.update_raw("a", RawEstimate::distance(1000.0)));
        let smoothed = store.get_smoothed("a").unwrap();
        assert_eq!(smoothed.eta_seconds, 100);
        assert_eq!(smoothed.distance_meters, Some(1000.0));
    }

    #[test]
    fn test_eta_preferred_over_distance() {
        let config = StoreConfig::default().with_assumed_speed_kmph(36.0);
        let store = SmoothingStore::new(config).unwrap();
        store.update_raw("a", RawEstimate::new(Some(42.0), Some(1000.0)));
        assert_eq!(store.get_smoothed("a").unwrap().eta_seconds, 42);
    }

    #[test]
    fn test_empty_update_is_noop() {
        let store = store();
        assert!(!store.update_raw("a", RawEstimate::default()));
        assert!(store.get_smoothed("a").is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_distance_falls_back_to_previous() {
        let store = store();
        store.update_raw("a", RawEstimate::new(Some(100.0), Some(900.0)));
        store.update_raw("a", RawEstimate::eta(100.0));
        assert_eq!(store.get_smoothed("a").unwrap().distance_meters, Some(900.0));

        store.update_raw("a", RawEstimate::new(Some(100.0), Some(700.0)));
        assert_eq!(store.get_smoothed("a").unwrap().distance_meters, Some(700.0));
    }

    #[test]
    fn test_stale_write_rejected() {
        let store = store();
        let earlier = Instant::now();
        let later = earlier + Duration::from_millis(10);

        assert!(store.update_observed("a", RawEstimate::eta(50.0), later));
        assert!(!store.update_observed("a", RawEstimate::eta(500.0), earlier));
        assert_eq!(store.get_smoothed("a").unwrap().eta_seconds, 50);
    }

    #[test]
    fn test_subscriber_fires_per_applied_update() {
        let store = store();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        store.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        store.update_raw("a", RawEstimate::eta(10.0));
        store.update_raw("b", RawEstimate::eta(20.0));
        store.update_raw("c", RawEstimate::default());

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_subscriber_receives_snapshot() {
        let store = store();
        let last = Arc::new(parking_lot::Mutex::new(None));
        let sink = Arc::clone(&last);
        store.subscribe(move |update| {
            *sink.lock() = Some((update.id.clone(), update.estimate.eta_seconds));
        });

        store.update_raw("a", RawEstimate::eta(120.0));
        store.update_raw("a", RawEstimate::eta(100.0));
        assert_eq!(*last.lock(), Some(("a".to_string(), 115)));
    }

    #[test]
    fn test_listener_can_read_store() {
        let store = Arc::new(store());
        let reader = Arc::clone(&store);
        let observed = Arc::new(AtomicU64::new(0));
        let out = Arc::clone(&observed);
        store.subscribe(move |update| {
            let value = reader.get_smoothed(&update.id).unwrap().eta_seconds;
            out.store(value, Ordering::SeqCst);
        });

        store.update_raw("a", RawEstimate::eta(77.0));
        assert_eq!(observed.load(Ordering::SeqCst), 77);
    }

    #[test]
    fn test_unsubscribe() {
        let store = store();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let id = store.subscribe(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        store.update_raw("a", RawEstimate::eta(10.0));
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.update_raw("a", RawEstimate::eta(10.0));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_forget_and_retain() {
        let store = store();
        for id in ["a", "b", "c"] {
            store.update_raw(id, RawEstimate::eta(10.0));
        }
        assert!(store.forget("a"));
        assert!(!store.forget("a"));
        assert_eq!(store.retain(["b"]), 1);
        assert_eq!(store.len(), 1);
        assert!(store.get_smoothed("b").is_some());

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_snapshot_sorted() {
        let store = store();
        store.update_raw("b", RawEstimate::eta(2.0));
        store.update_raw("a", RawEstimate::eta(1.0));
        let ids: Vec<_> = store.snapshot().into_iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert_eq!(
            SmoothingStore::new(StoreConfig::default().with_alpha(0.0)).unwrap_err(),
            StoreError::InvalidAlpha(0.0)
        );
        assert!(SmoothingStore::new(StoreConfig::default().with_alpha(1.5)).is_err());
        assert!(SmoothingStore::new(StoreConfig::default().with_alpha(f64::NAN)).is_err());
        assert!(
            SmoothingStore::new(StoreConfig::default().with_assumed_speed_kmph(f64::NAN)).is_err()
        );
    }

    #[test]
    fn test_sessions_are_independent() {
        let one = store();
        let two = store();
        one.update_raw("a", RawEstimate::eta(10.0));
        assert!(two.get_smoothed("a").is_none());
    }
}
