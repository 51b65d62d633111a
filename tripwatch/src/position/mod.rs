//! Local position watch and publishing.
//!
//! A [`PositionSource`] asks a [`LocationProvider`] for permission, then
//! consumes its watch stream on a background task. Every sample becomes the
//! last-known position; samples that clear the [`PublishThrottle`] are also
//! written out through a [`PositionPublisher`] so other participants can see
//! them.
//!
//! # Permission
//!
//! ```text
//! Prompt ──request──► Granted ──(Denied event)──► Denied
//!    └──────────────────────────────────────────► Denied
//! ```
//!
//! `Denied` is terminal for the source: the watch is torn down, nothing
//! retries, and later calls to [`PositionSource::start`] are refused.

mod publisher;
mod throttle;

pub use publisher::{HttpPositionPublisher, PositionPublisher, PositionRecord, ServerTimestamp};
pub use throttle::PublishThrottle;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coord::{GeoPoint, TrackedEntity};
use crate::provider::{BoxFuture, ProviderError};
use crate::session::Roster;

/// Default minimum spacing between published positions.
pub const DEFAULT_WATCH_INTERVAL: Duration = Duration::from_millis(5000);

/// Errors from the position source and its publisher.
#[derive(Debug, Error)]
pub enum PositionError {
    #[error("Location watch unavailable: {0}")]
    WatchUnavailable(String),

    #[error("Position publish failed: {0}")]
    Publish(#[from] ProviderError),

    #[error("Position record not serializable: {0}")]
    Serialize(String),

    #[error("Position source requires a tokio runtime")]
    NoRuntime,

    #[error("Position source already running")]
    AlreadyRunning,

    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Invalid publish URL {0}")]
    InvalidUrl(String),

    #[error("'{0}' cannot be used as a record key")]
    InvalidKey(String),
}

/// Location permission as last reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PermissionState {
    #[default]
    Prompt,
    Granted,
    Denied,
}

/// One position fix.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionSample {
    pub point: GeoPoint,
    pub accuracy_m: Option<f64>,
    pub heading_deg: Option<f64>,
    pub speed_mps: Option<f64>,
    pub captured_at: DateTime<Utc>,
}

impl PositionSample {
    /// A fix with only a position, captured now.
    pub fn at(point: GeoPoint) -> Self {
        Self {
            point,
            accuracy_m: None,
            heading_deg: None,
            speed_mps: None,
            captured_at: Utc::now(),
        }
    }
}

/// Item on a location watch stream.
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    Sample(PositionSample),
    /// Permission was revoked while watching.
    Denied,
    /// Non-fatal watch error; the stream continues.
    Error(String),
}

/// Device location capability.
pub trait LocationProvider: Send + Sync {
    /// Asks for permission and returns the resulting state.
    fn request_permission(&self) -> BoxFuture<'_, PermissionState>;

    /// Starts a continuous watch. Dropping the receiver ends it.
    fn watch(&self) -> BoxFuture<'_, Result<mpsc::Receiver<WatchEvent>, PositionError>>;
}

/// [`LocationProvider`] fed from an in-process channel.
///
/// Permission is fixed at construction. The watch can be taken once.
pub struct ChannelLocationProvider {
    permission: PermissionState,
    events: Mutex<Option<mpsc::Receiver<WatchEvent>>>,
}

impl ChannelLocationProvider {
    /// Creates the provider and the sender that feeds its watch.
    pub fn new(permission: PermissionState, buffer: usize) -> (Self, mpsc::Sender<WatchEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let provider = Self {
            permission,
            events: Mutex::new(Some(rx)),
        };
        (provider, tx)
    }
}

impl LocationProvider for ChannelLocationProvider {
    fn request_permission(&self) -> BoxFuture<'_, PermissionState> {
        Box::pin(async move { self.permission })
    }

    fn watch(&self) -> BoxFuture<'_, Result<mpsc::Receiver<WatchEvent>, PositionError>> {
        Box::pin(async move {
            self.events
                .lock()
                .take()
                .ok_or_else(|| PositionError::WatchUnavailable("watch already taken".into()))
        })
    }
}

/// Identity and throttle settings for the local participant.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionConfig {
    pub participant_id: String,
    pub participant_name: Option<String>,
    pub watch_interval: Duration,
}

impl PositionConfig {
    pub fn new(participant_id: impl Into<String>) -> Self {
        Self {
            participant_id: participant_id.into(),
            participant_name: None,
            watch_interval: DEFAULT_WATCH_INTERVAL,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.participant_name = Some(name.into());
        self
    }

    pub fn with_watch_interval(mut self, interval: Duration) -> Self {
        self.watch_interval = interval;
        self
    }
}

#[derive(Debug, Default)]
struct SourceState {
    permission: PermissionState,
    last_known: Option<PositionSample>,
    published: u64,
    running: Option<PositionHandle>,
}

/// Handle to a running watch task.
#[derive(Debug, Clone)]
pub struct PositionHandle {
    cancellation: CancellationToken,
}

impl PositionHandle {
    /// Tears the watch down.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Watches the local device position and publishes it, throttled.
///
/// Independent of the scheduler. When a roster is attached, each sample
/// also moves the local participant in it.
pub struct PositionSource {
    provider: Arc<dyn LocationProvider>,
    publisher: Arc<dyn PositionPublisher>,
    config: PositionConfig,
    roster: Option<Arc<Roster>>,
    state: Arc<Mutex<SourceState>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PositionSource {
    pub fn new(
        provider: Arc<dyn LocationProvider>,
        publisher: Arc<dyn PositionPublisher>,
        config: PositionConfig,
    ) -> Self {
        Self {
            provider,
            publisher,
            config,
            roster: None,
            state: Arc::new(Mutex::new(SourceState::default())),
            task: Mutex::new(None),
        }
    }

    /// Mirror samples into `roster` as the local participant.
    pub fn with_roster(mut self, roster: Arc<Roster>) -> Self {
        self.roster = Some(roster);
        self
    }

    /// Spawns the watch task.
    ///
    /// Fails with [`PositionError::PermissionDenied`] once permission has
    /// been denied.
    pub fn start(&self) -> Result<PositionHandle, PositionError> {
        let runtime = Handle::try_current().map_err(|_| PositionError::NoRuntime)?;
        let mut state = self.state.lock();
        if state.permission == PermissionState::Denied {
            return Err(PositionError::PermissionDenied);
        }
        if let Some(running) = &state.running {
            if !running.is_cancelled() {
                return Err(PositionError::AlreadyRunning);
            }
        }

        let handle = PositionHandle {
            cancellation: CancellationToken::new(),
        };
        let watcher = Watcher {
            provider: Arc::clone(&self.provider),
            publisher: Arc::clone(&self.publisher),
            config: self.config.clone(),
            roster: self.roster.clone(),
            state: Arc::clone(&self.state),
        };
        let task = runtime.spawn(watcher.run(handle.cancellation.clone()));
        state.running = Some(handle.clone());
        drop(state);

        *self.task.lock() = Some(task);
        Ok(handle)
    }

    /// Cancels the watch task. Idempotent.
    pub fn stop(&self) {
        if let Some(running) = self.state.lock().running.take() {
            running.cancel();
        }
    }

    /// Stops and waits for the watch task to exit.
    pub async fn shutdown(&self) {
        self.stop();
        let task = self.task.lock().take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    pub fn permission(&self) -> PermissionState {
        self.state.lock().permission
    }

    pub fn last_known(&self) -> Option<PositionSample> {
        self.state.lock().last_known.clone()
    }

    /// Positions successfully published so far.
    pub fn published_count(&self) -> u64 {
        self.state.lock().published
    }

    pub fn config(&self) -> &PositionConfig {
        &self.config
    }
}

impl Drop for PositionSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State moved into the watch task.
struct Watcher {
    provider: Arc<dyn LocationProvider>,
    publisher: Arc<dyn PositionPublisher>,
    config: PositionConfig,
    roster: Option<Arc<Roster>>,
    state: Arc<Mutex<SourceState>>,
}

impl Watcher {
    async fn run(self, cancellation: CancellationToken) {
        let permission = tokio::select! {
            biased;
            _ = cancellation.cancelled() => return,
            permission = self.provider.request_permission() => permission,
        };
        {
            let mut state = self.state.lock();
            // Denied sticks even if the provider later says otherwise
            if state.permission != PermissionState::Denied {
                state.permission = permission;
            }
        }

        match permission {
            PermissionState::Granted => {}
            PermissionState::Denied => {
                warn!("Location permission denied, position watch not started");
                self.finish();
                return;
            }
            PermissionState::Prompt => {
                info!("Location permission not granted, position watch not started");
                self.finish();
                return;
            }
        }

        let mut events = match self.provider.watch().await {
            Ok(events) => events,
            Err(e) => {
                warn!(error = %e, "Location watch could not be started");
                self.finish();
                return;
            }
        };

        info!(
            id = %self.config.participant_id,
            interval_ms = self.config.watch_interval.as_millis() as u64,
            "Position watch started"
        );
        let mut throttle = PublishThrottle::new(self.config.watch_interval);

        loop {
            tokio::select! {
                biased;

                _ = cancellation.cancelled() => break,

                event = events.recv() => match event {
                    None => {
                        debug!("Location watch stream ended");
                        break;
                    }
                    Some(WatchEvent::Sample(sample)) => {
                        self.on_sample(sample, &mut throttle);
                    }
                    Some(WatchEvent::Denied) => {
                        self.state.lock().permission = PermissionState::Denied;
                        warn!("Location permission revoked, position watch stopped");
                        break;
                    }
                    Some(WatchEvent::Error(message)) => {
                        warn!(error = %message, "Location watch error");
                    }
                },
            }
        }

        drop(events);
        self.finish();
        info!("Position watch stopped");
    }

    fn on_sample(&self, sample: PositionSample, throttle: &mut PublishThrottle) {
        self.state.lock().last_known = Some(sample.clone());

        if let Some(roster) = &self.roster {
            let mut entity = TrackedEntity::new(
                self.config.participant_id.clone(),
                sample.point.lat,
                sample.point.lng,
            );
            entity.name = self.config.participant_name.clone();
            if let Err(e) = roster.upsert(entity) {
                debug!(error = %e, "Sample with invalid position not added to roster");
            }
        }

        if !throttle.should_publish(tokio::time::Instant::now()) {
            return;
        }

        let record = PositionRecord::from_sample(
            &self.config.participant_id,
            self.config.participant_name.as_deref(),
            &sample,
        );
        // Publishing runs beside the watch so a slow write never delays
        // later samples or cancellation.
        let publisher = Arc::clone(&self.publisher);
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            match publisher.publish(&record).await {
                Ok(()) => state.lock().published += 1,
                Err(e) => warn!(error = %e, "Position publish failed"),
            }
        });
    }

    fn finish(&self) {
        if let Some(running) = self.state.lock().running.take() {
            running.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Records publishes; fails every call when `fail` is set.
    #[derive(Default)]
    struct RecordingPublisher {
        fail: bool,
        records: Mutex<Vec<PositionRecord>>,
    }

    impl PositionPublisher for RecordingPublisher {
        fn publish<'a>(
            &'a self,
            record: &'a PositionRecord,
        ) -> BoxFuture<'a, Result<(), PositionError>> {
            Box::pin(async move {
                self.records.lock().push(record.clone());
                if self.fail {
                    Err(PositionError::Publish(ProviderError::HttpError(
                        "offline".into(),
                    )))
                } else {
                    Ok(())
                }
            })
        }
    }

    fn sample(lat: f64) -> WatchEvent {
        WatchEvent::Sample(PositionSample::at(GeoPoint::new(lat, 10.0)))
    }

    fn source(
        permission: PermissionState,
        publisher: Arc<RecordingPublisher>,
    ) -> (PositionSource, mpsc::Sender<WatchEvent>) {
        let (provider, tx) = ChannelLocationProvider::new(permission, 16);
        let source = PositionSource::new(
            Arc::new(provider),
            publisher,
            PositionConfig::new("me").with_name("Me"),
        );
        (source, tx)
    }

    #[tokio::test(start_paused = true)]
    async fn test_samples_update_last_known_and_publish_throttled() {
        let publisher = Arc::new(RecordingPublisher::default());
        let (source, tx) = source(PermissionState::Granted, Arc::clone(&publisher));
        source.start().unwrap();

        tx.send(sample(1.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        tx.send(sample(2.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(source.last_known().unwrap().point.lat, 2.0);
        assert_eq!(publisher.records.lock().len(), 1);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        tx.send(sample(3.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let records = publisher.records.lock().clone();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].lat, 1.0);
        assert_eq!(records[1].lat, 3.0);
        assert_eq!(records[1].name.as_deref(), Some("Me"));
        assert_eq!(source.permission(), PermissionState::Granted);
        assert_eq!(source.published_count(), 2);

        source.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_failures_are_swallowed() {
        let publisher = Arc::new(RecordingPublisher {
            fail: true,
            ..Default::default()
        });
        let (source, tx) = source(PermissionState::Granted, Arc::clone(&publisher));
        source.start().unwrap();

        tx.send(sample(1.0)).await.unwrap();
        tokio::time::sleep(Duration::from_secs(6)).await;
        tx.send(sample(2.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(publisher.records.lock().len(), 2);
        assert_eq!(source.published_count(), 0);
        assert_eq!(source.last_known().unwrap().point.lat, 2.0);
        assert!(!tx.is_closed());

        source.shutdown().await;
    }

    #[tokio::test]
    async fn test_denied_permission_is_terminal() {
        let publisher = Arc::new(RecordingPublisher::default());
        let (source, tx) = source(PermissionState::Denied, Arc::clone(&publisher));
        let handle = source.start().unwrap();
        let task = source.task.lock().take().unwrap();
        task.await.unwrap();

        assert_eq!(source.permission(), PermissionState::Denied);
        assert!(handle.is_cancelled());
        assert!(source.last_known().is_none());
        // Watch never started, so nothing consumes the channel
        assert!(tx.try_send(sample(1.0)).is_ok());
        assert!(publisher.records.lock().is_empty());
    }

    /// Denies the first request and grants every later one.
    #[derive(Default)]
    struct ChangeOfHeartProvider {
        requests: AtomicUsize,
    }

    impl LocationProvider for ChangeOfHeartProvider {
        fn request_permission(&self) -> BoxFuture<'_, PermissionState> {
            Box::pin(async move {
                match self.requests.fetch_add(1, Ordering::SeqCst) {
                    0 => PermissionState::Denied,
                    _ => PermissionState::Granted,
                }
            })
        }

        fn watch(&self) -> BoxFuture<'_, Result<mpsc::Receiver<WatchEvent>, PositionError>> {
            Box::pin(async move {
                let (_tx, rx) = mpsc::channel(1);
                Ok(rx)
            })
        }
    }

    #[tokio::test]
    async fn test_restart_after_denial_is_refused() {
        let provider = Arc::new(ChangeOfHeartProvider::default());
        let source = PositionSource::new(
            Arc::clone(&provider) as Arc<dyn LocationProvider>,
            Arc::new(RecordingPublisher::default()),
            PositionConfig::new("me"),
        );
        source.start().unwrap();
        let task = source.task.lock().take().unwrap();
        task.await.unwrap();
        assert_eq!(source.permission(), PermissionState::Denied);

        assert!(matches!(source.start(), Err(PositionError::PermissionDenied)));
        assert_eq!(provider.requests.load(Ordering::SeqCst), 1);
        assert_eq!(source.permission(), PermissionState::Denied);
    }

    #[tokio::test]
    async fn test_restart_after_revocation_is_refused() {
        let (source, tx) = source(
            PermissionState::Granted,
            Arc::new(RecordingPublisher::default()),
        );
        source.start().unwrap();
        tx.send(WatchEvent::Denied).await.unwrap();
        let task = source.task.lock().take().unwrap();
        task.await.unwrap();

        assert!(matches!(source.start(), Err(PositionError::PermissionDenied)));
    }

    /// Publisher whose writes never complete.
    struct StalledPublisher;

    impl PositionPublisher for StalledPublisher {
        fn publish<'a>(
            &'a self,
            _record: &'a PositionRecord,
        ) -> BoxFuture<'a, Result<(), PositionError>> {
            Box::pin(std::future::pending())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_publish_does_not_stall_watch() {
        let (provider, tx) = ChannelLocationProvider::new(PermissionState::Granted, 16);
        let source = PositionSource::new(
            Arc::new(provider),
            Arc::new(StalledPublisher),
            PositionConfig::new("me"),
        );
        source.start().unwrap();

        tx.send(sample(1.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(sample(2.0)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(source.last_known().unwrap().point.lat, 2.0);

        tokio::time::timeout(Duration::from_secs(1), source.shutdown())
            .await
            .expect("shutdown waited on a stalled publish");
        assert_eq!(source.published_count(), 0);
    }

    #[tokio::test]
    async fn test_revocation_tears_down_watch() {
        let publisher = Arc::new(RecordingPublisher::default());
        let (source, tx) = source(PermissionState::Granted, Arc::clone(&publisher));
        let handle = source.start().unwrap();

        tx.send(sample(1.0)).await.unwrap();
        tx.send(WatchEvent::Denied).await.unwrap();

        let task = source.task.lock().take().unwrap();
        task.await.unwrap();

        assert_eq!(source.permission(), PermissionState::Denied);
        assert!(handle.is_cancelled());
        assert!(tx.is_closed());
        assert_eq!(source.last_known().unwrap().point.lat, 1.0);
    }

    #[tokio::test]
    async fn test_watch_errors_are_not_fatal() {
        let publisher = Arc::new(RecordingPublisher::default());
        let (source, tx) = source(PermissionState::Granted, Arc::clone(&publisher));
        source.start().unwrap();

        tx.send(WatchEvent::Error("gps glitch".into())).await.unwrap();
        tx.send(sample(4.0)).await.unwrap();
        drop(tx);

        let task = source.task.lock().take().unwrap();
        task.await.unwrap();
        assert_eq!(source.last_known().unwrap().point.lat, 4.0);
        assert_eq!(source.permission(), PermissionState::Granted);
    }

    #[tokio::test]
    async fn test_samples_move_participant_in_roster() {
        let roster = Arc::new(Roster::new());
        let publisher = Arc::new(RecordingPublisher::default());
        let (provider, tx) = ChannelLocationProvider::new(PermissionState::Granted, 4);
        let source = PositionSource::new(
            Arc::new(provider),
            publisher,
            PositionConfig::new("me"),
        )
        .with_roster(Arc::clone(&roster));
        source.start().unwrap();

        tx.send(sample(5.0)).await.unwrap();
        drop(tx);
        let task = source.task.lock().take().unwrap();
        task.await.unwrap();

        let entities = roster.entities();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].id, "me");
        assert_eq!(entities[0].lat, 5.0);
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let (source, _tx) = source(
            PermissionState::Granted,
            Arc::new(RecordingPublisher::default()),
        );
        source.start().unwrap();
        assert!(matches!(source.start(), Err(PositionError::AlreadyRunning)));
        source.shutdown().await;
    }

    #[test]
    fn test_start_outside_runtime() {
        let (source, _tx) = source(
            PermissionState::Granted,
            Arc::new(RecordingPublisher::default()),
        );
        assert!(matches!(source.start(), Err(PositionError::NoRuntime)));
    }
}
