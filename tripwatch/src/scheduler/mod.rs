//! Poll scheduling.
//!
//! The [`Scheduler`] owns a single background task that runs one pipeline
//! cycle at a time:
//!
//! ```text
//! start ─► cycle ─► sleep(interval + jitter | backoff) ─► cycle ─► ...
//!                                    ▲
//! stop ──────────────── cancel ──────┘
//! ```
//!
//! A cycle is always awaited to completion before the next delay starts,
//! so at most one cycle is in flight. Failed cycles back off exponentially
//! (see [`Backoff`]); a successful cycle waits the base interval plus a
//! random jitter so many clients don't poll in lockstep.

mod backoff;

pub use backoff::{Backoff, BACKOFF_UNIT, MAX_BACKOFF_DELAY, MAX_BACKOFF_EXPONENT};

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::pipeline::{ApplyGuard, EtaPipeline, PipelineError};
use crate::session::Roster;
use crate::telemetry::{TelemetryRecord, TelemetrySink};

/// Shortest allowed poll interval.
pub const MIN_INTERVAL: Duration = Duration::from_millis(1000);

/// Longest allowed poll interval.
pub const MAX_INTERVAL: Duration = Duration::from_millis(30_000);

/// Default poll interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(5000);

/// Default upper bound of the random delay added after a successful cycle.
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(400);

/// What happens to a cycle still in flight when the scheduler stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StopPolicy {
    /// The cycle completes and its results are written.
    #[default]
    FinishCycle,
    /// The cycle completes but its results are dropped.
    DiscardInFlight,
}

impl fmt::Display for StopPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopPolicy::FinishCycle => write!(f, "finish"),
            StopPolicy::DiscardInFlight => write!(f, "discard"),
        }
    }
}

/// Unrecognised stop policy name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unknown stop policy '{0}' (expected 'finish' or 'discard')")]
pub struct UnknownStopPolicy(pub String);

impl FromStr for StopPolicy {
    type Err = UnknownStopPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "finish" | "finish_cycle" => Ok(StopPolicy::FinishCycle),
            "discard" | "discard_in_flight" => Ok(StopPolicy::DiscardInFlight),
            other => Err(UnknownStopPolicy(other.to_string())),
        }
    }
}

/// Scheduler timing and stop behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Base interval between successful cycles, clamped on use.
    pub interval: Duration,
    /// Upper bound of the jitter added after a successful cycle.
    pub max_jitter: Duration,
    pub stop_policy: StopPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            max_jitter: DEFAULT_MAX_JITTER,
            stop_policy: StopPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    pub fn with_stop_policy(mut self, stop_policy: StopPolicy) -> Self {
        self.stop_policy = stop_policy;
        self
    }

    /// Base interval clamped to [`MIN_INTERVAL`]..=[`MAX_INTERVAL`].
    pub fn interval(&self) -> Duration {
        self.interval.clamp(MIN_INTERVAL, MAX_INTERVAL)
    }

    /// Delay after a successful cycle: base interval plus random jitter.
    pub fn success_delay(&self) -> Duration {
        self.interval() + jitter(self.max_jitter)
    }
}

fn jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub active: bool,
    /// Cycles run since construction, skipped ones excluded.
    pub cycles: u64,
    pub consecutive_failures: u32,
}

#[derive(Debug, Default)]
struct LoopStats {
    cycles: u64,
    backoff: Backoff,
}

struct RunningLoop {
    cancellation: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Control {
    running: Option<RunningLoop>,
    /// Stopped loops not yet awaited.
    draining: Vec<JoinHandle<()>>,
}

/// Drives the pipeline on a timer.
///
/// # Example
///
/// ```ignore
/// let scheduler = Scheduler::new(pipeline, roster, telemetry, SchedulerConfig::default());
/// if scheduler.start() {
///     // ...
///     scheduler.shutdown().await;
/// }
/// ```
pub struct Scheduler {
    pipeline: Arc<EtaPipeline>,
    roster: Arc<Roster>,
    telemetry: Arc<dyn TelemetrySink>,
    config: SchedulerConfig,
    stats: Arc<Mutex<LoopStats>>,
    control: Mutex<Control>,
}

impl Scheduler {
    pub fn new(
        pipeline: Arc<EtaPipeline>,
        roster: Arc<Roster>,
        telemetry: Arc<dyn TelemetrySink>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            pipeline,
            roster,
            telemetry,
            config,
            stats: Arc::new(Mutex::new(LoopStats::default())),
            control: Mutex::new(Control::default()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Starts polling. The first cycle runs immediately.
    ///
    /// Returns `false` without doing anything when already running, when
    /// the roster has no destination or no entities, or when called outside
    /// a tokio runtime.
    pub fn start(&self) -> bool {
        let mut control = self.control.lock();
        if control.running.is_some() {
            debug!("Scheduler already running");
            return false;
        }
        if !self.roster.is_ready() {
            debug!("Scheduler not started: no destination or no entities");
            return false;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!("Scheduler start requested outside a tokio runtime");
            return false;
        };

        // A loop stopped just before this may still be finishing a cycle
        let predecessors: Vec<JoinHandle<()>> = std::mem::take(&mut control.draining)
            .into_iter()
            .filter(|task| !task.is_finished())
            .collect();

        let cancellation = CancellationToken::new();
        let poll_loop = PollLoop {
            pipeline: Arc::clone(&self.pipeline),
            roster: Arc::clone(&self.roster),
            telemetry: Arc::clone(&self.telemetry),
            config: self.config,
            stats: Arc::clone(&self.stats),
            predecessors,
        };
        let task = runtime.spawn(poll_loop.run(cancellation.clone()));
        control.running = Some(RunningLoop { cancellation, task });

        info!(
            interval_ms = self.config.interval().as_millis() as u64,
            stop_policy = %self.config.stop_policy,
            "Scheduler started"
        );
        true
    }

    /// Stops scheduling further cycles. Idempotent.
    ///
    /// A cycle already in flight is not interrupted; what happens to its
    /// results depends on the [`StopPolicy`]. Returns `true` if the
    /// scheduler was running.
    pub fn stop(&self) -> bool {
        let mut control = self.control.lock();
        let Some(running) = control.running.take() else {
            return false;
        };
        running.cancellation.cancel();
        control.draining.push(running.task);
        true
    }

    /// Stops and waits until the loop task, including any cycle in flight,
    /// has finished.
    pub async fn shutdown(&self) {
        self.stop();
        let draining = std::mem::take(&mut self.control.lock().draining);
        for task in draining {
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!(error = %e, "Scheduler task panicked");
                }
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.control.lock().running.is_some()
    }

    pub fn status(&self) -> SchedulerStatus {
        let stats = self.stats.lock();
        SchedulerStatus {
            active: self.is_active(),
            cycles: stats.cycles,
            consecutive_failures: stats.backoff.failures(),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(running) = self.control.get_mut().running.take() {
            running.cancellation.cancel();
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

/// State moved into the background task.
struct PollLoop {
    pipeline: Arc<EtaPipeline>,
    roster: Arc<Roster>,
    telemetry: Arc<dyn TelemetrySink>,
    config: SchedulerConfig,
    stats: Arc<Mutex<LoopStats>>,
    /// Earlier loops that must exit before this one polls.
    predecessors: Vec<JoinHandle<()>>,
}

impl PollLoop {
    async fn run(mut self, cancellation: CancellationToken) {
        for task in std::mem::take(&mut self.predecessors) {
            if let Err(e) = task.await {
                if e.is_panic() {
                    warn!(error = %e, "Previous scheduler task panicked");
                }
            }
        }
        if cancellation.is_cancelled() {
            info!("Scheduler stopped before first cycle");
            return;
        }

        loop {
            let delay = self.cycle(&cancellation).await;

            tokio::select! {
                biased;

                _ = cancellation.cancelled() => break,

                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("Scheduler stopped");
    }

    /// Runs one cycle and returns the delay before the next.
    async fn cycle(&self, cancellation: &CancellationToken) -> Duration {
        let Some((destination, entities)) = self.roster.snapshot() else {
            debug!("Roster not ready, cycle skipped");
            return self.config.interval();
        };

        let guard = match self.config.stop_policy {
            StopPolicy::FinishCycle => ApplyGuard::always(),
            StopPolicy::DiscardInFlight => ApplyGuard::unless_cancelled(cancellation.clone()),
        };

        let outcome = self.pipeline.poll(destination, &entities, &guard).await;
        self.telemetry.record(TelemetryRecord::from_outcome(&outcome));

        let mut stats = self.stats.lock();
        stats.cycles += 1;
        match &outcome.result {
            Ok(_) => {
                stats.backoff.record_success();
                self.config.success_delay()
            }
            Err(e) => {
                let delay = stats.backoff.record_failure();
                let transient = match e {
                    PipelineError::Batch(source) => source.is_transient(),
                };
                warn!(
                    error = %e,
                    transient,
                    failures = stats.backoff.failures(),
                    retry_in_ms = delay.as_millis() as u64,
                    "Poll cycle failed, backing off"
                );
                delay
            }
        }
    }
}
