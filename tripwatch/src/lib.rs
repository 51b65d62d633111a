//! Tripwatch - live ETA tracking for groups heading to one destination
//!
//! This library polls an external travel-time service for every tracked
//! participant, fills the gaps with per-route fallbacks, blends the
//! estimates and smooths them into a stable "time remaining" per
//! participant.
//!
//! # Architecture
//!
//! ```text
//! Roster ─► Scheduler ─► EtaPipeline ──────────────────────────► SmoothingStore ─► subscribers
//!                         ├─ BatchEstimator   (1 request/cycle)
//!                         ├─ FallbackResolver (1 request/gap, serial)
//!                         └─ blend
//!           Scheduler ─► TelemetrySink
//!
//! PositionSource ─► PositionPublisher
//!        └────────► Roster
//! ```
//!
//! A [`session::TrackingSession`] wires all of the above for one session.

pub mod config;
pub mod coord;
pub mod estimate;
pub mod logging;
pub mod pipeline;
pub mod position;
pub mod provider;
pub mod scheduler;
pub mod session;
pub mod store;
pub mod telemetry;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
