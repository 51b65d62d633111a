//! Estimate types and the numeric helpers that combine them.
//!
//! ```text
//! provider ─► RawEstimate ─► blend() ─► SmoothingStore ─► SmoothedEstimate
//!              (partial)     (per entity)  (per entity)     (what consumers read)
//! ```
//!
//! Everything here is pure and synchronous. The functions never produce
//! NaN, infinities or negative values: anything that cannot be computed
//! cleanly comes back as `None` and the caller skips the entity for that
//! cycle.

mod blend;
mod types;

pub use blend::{
    blend, synthesize_eta, AGREEMENT_THRESHOLD, MIN_SPEED_MPS, PRIMARY_WEIGHT, SECONDARY_WEIGHT,
};
pub use types::{RawEstimate, SmoothedEstimate};
