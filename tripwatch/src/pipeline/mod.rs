//! ETA estimation pipeline.
//!
//! One cycle runs three stages in sequence:
//!
//! 1. **Batch** - a single travel-time request covering every entity
//! 2. **Fallback** - one route request per entity the batch missed, serially
//! 3. **Apply** - blend matrix and distance estimates, fold into the store
//!
//! The batch call is awaited before any fallback request goes out, and the
//! fallback requests are awaited one at a time. A batch failure aborts the
//! cycle; everything else degrades to "no update" for one entity.

mod batch;
mod cycle;
mod fallback;

pub use batch::BatchEstimator;
pub use cycle::{ApplyGuard, CycleReport, EtaPipeline, PipelineError, PollCycleOutcome};
pub use fallback::{FallbackResolver, FallbackStats};
