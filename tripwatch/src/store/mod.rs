//! Per-session store of smoothed estimates.
//!
//! The [`SmoothingStore`] is the single read path for consumers. It is an
//! ordinary value: construct one per tracking session and hand out
//! `Arc<SmoothingStore>` clones. Two sessions never share state.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use tripwatch::estimate::RawEstimate;
//! use tripwatch::store::{SmoothingStore, StoreConfig};
//!
//! let store = Arc::new(SmoothingStore::new(StoreConfig::default()).unwrap());
//! store.subscribe(|update| println!("{} -> {}s", update.id, update.estimate.eta_seconds));
//!
//! store.update_raw("alice", RawEstimate::eta(120.0));
//! assert_eq!(store.get_smoothed("alice").unwrap().eta_seconds, 120);
//! ```

mod smoothing;

pub use smoothing::{
    SmoothingStore, StoreConfig, StoreError, StoreUpdate, SubscriptionId, DEFAULT_ALPHA,
    DEFAULT_ASSUMED_SPEED_KMPH,
};
