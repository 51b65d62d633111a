//! Travel-time provider abstraction
//!
//! This module provides the [`TravelTimeProvider`] trait used by the
//! estimation pipeline, an HTTP-backed implementation, and the
//! [`ResponseNormalizer`] that turns whatever JSON the provider returns into
//! ordered, possibly-partial estimates.
//!
//! ```ignore
//! use tripwatch::provider::{HttpTravelTimeProvider, ProviderEndpoints, ReqwestClient};
//!
//! let http_client = ReqwestClient::with_timeout(15)?;
//! let provider = HttpTravelTimeProvider::new(http_client, endpoints);
//! let raw = provider.batch_travel_times(destination, &entities).await?;
//! let normalized = ResponseNormalizer::default().normalize_batch(&raw, entities.len());
//! ```

mod http;
mod matrix;
mod normalize;
mod types;

pub use http::{AsyncHttpClient, BoxFuture, ReqwestClient, DEFAULT_TIMEOUT_SECS};
pub use matrix::{HttpTravelTimeProvider, ProviderEndpoints};
pub use normalize::{
    DeepSearch, FlatSummaries, MatrixRows, Normalized, ResponseNormalizer, RouteList,
    ShapeStrategy, Want,
};
pub use types::{ProviderError, TravelTimeProvider};

#[cfg(test)]
pub use http::tests::MockHttpClient;
