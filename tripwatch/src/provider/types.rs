//! Provider trait and error type.

use serde_json::Value;
use thiserror::Error;

use super::http::BoxFuture;
use crate::coord::{GeoPoint, TrackedEntity};

/// Errors raised by a travel-time provider call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProviderError {
    /// Transport failure (connection refused, TLS, body read).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Non-success status code.
    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    /// The request did not complete within the client timeout.
    #[error("Request to {0} timed out")]
    Timeout(String),

    /// Body was not valid JSON.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Whether retrying later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            ProviderError::HttpError(_) | ProviderError::Timeout(_) => true,
            ProviderError::Status { status, .. } => *status == 429 || *status >= 500,
            ProviderError::InvalidResponse(_) => false,
        }
    }
}

/// External travel-time capability.
///
/// Implementations return the provider's raw JSON; shape handling lives in
/// [`ResponseNormalizer`](super::ResponseNormalizer) so any provider can be
/// plugged in without committing to one schema.
pub trait TravelTimeProvider: Send + Sync {
    /// One batched request for every origin against a shared destination.
    fn batch_travel_times<'a>(
        &'a self,
        destination: GeoPoint,
        origins: &'a [TrackedEntity],
    ) -> BoxFuture<'a, Result<Value, ProviderError>>;

    /// One single-origin route request.
    fn route<'a>(
        &'a self,
        origin: GeoPoint,
        destination: GeoPoint,
    ) -> BoxFuture<'a, Result<Value, ProviderError>>;

    /// Human-readable provider name.
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ProviderError::HttpError("reset".into()).is_transient());
        assert!(ProviderError::Timeout("u".into()).is_transient());
        assert!(ProviderError::Status {
            status: 503,
            url: "u".into()
        }
        .is_transient());
        assert!(ProviderError::Status {
            status: 429,
            url: "u".into()
        }
        .is_transient());
        assert!(!ProviderError::Status {
            status: 403,
            url: "u".into()
        }
        .is_transient());
        assert!(!ProviderError::InvalidResponse("x".into()).is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = ProviderError::Status {
            status: 502,
            url: "https://eta.example/matrix".into(),
        };
        assert_eq!(err.to_string(), "HTTP 502 from https://eta.example/matrix");
    }
}
