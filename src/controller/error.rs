//! Error types for the controllers.
//!
//! Defines custom error types with classification for retry behavior.

use std::time::Duration;
use thiserror::Error;

use crate::controller::validation::ValidationError;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Creating a managed object failed for a reason other than "already exists"
    #[error("failed to create {kind}: {source}")]
    ObjectCreate {
        kind: String,
        #[source]
        source: kube::Error,
    },

    /// Updating an existing managed object failed
    #[error("failed to update {kind}: {source}")]
    ObjectUpdate {
        kind: String,
        #[source]
        source: kube::Error,
    },

    /// Missing required field in resource
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Validation error in resource spec
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Transient error that should be retried
    #[error("Transient error: {0}")]
    Transient(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

fn kube_error_is_retryable(e: &kube::Error) -> bool {
    // Retry on network errors, rate limiting, and server errors
    matches!(
        e,
        kube::Error::Api(api_err) if api_err.code >= 500 || api_err.code == 429
    ) || matches!(e, kube::Error::Service(_))
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Kube(kube::Error::Api(e))
            | Error::ObjectCreate {
                source: kube::Error::Api(e),
                ..
            }
            | Error::ObjectUpdate {
                source: kube::Error::Api(e),
                ..
            } => e.code == 404,
            _ => false,
        }
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => kube_error_is_retryable(e),
            // Conflicts on create/update resolve on the next pass
            Error::ObjectCreate { source, .. } | Error::ObjectUpdate { source, .. } => {
                kube_error_is_retryable(source)
                    || matches!(source, kube::Error::Api(api_err) if api_err.code == 409)
            }
            Error::Transient(_) => true,
            Error::Validation(_) | Error::MissingField(_) => false,
            Error::Serialization(_) => false,
        }
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        if self.is_retryable() {
            Duration::from_secs(30)
        } else {
            // Non-retryable errors wait for a spec change, with a slow safety requeue
            Duration::from_secs(300)
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
