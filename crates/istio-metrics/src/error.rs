//! Error types shared by the provider and its metrics adapter

use thiserror::Error;

/// Errors surfaced by the provider
///
/// Adapter failures are returned to the caller exactly as the adapter
/// produced them, so the same type is used on both sides of the boundary.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MetricsError {
    /// The configured backend address could not be parsed
    #[error("invalid backend address {address:?}: {source}")]
    InvalidBackendAddress {
        address: String,
        #[source]
        source: url::ParseError,
    },

    /// The configured backend address is not an http(s) URL
    #[error("unsupported backend scheme {scheme:?} in {address:?}")]
    UnsupportedBackendScheme { address: String, scheme: String },

    /// The query descriptor is not usable for this operation
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// The requested interval is empty or inverted
    #[error("invalid interval: {0}")]
    InvalidInterval(String),

    /// The backend could not be reached
    #[error("metrics backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend refused to evaluate a query
    #[error("query {query:?} rejected by backend: {message}")]
    QueryRejected { query: String, message: String },

    /// The backend answered with something that could not be decoded
    #[error("malformed backend response: {0}")]
    MalformedResponse(String),

    /// A metric that must produce a value produced none
    #[error("no samples returned for metric {metric:?}")]
    EmptyResult { metric: String },

    /// The request context was cancelled
    #[error("request cancelled")]
    Cancelled,

    /// The request context deadline passed before the backend answered
    #[error("request deadline exceeded")]
    DeadlineExceeded,
}

impl MetricsError {
    /// Returns true if the error was caused by the caller's request
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            MetricsError::InvalidQuery(_) | MetricsError::InvalidInterval(_)
        )
    }

    /// Returns true if the request ended because its context gave up
    pub fn is_aborted(&self) -> bool {
        matches!(self, MetricsError::Cancelled | MetricsError::DeadlineExceeded)
    }

    /// Short machine-readable label, used for logs and metric labels
    pub fn code(&self) -> &'static str {
        match self {
            MetricsError::InvalidBackendAddress { .. } => "invalid_backend_address",
            MetricsError::UnsupportedBackendScheme { .. } => "unsupported_backend_scheme",
            MetricsError::InvalidQuery(_) => "invalid_query",
            MetricsError::InvalidInterval(_) => "invalid_interval",
            MetricsError::BackendUnavailable(_) => "backend_unavailable",
            MetricsError::QueryRejected { .. } => "query_rejected",
            MetricsError::MalformedResponse(_) => "malformed_response",
            MetricsError::EmptyResult { .. } => "empty_result",
            MetricsError::Cancelled => "cancelled",
            MetricsError::DeadlineExceeded => "deadline_exceeded",
        }
    }
}
