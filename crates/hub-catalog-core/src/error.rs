//! Error taxonomy shared by every layer of the query pipeline.
//!
//! Every failure in rendering, dispatch, or normalization is returned as a
//! [`CatalogError`]. The enum is `Clone` because a single-flight fetch hands
//! the same outcome to every waiter on a fingerprint.
//!
//! Partially malformed batches are *not* errors: skipped records are
//! reported as [`NormalizationNote`](crate::models::NormalizationNote)s on
//! an otherwise successful result.

use thiserror::Error;

/// Result alias used throughout the core crate.
pub type Result<T, E = CatalogError> = std::result::Result<T, E>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    /// Malformed tool parameters. Never sent upstream.
    #[error("invalid parameters: {0}")]
    Validation(String),

    /// The catalog service rejected the rendered query (HTTP 400).
    #[error("query rejected by catalog service: {0}")]
    QuerySyntax(String),

    /// A single-entity lookup addressed something that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Network failure or 5xx after exhausting the retry budget.
    #[error("catalog service unavailable after {attempts} attempt(s): {message}")]
    TransientUnavailable { attempts: u32, message: String },

    /// The body matched neither the v2 nor the v4 envelope shape.
    #[error("unrecognized response envelope: {0}")]
    EnvelopeFormat(String),

    /// The caller abandoned the request, or the fetch it was waiting on.
    #[error("request cancelled")]
    Cancelled,
}

impl CatalogError {
    /// Shorthand for building a [`CatalogError::Validation`].
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Machine-readable code used in tool and HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "bad_request",
            Self::QuerySyntax(_) => "query_syntax",
            Self::NotFound(_) => "not_found",
            Self::TransientUnavailable { .. } => "unavailable",
            Self::EnvelopeFormat(_) => "bad_upstream",
            Self::Cancelled => "cancelled",
        }
    }
}
