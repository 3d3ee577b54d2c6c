//! Error types for the router.

use thiserror::Error;

use crate::dispatch::FallbackReason;

/// Result type alias for router operations.
pub type Result<T> = std::result::Result<T, RouterError>;

/// Errors that can occur while routing.
#[derive(Error, Debug)]
pub enum RouterError {
    /// No tier server has this name.
    #[error("server {0} not found")]
    UnknownServer(String),

    /// The request itself is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A tier answered with an error.
    #[error("{server} failed ({kind}): {message}")]
    Tier {
        server: String,
        /// HTTP status the tier answered with, when reached over HTTP.
        status: Option<u16>,
        kind: String,
        message: String,
    },

    /// A tier could not be reached.
    #[error("{server} is unreachable: {message}")]
    Unreachable { server: String, message: String },

    /// A tier did not answer in time.
    #[error("{server} timed out after {after_ms} ms")]
    Timeout { server: String, after_ms: u64 },

    /// Neither the primary nor the fallback tier produced an answer.
    #[error("{}", describe_exhausted(.primary, .primary_error, .fallback, .fallback_error))]
    AllTiersUnavailable {
        primary: String,
        primary_reason: FallbackReason,
        primary_error: String,
        fallback: Option<String>,
        fallback_error: Option<String>,
    },

    /// The caller went away.
    #[error("request cancelled")]
    Cancelled,

    /// Invalid router configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

fn describe_exhausted(
    primary: &str,
    primary_error: &str,
    fallback: &Option<String>,
    fallback_error: &Option<String>,
) -> String {
    match (fallback, fallback_error) {
        (Some(fallback), Some(err)) => format!(
            "all tiers unavailable: primary {primary} ({primary_error}), fallback {fallback} ({err})"
        ),
        _ => format!("all tiers unavailable: primary {primary} ({primary_error}), no fallback"),
    }
}

impl RouterError {
    /// Stable machine-readable name, used as the `error` field of HTTP bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownServer(_) => "unknown_server",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Tier { .. } => "tier_error",
            Self::Unreachable { .. } => "tier_unreachable",
            Self::Timeout { .. } => "timeout",
            Self::AllTiersUnavailable { .. } => "all_tiers_unavailable",
            Self::Cancelled => "cancelled",
            Self::InvalidConfig(_) => "invalid_config",
        }
    }

    /// Why a fallback was taken after this error.
    pub fn fallback_reason(&self) -> FallbackReason {
        match self {
            Self::Timeout { .. } => FallbackReason::Timeout,
            Self::Unreachable { .. } => FallbackReason::PrimaryTierUnreachable,
            _ => FallbackReason::PrimaryTierError,
        }
    }
}
