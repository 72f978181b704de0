//! Error types for the execution layer.
//!
//! Validation outcomes are not errors: they are returned as
//! [`ValidationResult`](crate::query::ValidationResult). The types here cover
//! what can go wrong once a caller asks for a query to actually run.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Broad failure classes, used for metrics and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The validator refused the query.
    Rejected,
    /// The backend did not answer within the clamped timeout.
    Timeout,
    /// The backend answered with a failure.
    Backend,
    /// No client or configuration is available to reach the backend.
    Unavailable,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Rejected => "rejected",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Backend => "backend",
            ErrorCategory::Unavailable => "unavailable",
        };
        f.write_str(name)
    }
}

/// Failure of a guarded execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("query rejected by validation: {}", .errors.join("; "))]
    Rejected { errors: Vec<String> },

    #[error("query timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("query backend error: {message}")]
    Backend { message: String, retryable: bool },

    #[error("query backend unavailable: {0}")]
    Unavailable(String),
}

impl ExecutionError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn retryable_backend(message: impl Into<String>) -> Self {
        Self::Backend {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ExecutionError::Rejected { .. } => ErrorCategory::Rejected,
            ExecutionError::Timeout { .. } => ErrorCategory::Timeout,
            ExecutionError::Backend { .. } => ErrorCategory::Backend,
            ExecutionError::Unavailable(_) => ErrorCategory::Unavailable,
        }
    }

    /// Rejections never succeed on retry; timeouts and flagged backend
    /// failures may.
    pub fn is_retryable(&self) -> bool {
        match self {
            ExecutionError::Timeout { .. } => true,
            ExecutionError::Backend { retryable, .. } => *retryable,
            ExecutionError::Rejected { .. } | ExecutionError::Unavailable(_) => false,
        }
    }
}
