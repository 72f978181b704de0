//! Execution options and the guarded hand-off to a query backend.
//!
//! Validation decides whether a query may run. This module decides how much
//! it may do when it runs: result counts and timeouts are bounded by
//! [`clamp_options`], and [`GuardedExecutor`] enforces both around any
//! [`Executor`] implementation.

use crate::audit::{AuditSink, build_audit_entry, record_or_warn};
use crate::error::ExecutionError;
use crate::metrics::GuardMetrics;
use crate::query::{Dialect, QueryValidator, ValidationRequest};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, info_span, warn};

/// Rows returned when the caller does not ask for a count.
pub const DEFAULT_MAX_RESULTS: u64 = 1_000;
/// Hard ceiling on rows, whatever the caller asks for.
pub const MAX_RESULTS_CEILING: u64 = 10_000;
/// Timeout used when the caller does not ask for one.
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;
/// Hard ceiling on the timeout.
pub const TIMEOUT_CEILING_MS: u64 = 300_000;

/// Caller-requested limits. Either may be absent; zero counts as absent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub max_results: Option<u64>,
    pub timeout_ms: Option<u64>,
}

impl ExecutionRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_results(mut self, max_results: u64) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }
}

/// Bounded limits handed to the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionOptions {
    pub max_results: u64,
    pub timeout_ms: u64,
}

impl ExecutionOptions {
    pub fn clamp(request: ExecutionRequest) -> Self {
        clamp_options(request)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        clamp_options(ExecutionRequest::default())
    }
}

fn clamp_value(requested: Option<u64>, default: u64, ceiling: u64) -> u64 {
    requested.filter(|&v| v > 0).unwrap_or(default).min(ceiling)
}

/// Substitute defaults for absent values, then cap at the ceilings.
///
/// Only the upper bound is enforced: a value below the default passes
/// through unchanged.
///
/// ```
/// use query_guard::execution::{ExecutionRequest, clamp_options};
///
/// let options = clamp_options(
///     ExecutionRequest::new().with_max_results(999_999).with_timeout_ms(1),
/// );
/// assert_eq!(options.max_results, 10_000);
/// assert_eq!(options.timeout_ms, 1);
/// ```
pub fn clamp_options(request: ExecutionRequest) -> ExecutionOptions {
    ExecutionOptions {
        max_results: clamp_value(request.max_results, DEFAULT_MAX_RESULTS, MAX_RESULTS_CEILING),
        timeout_ms: clamp_value(request.timeout_ms, DEFAULT_TIMEOUT_MS, TIMEOUT_CEILING_MS),
    }
}

/// Tabular result from a backend.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<JsonValue>>,
    /// Set when rows beyond `max_results` were dropped.
    #[serde(default)]
    pub truncated: bool,
}

impl QueryResponse {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<JsonValue>>) -> Self {
        Self {
            columns,
            rows,
            truncated: false,
        }
    }

    fn truncate_to(&mut self, max_results: u64) {
        let limit = usize::try_from(max_results).unwrap_or(usize::MAX);
        if self.rows.len() > limit {
            self.rows.truncate(limit);
            self.truncated = true;
        }
    }
}

/// A backend that runs already-sanitized query text.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        query: &str,
        dialect: Dialect,
        options: &ExecutionOptions,
    ) -> Result<QueryResponse, ExecutionError>;
}

/// Who asked for the query, for the audit trail.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub channel: String,
}

impl Caller {
    pub fn new(user_id: impl Into<String>, channel: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            channel: channel.into(),
        }
    }
}

/// Validates, audits and bounds every query before it reaches `E`.
pub struct GuardedExecutor<E> {
    executor: E,
    validator: QueryValidator,
    audit: Arc<dyn AuditSink>,
    metrics: Arc<GuardMetrics>,
}

impl<E: Executor> GuardedExecutor<E> {
    pub fn new(executor: E, validator: QueryValidator, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            executor,
            validator,
            audit,
            metrics: Arc::new(GuardMetrics::new()),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<GuardMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<GuardMetrics> {
        &self.metrics
    }

    pub fn validator(&self) -> &QueryValidator {
        &self.validator
    }

    /// Run `request` if it validates.
    ///
    /// The attempt is audited whether or not it validates. Invalid queries
    /// never reach the backend.
    pub async fn run(
        &self,
        request: &ValidationRequest,
        limits: ExecutionRequest,
        caller: &Caller,
    ) -> Result<QueryResponse, ExecutionError> {
        let span = info_span!(
            "guarded_query",
            dialect = %request.dialect,
            query_hash = %crate::audit::query_fingerprint(&request.raw_query),
        );
        self.run_inner(request, limits, caller).instrument(span).await
    }

    async fn run_inner(
        &self,
        request: &ValidationRequest,
        limits: ExecutionRequest,
        caller: &Caller,
    ) -> Result<QueryResponse, ExecutionError> {
        let result = self.validator.validate(request);
        self.metrics
            .record_validation(result.is_valid(), result.warnings().len());

        let entry = build_audit_entry(
            &request.raw_query,
            request.dialect,
            caller.user_id.as_str(),
            caller.channel.as_str(),
            &result,
        );
        record_or_warn(self.audit.as_ref(), &entry);

        let Some(query) = result.sanitized_query() else {
            return Err(ExecutionError::Rejected {
                errors: result.error_messages(),
            });
        };

        let options = clamp_options(limits);
        debug!(
            max_results = options.max_results,
            timeout_ms = options.timeout_ms,
            "executing sanitized query"
        );

        let outcome = tokio::time::timeout(
            options.timeout(),
            self.executor.execute(query, request.dialect, &options),
        )
        .await;

        match outcome {
            Ok(Ok(mut response)) => {
                self.metrics.record_execution();
                response.truncate_to(options.max_results);
                Ok(response)
            }
            Ok(Err(error)) => {
                self.metrics.record_failure();
                warn!(%error, category = %error.category(), "query execution failed");
                Err(error)
            }
            Err(_) => {
                self.metrics.record_timeout();
                warn!(timeout_ms = options.timeout_ms, "query execution timed out");
                Err(ExecutionError::Timeout {
                    timeout_ms: options.timeout_ms,
                })
            }
        }
    }
}
