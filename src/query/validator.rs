//! Query validation entry points.
//!
//! [`QueryValidator`] runs the full gate for one request:
//!
//! 1. Emptiness and length checks (short-circuit with a single error)
//! 2. Comment stripping into a normalized view
//! 3. Blocking and advisory pattern scans (all patterns, no short-circuit)
//! 4. Table / root collection whitelist
//! 5. Stray statement separators outside single-quoted literals
//! 6. Optional time-filter heuristic (analytics only, advisory)
//! 7. Sanitization, only when nothing blocked
//!
//! Validation failure is an expected outcome and is returned as data. The
//! validator holds no mutable state and can be shared freely across threads.

use super::lexer::{CommentMode, query_length, sanitize, strip_comments};
use super::patterns::scan;
use super::policy::{Dialect, DialectPolicy, has_stray_separator, has_time_filter};
use once_cell::sync::Lazy;
use serde::ser::{Serialize, SerializeStruct, Serializer};
use thiserror::Error;

/// A blocking finding. Any violation makes the query invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("Query cannot be empty")]
    Empty,

    /// Lengths are in UTF-16 code units.
    #[error("Query exceeds maximum length of {max} characters (got {length})")]
    TooLong { length: usize, max: usize },

    #[error("Blocked operation detected: {description}")]
    BlockedOperation { description: String },

    #[error("Table '{table}' is not in the allowed list. Allowed tables: {}", .allowed.join(", "))]
    BlockedTable { table: String, allowed: Vec<String> },

    #[error("Query must start with a valid resource type, found '{found}'. Valid types: {}", .allowed.join(", "))]
    InvalidRootResource { found: String, allowed: Vec<String> },

    #[error("Multiple statements detected: a statement separator appears outside a string literal")]
    MultipleStatements,
}

impl Violation {
    /// Stable machine-readable name for logs, metrics and JSON output.
    pub fn kind(&self) -> &'static str {
        match self {
            Violation::Empty => "rejected_empty",
            Violation::TooLong { .. } => "rejected_too_long",
            Violation::BlockedOperation { .. } => "blocked_operation",
            Violation::BlockedTable { .. } | Violation::InvalidRootResource { .. } => {
                "blocked_table"
            }
            Violation::MultipleStatements => "blocked_multi_statement",
        }
    }
}

/// A finding that is reported but never blocks execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Advisory {
    #[error("Potential injection pattern detected: {description}")]
    SuspiciousPattern { description: String },

    #[error(
        "Query has no time filter (e.g. TimeGenerated > ago(1d)); it may scan more data than needed"
    )]
    MissingTimeFilter,
}

impl Advisory {
    pub fn kind(&self) -> &'static str {
        match self {
            Advisory::SuspiciousPattern { .. } => "advisory_injection_pattern",
            Advisory::MissingTimeFilter => "advisory_no_time_filter",
        }
    }
}

macro_rules! serialize_finding {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let mut state = serializer.serialize_struct(stringify!($ty), 2)?;
                state.serialize_field("kind", self.kind())?;
                state.serialize_field("message", &self.to_string())?;
                state.end()
            }
        }
    };
}

serialize_finding!(Violation);
serialize_finding!(Advisory);

/// Caller-tunable checks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationOptions {
    /// Warn when an analytics query has no time filter.
    pub require_time_filter: bool,
    /// Overrides the dialect's default maximum length.
    pub max_query_length: Option<usize>,
}

impl ValidationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_time_filter(mut self, required: bool) -> Self {
        self.require_time_filter = required;
        self
    }

    pub fn with_max_query_length(mut self, max: usize) -> Self {
        self.max_query_length = Some(max);
        self
    }
}

/// One validation attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRequest {
    pub raw_query: String,
    pub dialect: Dialect,
    pub options: ValidationOptions,
}

impl ValidationRequest {
    pub fn new(raw_query: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            raw_query: raw_query.into(),
            dialect,
            options: ValidationOptions::default(),
        }
    }

    pub fn analytics(raw_query: impl Into<String>) -> Self {
        Self::new(raw_query, Dialect::Analytics)
    }

    pub fn resource_graph(raw_query: impl Into<String>) -> Self {
        Self::new(raw_query, Dialect::ResourceGraph)
    }

    pub fn with_options(mut self, options: ValidationOptions) -> Self {
        self.options = options;
        self
    }
}

/// Outcome of a validation attempt.
///
/// `sanitized_query` is present exactly when `errors` is empty, and `valid`
/// mirrors that. The fields are only reachable through accessors so the
/// invariant cannot be broken after construction.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ValidationResult {
    valid: bool,
    errors: Vec<Violation>,
    warnings: Vec<Advisory>,
    sanitized_query: Option<String>,
}

impl ValidationResult {
    fn rejected(violation: Violation) -> Self {
        Self {
            valid: false,
            errors: vec![violation],
            warnings: Vec::new(),
            sanitized_query: None,
        }
    }

    fn from_findings(
        errors: Vec<Violation>,
        warnings: Vec<Advisory>,
        sanitize: impl FnOnce() -> String,
    ) -> Self {
        let sanitized_query = errors.is_empty().then(sanitize);
        Self {
            valid: sanitized_query.is_some(),
            errors,
            warnings,
            sanitized_query,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn errors(&self) -> &[Violation] {
        &self.errors
    }

    pub fn warnings(&self) -> &[Advisory] {
        &self.warnings
    }

    pub fn sanitized_query(&self) -> Option<&str> {
        self.sanitized_query.as_deref()
    }

    pub fn into_sanitized_query(self) -> Option<String> {
        self.sanitized_query
    }

    pub fn error_messages(&self) -> Vec<String> {
        self.errors.iter().map(ToString::to_string).collect()
    }

    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(ToString::to_string).collect()
    }
}

/// Stateless validator holding one policy per dialect.
#[derive(Debug, Clone)]
pub struct QueryValidator {
    analytics: DialectPolicy,
    resource_graph: DialectPolicy,
    comment_mode: CommentMode,
}

impl Default for QueryValidator {
    fn default() -> Self {
        Self::new(DialectPolicy::analytics(), DialectPolicy::resource_graph())
    }
}

impl QueryValidator {
    pub fn new(analytics: DialectPolicy, resource_graph: DialectPolicy) -> Self {
        Self {
            analytics,
            resource_graph,
            comment_mode: CommentMode::default(),
        }
    }

    pub fn with_comment_mode(mut self, mode: CommentMode) -> Self {
        self.comment_mode = mode;
        self
    }

    pub fn comment_mode(&self) -> CommentMode {
        self.comment_mode
    }

    pub fn policy(&self, dialect: Dialect) -> &DialectPolicy {
        match dialect {
            Dialect::Analytics => &self.analytics,
            Dialect::ResourceGraph => &self.resource_graph,
        }
    }

    pub fn validate_analytics(&self, raw_query: &str, options: ValidationOptions) -> ValidationResult {
        self.validate_with(raw_query, Dialect::Analytics, options)
    }

    pub fn validate_resource_graph(
        &self,
        raw_query: &str,
        options: ValidationOptions,
    ) -> ValidationResult {
        self.validate_with(raw_query, Dialect::ResourceGraph, options)
    }

    pub fn validate(&self, request: &ValidationRequest) -> ValidationResult {
        self.validate_with(&request.raw_query, request.dialect, request.options)
    }

    fn validate_with(
        &self,
        raw_query: &str,
        dialect: Dialect,
        options: ValidationOptions,
    ) -> ValidationResult {
        let result = self.evaluate(raw_query, dialect, options);

        tracing::debug!(
            %dialect,
            valid = result.is_valid(),
            errors = result.errors().len(),
            warnings = result.warnings().len(),
            "query validated"
        );
        if !result.is_valid() {
            let kinds: Vec<&str> = result.errors().iter().map(Violation::kind).collect();
            crate::log_security_event!(
                "query_blocked",
                %dialect,
                reasons = ?kinds,
                "generated query rejected"
            );
        }

        result
    }

    fn evaluate(&self, raw_query: &str, dialect: Dialect, options: ValidationOptions) -> ValidationResult {
        let policy = self.policy(dialect);

        if raw_query.trim().is_empty() {
            return ValidationResult::rejected(Violation::Empty);
        }

        let max = options
            .max_query_length
            .unwrap_or_else(|| policy.default_max_length());
        let length = query_length(raw_query);
        if length > max {
            return ValidationResult::rejected(Violation::TooLong { length, max });
        }

        let normalized = strip_comments(raw_query, self.comment_mode);
        if normalized.trim().is_empty() {
            // Nothing but comments.
            return ValidationResult::rejected(Violation::Empty);
        }

        let mut errors: Vec<Violation> = scan(policy.blocking(), &normalized)
            .into_iter()
            .map(|pattern| Violation::BlockedOperation {
                description: pattern.description().to_string(),
            })
            .collect();
        let mut warnings: Vec<Advisory> = scan(policy.advisory(), &normalized)
            .into_iter()
            .map(|pattern| Advisory::SuspiciousPattern {
                description: pattern.description().to_string(),
            })
            .collect();

        if let Some(violation) = policy.check_source(&normalized) {
            errors.push(violation);
        }

        if has_stray_separator(&normalized) {
            errors.push(Violation::MultipleStatements);
        }

        if options.require_time_filter
            && dialect == Dialect::Analytics
            && !has_time_filter(&normalized)
        {
            warnings.push(Advisory::MissingTimeFilter);
        }

        ValidationResult::from_findings(errors, warnings, || {
            sanitize(raw_query, self.comment_mode)
        })
    }
}

static DEFAULT_VALIDATOR: Lazy<QueryValidator> = Lazy::new(QueryValidator::default);

/// Validate an analytics query with the built-in policy.
pub fn validate_analytics(raw_query: &str, options: ValidationOptions) -> ValidationResult {
    DEFAULT_VALIDATOR.validate_analytics(raw_query, options)
}

/// Validate a resource-graph query with the built-in policy.
pub fn validate_resource_graph(raw_query: &str, options: ValidationOptions) -> ValidationResult {
    DEFAULT_VALIDATOR.validate_resource_graph(raw_query, options)
}
