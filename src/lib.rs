pub mod audit;
pub mod config;
pub mod error;
pub mod execution;
pub mod logging;
pub mod metrics;
pub mod query;

pub use audit::{AuditLogEntry, AuditSink, build_audit_entry, query_fingerprint};
pub use config::{CliArgs, Command, GuardConfig, GuardSettings};
pub use error::{ErrorCategory, ExecutionError};
pub use execution::{
    Caller, ExecutionOptions, ExecutionRequest, Executor, GuardedExecutor, QueryResponse,
    clamp_options,
};
pub use logging::{LoggingConfig, init_logging};
pub use metrics::{GuardMetrics, GuardStats};
pub use query::{
    CommentMode, Dialect, DialectPolicy, QueryValidator, ValidationOptions, ValidationRequest,
    ValidationResult, escape_value, validate_analytics, validate_resource_graph,
};
