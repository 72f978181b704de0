//! Validation and sanitization of generated queries
//!
//! This module is the security gate between a language model that writes
//! queries and the backend that runs them:
//! - Comment stripping into a normalized view (`lexer`)
//! - Blocking and advisory pattern tables (`patterns`)
//! - Per-dialect whitelists and structural checks (`policy`)
//! - The validator that combines them (`validator`)
//! - Escaping of values interpolated during query generation (`escape`)

pub mod escape;
pub mod lexer;
pub mod patterns;
pub mod policy;
pub mod validator;

pub use escape::{escape_json_value, escape_optional, escape_value};
pub use lexer::{CommentMode, query_length, sanitize, strip_comments};
pub use patterns::{PatternSet, Severity, ThreatPattern};
pub use policy::{
    ANALYTICS_ALLOWED_TABLES, DEFAULT_ANALYTICS_MAX_LENGTH, DEFAULT_GRAPH_MAX_LENGTH, Dialect,
    DialectPolicy, RESOURCE_GRAPH_ROOTS,
};
pub use validator::{
    Advisory, QueryValidator, ValidationOptions, ValidationRequest, ValidationResult, Violation,
    validate_analytics, validate_resource_graph,
};
