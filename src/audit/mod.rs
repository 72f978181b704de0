//! Audit trail for query validation attempts
//!
//! Every validation attempt produces one [`AuditLogEntry`], whether the query
//! was accepted or not. Entries are immutable once built and are handed to an
//! [`AuditSink`] for persistence.
//!
//! # Usage
//!
//! ```rust
//! use query_guard::audit::{AuditSink, MemoryAuditSink, build_audit_entry};
//! use query_guard::query::{Dialect, ValidationOptions, validate_analytics};
//!
//! let query = "Perf | take 10";
//! let result = validate_analytics(query, ValidationOptions::default());
//! let entry = build_audit_entry(query, Dialect::Analytics, "user-1", "teams", &result);
//!
//! let sink = MemoryAuditSink::new(100);
//! sink.record(&entry).unwrap();
//! assert_eq!(sink.len(), 1);
//! ```

mod sinks;

pub use sinks::{
    AuditFilter, AuditSink, DEFAULT_MEMORY_BUFFER_SIZE, JsonlAuditSink, MemoryAuditSink,
};
pub(crate) use sinks::record_or_warn;

use crate::query::{Dialect, ValidationResult, query_length};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One validation attempt, as recorded for traceability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub timestamp: DateTime<Utc>,
    pub raw_query: String,
    pub dialect: Dialect,
    /// Non-cryptographic fingerprint for grouping; see [`query_fingerprint`].
    pub query_hash: String,
    pub query_length: usize,
    pub user_id: String,
    pub channel: String,
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

/// Assemble the audit record for a validation attempt.
pub fn build_audit_entry(
    query: &str,
    dialect: Dialect,
    user_id: impl Into<String>,
    channel: impl Into<String>,
    result: &ValidationResult,
) -> AuditLogEntry {
    AuditLogEntry {
        timestamp: Utc::now(),
        raw_query: query.to_string(),
        dialect,
        query_hash: query_fingerprint(query),
        query_length: query_length(query),
        user_id: user_id.into(),
        channel: channel.into(),
        valid: result.is_valid(),
        errors: result.error_messages(),
        warnings: result.warning_messages(),
    }
}

/// 32-bit rolling polynomial hash (`h = h * 31 + unit`, wrapping) over the
/// UTF-16 code units of `query`, rendered as the lowercase hex magnitude.
///
/// This groups identical queries in logs. It is not a security control.
pub fn query_fingerprint(query: &str) -> String {
    let hash = query
        .encode_utf16()
        .fold(0i32, |hash, unit| {
            hash.wrapping_shl(5)
                .wrapping_sub(hash)
                .wrapping_add(i32::from(unit))
        });
    format!("{:x}", i64::from(hash).unsigned_abs())
}
