//! Per-dialect policy: whitelists, pattern tables, and structural checks.
//!
//! A [`DialectPolicy`] bundles everything that differs between the analytics
//! and resource-graph dialects. Built-in policies share the process-wide
//! pattern tables; tests and deployments can substitute their own whitelist or
//! patterns without touching global state.

use super::lexer::remove_single_quoted_literals;
use super::patterns::{ADVISORY, ANALYTICS_BLOCKING, GRAPH_BLOCKING, PatternSet};
use super::validator::Violation;
use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tables an analytics query may start from.
pub const ANALYTICS_ALLOWED_TABLES: &[&str] = &[
    "Perf",
    "Heartbeat",
    "Event",
    "Syslog",
    "SecurityEvent",
    "AzureActivity",
    "AzureDiagnostics",
    "AzureMetrics",
    "ContainerLog",
    "InsightsMetrics",
];

/// Root collections a resource-graph query may start from.
pub const RESOURCE_GRAPH_ROOTS: &[&str] = &[
    "Resources",
    "ResourceContainers",
    "AdvisorResources",
    "SecurityResources",
    "HealthResources",
    "PolicyResources",
];

/// Statement keywords that introduce a binding rather than a table reference.
pub const BINDING_KEYWORDS: &[&str] = &["let"];

pub const DEFAULT_ANALYTICS_MAX_LENGTH: usize = 10_000;
pub const DEFAULT_GRAPH_MAX_LENGTH: usize = 5_000;

static FIRST_IDENTIFIER: Lazy<Regex> = Lazy::new(|| compile(r"^(\w+)\s*(?:\||$)"));
static TIME_COLUMN: Lazy<Regex> = Lazy::new(|| compile(r"\b(?:TimeGenerated|Timestamp)\b"));
static TIME_BOUNDARY: Lazy<Regex> = Lazy::new(|| compile(r"\b(?:ago|between|datetime)\s*\("));

fn compile(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .unwrap_or_else(|e| panic!("invalid built-in policy pattern '{pattern}': {e}"))
}

/// Query language variant governing whitelist and pattern selection.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    /// KQL-style log analytics queries.
    Analytics,
    /// Resource-graph inventory queries.
    #[value(alias = "graph")]
    #[serde(alias = "graph")]
    ResourceGraph,
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dialect::Analytics => write!(f, "analytics"),
            Dialect::ResourceGraph => write!(f, "resource-graph"),
        }
    }
}

/// Whitelist, pattern tables and length limit for one dialect.
#[derive(Debug, Clone)]
pub struct DialectPolicy {
    dialect: Dialect,
    blocking: PatternSet,
    advisory: PatternSet,
    allowed: Vec<String>,
    default_max_length: usize,
}

impl DialectPolicy {
    pub fn analytics() -> Self {
        Self {
            dialect: Dialect::Analytics,
            blocking: ANALYTICS_BLOCKING.clone(),
            advisory: ADVISORY.clone(),
            allowed: to_owned_list(ANALYTICS_ALLOWED_TABLES),
            default_max_length: DEFAULT_ANALYTICS_MAX_LENGTH,
        }
    }

    pub fn resource_graph() -> Self {
        Self {
            dialect: Dialect::ResourceGraph,
            blocking: GRAPH_BLOCKING.clone(),
            advisory: ADVISORY.clone(),
            allowed: to_owned_list(RESOURCE_GRAPH_ROOTS),
            default_max_length: DEFAULT_GRAPH_MAX_LENGTH,
        }
    }

    pub fn for_dialect(dialect: Dialect) -> Self {
        match dialect {
            Dialect::Analytics => Self::analytics(),
            Dialect::ResourceGraph => Self::resource_graph(),
        }
    }

    /// Replace the table (analytics) or root collection (graph) whitelist.
    pub fn with_allowed<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_blocking_patterns(mut self, patterns: PatternSet) -> Self {
        self.blocking = patterns;
        self
    }

    pub fn with_advisory_patterns(mut self, patterns: PatternSet) -> Self {
        self.advisory = patterns;
        self
    }

    pub fn with_default_max_length(mut self, max_length: usize) -> Self {
        self.default_max_length = max_length;
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn blocking(&self) -> &PatternSet {
        &self.blocking
    }

    pub fn advisory(&self) -> &PatternSet {
        &self.advisory
    }

    pub fn allowed(&self) -> &[String] {
        &self.allowed
    }

    pub fn default_max_length(&self) -> usize {
        self.default_max_length
    }

    fn is_allowed(&self, name: &str) -> bool {
        self.allowed
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(name))
    }

    /// Whitelist check for the normalized query.
    ///
    /// Analytics queries are checked on their first bare identifier; a query
    /// whose first line is not a bare identifier followed by a pipe (or the end
    /// of the line) has no table reference to check. Resource-graph queries
    /// must always start with a known root collection.
    pub fn check_source(&self, normalized: &str) -> Option<Violation> {
        match self.dialect {
            Dialect::Analytics => {
                let table = first_identifier(normalized)?;
                if is_binding(table) || self.is_allowed(table) {
                    None
                } else {
                    Some(Violation::BlockedTable {
                        table: table.to_string(),
                        allowed: self.allowed.clone(),
                    })
                }
            }
            Dialect::ResourceGraph => {
                let root = normalized.split_whitespace().next().unwrap_or_default();
                if self.is_allowed(root) {
                    None
                } else {
                    Some(Violation::InvalidRootResource {
                        found: root.to_string(),
                        allowed: self.allowed.clone(),
                    })
                }
            }
        }
    }
}

impl Default for DialectPolicy {
    fn default() -> Self {
        Self::analytics()
    }
}

fn to_owned_list(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| (*name).to_string()).collect()
}

/// First bare identifier on the first line of the trimmed query, when it is
/// followed by a pipe or nothing else.
pub fn first_identifier(normalized: &str) -> Option<&str> {
    let first_line = normalized.trim().lines().next()?;
    FIRST_IDENTIFIER
        .captures(first_line.trim_end())
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str())
}

/// Whether the identifier starts with a binding keyword such as `let`.
pub fn is_binding(identifier: &str) -> bool {
    BINDING_KEYWORDS.iter().any(|keyword| {
        identifier
            .get(..keyword.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(keyword))
    })
}

/// A time column and a time-boundary call both appear somewhere in the query.
pub fn has_time_filter(normalized: &str) -> bool {
    TIME_COLUMN.is_match(normalized) && TIME_BOUNDARY.is_match(normalized)
}

/// A `;` survives once single-quoted literals are removed.
pub fn has_stray_separator(normalized: &str) -> bool {
    normalized.contains(';') && remove_single_quoted_literals(normalized).contains(';')
}
