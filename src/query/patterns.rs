//! Threat pattern tables and the scanner that evaluates them.
//!
//! Pattern tables are compiled once per process and shared read-only. Every
//! pattern in a set is evaluated against the whole normalized text; the
//! scanner never stops at the first match, so a caller sees every violation in
//! one round trip.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Whether a match invalidates the query or is only reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Block,
    Warn,
}

/// A compiled, case-insensitive pattern with a human-readable description.
#[derive(Debug, Clone)]
pub struct ThreatPattern {
    pattern: Regex,
    description: &'static str,
    severity: Severity,
}

impl ThreatPattern {
    /// Compile a pattern. Matching is always case-insensitive.
    pub fn new(
        pattern: &str,
        description: &'static str,
        severity: Severity,
    ) -> Result<Self, regex::Error> {
        let pattern = RegexBuilder::new(pattern).case_insensitive(true).build()?;
        Ok(Self {
            pattern,
            description,
            severity,
        })
    }

    pub fn description(&self) -> &'static str {
        self.description
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }
}

/// Ordered, shareable list of patterns of one severity.
pub type PatternSet = Arc<[ThreatPattern]>;

fn table(entries: &[(&str, &'static str)], severity: Severity) -> PatternSet {
    entries
        .iter()
        .map(|&(pattern, description)| {
            ThreatPattern::new(pattern, description, severity).unwrap_or_else(|e| {
                panic!("invalid built-in threat pattern '{pattern}': {e}")
            })
        })
        .collect::<Vec<_>>()
        .into()
}

/// Control commands and plugins that mutate data, reach outside the cluster,
/// or fan out without bound.
pub static ANALYTICS_BLOCKING: Lazy<PatternSet> = Lazy::new(|| {
    table(
        &[
            (r"\.delete\b", "Data deletion command (.delete)"),
            (r"\.set\s", "Table creation command (.set)"),
            (r"\.append\b", "Data append command (.append)"),
            (r"\.ingest\b", "Data ingestion command (.ingest)"),
            (r"\.create\b", "Object creation command (.create)"),
            (r"\.alter\b", "Schema alteration command (.alter)"),
            (r"\.drop\b", "Object removal command (.drop)"),
            (r"\.set-or-append\b", "Data write command (.set-or-append)"),
            (r"\.set-or-replace\b", "Data overwrite command (.set-or-replace)"),
            (
                r"\bevaluate\s+(python|r|sql_request|http_request|http_request_post|cosmosdb_sql_request|azure_digital_twins_query_request)\b",
                "Remote code or data execution plugin (evaluate)",
            ),
            (r"\bexternaldata\b", "External data access (externaldata)"),
            (r"\bexternal_table\s*\(", "External table access (external_table)"),
            (r"\bmaterialize\s*\(", "Resource-intensive operation (materialize)"),
            (r"\bunion\s+\*", "Unrestricted union across all tables"),
        ],
        Severity::Block,
    )
});

/// Write verbs for the resource-graph dialect.
pub static GRAPH_BLOCKING: Lazy<PatternSet> = Lazy::new(|| {
    table(
        &[
            (r"\bupdate\b", "Update operation (update)"),
            (r"\bdelete\b", "Delete operation (delete)"),
            (r"\binsert\b", "Insert operation (insert)"),
            (r"\bmodify\b", "Modify operation (modify)"),
        ],
        Severity::Block,
    )
});

/// Suspicious but not necessarily harmful constructs, shared by both dialects.
pub static ADVISORY: Lazy<PatternSet> = Lazy::new(|| {
    table(
        &[
            (r"'\s*;", "Quote followed by statement separator"),
            (r"'\s*\|?\s*union\b", "Quote followed by union"),
            (r"\bunion\s+\*", "Unrestricted union"),
            (r"\bprint\b", "Print/debug statement"),
            (r"\bgetschema\b", "Schema introspection (getschema)"),
            (r";\s*\w+\s*\|", "Separator followed by a new pipeline"),
        ],
        Severity::Warn,
    )
});

/// Every pattern in `set` that matches `text`, in table order.
pub fn scan<'a>(set: &'a [ThreatPattern], text: &str) -> Vec<&'a ThreatPattern> {
    set.iter().filter(|pattern| pattern.is_match(text)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matched(set: &[ThreatPattern], text: &str) -> Vec<&'static str> {
        scan(set, text).into_iter().map(|p| p.description()).collect()
    }

    #[test]
    fn built_in_tables_compile_with_expected_severity() {
        assert!(ANALYTICS_BLOCKING.iter().all(|p| p.severity() == Severity::Block));
        assert!(GRAPH_BLOCKING.iter().all(|p| p.severity() == Severity::Block));
        assert!(ADVISORY.iter().all(|p| p.severity() == Severity::Warn));
    }

    #[test]
    fn matching_is_case_insensitive() {
        assert_eq!(
            matched(&ANALYTICS_BLOCKING, ".DrOp table Perf"),
            vec!["Object removal command (.drop)"]
        );
    }

    #[test]
    fn all_matches_are_reported() {
        let hits = matched(&ANALYTICS_BLOCKING, ".create table T; .drop table Perf");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0], "Object creation command (.create)");
        assert_eq!(hits[1], "Object removal command (.drop)");
    }

    #[test]
    fn set_or_append_does_not_trigger_plain_set() {
        assert_eq!(
            matched(&ANALYTICS_BLOCKING, ".set-or-append T <| Perf"),
            vec!["Data write command (.set-or-append)"]
        );
    }

    #[test]
    fn patterns_span_lines() {
        assert!(!matched(&ANALYTICS_BLOCKING, "Perf\n| union\n  *").is_empty());
        assert!(!matched(&ANALYTICS_BLOCKING, "evaluate\n python(typeof(*), 'x')").is_empty());
    }

    #[test]
    fn benign_plugins_are_allowed() {
        assert!(matched(&ANALYTICS_BLOCKING, "Perf | evaluate bag_unpack(Properties)").is_empty());
    }

    #[test]
    fn graph_verbs_are_blocked() {
        assert_eq!(
            matched(&GRAPH_BLOCKING, "Resources | UPDATE name"),
            vec!["Update operation (update)"]
        );
        assert!(matched(&GRAPH_BLOCKING, "Resources | where updatedAt > now()").is_empty());
    }

    #[test]
    fn advisory_patterns_flag_injection_shapes() {
        assert_eq!(
            matched(&ADVISORY, "Perf | where x == 'a'; Event | take 1"),
            vec![
                "Quote followed by statement separator",
                "Separator followed by a new pipeline"
            ]
        );
        assert_eq!(
            matched(&ADVISORY, "Perf | getschema"),
            vec!["Schema introspection (getschema)"]
        );
    }
}
