//! Attack and acceptance scenarios for the query gate.
//!
//! Test Categories:
//! 1. Dangerous operations
//! 2. Multi-statement injection
//! 3. Comment obfuscation
//! 4. Table and root whitelists
//! 5. Advisory findings
//! 6. Length and emptiness

use assert_matches::assert_matches;
use query_guard::query::{
    ANALYTICS_ALLOWED_TABLES, Advisory, CommentMode, DialectPolicy, QueryValidator,
    ValidationOptions, ValidationRequest, Violation, validate_analytics, validate_resource_graph,
};

fn analytics(query: &str) -> query_guard::ValidationResult {
    validate_analytics(query, ValidationOptions::default())
}

fn graph(query: &str) -> query_guard::ValidationResult {
    validate_resource_graph(query, ValidationOptions::default())
}

fn blocked_descriptions(result: &query_guard::ValidationResult) -> Vec<String> {
    result
        .errors()
        .iter()
        .filter_map(|error| match error {
            Violation::BlockedOperation { description } => Some(description.clone()),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Dangerous Operations
// ============================================================================

#[test]
fn control_commands_are_blocked() {
    for query in [
        "Perf | .delete table Perf",
        "Perf | .append Perf <| Perf",
        "Perf | .ingest into table Perf",
        "Perf | .create table T (a:int)",
        "Perf | .alter table Perf policy",
        "Perf | .set-or-replace Perf <| Perf",
    ] {
        let result = analytics(query);
        assert!(!result.is_valid(), "{query} should be blocked");
        assert!(result.sanitized_query().is_none());
        assert!(!blocked_descriptions(&result).is_empty());
    }
}

#[test]
fn matching_is_case_insensitive() {
    let result = analytics("Perf | .DROP TABLE Perf");
    assert_eq!(
        blocked_descriptions(&result),
        vec!["Object removal command (.drop)".to_string()]
    );
}

#[test]
fn every_matching_pattern_is_reported() {
    let result = analytics("Perf | evaluate python(typeof(*), 'x') | union * | .drop table Perf");
    let descriptions = blocked_descriptions(&result);
    assert_eq!(descriptions.len(), 3);
    assert!(descriptions.iter().any(|d| d.contains("evaluate")));
    assert!(descriptions.iter().any(|d| d.contains("Unrestricted union")));
    assert!(descriptions.iter().any(|d| d.contains(".drop")));
}

#[test]
fn multi_line_plugin_call_is_blocked() {
    let result = analytics("Perf\n| take 10\n| evaluate\n    http_request('https://example.net')");
    assert!(!result.is_valid());
    assert!(
        blocked_descriptions(&result)
            .iter()
            .any(|d| d.contains("evaluate"))
    );
}

#[test]
fn external_data_and_materialize_are_blocked() {
    assert!(!analytics("Perf | join (externaldata (x:string) ['https://x']) on x").is_valid());
    assert!(!analytics("Perf | join (materialize(Perf | take 1)) on Computer").is_valid());
}

#[test]
fn graph_write_verbs_are_blocked() {
    let result = graph("Resources | update tags");
    assert!(!result.is_valid());
    assert_matches!(
        &result.errors()[0],
        Violation::BlockedOperation { description } if description.contains("update")
    );
}

// ============================================================================
// Multi-Statement Injection
// ============================================================================

#[test]
fn chained_drop_reports_both_findings() {
    let result = analytics("Perf | take 10; .drop table Perf");

    assert!(!result.is_valid());
    assert!(
        result
            .errors()
            .iter()
            .any(|e| matches!(e, Violation::MultipleStatements))
    );
    assert!(
        result
            .errors()
            .iter()
            .any(|e| matches!(e, Violation::BlockedOperation { .. }))
    );
}

#[test]
fn separator_inside_literal_is_allowed() {
    let result = analytics("Perf | where Computer == 'a;b'");
    assert!(result.is_valid());
    assert!(result.warnings().is_empty());
}

#[test]
fn separator_after_literal_is_blocked() {
    let result = analytics("Perf | where Computer == 'a'; Heartbeat | take 1");
    assert!(!result.is_valid());
    assert!(result.errors().contains(&Violation::MultipleStatements));
    // Both the quote/separator and separator/pipeline advisories fire.
    assert_eq!(result.warnings().len(), 2);
}

#[test]
fn binding_statement_skips_whitelist_but_not_separator_check() {
    let result = analytics("let threshold = 5;\nPerf | where CounterValue > threshold");
    assert_eq!(result.errors(), &[Violation::MultipleStatements]);
}

// ============================================================================
// Comment Obfuscation
// ============================================================================

#[test]
fn comments_do_not_hide_blocked_commands() {
    let result = analytics("Perf /* innocent */ | .drop table Perf");
    assert!(!result.is_valid());
}

#[test]
fn commented_out_command_is_removed_from_output() {
    let result = analytics("Perf\n| take 10\n// .drop table Perf");
    assert!(result.is_valid());
    assert_eq!(result.sanitized_query(), Some("Perf\n| take 10"));
}

#[test]
fn comment_split_keyword_does_not_fuse() {
    // `.dr/**/op` normalizes to `.dr op`, which is not a command.
    let result = analytics("Perf | .dr/**/op");
    assert!(result.is_valid());
    assert_eq!(result.sanitized_query(), Some("Perf | .dr op"));
}

#[test]
fn line_prefix_comments_are_stripped() {
    let result = analytics("-- recent data\nPerf | take 5");
    assert!(result.is_valid());
    assert_eq!(result.sanitized_query(), Some("Perf | take 5"));
}

#[test]
fn unusual_leading_whitespace_cannot_shield_a_table() {
    for query in [
        "\r--x\nSecrets | take 1",
        "\u{b}--x\nStorageAccountKeys | take 1",
        "\u{a0}-- note\nSecrets",
    ] {
        for mode in [CommentMode::Naive, CommentMode::LiteralAware] {
            let validator = QueryValidator::default().with_comment_mode(mode);
            let result = validator.validate(&ValidationRequest::analytics(query));
            assert!(!result.is_valid(), "{query:?} {mode}");
            assert_matches!(result.errors(), [Violation::BlockedTable { .. }]);
        }
    }
}

#[test]
fn revalidating_sanitized_output_keeps_the_verdict() {
    let query = "\r\n-- recent\r\nPerf | take 5\r\n";
    let result = analytics(query);
    assert_eq!(result.sanitized_query(), Some("Perf | take 5"));

    let again = analytics("Perf | take 5");
    assert!(again.is_valid());
    assert_eq!(again.sanitized_query(), result.sanitized_query());
}

#[test]
fn comment_only_query_is_empty() {
    assert_eq!(analytics("/* nothing */").errors(), &[Violation::Empty]);
    assert_eq!(analytics("// nothing").errors(), &[Violation::Empty]);
}

#[test]
fn naive_mode_strips_inside_literals() {
    let query = "Perf | where Url == 'http://contoso.com' | take 5";

    let naive = analytics(query);
    assert!(naive.is_valid());
    assert_eq!(naive.sanitized_query(), Some("Perf | where Url == 'http:"));

    let aware = QueryValidator::default()
        .with_comment_mode(CommentMode::LiteralAware)
        .validate(&ValidationRequest::analytics(query));
    assert!(aware.is_valid());
    assert_eq!(aware.sanitized_query(), Some(query));
}

#[test]
fn sanitizer_keeps_literals_verbatim() {
    let query = "  Perf | where Computer == 'O''Brien'  ";
    assert_eq!(
        analytics(query).sanitized_query(),
        Some("Perf | where Computer == 'O''Brien'")
    );
}

// ============================================================================
// Table and Root Whitelists
// ============================================================================

#[test]
fn unknown_table_is_blocked_with_whitelist() {
    let result = analytics("StorageAccountKeys | take 5");
    assert!(!result.is_valid());
    let message = result.error_messages().join("\n");
    assert!(message.contains("StorageAccountKeys"));
    for table in ANALYTICS_ALLOWED_TABLES {
        assert!(message.contains(table), "missing {table}");
    }
}

#[test]
fn table_match_ignores_case() {
    assert!(analytics("perf | take 1").is_valid());
    assert!(analytics("SECURITYEVENT | take 1").is_valid());
}

#[test]
fn substituted_whitelist_is_honoured() {
    let validator = QueryValidator::new(
        DialectPolicy::analytics().with_allowed(["AppRequests"]),
        DialectPolicy::resource_graph(),
    );
    let options = ValidationOptions::default();
    assert!(validator.validate_analytics("AppRequests | take 1", options).is_valid());
    assert!(!validator.validate_analytics("Perf | take 1", options).is_valid());
}

#[test]
fn graph_requires_known_root() {
    assert!(graph("Resources | where type =~ 'microsoft.compute/virtualmachines'").is_valid());
    assert!(graph("resourcecontainers | project name").is_valid());

    let result = graph("Secrets | project name");
    assert_matches!(
        &result.errors()[0],
        Violation::InvalidRootResource { found, .. } if found == "Secrets"
    );
}

// ============================================================================
// Advisory Findings
// ============================================================================

#[test]
fn time_filter_present_has_no_warning() {
    let options = ValidationOptions::new().with_time_filter(true);
    let result = validate_analytics("Perf | where TimeGenerated > ago(1d)", options);
    assert!(result.is_valid());
    assert!(result.warnings().is_empty());
}

#[test]
fn missing_time_filter_warns() {
    let options = ValidationOptions::new().with_time_filter(true);
    let result = validate_analytics("Perf | take 10", options);
    assert!(result.is_valid());
    assert_eq!(result.warnings(), &[Advisory::MissingTimeFilter]);
}

#[test]
fn time_filter_is_not_checked_for_graph() {
    let options = ValidationOptions::new().with_time_filter(true);
    let result = validate_resource_graph("Resources | take 10", options);
    assert!(result.warnings().is_empty());
}

#[test]
fn schema_introspection_is_advisory() {
    let result = analytics("Perf | getschema");
    assert!(result.is_valid());
    assert_matches!(
        result.warnings(),
        [Advisory::SuspiciousPattern { description }] if description.contains("getschema")
    );
}

// ============================================================================
// Length and Emptiness
// ============================================================================

#[test]
fn blank_query_is_rejected() {
    assert_eq!(analytics("   \n\t").errors(), &[Violation::Empty]);
    assert_eq!(graph("").errors(), &[Violation::Empty]);
}

#[test]
fn length_limit_short_circuits() {
    let options = ValidationOptions::new().with_max_query_length(20);
    let result = validate_analytics("Perf | take 10 | project Computer", options);
    assert_eq!(
        result.errors(),
        &[Violation::TooLong {
            length: 33,
            max: 20
        }]
    );
}

#[test]
fn length_is_measured_in_utf16_units() {
    let query = format!("Perf | where Message == '{}'", "😀".repeat(5_000));
    assert_matches!(
        analytics(&query).errors(),
        [Violation::TooLong { length, max: 10_000 }] if *length == 10_026
    );
}

#[test]
fn graph_default_limit_is_smaller() {
    let query = format!("Resources | where name == '{}'", "a".repeat(5_000));
    assert_matches!(graph(&query).errors(), [Violation::TooLong { max: 5_000, .. }]);
    assert!(analytics(&query.replacen("Resources", "Perf", 1)).is_valid());
}
