use crate::audit::{AuditSink, DEFAULT_MEMORY_BUFFER_SIZE, JsonlAuditSink, MemoryAuditSink};
use crate::query::{
    ANALYTICS_ALLOWED_TABLES, CommentMode, DEFAULT_ANALYTICS_MAX_LENGTH, DEFAULT_GRAPH_MAX_LENGTH,
    Dialect, DialectPolicy, QueryValidator, RESOURCE_GRAPH_ROOTS, ValidationOptions,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Resolved settings for the query gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardConfig {
    pub analytics_max_length: usize,
    pub graph_max_length: usize,
    pub require_time_filter: bool,
    pub comment_mode: CommentMode,
    pub analytics_tables: Vec<String>,
    pub graph_roots: Vec<String>,
    /// JSON-lines audit file; entries stay in memory when unset.
    pub audit_log: Option<PathBuf>,
    pub audit_buffer_size: usize,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            analytics_max_length: DEFAULT_ANALYTICS_MAX_LENGTH,
            graph_max_length: DEFAULT_GRAPH_MAX_LENGTH,
            require_time_filter: false,
            comment_mode: CommentMode::default(),
            analytics_tables: to_owned_list(ANALYTICS_ALLOWED_TABLES),
            graph_roots: to_owned_list(RESOURCE_GRAPH_ROOTS),
            audit_log: None,
            audit_buffer_size: DEFAULT_MEMORY_BUFFER_SIZE,
        }
    }
}

fn to_owned_list(names: &[&str]) -> Vec<String> {
    names.iter().map(|name| (*name).to_string()).collect()
}

/// Trim entries, drop blanks and repeats. Repeats compare case-insensitively,
/// as the whitelist does, and the first spelling wins.
fn normalize_names(names: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty() && seen.insert(name.to_ascii_lowercase()))
        .collect()
}

impl GuardConfig {
    /// Merge CLI/env values over the optional config file over defaults.
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let file_config = match args.config.as_ref() {
            Some(path) => load_config_file(path)?,
            None => PartialConfig::default(),
        };
        Self::merge(&args.settings, file_config)
    }

    fn merge(cli: &GuardSettings, file: PartialConfig) -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            analytics_max_length: cli
                .analytics_max_length
                .or(file.analytics_max_length)
                .unwrap_or(defaults.analytics_max_length),
            graph_max_length: cli
                .graph_max_length
                .or(file.graph_max_length)
                .unwrap_or(defaults.graph_max_length),
            require_time_filter: cli.require_time_filter
                || file.require_time_filter.unwrap_or(defaults.require_time_filter),
            comment_mode: cli
                .comment_mode
                .or(file.comment_mode)
                .unwrap_or(defaults.comment_mode),
            analytics_tables: cli
                .analytics_tables
                .clone()
                .or(file.analytics_tables)
                .map(normalize_names)
                .unwrap_or(defaults.analytics_tables),
            graph_roots: cli
                .graph_roots
                .clone()
                .or(file.graph_roots)
                .map(normalize_names)
                .unwrap_or(defaults.graph_roots),
            audit_log: cli.audit_log.clone().or(file.audit_log),
            audit_buffer_size: cli
                .audit_buffer_size
                .or(file.audit_buffer_size)
                .unwrap_or(defaults.audit_buffer_size),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.analytics_max_length > 0,
            "analytics_max_length must be greater than zero"
        );
        anyhow::ensure!(
            self.graph_max_length > 0,
            "graph_max_length must be greater than zero"
        );
        anyhow::ensure!(
            !self.analytics_tables.is_empty(),
            "at least one analytics table must be allowed"
        );
        anyhow::ensure!(
            !self.graph_roots.is_empty(),
            "at least one resource-graph root must be allowed"
        );
        anyhow::ensure!(
            self.audit_buffer_size > 0,
            "audit_buffer_size must be greater than zero"
        );
        Ok(())
    }

    pub fn policy(&self, dialect: Dialect) -> DialectPolicy {
        match dialect {
            Dialect::Analytics => DialectPolicy::analytics()
                .with_allowed(self.analytics_tables.iter().cloned())
                .with_default_max_length(self.analytics_max_length),
            Dialect::ResourceGraph => DialectPolicy::resource_graph()
                .with_allowed(self.graph_roots.iter().cloned())
                .with_default_max_length(self.graph_max_length),
        }
    }

    pub fn validator(&self) -> QueryValidator {
        QueryValidator::new(
            self.policy(Dialect::Analytics),
            self.policy(Dialect::ResourceGraph),
        )
        .with_comment_mode(self.comment_mode)
    }

    pub fn validation_options(&self) -> ValidationOptions {
        ValidationOptions::new().with_time_filter(self.require_time_filter)
    }

    pub fn audit_sink(&self) -> Result<Arc<dyn AuditSink>> {
        match self.audit_log.as_ref() {
            Some(path) => Ok(Arc::new(JsonlAuditSink::open(path)?)),
            None => Ok(Arc::new(MemoryAuditSink::new(self.audit_buffer_size))),
        }
    }
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "query-guard",
    about = "Validate and sanitize generated analytics and resource-graph queries",
    version,
    args_conflicts_with_subcommands = true
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[arg(
        long,
        value_name = "FILE",
        help = "Path to a configuration file (YAML or JSON)",
        global = true
    )]
    pub config: Option<PathBuf>,

    #[arg(
        long,
        env = "QUERY_GUARD_DIALECT",
        value_enum,
        value_name = "DIALECT",
        default_value_t = Dialect::Analytics,
        help = "Query dialect to validate against"
    )]
    pub dialect: Dialect,

    #[arg(
        long,
        env = "QUERY_GUARD_USER",
        value_name = "ID",
        default_value = "cli",
        help = "User id recorded in the audit entry"
    )]
    pub user: String,

    #[arg(
        long,
        env = "QUERY_GUARD_CHANNEL",
        value_name = "NAME",
        default_value = "cli",
        help = "Channel recorded in the audit entry"
    )]
    pub channel: String,

    #[arg(long, help = "Include the audit entry in the output")]
    pub audit: bool,

    #[command(flatten)]
    pub settings: GuardSettings,

    #[arg(value_name = "QUERY", help = "Query text; read from stdin when omitted")]
    pub query: Option<String>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Escape a value for interpolation into a single-quoted literal
    Escape {
        #[arg(value_name = "VALUE")]
        value: String,
    },
}

/// Settings that may also come from the config file.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct GuardSettings {
    #[arg(
        long,
        env = "QUERY_GUARD_ANALYTICS_MAX_LENGTH",
        value_name = "N",
        value_parser = clap::value_parser!(usize),
        help = "Maximum analytics query length in characters"
    )]
    pub analytics_max_length: Option<usize>,

    #[arg(
        long,
        env = "QUERY_GUARD_GRAPH_MAX_LENGTH",
        value_name = "N",
        value_parser = clap::value_parser!(usize),
        help = "Maximum resource-graph query length in characters"
    )]
    pub graph_max_length: Option<usize>,

    #[arg(
        long,
        env = "QUERY_GUARD_REQUIRE_TIME_FILTER",
        help = "Warn when an analytics query has no time filter"
    )]
    pub require_time_filter: bool,

    #[arg(
        long,
        env = "QUERY_GUARD_COMMENT_MODE",
        value_enum,
        value_name = "MODE",
        help = "Comment stripping mode (naive or literal-aware)"
    )]
    pub comment_mode: Option<CommentMode>,

    #[arg(
        long,
        env = "QUERY_GUARD_ANALYTICS_TABLES",
        value_name = "TABLE",
        value_delimiter = ',',
        help = "Comma-separated analytics table whitelist"
    )]
    pub analytics_tables: Option<Vec<String>>,

    #[arg(
        long,
        env = "QUERY_GUARD_GRAPH_ROOTS",
        value_name = "ROOT",
        value_delimiter = ',',
        help = "Comma-separated resource-graph root whitelist"
    )]
    pub graph_roots: Option<Vec<String>>,

    #[arg(
        long,
        env = "QUERY_GUARD_AUDIT_LOG",
        value_name = "FILE",
        help = "Append audit entries to this JSON-lines file"
    )]
    pub audit_log: Option<PathBuf>,

    #[arg(
        long,
        env = "QUERY_GUARD_AUDIT_BUFFER_SIZE",
        value_name = "N",
        value_parser = clap::value_parser!(usize),
        help = "Entries kept by the in-memory audit buffer"
    )]
    pub audit_buffer_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartialConfig {
    analytics_max_length: Option<usize>,
    graph_max_length: Option<usize>,
    require_time_filter: Option<bool>,
    comment_mode: Option<CommentMode>,
    analytics_tables: Option<Vec<String>>,
    graph_roots: Option<Vec<String>>,
    audit_log: Option<PathBuf>,
    audit_buffer_size: Option<usize>,
}

fn load_config_file(path: &Path) -> Result<PartialConfig> {
    if !path.exists() {
        anyhow::bail!("config file {:?} does not exist", path);
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {:?}", path))?;
    let ext = path
        .extension()
        .and_then(|os| os.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let parsed = match ext.as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&contents)
            .with_context(|| format!("failed to parse YAML config {:?}", path))?,
        "json" => serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse JSON config {:?}", path))?,
        other => anyhow::bail!("unsupported config extension: {other}"),
    };
    Ok(parsed)
}
