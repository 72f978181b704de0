use super::AuditLogEntry;
use crate::query::Dialect;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Default number of entries kept by [`MemoryAuditSink`].
pub const DEFAULT_MEMORY_BUFFER_SIZE: usize = 10_000;

/// Destination for audit entries. Sinks only ever append.
pub trait AuditSink: Send + Sync {
    fn record(&self, entry: &AuditLogEntry) -> Result<()>;
}

fn trace_entry(entry: &AuditLogEntry) {
    if entry.valid {
        info!(
            query_hash = %entry.query_hash,
            dialect = %entry.dialect,
            user_id = %entry.user_id,
            channel = %entry.channel,
            warnings = entry.warnings.len(),
            "query audit"
        );
    } else {
        warn!(
            query_hash = %entry.query_hash,
            dialect = %entry.dialect,
            user_id = %entry.user_id,
            channel = %entry.channel,
            errors = ?entry.errors,
            "query audit: rejected"
        );
    }
}

/// Bounded in-memory ring buffer of recent entries.
pub struct MemoryAuditSink {
    capacity: usize,
    buffer: RwLock<VecDeque<AuditLogEntry>>,
}

impl MemoryAuditSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buffer: RwLock::new(VecDeque::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.buffer.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.read().is_empty()
    }

    /// Most recent entries first.
    pub fn recent(&self, limit: usize) -> Vec<AuditLogEntry> {
        self.buffer.read().iter().rev().take(limit).cloned().collect()
    }

    /// Entries matching `filter`, oldest first.
    pub fn query(&self, filter: &AuditFilter) -> Vec<AuditLogEntry> {
        self.buffer
            .read()
            .iter()
            .filter(|entry| filter.matches(entry))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect()
    }

    pub fn export(&self) -> Vec<AuditLogEntry> {
        self.buffer.read().iter().cloned().collect()
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_BUFFER_SIZE)
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, entry: &AuditLogEntry) -> Result<()> {
        trace_entry(entry);
        let mut buffer = self.buffer.write();
        buffer.push_back(entry.clone());
        while buffer.len() > self.capacity {
            buffer.pop_front();
        }
        Ok(())
    }
}

/// Append-only JSON-lines file, one entry per line.
pub struct JsonlAuditSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlAuditSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create audit log directory {}", parent.display())
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open audit log {}", path.display()))?;
        info!(path = %path.display(), "audit log opened");
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for JsonlAuditSink {
    fn record(&self, entry: &AuditLogEntry) -> Result<()> {
        trace_entry(entry);
        let line = serde_json::to_string(entry).context("failed to serialize audit entry")?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}

/// Filter for querying a [`MemoryAuditSink`].
#[derive(Debug, Clone, Default)]
pub struct AuditFilter {
    pub dialect: Option<Dialect>,
    pub valid: Option<bool>,
    pub user_id: Option<String>,
    pub channel: Option<String>,
    pub query_hash: Option<String>,
    pub after: Option<DateTime<Utc>>,
    pub before: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_dialect(mut self, dialect: Dialect) -> Self {
        self.dialect = Some(dialect);
        self
    }

    pub fn with_valid(mut self, valid: bool) -> Self {
        self.valid = Some(valid);
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_query_hash(mut self, hash: impl Into<String>) -> Self {
        self.query_hash = Some(hash.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, entry: &AuditLogEntry) -> bool {
        if self.dialect.is_some_and(|d| d != entry.dialect) {
            return false;
        }
        if self.valid.is_some_and(|v| v != entry.valid) {
            return false;
        }
        if self.user_id.as_ref().is_some_and(|u| *u != entry.user_id) {
            return false;
        }
        if self.channel.as_ref().is_some_and(|c| *c != entry.channel) {
            return false;
        }
        if self.query_hash.as_ref().is_some_and(|h| *h != entry.query_hash) {
            return false;
        }
        if self.after.is_some_and(|after| entry.timestamp < after) {
            return false;
        }
        if self.before.is_some_and(|before| entry.timestamp > before) {
            return false;
        }
        true
    }
}

/// Log sink failures without interrupting the caller.
pub(crate) fn record_or_warn(sink: &dyn AuditSink, entry: &AuditLogEntry) {
    if let Err(error) = sink.record(entry) {
        warn!(query_hash = %entry.query_hash, %error, "failed to record audit entry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::build_audit_entry;
    use crate::query::{ValidationOptions, validate_analytics};

    fn entry(query: &str, user: &str) -> AuditLogEntry {
        let result = validate_analytics(query, ValidationOptions::default());
        build_audit_entry(query, Dialect::Analytics, user, "test", &result)
    }

    #[test]
    fn memory_sink_keeps_last_entries() {
        let sink = MemoryAuditSink::new(3);
        for i in 0..5 {
            sink.record(&entry(&format!("Perf | take {i}"), "u")).unwrap();
        }
        assert_eq!(sink.len(), 3);
        let recent = sink.recent(1);
        assert_eq!(recent[0].raw_query, "Perf | take 4");
        assert_eq!(sink.export()[0].raw_query, "Perf | take 2");
    }

    #[test]
    fn filter_by_validity_and_user() {
        let sink = MemoryAuditSink::default();
        sink.record(&entry("Perf | take 1", "alice")).unwrap();
        sink.record(&entry("Secrets | take 1", "alice")).unwrap();
        sink.record(&entry("Secrets | take 1", "bob")).unwrap();

        let rejected = sink.query(&AuditFilter::new().with_valid(false));
        assert_eq!(rejected.len(), 2);

        let alice_rejected = sink.query(&AuditFilter::new().with_valid(false).with_user("alice"));
        assert_eq!(alice_rejected.len(), 1);

        let limited = sink.query(&AuditFilter::new().with_limit(1));
        assert_eq!(limited.len(), 1);
    }

    #[test]
    fn jsonl_sink_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("audit.jsonl");
        let sink = JsonlAuditSink::open(&path).unwrap();
        sink.record(&entry("Perf | take 1", "u")).unwrap();
        sink.record(&entry("Secrets | take 1", "u")).unwrap();

        let contents = fs::read_to_string(&path).unwrap();
        let entries: Vec<AuditLogEntry> = contents
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].valid);
        assert!(!entries[1].valid);
    }
}
