use std::sync::Mutex;

use tracing::info;

/// Provenance marker prefixed to every decompiler-path log line.
pub const DECOMPILER_TAG: &str = "[DEDAUB_BETA]";
pub const VERIFIED_SOURCE_TAG: &str = "[BaseScan]";

/// Injectable sink for pipeline progress lines.
pub trait AuditLog: Send + Sync {
    fn log(&self, line: &str);
}

/// Forwards lines to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLog;

impl AuditLog for TracingLog {
    fn log(&self, line: &str) {
        info!(target: "aegis::source", "{line}");
    }
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentLog;

impl AuditLog for SilentLog {
    fn log(&self, _line: &str) {}
}

/// Records lines in memory; used by tests to assert on provenance.
#[derive(Debug, Default)]
pub struct MemoryLog {
    lines: Mutex<Vec<String>>,
}

impl MemoryLog {
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|line| line.contains(needle))
    }
}

impl AuditLog for MemoryLog {
    fn log(&self, line: &str) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line.to_string());
        }
    }
}
