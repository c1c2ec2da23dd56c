//! Diagnostic reporting
//!
//! The canonicalizers run inside intercepted calls and must never fail the
//! call they are describing, so conditions that would normally be errors
//! (pool exhaustion, oversized registry names, a full alias table) are pushed
//! to a [`DiagnosticSink`] instead. Hosts decide where those messages end up;
//! [`LogSink`] forwards them to the `log` facade.

use std::fmt;
use std::sync::Mutex;

/// How loud a diagnostic is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Debug,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Debug => write!(f, "DEBUG"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Destination for diagnostics raised while canonicalizing
pub trait DiagnosticSink: Send + Sync {
    /// Record a diagnostic and carry on.
    fn report(&self, severity: Severity, message: fmt::Arguments<'_>);

    /// Record an unrecoverable condition and terminate.
    fn fatal(&self, message: fmt::Arguments<'_>) -> !;
}

/// Sink writing through the `log` facade
///
/// Fatal diagnostics terminate the process after logging.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl DiagnosticSink for LogSink {
    fn report(&self, severity: Severity, message: fmt::Arguments<'_>) {
        match severity {
            Severity::Debug => log::debug!("{message}"),
            Severity::Warning => log::warn!("{message}"),
            Severity::Critical => log::error!("{severity}:{message}"),
        }
    }

    fn fatal(&self, message: fmt::Arguments<'_>) -> ! {
        log::error!("{}:{message}", Severity::Critical);
        log::logger().flush();
        std::process::exit(1)
    }
}

/// Sink that keeps every diagnostic in memory
///
/// Useful for hosts that batch diagnostics into their own channel, and for
/// asserting on diagnostics. `fatal` panics with the message instead of
/// exiting.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<(Severity, String)>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything reported so far.
    #[must_use]
    pub fn records(&self) -> Vec<(Severity, String)> {
        self.records.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Number of diagnostics at or above `severity`.
    #[must_use]
    pub fn count_at_least(&self, severity: Severity) -> usize {
        self.records().iter().filter(|(s, _)| *s >= severity).count()
    }
}

impl DiagnosticSink for MemorySink {
    fn report(&self, severity: Severity, message: fmt::Arguments<'_>) {
        if let Ok(mut records) = self.records.lock() {
            records.push((severity, message.to_string()));
        }
    }

    fn fatal(&self, message: fmt::Arguments<'_>) -> ! {
        let text = message.to_string();
        self.report(Severity::Critical, format_args!("{text}"));
        panic!("fatal diagnostic: {text}")
    }
}
