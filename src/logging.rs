//! Unified logging with a user-visible notice channel.
//!
//! This module provides a logger that outputs to two backends:
//! - CLI/stderr/file via tracing
//! - the UI, through an optional channel of [`Notice`]s
//!
//! Sync and import report every user-visible failure through a [`Logger`],
//! so the UI glue only has to drain one channel.

use serde::Serialize;
use serde_json::Value;
use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};
use tokio::sync::mpsc;
use tracing::Level;

/// Severity of a log message, lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Debug,
    Info,
    Warning,
    Error,
}

impl Severity {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "debug" => Some(Severity::Debug),
            "info" => Some(Severity::Info),
            "warn" | "warning" => Some(Severity::Warning),
            "error" => Some(Severity::Error),
            _ => None,
        }
    }
}

/// Atomic level filter that can be adjusted at runtime.
///
/// The level is stored as a u8: 0=Debug, 1=Info, 2=Warning, 3=Error
pub struct LevelFilter(AtomicU8);

impl LevelFilter {
    /// Create a new filter with the given minimum level.
    pub fn new(level: Severity) -> Self {
        Self(AtomicU8::new(level as u8))
    }

    /// Get the current minimum level.
    pub fn get(&self) -> Severity {
        u8_to_severity(self.0.load(Ordering::Relaxed))
    }

    /// Set the minimum level.
    pub fn set(&self, level: Severity) {
        self.0.store(level as u8, Ordering::Relaxed);
    }

    /// Check if a message at the given level should be logged.
    pub fn should_log(&self, level: Severity) -> bool {
        level as u8 >= self.0.load(Ordering::Relaxed)
    }
}

impl Default for LevelFilter {
    fn default() -> Self {
        Self::new(Severity::Info)
    }
}

fn u8_to_severity(val: u8) -> Severity {
    match val {
        0 => Severity::Debug,
        1 => Severity::Info,
        2 => Severity::Warning,
        _ => Severity::Error,
    }
}

/// Convert a severity to a tracing Level.
pub fn severity_to_tracing(level: Severity) -> Level {
    match level {
        Severity::Debug => Level::DEBUG,
        Severity::Info => Level::INFO,
        Severity::Warning => Level::WARN,
        Severity::Error => Level::ERROR,
    }
}

/// A message meant for the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notice {
    pub severity: Severity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub logger: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Logger that outputs to tracing and, when attached, the notice channel.
#[derive(Clone)]
pub struct Logger {
    notices: Option<mpsc::UnboundedSender<Notice>>,
    /// Minimum level forwarded to the notice channel. Tracing keeps its own filter.
    level_filter: Arc<LevelFilter>,
    name: Option<String>,
}

impl Logger {
    /// Create a new logger with default settings.
    pub fn new() -> Self {
        Self {
            notices: None,
            level_filter: Arc::new(LevelFilter::default()),
            name: None,
        }
    }

    /// Create a logger wired to a fresh notice channel.
    pub fn with_channel() -> (Self, mpsc::UnboundedReceiver<Notice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new().with_notices(tx), rx)
    }

    /// Set the channel that receives user-visible notices.
    pub fn with_notices(mut self, tx: mpsc::UnboundedSender<Notice>) -> Self {
        self.notices = Some(tx);
        self
    }

    /// Set the level filter.
    pub fn with_level_filter(mut self, filter: Arc<LevelFilter>) -> Self {
        self.level_filter = filter;
        self
    }

    /// Set the logger name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// A copy of this logger under another name, sharing channel and filter.
    pub fn named(&self, name: impl Into<String>) -> Self {
        self.clone().with_name(name)
    }

    /// Log a message to all configured endpoints.
    pub fn log(&self, level: Severity, message: &str, data: Option<Value>) {
        // 1. Output to tracing (stderr/file)
        let name = self.name.as_deref().unwrap_or("taskdeck");
        match severity_to_tracing(level) {
            Level::ERROR => tracing::error!(logger = %name, "{}", message),
            Level::WARN => tracing::warn!(logger = %name, "{}", message),
            Level::INFO => tracing::info!(logger = %name, "{}", message),
            _ => tracing::debug!(logger = %name, "{}", message),
        }

        // 2. Output to the user, if someone is listening
        if !self.level_filter.should_log(level) {
            return;
        }
        if let Some(ref tx) = self.notices {
            // A closed channel just means the view went away.
            let _ = tx.send(Notice {
                severity: level,
                message: message.to_string(),
                logger: self.name.clone(),
                data,
            });
        }
    }

    /// Log a message with structured data.
    pub fn log_with_data(&self, level: Severity, message: &str, data: Value) {
        self.log(level, message, Some(data));
    }

    pub fn debug(&self, msg: &str) {
        self.log(Severity::Debug, msg, None);
    }

    pub fn info(&self, msg: &str) {
        self.log(Severity::Info, msg, None);
    }

    pub fn warning(&self, msg: &str) {
        self.log(Severity::Warning, msg, None);
    }

    pub fn error(&self, msg: &str) {
        self.log(Severity::Error, msg, None);
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_level_filter() {
        let filter = LevelFilter::new(Severity::Warning);

        assert!(!filter.should_log(Severity::Debug));
        assert!(!filter.should_log(Severity::Info));
        assert!(filter.should_log(Severity::Warning));
        assert!(filter.should_log(Severity::Error));
    }

    #[test]
    fn test_level_filter_update() {
        let filter = LevelFilter::new(Severity::Debug);
        assert!(filter.should_log(Severity::Debug));

        filter.set(Severity::Error);
        assert!(!filter.should_log(Severity::Warning));
        assert!(filter.should_log(Severity::Error));
        assert_eq!(filter.get(), Severity::Error);
    }

    #[test]
    fn test_severity_from_str() {
        assert_eq!(Severity::from_str("WARN"), Some(Severity::Warning));
        assert_eq!(Severity::from_str("error"), Some(Severity::Error));
        assert_eq!(Severity::from_str("loud"), None);
    }

    #[test]
    fn test_notices_respect_filter() {
        let (logger, mut rx) = Logger::with_channel();
        let logger = logger.with_name("sync");

        logger.debug("hidden");
        logger.log_with_data(Severity::Error, "Failed to add task", json!({"task": 1}));

        let notice = rx.try_recv().unwrap();
        assert_eq!(notice.severity, Severity::Error);
        assert_eq!(notice.message, "Failed to add task");
        assert_eq!(notice.logger.as_deref(), Some("sync"));
        assert_eq!(notice.data, Some(json!({"task": 1})));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_closed_channel_is_ignored() {
        let (logger, rx) = Logger::with_channel();
        drop(rx);
        logger.error("nobody listening");
    }

    #[tokio::test]
    async fn test_queued_notices_drain_after_last_logger_drops() {
        let (logger, mut rx) = Logger::with_channel();
        let named = logger.named("import");
        logger.error("first");
        named.warning("second");
        drop(logger);
        drop(named);

        let messages: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .map(|n| n.message)
            .collect();
        assert_eq!(messages, ["first", "second"]);
        assert!(rx.recv().await.is_none());
    }
}
