// ABOUTME: Shared append-only sink for template error records
// ABOUTME: Cheap to clone across templates, with optional callbacks fired on every record

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// One failed render, positioned in the template source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub id: Uuid,
    pub template_name: String,
    pub code_line: Option<usize>,
    pub template_line: usize,
    pub is_child_execution: bool,
    pub error: String,
    pub logged_at: DateTime<Utc>,
}

impl ErrorRecord {
    pub fn new(
        template_name: impl Into<String>,
        code_line: Option<usize>,
        template_line: usize,
        is_child_execution: bool,
        error: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            template_name: template_name.into(),
            code_line,
            template_line,
            is_child_execution,
            error: error.into(),
            logged_at: Utc::now(),
        }
    }
}

type LogCallback = Arc<dyn Fn(&ErrorRecord) + Send + Sync>;

#[derive(Default)]
struct LoggerState {
    records: Vec<ErrorRecord>,
    callbacks: Vec<LogCallback>,
}

/// Handle to a shared record store. Clones append to the same store.
#[derive(Clone)]
pub struct ErrorLogger {
    identifier: Uuid,
    state: Arc<RwLock<LoggerState>>,
}

impl ErrorLogger {
    pub fn new() -> Self {
        Self {
            identifier: Uuid::new_v4(),
            state: Arc::new(RwLock::new(LoggerState::default())),
        }
    }

    pub fn identifier(&self) -> Uuid {
        self.identifier
    }

    /// Register a callback run after each record is stored.
    pub fn on_log<F>(&self, callback: F)
    where
        F: Fn(&ErrorRecord) + Send + Sync + 'static,
    {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .callbacks
            .push(Arc::new(callback));
    }

    pub fn log(&self, record: ErrorRecord) {
        debug!(
            logger = %self.identifier,
            template = %record.template_name,
            template_line = record.template_line,
            "Recording template error"
        );
        let callbacks = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            state.records.push(record.clone());
            state.callbacks.clone()
        };
        for callback in callbacks {
            callback(&record);
        }
    }

    pub fn records(&self) -> Vec<ErrorRecord> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .clone()
    }

    pub fn latest(&self) -> Option<ErrorRecord> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .last()
            .cloned()
    }

    pub fn clear(&self) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .clear();
    }

    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ErrorLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ErrorLogger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErrorLogger")
            .field("identifier", &self.identifier)
            .field("records", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn record(name: &str, line: usize) -> ErrorRecord {
        ErrorRecord::new(name, Some(4), line, false, "boom")
    }

    #[test]
    fn test_clones_share_records() {
        let logger = ErrorLogger::new();
        let other = logger.clone();
        logger.log(record("a", 1));
        other.log(record("b", 2));

        assert_eq!(logger.len(), 2);
        assert_eq!(other.identifier(), logger.identifier());
        let names: Vec<String> = logger
            .records()
            .into_iter()
            .map(|record| record.template_name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(logger.latest().map(|record| record.template_line), Some(2));

        logger.clear();
        assert!(other.is_empty());
    }

    #[test]
    fn test_callbacks_fire_per_record() {
        let logger = ErrorLogger::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        logger.on_log(move |record| {
            assert_eq!(record.error, "boom");
            counter.fetch_add(1, Ordering::SeqCst);
        });
        logger.log(record("a", 1));
        logger.log(record("a", 2));
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let json = serde_json::to_value(record("page", 3)).unwrap();
        assert_eq!(json["templateName"], "page");
        assert_eq!(json["templateLine"], 3);
        assert_eq!(json["codeLine"], 4);
        assert_eq!(json["isChildExecution"], false);
        assert!(json["loggedAt"].is_string());
        assert!(json["id"].is_string());
    }
}
