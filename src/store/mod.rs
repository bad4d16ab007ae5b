//! Report persistence seam
//!
//! The workflow only needs `save(html, css, js) -> id`; the relational
//! schema behind it is someone else's problem. `StoreError` distinguishes
//! transient connection-layer failures (retried with backoff by the
//! Persist stage) from permanent ones (fail the session immediately).

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("transient storage error: {0}")]
    Transient(String),

    #[error("storage error: {0}")]
    Permanent(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }

    /// Classify a raw driver message: TLS/connection-reset failures are
    /// transient, everything else permanent.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let transient = ["ssl", "decryption failed", "bad record mac", "connection reset"]
            .iter()
            .any(|needle| lower.contains(needle));
        if transient {
            StoreError::Transient(message)
        } else {
            StoreError::Permanent(message)
        }
    }
}

/// Persists a finished report and returns its identifier.
#[async_trait]
pub trait ReportStore: Send + Sync {
    async fn save(&self, html: &str, css: &str, js: &str) -> Result<String, StoreError>;
}

/// A persisted report artifact.
#[derive(Debug, Clone)]
pub struct StoredReport {
    pub id: String,
    pub html: String,
    pub css: String,
    pub js: String,
    pub created_at: DateTime<Utc>,
}

/// In-memory store used by the CLI and tests.
pub struct MemoryReportStore {
    reports: Mutex<Vec<StoredReport>>,
}

impl MemoryReportStore {
    pub fn new() -> Self {
        Self {
            reports: Mutex::new(Vec::new()),
        }
    }

    pub fn get(&self, id: &str) -> Option<StoredReport> {
        self.reports
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryReportStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReportStore for MemoryReportStore {
    async fn save(&self, html: &str, css: &str, js: &str) -> Result<String, StoreError> {
        let report = StoredReport {
            id: Uuid::new_v4().to_string(),
            html: html.to_string(),
            css: css.to_string(),
            js: js.to_string(),
            created_at: Utc::now(),
        };
        let id = report.id.clone();
        self.reports.lock().unwrap().push(report);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_detects_connection_layer_errors() {
        assert!(StoreError::classify("SSL error: decryption failed").is_transient());
        assert!(StoreError::classify("Connection reset by peer").is_transient());
        assert!(StoreError::classify("bad record mac").is_transient());
        assert!(!StoreError::classify("unique constraint violation").is_transient());
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryReportStore::new();
        let id = store.save("<div/>", "body{}", "void 0;").await.unwrap();
        let report = store.get(&id).unwrap();
        assert_eq!(report.html, "<div/>");
        assert_eq!(report.css, "body{}");
        assert_eq!(store.len(), 1);
    }
}
