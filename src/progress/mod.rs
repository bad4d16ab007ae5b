//! Session progress reporting
//!
//! The engine pushes step/detail updates into a `ProgressSink`; the web
//! layer decides how to fan them out (polling, WebSocket). `ProgressBoard`
//! is the in-memory implementation used by the CLI and tests.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

/// Observer for workflow progress, keyed by session id.
///
/// Implementations must be cheap and non-blocking; the engine calls these
/// inline between external calls.
pub trait ProgressSink: Send + Sync {
    /// A stage boundary was crossed.
    fn update(&self, session_id: &str, step: u32, total_steps: u32, label: &str, detail: &str);

    /// A sub-step detail within the current stage (retries, call attempts).
    fn detail(&self, session_id: &str, detail: &str);

    fn complete(&self, session_id: &str, success: bool, report_id: Option<&str>);

    fn fail(&self, session_id: &str, message: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Running,
    Completed,
    Error,
}

/// Poll-friendly view of one session's progress.
#[derive(Debug, Clone, Serialize)]
pub struct SessionProgress {
    pub step: u32,
    pub total_steps: u32,
    pub label: String,
    pub percentage: u32,
    pub status: ProgressStatus,
    pub detail: String,
    pub report_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl SessionProgress {
    fn new(total_steps: u32) -> Self {
        Self {
            step: 0,
            total_steps,
            label: "Starting".to_string(),
            percentage: 0,
            status: ProgressStatus::Running,
            detail: String::new(),
            report_id: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// In-memory progress store, shared across sessions.
pub struct ProgressBoard {
    sessions: Mutex<HashMap<String, SessionProgress>>,
}

impl ProgressBoard {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, session_id: &str) -> Option<SessionProgress> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }

    /// Drop a finished session's record.
    pub fn remove(&self, session_id: &str) {
        self.sessions.lock().unwrap().remove(session_id);
    }

    fn with_session(&self, session_id: &str, f: impl FnOnce(&mut SessionProgress)) {
        let mut sessions = self.sessions.lock().unwrap();
        let progress = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionProgress::new(1));
        f(progress);
    }
}

impl Default for ProgressBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ProgressBoard {
    fn update(&self, session_id: &str, step: u32, total_steps: u32, label: &str, detail: &str) {
        debug!(session = session_id, step, label, detail, "progress update");
        self.with_session(session_id, |p| {
            p.step = step;
            p.total_steps = total_steps.max(1);
            p.label = label.to_string();
            p.percentage = (step * 100) / total_steps.max(1);
            p.detail = detail.to_string();
        });
    }

    fn detail(&self, session_id: &str, detail: &str) {
        debug!(session = session_id, detail, "progress detail");
        self.with_session(session_id, |p| {
            p.detail = detail.to_string();
        });
    }

    fn complete(&self, session_id: &str, success: bool, report_id: Option<&str>) {
        self.with_session(session_id, |p| {
            p.step = p.total_steps;
            p.percentage = 100;
            p.status = if success {
                ProgressStatus::Completed
            } else {
                ProgressStatus::Error
            };
            p.label = if success {
                "Completed".to_string()
            } else {
                "Failed".to_string()
            };
            p.report_id = report_id.map(str::to_string);
            p.finished_at = Some(Utc::now());
        });
    }

    fn fail(&self, session_id: &str, message: &str) {
        self.with_session(session_id, |p| {
            p.status = ProgressStatus::Error;
            p.label = "Failed".to_string();
            p.detail = message.to_string();
            p.finished_at = Some(Utc::now());
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_tracks_steps() {
        let board = ProgressBoard::new();
        board.update("s1", 2, 7, "Research", "");
        let progress = board.get("s1").unwrap();
        assert_eq!(progress.step, 2);
        assert_eq!(progress.percentage, 28);
        assert_eq!(progress.status, ProgressStatus::Running);
    }

    #[test]
    fn detail_preserves_step() {
        let board = ProgressBoard::new();
        board.update("s1", 3, 7, "Generating HTML", "");
        board.detail("s1", "calling model (2/3)");
        let progress = board.get("s1").unwrap();
        assert_eq!(progress.step, 3);
        assert_eq!(progress.detail, "calling model (2/3)");
    }

    #[test]
    fn complete_records_report_id() {
        let board = ProgressBoard::new();
        board.update("s1", 7, 7, "Saving report", "");
        board.complete("s1", true, Some("report-42"));
        let progress = board.get("s1").unwrap();
        assert_eq!(progress.status, ProgressStatus::Completed);
        assert_eq!(progress.percentage, 100);
        assert_eq!(progress.report_id.as_deref(), Some("report-42"));
        assert!(progress.finished_at.is_some());
    }

    #[test]
    fn fail_keeps_last_message() {
        let board = ProgressBoard::new();
        board.update("s1", 2, 7, "Research", "");
        board.fail("s1", "validation failed after 3 attempts");
        let progress = board.get("s1").unwrap();
        assert_eq!(progress.status, ProgressStatus::Error);
        assert_eq!(progress.detail, "validation failed after 3 attempts");
    }

    #[test]
    fn sessions_are_isolated() {
        let board = ProgressBoard::new();
        board.update("a", 1, 7, "Preparing", "");
        board.update("b", 5, 7, "Generating CSS", "");
        assert_eq!(board.get("a").unwrap().step, 1);
        assert_eq!(board.get("b").unwrap().step, 5);
        board.remove("a");
        assert!(board.get("a").is_none());
        assert!(board.get("b").is_some());
    }
}
