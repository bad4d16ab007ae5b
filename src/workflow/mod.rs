//! Report generation workflow
//!
//! A resumable, retry-aware state machine that drives the generation
//! service through ordered stages: prepare, research + validation (gated,
//! retried), per-component interface generation (HTML, JS, CSS, each with
//! an independent retry budget), best-effort translation, and persistence.
//!
//! Stages run strictly sequentially within a session; sessions are
//! independent and may run concurrently. The only shared mutable state is
//! the rate-limiter registry and the report store.

pub mod engine;
pub mod extract;
pub mod prompts;
pub mod routing;
pub mod runner;
pub mod validation;

pub use engine::ReportEngine;
pub use prompts::PromptLibrary;
pub use runner::{spawn_session, SessionHandle};
pub use validation::ValidationThresholds;

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::market::MarketSnapshot;

/// Progress steps reported to the sink, one per stage.
pub const TOTAL_STEPS: u32 = 7;

/// Fixed retry budget for each interface component stage.
pub const COMPONENT_ATTEMPT_CAP: u32 = 3;

/// Workflow stages, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Prepare,
    Research,
    GenerateHtml,
    GenerateJs,
    GenerateCss,
    Translate,
    Persist,
}

impl Stage {
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Prepare => "Preparing data",
            Stage::Research => "Research and validation",
            Stage::GenerateHtml => "Generating HTML",
            Stage::GenerateJs => "Generating JavaScript",
            Stage::GenerateCss => "Generating CSS",
            Stage::Translate => "Translating content",
            Stage::Persist => "Saving report",
        }
    }

    /// Position in the progress bar (1-based).
    pub fn step(&self) -> u32 {
        match self {
            Stage::Prepare => 1,
            Stage::Research => 2,
            Stage::GenerateHtml => 3,
            Stage::GenerateJs => 4,
            Stage::GenerateCss => 5,
            Stage::Translate => 6,
            Stage::Persist => 7,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Outcome of the research validation gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationResult {
    Pass,
    Fail,
    /// No parseable verdict yet; resolved by the quality heuristic.
    Unknown,
}

impl std::fmt::Display for ValidationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationResult::Pass => f.write_str("PASS"),
            ValidationResult::Fail => f.write_str("FAIL"),
            ValidationResult::Unknown => f.write_str("UNKNOWN"),
        }
    }
}

/// Fatal workflow setup errors; these end the session with no retry.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error("API key is missing or empty")]
    MissingApiKey,

    #[error("failed to read prompt template {path}: {reason}")]
    PromptTemplate { path: String, reason: String },
}

/// Mutable per-session state, owned exclusively by the session task.
///
/// Fields written by a stage are never rewritten by a later stage except
/// the per-stage content slot on retry; earlier stages never observe later
/// writes because stages run strictly in order.
#[derive(Debug)]
pub struct WorkflowState {
    pub session_id: String,
    pub max_attempts: u32,

    pub research_attempt: u32,
    pub html_attempt: u32,
    pub js_attempt: u32,
    pub css_attempt: u32,

    pub validation: ValidationResult,

    pub research_content: Option<String>,
    pub html_content: Option<String>,
    pub css_content: Option<String>,
    pub js_content: Option<String>,
    pub translated_html: Option<String>,

    /// Fetched once during Prepare; immutable afterwards.
    pub snapshot: Option<MarketSnapshot>,
    pub prompts: Option<PromptLibrary>,

    /// Append-only; never cleared, returned in full at the terminal node.
    pub error_messages: Vec<String>,

    /// Success of the most recent stage; authoritative for the session
    /// only once the terminal node is reached.
    pub success: bool,

    pub report_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(session_id: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            session_id: session_id.into(),
            max_attempts: max_attempts.max(1),
            research_attempt: 0,
            html_attempt: 0,
            js_attempt: 0,
            css_attempt: 0,
            validation: ValidationResult::Unknown,
            research_content: None,
            html_content: None,
            css_content: None,
            js_content: None,
            translated_html: None,
            snapshot: None,
            prompts: None,
            error_messages: Vec::new(),
            success: false,
            report_id: None,
            created_at: Utc::now(),
        }
    }

    pub fn push_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(session = %self.session_id, error = %message, "workflow error");
        self.error_messages.push(message);
    }
}

/// Input to [`ReportEngine::run`].
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub api_key: String,
    pub max_attempts: u32,
    /// Generated when absent.
    pub session_id: Option<String>,
}

impl RunRequest {
    pub fn new(api_key: impl Into<String>, max_attempts: u32) -> Self {
        Self {
            api_key: api_key.into(),
            max_attempts,
            session_id: None,
        }
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

/// Terminal result of one workflow session.
#[derive(Debug, Clone)]
pub struct WorkflowResult {
    pub success: bool,
    pub session_id: String,
    pub report_id: Option<String>,
    pub validation: ValidationResult,

    pub research_content: Option<String>,
    pub html_content: Option<String>,
    pub css_content: Option<String>,
    pub js_content: Option<String>,
    pub translated_html: Option<String>,

    pub research_attempt: u32,
    pub html_attempt: u32,
    pub js_attempt: u32,
    pub css_attempt: u32,

    /// Ordered, append-only diagnostics across all attempts.
    pub error_messages: Vec<String>,
    pub execution_time: Duration,
}

impl WorkflowResult {
    pub(crate) fn from_state(state: WorkflowState, execution_time: Duration) -> Self {
        Self {
            success: state.success,
            session_id: state.session_id,
            report_id: state.report_id,
            validation: state.validation,
            research_content: state.research_content,
            html_content: state.html_content,
            css_content: state.css_content,
            js_content: state.js_content,
            translated_html: state.translated_html,
            research_attempt: state.research_attempt,
            html_attempt: state.html_attempt,
            js_attempt: state.js_attempt,
            css_attempt: state.css_attempt,
            error_messages: state.error_messages,
            execution_time,
        }
    }

    /// Synthetic failure result for sessions that never produced a state
    /// (panicked or aborted tasks).
    pub(crate) fn aborted(session_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            session_id: session_id.into(),
            report_id: None,
            validation: ValidationResult::Unknown,
            research_content: None,
            html_content: None,
            css_content: None,
            js_content: None,
            translated_html: None,
            research_attempt: 0,
            html_attempt: 0,
            js_attempt: 0,
            css_attempt: 0,
            error_messages: vec![message.into()],
            execution_time: Duration::ZERO,
        }
    }
}
