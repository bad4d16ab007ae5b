//! Workflow engine: stage handlers and the dispatch loop
//!
//! Stages mutate the session's `WorkflowState` and talk to the outside
//! world only through the injected collaborator seams (generation client,
//! market aggregator, report store, progress sink). Routing between stages
//! lives in [`super::routing`].

use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::extract;
use super::routing::{self, Transition};
use super::validation;
use super::{
    PromptLibrary, RunRequest, Stage, ValidationResult, WorkflowError, WorkflowResult,
    WorkflowState, COMPONENT_ATTEMPT_CAP, TOTAL_STEPS,
};
use crate::config::{EngineConfig, RetryPolicy};
use crate::error::ApiError;
use crate::generation::{GenerationClient, GenerationRequest};
use crate::market::MarketAggregator;
use crate::progress::ProgressSink;
use crate::ratelimit::{self, LimiterRegistry};
use crate::store::ReportStore;

/// Rate-limiter key for the generation service.
const GENERATION_PROVIDER: &str = "generation";

/// Sampling temperature for the research call.
const RESEARCH_TEMPERATURE: f32 = 0.5;
/// Component generation runs cooler for structural output.
const COMPONENT_TEMPERATURE: f32 = 0.3;
/// Translation runs coldest for fidelity.
const TRANSLATE_TEMPERATURE: f32 = 0.1;

/// Interface artifacts generated by the component stages.
#[derive(Debug, Clone, Copy)]
enum Component {
    Html,
    Js,
    Css,
}

impl Component {
    fn stage(&self) -> Stage {
        match self {
            Component::Html => Stage::GenerateHtml,
            Component::Js => Stage::GenerateJs,
            Component::Css => Stage::GenerateCss,
        }
    }

    fn noun(&self) -> &'static str {
        match self {
            Component::Html => "HTML",
            Component::Js => "JavaScript",
            Component::Css => "CSS",
        }
    }
}

/// Drives report generation sessions.
///
/// One engine serves many concurrent sessions; it owns no per-session
/// state. The limiter registry and report store are the only shared
/// mutable collaborators.
pub struct ReportEngine {
    generation: Arc<dyn GenerationClient>,
    aggregator: MarketAggregator,
    store: Arc<dyn ReportStore>,
    progress: Arc<dyn ProgressSink>,
    limiters: Arc<LimiterRegistry>,
    config: EngineConfig,
}

impl ReportEngine {
    pub fn new(
        generation: Arc<dyn GenerationClient>,
        aggregator: MarketAggregator,
        store: Arc<dyn ReportStore>,
        progress: Arc<dyn ProgressSink>,
        limiters: Arc<LimiterRegistry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            generation,
            aggregator,
            store,
            progress,
            limiters,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one workflow session to its terminal state.
    pub async fn run(&self, request: RunRequest) -> WorkflowResult {
        self.run_with_cancellation(request, CancellationToken::new())
            .await
    }

    /// Run one session, checking `cancel` between stages.
    ///
    /// Cancellation is best-effort: an in-flight external call is never
    /// interrupted, the token takes effect at the next stage boundary.
    pub async fn run_with_cancellation(
        &self,
        request: RunRequest,
        cancel: CancellationToken,
    ) -> WorkflowResult {
        let started = Instant::now();
        let session_id = request
            .session_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let mut state = WorkflowState::new(&session_id, request.max_attempts);

        info!(session = %session_id, "starting report workflow");
        self.progress.update(
            &session_id,
            0,
            TOTAL_STEPS,
            "Starting",
            "Initializing report workflow",
        );

        let mut stage = Stage::Prepare;
        loop {
            if cancel.is_cancelled() {
                state.push_error(format!("workflow cancelled before stage: {}", stage));
                state.success = false;
                break;
            }

            self.run_stage(stage, &mut state, &request.api_key).await;

            match routing::next_stage(stage, &state) {
                Transition::Next(next) => stage = next,
                Transition::End => break,
            }
        }

        state.success = state.success && state.report_id.is_some();
        if state.success {
            info!(
                session = %session_id,
                report_id = state.report_id.as_deref().unwrap_or(""),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "report workflow completed"
            );
            self.progress
                .complete(&session_id, true, state.report_id.as_deref());
        } else {
            let message = state
                .error_messages
                .last()
                .cloned()
                .unwrap_or_else(|| "workflow failed".to_string());
            warn!(
                session = %session_id,
                errors = state.error_messages.len(),
                "report workflow failed"
            );
            self.progress.fail(&session_id, &message);
        }

        WorkflowResult::from_state(state, started.elapsed())
    }

    async fn run_stage(&self, stage: Stage, state: &mut WorkflowState, api_key: &str) {
        match stage {
            Stage::Prepare => self.prepare(state, api_key).await,
            Stage::Research => self.research(state).await,
            Stage::GenerateHtml => self.generate_component(state, Component::Html).await,
            Stage::GenerateJs => self.generate_component(state, Component::Js).await,
            Stage::GenerateCss => self.generate_component(state, Component::Css).await,
            Stage::Translate => self.translate(state).await,
            Stage::Persist => self.persist(state).await,
        }
    }

    /// Validate inputs, load prompt templates, and fetch the market
    /// snapshot the rest of the pipeline will reuse.
    async fn prepare(&self, state: &mut WorkflowState, api_key: &str) {
        self.progress.update(
            &state.session_id,
            Stage::Prepare.step(),
            TOTAL_STEPS,
            Stage::Prepare.label(),
            "Validating API key and loading prompt templates",
        );

        if api_key.trim().is_empty() {
            state.push_error(WorkflowError::MissingApiKey.to_string());
            state.success = false;
            return;
        }

        match PromptLibrary::load(&self.config.prompts_dir) {
            Ok(prompts) => state.prompts = Some(prompts),
            Err(err) => {
                state.push_error(err.to_string());
                state.success = false;
                return;
            }
        }

        self.progress
            .detail(&state.session_id, "Fetching real-time market data");
        let snapshot = self.aggregator.snapshot().await;
        self.progress.detail(
            &state.session_id,
            &format!(
                "Market snapshot ready ({}, {} live / {} defaulted)",
                snapshot.source_label(),
                snapshot.live_providers.len(),
                snapshot.defaulted_providers.len()
            ),
        );
        state.snapshot = Some(snapshot);
        state.success = true;
    }

    /// Combined research + validation in one generation call, with the
    /// web-search tool attached.
    async fn research(&self, state: &mut WorkflowState) {
        state.research_attempt += 1;
        let attempt = state.research_attempt;
        self.progress.update(
            &state.session_id,
            Stage::Research.step(),
            TOTAL_STEPS,
            &format!(
                "{} (attempt {}/{})",
                Stage::Research.label(),
                attempt,
                state.max_attempts
            ),
            "Running combined research and validation",
        );

        let Some(prompts) = state.prompts.as_ref() else {
            state.push_error("research reached without loaded prompts".to_string());
            state.success = false;
            return;
        };
        let prompt = prompts.research_prompt(state.snapshot.as_ref());
        let request = GenerationRequest::new(prompt, true, RESEARCH_TEMPERATURE);

        let outcome = self
            .call_generation(
                &state.session_id,
                &request,
                &self.config.research_retry,
                "research",
            )
            .await;
        match outcome {
            Ok(text) => {
                let verdict = validation::evaluate(&text, &self.config.validation);
                self.progress.detail(
                    &state.session_id,
                    &format!("Research response: {} chars, validation {}", text.len(), verdict),
                );
                state.research_content = Some(text);
                state.validation = verdict;
                state.success = verdict == ValidationResult::Pass;
                if !state.success {
                    state.push_error(format!(
                        "Research attempt {} of {}: validation {}",
                        attempt, state.max_attempts, verdict
                    ));
                }
            }
            Err(err) => {
                state.push_error(format!(
                    "Research attempt {} of {}: generation call failed: {}",
                    attempt, state.max_attempts, err
                ));
                state.validation = ValidationResult::Unknown;
                state.success = false;
            }
        }
    }

    /// One interface component (HTML, JS, or CSS) from its own prompt.
    async fn generate_component(&self, state: &mut WorkflowState, component: Component) {
        let attempt = match component {
            Component::Html => {
                state.html_attempt += 1;
                state.html_attempt
            }
            Component::Js => {
                state.js_attempt += 1;
                state.js_attempt
            }
            Component::Css => {
                state.css_attempt += 1;
                state.css_attempt
            }
        };
        let stage = component.stage();
        self.progress.update(
            &state.session_id,
            stage.step(),
            TOTAL_STEPS,
            &format!("{} (attempt {}/{})", stage.label(), attempt, COMPONENT_ATTEMPT_CAP),
            "",
        );

        let Some(prompts) = state.prompts.as_ref() else {
            state.push_error("component generation reached without loaded prompts".to_string());
            state.success = false;
            return;
        };

        // HTML is derived from the research report; JS and CSS are derived
        // from the HTML they must attach to.
        let prompt = match component {
            Component::Html => format!(
                "{}\n\n---\n\nREPORT CONTENT:\n\n{}",
                prompts.html,
                state.research_content.as_deref().unwrap_or_default()
            ),
            Component::Js => format!(
                "{}\n\n---\n\nGENERATED HTML:\n\n{}",
                prompts.javascript,
                state.html_content.as_deref().unwrap_or_default()
            ),
            Component::Css => format!(
                "{}\n\n---\n\nGENERATED HTML:\n\n{}",
                prompts.css,
                state.html_content.as_deref().unwrap_or_default()
            ),
        };
        let request = GenerationRequest::new(prompt, false, COMPONENT_TEMPERATURE);

        let outcome = self
            .call_generation(
                &state.session_id,
                &request,
                &self.config.component_retry,
                component.noun(),
            )
            .await;
        let text = match outcome {
            Ok(text) => text,
            Err(err) => {
                state.push_error(format!(
                    "{} generation failed after {} attempts: {}",
                    component.noun(),
                    self.config.component_retry.tries,
                    err
                ));
                state.success = false;
                return;
            }
        };

        match component {
            Component::Html => match extract::extract_html(&text) {
                Some(html) => {
                    self.progress.detail(
                        &state.session_id,
                        &format!("HTML generated ({} chars)", html.len()),
                    );
                    state.html_content = Some(html);
                    state.success = true;
                }
                None => {
                    state.push_error(format!(
                        "Attempt {}: could not extract HTML from the model response",
                        attempt
                    ));
                    state.success = false;
                }
            },
            Component::Js => {
                // A missing fence degrades to a stub rather than failing
                // the stage; the report works without custom scripting.
                let js = extract::extract_javascript(&text)
                    .unwrap_or_else(|| extract::FALLBACK_JS.to_string());
                self.progress.detail(
                    &state.session_id,
                    &format!("JavaScript generated ({} chars)", js.len()),
                );
                state.js_content = Some(js);
                state.success = true;
            }
            Component::Css => {
                let css = extract::extract_css(&text)
                    .unwrap_or_else(|| extract::FALLBACK_CSS.to_string());
                self.progress.detail(
                    &state.session_id,
                    &format!("CSS generated ({} chars)", css.len()),
                );
                state.css_content = Some(css);
                state.success = true;
            }
        }
    }

    /// Best-effort translation of the generated HTML. Never fails the
    /// pipeline; errors are logged and the untranslated content proceeds.
    async fn translate(&self, state: &mut WorkflowState) {
        self.progress.update(
            &state.session_id,
            Stage::Translate.step(),
            TOTAL_STEPS,
            Stage::Translate.label(),
            "Translating report content to English",
        );

        let (Some(prompts), Some(html)) = (state.prompts.as_ref(), state.html_content.clone())
        else {
            return;
        };

        let request =
            GenerationRequest::new(prompts.translate_prompt(&html), false, TRANSLATE_TEMPERATURE);
        let outcome = self
            .call_generation(
                &state.session_id,
                &request,
                &self.config.translate_retry,
                "translation",
            )
            .await;
        match outcome {
            Ok(text) => {
                let cleaned = extract::strip_outer_fence(&text);
                if cleaned.is_empty() {
                    warn!(session = %state.session_id, "translation produced empty output");
                } else {
                    self.progress.detail(
                        &state.session_id,
                        &format!("Translated HTML ready ({} chars)", cleaned.len()),
                    );
                    state.translated_html = Some(cleaned);
                }
            }
            Err(err) => {
                warn!(session = %state.session_id, error = %err, "translation failed");
                self.progress.detail(
                    &state.session_id,
                    "Translation failed, continuing with untranslated content",
                );
            }
        }
    }

    /// Persist the finished artifacts, retrying transient storage errors
    /// with exponential backoff.
    async fn persist(&self, state: &mut WorkflowState) {
        self.progress.update(
            &state.session_id,
            Stage::Persist.step(),
            TOTAL_STEPS,
            Stage::Persist.label(),
            "Saving HTML, CSS and JavaScript",
        );

        let html = state.html_content.clone().unwrap_or_default();
        let css = state.css_content.clone().unwrap_or_default();
        let js = state.js_content.clone().unwrap_or_default();

        let total_chars = html.len() + css.len() + js.len();
        let budget = self.config.persist_budget(total_chars);
        self.progress.detail(
            &state.session_id,
            &format!("Persisting report (~{} chars)", total_chars),
        );

        for attempt in 0..budget {
            match self.store.save(&html, &css, &js).await {
                Ok(id) => {
                    self.progress
                        .detail(&state.session_id, &format!("Report saved as {}", id));
                    state.report_id = Some(id);
                    state.success = true;
                    return;
                }
                Err(err) if err.is_transient() && attempt + 1 < budget => {
                    let wait = self.config.persist_backoff_base * 2u32.pow(attempt);
                    warn!(
                        session = %state.session_id,
                        error = %err,
                        wait_ms = wait.as_millis() as u64,
                        "transient storage error, retrying"
                    );
                    self.progress.detail(
                        &state.session_id,
                        &format!("Storage error, retrying ({}/{})", attempt + 2, budget),
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(err) => {
                    state.push_error(format!(
                        "Failed to save report after {} attempts: {}",
                        attempt + 1,
                        err
                    ));
                    state.success = false;
                    return;
                }
            }
        }

        state.push_error(format!("Failed to save report after {} attempts", budget));
        state.success = false;
    }

    /// Rate-limited generation call with the in-stage retry loop.
    ///
    /// Linear backoff between tries (`attempt * base_delay`); only
    /// retryable errors are retried, everything else is raised to the
    /// stage immediately.
    async fn call_generation(
        &self,
        session_id: &str,
        request: &GenerationRequest,
        policy: &RetryPolicy,
        what: &str,
    ) -> Result<String, ApiError> {
        let limiter = self.limiters.get(GENERATION_PROVIDER);
        let mut last_err = None;

        for attempt in 1..=policy.tries {
            self.progress.detail(
                session_id,
                &format!("Calling model for {} ({}/{})", what, attempt, policy.tries),
            );

            let err = match ratelimit::wait_until_allowed(&limiter, self.config.limiter_max_wait)
                .await
            {
                Err(err) => err,
                Ok(()) => {
                    let started = Instant::now();
                    match self.generation.generate(request).await {
                        Ok(text) => {
                            limiter.record_success(started.elapsed());
                            return Ok(text);
                        }
                        Err(err) => {
                            limiter.record_failure(err.status_hint());
                            err
                        }
                    }
                }
            };

            if !err.is_retryable() || attempt == policy.tries {
                return Err(err);
            }
            let wait = policy.base_delay * attempt;
            warn!(
                session = session_id,
                call = what,
                attempt,
                error = %err,
                wait_ms = wait.as_millis() as u64,
                "generation call failed, backing off"
            );
            self.progress.detail(
                session_id,
                &format!("{} call failed, retrying in {}s", what, wait.as_secs()),
            );
            tokio::time::sleep(wait).await;
            last_err = Some(err);
        }

        Err(last_err.unwrap_or_else(|| ApiError::Internal("retries exhausted".to_string())))
    }
}
