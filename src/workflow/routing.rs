//! Routing predicates: stage -> next stage, given the post-stage state
//!
//! The workflow graph is a static table with conditional edges. Attempt
//! counters are incremented at stage entry, so predicates here only
//! compare them against their caps.

use super::{Stage, ValidationResult, WorkflowState, COMPONENT_ATTEMPT_CAP};

/// Outcome of routing after a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Next(Stage),
    End,
}

/// Decide the next stage after `current` ran against `state`.
pub fn next_stage(current: Stage, state: &WorkflowState) -> Transition {
    match current {
        // Any Prepare failure is terminal: bad API key or unreadable
        // templates will not improve on retry.
        Stage::Prepare => {
            if state.success {
                Transition::Next(Stage::Research)
            } else {
                Transition::End
            }
        }

        Stage::Research => {
            if state.validation == ValidationResult::Pass {
                Transition::Next(Stage::GenerateHtml)
            } else if state.research_attempt >= state.max_attempts {
                Transition::End
            } else {
                Transition::Next(Stage::Research)
            }
        }

        Stage::GenerateHtml => component_route(
            state.success && state.html_content.as_deref().is_some_and(|s| !s.is_empty()),
            state.html_attempt,
            Stage::GenerateHtml,
            Stage::GenerateJs,
        ),

        Stage::GenerateJs => component_route(
            state.success && state.js_content.is_some(),
            state.js_attempt,
            Stage::GenerateJs,
            Stage::GenerateCss,
        ),

        Stage::GenerateCss => component_route(
            state.success && state.css_content.is_some(),
            state.css_attempt,
            Stage::GenerateCss,
            Stage::Translate,
        ),

        // Translation is best-effort and never blocks the pipeline.
        Stage::Translate => Transition::Next(Stage::Persist),

        Stage::Persist => Transition::End,
    }
}

fn component_route(ok: bool, attempt: u32, retry: Stage, next: Stage) -> Transition {
    if ok {
        Transition::Next(next)
    } else if attempt >= COMPONENT_ATTEMPT_CAP {
        Transition::End
    } else {
        Transition::Next(retry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> WorkflowState {
        WorkflowState::new("s", 3)
    }

    #[test]
    fn prepare_failure_is_terminal() {
        let mut s = state();
        s.success = false;
        assert_eq!(next_stage(Stage::Prepare, &s), Transition::End);
        s.success = true;
        assert_eq!(
            next_stage(Stage::Prepare, &s),
            Transition::Next(Stage::Research)
        );
    }

    #[test]
    fn research_pass_always_continues() {
        let mut s = state();
        s.validation = ValidationResult::Pass;
        s.research_attempt = 3; // even at the cap
        assert_eq!(
            next_stage(Stage::Research, &s),
            Transition::Next(Stage::GenerateHtml)
        );
    }

    #[test]
    fn research_fail_retries_until_cap() {
        let mut s = state();
        s.validation = ValidationResult::Fail;
        s.research_attempt = 2;
        assert_eq!(
            next_stage(Stage::Research, &s),
            Transition::Next(Stage::Research)
        );
        s.research_attempt = 3;
        assert_eq!(next_stage(Stage::Research, &s), Transition::End);
    }

    #[test]
    fn html_retries_independently() {
        let mut s = state();
        s.success = false;
        s.html_attempt = 1;
        assert_eq!(
            next_stage(Stage::GenerateHtml, &s),
            Transition::Next(Stage::GenerateHtml)
        );
        s.html_attempt = COMPONENT_ATTEMPT_CAP;
        assert_eq!(next_stage(Stage::GenerateHtml, &s), Transition::End);
    }

    #[test]
    fn html_success_requires_nonempty_content() {
        let mut s = state();
        s.success = true;
        s.html_content = Some(String::new());
        s.html_attempt = 1;
        assert_eq!(
            next_stage(Stage::GenerateHtml, &s),
            Transition::Next(Stage::GenerateHtml)
        );
        s.html_content = Some("<div/>".to_string());
        assert_eq!(
            next_stage(Stage::GenerateHtml, &s),
            Transition::Next(Stage::GenerateJs)
        );
    }

    #[test]
    fn css_success_flows_to_translate_then_persist() {
        let mut s = state();
        s.success = true;
        s.css_content = Some("body{}".to_string());
        s.css_attempt = 1;
        assert_eq!(
            next_stage(Stage::GenerateCss, &s),
            Transition::Next(Stage::Translate)
        );
        // Translate routes onward unconditionally, success or not.
        s.success = false;
        assert_eq!(
            next_stage(Stage::Translate, &s),
            Transition::Next(Stage::Persist)
        );
        assert_eq!(next_stage(Stage::Persist, &s), Transition::End);
    }
}
