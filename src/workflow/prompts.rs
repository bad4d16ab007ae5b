//! Stage prompt templates
//!
//! Prompts live as markdown files in a configurable directory, one per
//! stage. Loading happens once in Prepare; a missing or empty template is
//! a fatal workflow error. Templates may carry date placeholders
//! (`<<day>>`, `<<month>>`, `<<year>>`) and the research template carries
//! `{{REAL_TIME_DATA}}`, replaced with the market snapshot JSON.

use std::path::Path;

use chrono::{DateTime, Datelike, Utc};

use super::WorkflowError;
use crate::market::MarketSnapshot;

pub const RESEARCH_PROMPT_FILE: &str = "research_validation.md";
pub const HTML_PROMPT_FILE: &str = "create_html.md";
pub const JS_PROMPT_FILE: &str = "create_javascript.md";
pub const CSS_PROMPT_FILE: &str = "create_css.md";
pub const TRANSLATE_PROMPT_FILE: &str = "translate_html.md";

const SNAPSHOT_PLACEHOLDER: &str = "{{REAL_TIME_DATA}}";
const CONTENT_PLACEHOLDER: &str = "{content}";

/// Injected when no live snapshot is available, telling the model to fall
/// back to its search tool.
const SNAPSHOT_FALLBACK: &str =
    "{\n  \"notice\": \"Real-time data unavailable; use web search for current figures\"\n}";

/// The five stage templates, loaded once per session.
#[derive(Debug, Clone)]
pub struct PromptLibrary {
    pub research: String,
    pub html: String,
    pub javascript: String,
    pub css: String,
    pub translate: String,
}

impl PromptLibrary {
    /// Load all templates from `dir`. Fatal on any missing/blank file.
    pub fn load(dir: &Path) -> Result<Self, WorkflowError> {
        Ok(Self {
            research: read_template(dir, RESEARCH_PROMPT_FILE)?,
            html: read_template(dir, HTML_PROMPT_FILE)?,
            javascript: read_template(dir, JS_PROMPT_FILE)?,
            css: read_template(dir, CSS_PROMPT_FILE)?,
            translate: read_template(dir, TRANSLATE_PROMPT_FILE)?,
        })
    }

    /// Build a library from literal template strings (tests).
    pub fn from_parts(
        research: impl Into<String>,
        html: impl Into<String>,
        javascript: impl Into<String>,
        css: impl Into<String>,
        translate: impl Into<String>,
    ) -> Self {
        Self {
            research: research.into(),
            html: html.into(),
            javascript: javascript.into(),
            css: css.into(),
            translate: translate.into(),
        }
    }

    /// Research prompt with dates applied and the snapshot injected.
    pub fn research_prompt(&self, snapshot: Option<&MarketSnapshot>) -> String {
        let dated = apply_date_placeholders(&self.research, Utc::now());
        inject_snapshot(&dated, snapshot)
    }

    /// Translation prompt with the content to translate substituted in.
    pub fn translate_prompt(&self, content: &str) -> String {
        self.translate.replace(CONTENT_PLACEHOLDER, content)
    }
}

fn read_template(dir: &Path, file: &str) -> Result<String, WorkflowError> {
    let path = dir.join(file);
    let text = std::fs::read_to_string(&path).map_err(|err| WorkflowError::PromptTemplate {
        path: path.display().to_string(),
        reason: err.to_string(),
    })?;
    if text.trim().is_empty() {
        return Err(WorkflowError::PromptTemplate {
            path: path.display().to_string(),
            reason: "template file is empty".to_string(),
        });
    }
    Ok(text)
}

/// Substitute `<<day>>`, `<<month>>`, `<<year>>` with the given UTC date.
pub fn apply_date_placeholders(text: &str, now: DateTime<Utc>) -> String {
    text.replace("<<day>>", &now.day().to_string())
        .replace("<<month>>", &now.month().to_string())
        .replace("<<year>>", &now.year().to_string())
}

/// Replace `{{REAL_TIME_DATA}}` with snapshot JSON or the fallback notice.
pub fn inject_snapshot(template: &str, snapshot: Option<&MarketSnapshot>) -> String {
    let payload = match snapshot {
        Some(snap) if !snap.live_providers.is_empty() => snap.to_prompt_json(),
        _ => SNAPSHOT_FALLBACK.to_string(),
    };
    template.replace(SNAPSHOT_PLACEHOLDER, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::ProviderFields;
    use chrono::TimeZone;

    fn snapshot(live: bool) -> MarketSnapshot {
        let mut fields = ProviderFields::new();
        fields.insert("btc_price_usd".into(), serde_json::json!(64000.0));
        MarketSnapshot {
            fields,
            live_providers: if live { vec!["coingecko".into()] } else { vec![] },
            defaulted_providers: if live { vec![] } else { vec!["coingecko".into()] },
            fetched_at: Utc::now(),
        }
    }

    #[test]
    fn date_placeholders_replaced() {
        let now = Utc.with_ymd_and_hms(2026, 8, 6, 12, 0, 0).unwrap();
        let out = apply_date_placeholders("Report for <<day>>/<<month>>/<<year>>.", now);
        assert_eq!(out, "Report for 6/8/2026.");
    }

    #[test]
    fn snapshot_injected_when_live() {
        let out = inject_snapshot("Data:\n{{REAL_TIME_DATA}}", Some(&snapshot(true)));
        assert!(out.contains("btc_price_usd"));
        assert!(!out.contains("{{REAL_TIME_DATA}}"));
    }

    #[test]
    fn fallback_notice_when_no_live_providers() {
        let out = inject_snapshot("Data:\n{{REAL_TIME_DATA}}", Some(&snapshot(false)));
        assert!(out.contains("Real-time data unavailable"));
        let out = inject_snapshot("Data:\n{{REAL_TIME_DATA}}", None);
        assert!(out.contains("Real-time data unavailable"));
    }

    #[test]
    fn translate_prompt_substitutes_content() {
        let lib = PromptLibrary::from_parts("r", "h", "j", "c", "Translate this:\n{content}");
        assert_eq!(
            lib.translate_prompt("<div>xin chào</div>"),
            "Translate this:\n<div>xin chào</div>"
        );
    }

    #[test]
    fn load_requires_all_templates() {
        let dir = tempfile::tempdir().unwrap();
        for file in [
            RESEARCH_PROMPT_FILE,
            HTML_PROMPT_FILE,
            JS_PROMPT_FILE,
            CSS_PROMPT_FILE,
        ] {
            std::fs::write(dir.path().join(file), "prompt body").unwrap();
        }
        // translate_html.md is missing
        let err = PromptLibrary::load(dir.path()).unwrap_err();
        assert!(matches!(err, WorkflowError::PromptTemplate { .. }));

        std::fs::write(dir.path().join(TRANSLATE_PROMPT_FILE), "{content}").unwrap();
        let lib = PromptLibrary::load(dir.path()).unwrap();
        assert_eq!(lib.research, "prompt body");
    }

    #[test]
    fn blank_template_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        for file in [
            RESEARCH_PROMPT_FILE,
            HTML_PROMPT_FILE,
            JS_PROMPT_FILE,
            CSS_PROMPT_FILE,
            TRANSLATE_PROMPT_FILE,
        ] {
            std::fs::write(dir.path().join(file), "body").unwrap();
        }
        std::fs::write(dir.path().join(CSS_PROMPT_FILE), "   \n").unwrap();
        assert!(PromptLibrary::load(dir.path()).is_err());
    }
}
