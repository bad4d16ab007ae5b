//! Research validation: explicit verdict first, quality heuristic fallback
//!
//! The research prompt asks the model to emit a `VALIDATION RESULT:
//! PASS|FAIL` marker. Models do not always comply, so an absent marker is
//! resolved by scoring the content itself instead of burning a full
//! generation cycle on a retry.

use once_cell::sync::Lazy;
use regex::Regex;

use super::ValidationResult;

static VERDICT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)VALIDATION\s+RESULT\s*:\s*(PASS|FAIL)").unwrap());

static NUMERIC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+(?:\.\d+)?\s*%|\$\s?\d").unwrap());

/// Tunable thresholds for the fallback quality heuristic.
#[derive(Debug, Clone)]
pub struct ValidationThresholds {
    /// Research output shorter than this always fails the heuristic.
    pub min_length: usize,
    /// Signals required (out of [`SIGNAL_COUNT`]) to pass.
    pub min_signals: u32,
}

/// Number of content signals the heuristic inspects.
pub const SIGNAL_COUNT: u32 = 5;

impl Default for ValidationThresholds {
    fn default() -> Self {
        Self {
            min_length: 2000,
            min_signals: 4,
        }
    }
}

/// Last explicit verdict marker in the text, if any.
pub fn parse_verdict(text: &str) -> ValidationResult {
    match VERDICT_RE
        .captures_iter(text)
        .last()
        .map(|c| c[1].to_ascii_uppercase())
    {
        Some(v) if v == "PASS" => ValidationResult::Pass,
        Some(_) => ValidationResult::Fail,
        None => ValidationResult::Unknown,
    }
}

/// Score the content signals: asset keyword, analysis keyword, numeric
/// data, sentiment keyword, comparison-table marker.
pub fn quality_score(text: &str) -> u32 {
    let lower = text.to_lowercase();

    let has_asset = lower.contains("bitcoin") || lower.contains("btc");
    let has_analysis = lower.contains("analysis") || lower.contains("market");
    let has_numbers = NUMERIC_RE.is_match(text);
    let has_sentiment = lower.contains("fear") || lower.contains("greed");
    let has_table = lower.contains("validation summary")
        || text.lines().any(|l| l.trim_start().starts_with('|'));

    [has_asset, has_analysis, has_numbers, has_sentiment, has_table]
        .iter()
        .filter(|&&signal| signal)
        .count() as u32
}

/// Full validation policy: honor an explicit verdict, otherwise fall back
/// to the quality heuristic. Never returns `Unknown`.
pub fn evaluate(text: &str, thresholds: &ValidationThresholds) -> ValidationResult {
    match parse_verdict(text) {
        ValidationResult::Unknown => {}
        verdict => return verdict,
    }

    if text.len() < thresholds.min_length {
        tracing::debug!(
            len = text.len(),
            min = thresholds.min_length,
            "no verdict marker and content too short"
        );
        return ValidationResult::Fail;
    }

    let score = quality_score(text);
    tracing::debug!(score, required = thresholds.min_signals, "heuristic validation");
    if score >= thresholds.min_signals {
        ValidationResult::Pass
    } else {
        ValidationResult::Fail
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rich_content() -> String {
        let mut text = String::from(
            "Bitcoin market analysis. BTC moved 2.5% on the day to $65,000. \
             Fear & Greed sits at 72 (Greed).\n\
             | Metric | Value |\n| BTC Price | $65,000 |\n",
        );
        while text.len() < 2100 {
            text.push_str("Further market commentary and supporting analysis. ");
        }
        text
    }

    #[test]
    fn explicit_pass_wins() {
        assert_eq!(
            parse_verdict("...\nVALIDATION RESULT: PASS\n"),
            ValidationResult::Pass
        );
        assert_eq!(
            evaluate("VALIDATION RESULT: PASS", &ValidationThresholds::default()),
            ValidationResult::Pass
        );
    }

    #[test]
    fn explicit_fail_wins_even_over_rich_content() {
        let mut text = rich_content();
        text.push_str("\nVALIDATION RESULT: FAIL\n");
        assert_eq!(
            evaluate(&text, &ValidationThresholds::default()),
            ValidationResult::Fail
        );
    }

    #[test]
    fn last_marker_is_authoritative() {
        let text = "VALIDATION RESULT: FAIL\n...revised...\nvalidation result: pass";
        assert_eq!(parse_verdict(text), ValidationResult::Pass);
    }

    #[test]
    fn missing_marker_is_unknown() {
        assert_eq!(parse_verdict("no verdict here"), ValidationResult::Unknown);
    }

    #[test]
    fn heuristic_passes_rich_content() {
        let text = rich_content();
        assert!(quality_score(&text) >= 4);
        assert_eq!(
            evaluate(&text, &ValidationThresholds::default()),
            ValidationResult::Pass
        );
    }

    #[test]
    fn heuristic_fails_short_content() {
        assert_eq!(
            evaluate("Bitcoin went up.", &ValidationThresholds::default()),
            ValidationResult::Fail
        );
    }

    #[test]
    fn heuristic_fails_low_signal_content() {
        let mut text = String::new();
        while text.len() < 2100 {
            text.push_str("Generic filler text about nothing in particular. ");
        }
        assert!(quality_score(&text) < 4);
        assert_eq!(
            evaluate(&text, &ValidationThresholds::default()),
            ValidationResult::Fail
        );
    }

    #[test]
    fn thresholds_are_tunable() {
        let lax = ValidationThresholds {
            min_length: 10,
            min_signals: 1,
        };
        assert_eq!(
            evaluate("bitcoin commentary only", &lax),
            ValidationResult::Pass
        );
    }
}
