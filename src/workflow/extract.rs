//! Code extraction from generation responses
//!
//! Each component stage extracts its artifact from a fenced code block.
//! HTML falls back to the raw response when it plainly contains markup;
//! JS and CSS fall back to inert stubs so a missing fence degrades the
//! report instead of failing the stage.

use once_cell::sync::Lazy;
use regex::Regex;

static HTML_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```html(.*?)```").unwrap());
static JS_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```(?:javascript|js)(.*?)```").unwrap());
static CSS_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)```css(.*?)```").unwrap());
static HTML_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<html|<!doctype|<div|<body|<head").unwrap());

/// Stub used when no JavaScript could be extracted.
pub const FALLBACK_JS: &str = "// Auto-generated placeholder\nconsole.log('Report loaded');\n";

/// Stub used when no CSS could be extracted.
pub const FALLBACK_CSS: &str =
    "/* Auto-generated placeholder */\nbody { font-family: Arial, sans-serif; margin: 20px; }\n";

fn fenced(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .map(|c| c[1].trim().to_string())
        .filter(|s| !s.is_empty())
}

/// HTML from a fenced block, or the raw response when it contains markup.
pub fn extract_html(text: &str) -> Option<String> {
    if let Some(block) = fenced(&HTML_FENCE, text) {
        return Some(block);
    }
    if HTML_TAG.is_match(text) {
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            return Some(trimmed.to_string());
        }
    }
    None
}

pub fn extract_javascript(text: &str) -> Option<String> {
    fenced(&JS_FENCE, text)
}

pub fn extract_css(text: &str) -> Option<String> {
    fenced(&CSS_FENCE, text)
}

/// Remove a single wrapping code fence, if present.
///
/// Translation responses sometimes arrive fenced even when asked for bare
/// markup.
pub fn strip_outer_fence(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.starts_with("```") {
        let lines: Vec<&str> = trimmed.lines().collect();
        if lines.len() > 2 && lines.last().is_some_and(|l| l.trim() == "```") {
            return lines[1..lines.len() - 1].join("\n");
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn html_fence_extracted() {
        let text = "Here you go:\n```html\n<div>report</div>\n```\nDone.";
        assert_eq!(extract_html(text).as_deref(), Some("<div>report</div>"));
    }

    #[test]
    fn raw_markup_accepted_without_fence() {
        let text = "<!DOCTYPE html><html><body>report</body></html>";
        assert_eq!(extract_html(text).as_deref(), Some(text));
    }

    #[test]
    fn prose_without_markup_is_rejected() {
        assert_eq!(extract_html("I could not generate the page."), None);
    }

    #[test]
    fn js_fence_accepts_both_tags() {
        let long_form = "```javascript\nconst x = 1;\n```";
        let short_form = "```js\nconst y = 2;\n```";
        assert_eq!(extract_javascript(long_form).as_deref(), Some("const x = 1;"));
        assert_eq!(extract_javascript(short_form).as_deref(), Some("const y = 2;"));
    }

    #[test]
    fn css_fence_extracted() {
        let text = "```css\nbody { color: red; }\n```";
        assert_eq!(extract_css(text).as_deref(), Some("body { color: red; }"));
    }

    #[test]
    fn empty_fence_is_none() {
        assert_eq!(extract_css("```css\n\n```"), None);
        assert_eq!(extract_javascript("no code at all"), None);
    }

    #[test]
    fn strip_outer_fence_unwraps() {
        assert_eq!(
            strip_outer_fence("```html\n<div>hi</div>\n```"),
            "<div>hi</div>"
        );
        assert_eq!(strip_outer_fence("<div>bare</div>"), "<div>bare</div>");
    }
}
