//! Per-strategy evaluators
//!
//! Each [`SelectorStrategy`] variant owns exactly one evaluator. An evaluator
//! returns `None` when the element lacks the data it needs; it never fails.

use mender_core_types::{truncate_chars, ElementDescriptor};

use crate::classes::semantic_class_tokens;
use crate::roles::{accessible_name, detect_role};
use crate::types::{SelectorCandidate, SelectorStrategy};

/// Attributes treated as test hooks, in preference order.
pub const TEST_ID_ATTRIBUTES: [&str; 5] =
    ["data-testid", "data-test-id", "data-test", "data-cy", "data-qa"];

/// Text shorter than this gets an exact text selector.
pub const EXACT_TEXT_MAX_CHARS: usize = 30;

/// Text this long or longer is not used for text or xpath selectors.
pub const TEXT_MAX_CHARS: usize = 100;

/// Base score for partial text matches.
pub const PARTIAL_TEXT_SCORE: f64 = 0.65;

const CLASS_SELECTOR_TOKENS: usize = 2;
const CSS_ATTRIBUTES: [&str; 3] = ["name", "type", "href"];
const LABELLED_TAGS: [&str; 3] = ["input", "textarea", "select"];

impl SelectorStrategy {
    /// Evaluate this strategy against an element.
    pub fn evaluate(&self, element: &ElementDescriptor) -> Option<SelectorCandidate> {
        match self {
            SelectorStrategy::TestId => test_id(element),
            SelectorStrategy::RoleName => role_name(element),
            SelectorStrategy::Label => label(element),
            SelectorStrategy::Placeholder => placeholder(element),
            SelectorStrategy::AltText => alt_text(element),
            SelectorStrategy::Title => title(element),
            SelectorStrategy::Text => text(element),
            SelectorStrategy::CssId => css_id(element),
            SelectorStrategy::CssClass => css_class(element),
            SelectorStrategy::CssAttribute => css_attribute(element),
            SelectorStrategy::XPath => xpath(element),
        }
    }
}

/// Escape a value for use inside a double-quoted selector string.
pub fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn candidate(
    strategy: SelectorStrategy,
    selector: String,
    reference: String,
) -> Option<SelectorCandidate> {
    let score = strategy.base_score();
    Some(SelectorCandidate::new(strategy, selector, reference, score))
}

fn test_id(element: &ElementDescriptor) -> Option<SelectorCandidate> {
    let (attr, value) = TEST_ID_ATTRIBUTES
        .iter()
        .find_map(|attr| element.attr(attr).map(|value| (*attr, value)))?;
    candidate(
        SelectorStrategy::TestId,
        format!("[{}={}]", attr, quote(value)),
        format!("testId {}", quote(value)),
    )
}

fn role_name(element: &ElementDescriptor) -> Option<SelectorCandidate> {
    let role = detect_role(element)?;
    let name = accessible_name(element)?;
    candidate(
        SelectorStrategy::RoleName,
        format!("role={}[name={}]", role, quote(&name)),
        format!("role {} name {}", quote(&role), quote(&name)),
    )
}

fn label(element: &ElementDescriptor) -> Option<SelectorCandidate> {
    let text = element
        .label
        .as_deref()
        .map(str::trim)
        .filter(|label| !label.is_empty())
        .or_else(|| {
            LABELLED_TAGS
                .contains(&element.tag_name.as_str())
                .then(|| element.attr("aria-label"))
                .flatten()
        })?;
    candidate(
        SelectorStrategy::Label,
        format!("label={}", quote(text)),
        format!("label {}", quote(text)),
    )
}

fn placeholder(element: &ElementDescriptor) -> Option<SelectorCandidate> {
    let value = element.attr("placeholder")?;
    candidate(
        SelectorStrategy::Placeholder,
        format!("placeholder={}", quote(value)),
        format!("placeholder {}", quote(value)),
    )
}

fn alt_text(element: &ElementDescriptor) -> Option<SelectorCandidate> {
    let alt = element.attr("alt")?;
    let tag = if element.tag_name.is_empty() {
        "img"
    } else {
        element.tag_name.as_str()
    };
    candidate(
        SelectorStrategy::AltText,
        format!("{}[alt={}]", tag, quote(alt)),
        format!("alt {}", quote(alt)),
    )
}

fn title(element: &ElementDescriptor) -> Option<SelectorCandidate> {
    let value = element.attr("title")?;
    candidate(
        SelectorStrategy::Title,
        format!("[title={}]", quote(value)),
        format!("title {}", quote(value)),
    )
}

fn text(element: &ElementDescriptor) -> Option<SelectorCandidate> {
    let text = element.trimmed_text();
    let len = text.chars().count();
    if text.is_empty() || len >= TEXT_MAX_CHARS {
        return None;
    }
    if len < EXACT_TEXT_MAX_CHARS {
        return candidate(
            SelectorStrategy::Text,
            format!("text={}", quote(text)),
            format!("text {}", quote(text)),
        );
    }
    let prefix = truncate_chars(text, EXACT_TEXT_MAX_CHARS).trim_end();
    Some(SelectorCandidate::new(
        SelectorStrategy::Text,
        format!("text={}", prefix),
        format!("text contains {}", quote(prefix)),
        PARTIAL_TEXT_SCORE,
    ))
}

/// True for text selectors produced by the exact-match tier.
pub fn is_exact_text_selector(selector: &str) -> bool {
    selector.starts_with("text=\"")
}

fn css_id(element: &ElementDescriptor) -> Option<SelectorCandidate> {
    let id = element.attr("id")?;
    if id.starts_with(':') || id.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    candidate(
        SelectorStrategy::CssId,
        format!("#{}", id),
        format!("css {}", quote(&format!("#{}", id))),
    )
}

fn css_class(element: &ElementDescriptor) -> Option<SelectorCandidate> {
    let tokens = semantic_class_tokens(element.attributes.get("class")?);
    if tokens.is_empty() {
        return None;
    }
    let selector: String = tokens
        .iter()
        .take(CLASS_SELECTOR_TOKENS)
        .map(|token| format!(".{}", token))
        .collect();
    let reference = format!("css {}", quote(&selector));
    candidate(SelectorStrategy::CssClass, selector, reference)
}

/// Class tokens a class selector requires, in selector order.
pub fn class_selector_tokens(selector: &str) -> Vec<&str> {
    selector.split('.').filter(|t| !t.is_empty()).collect()
}

fn css_attribute(element: &ElementDescriptor) -> Option<SelectorCandidate> {
    let (attr, value) = CSS_ATTRIBUTES
        .iter()
        .find_map(|attr| element.attr(attr).map(|value| (*attr, value)))?;
    let tag = if element.tag_name.is_empty() {
        "*"
    } else {
        element.tag_name.as_str()
    };
    let selector = format!("{}[{}={}]", tag, attr, quote(value));
    let reference = format!("css {}", quote(&selector));
    candidate(SelectorStrategy::CssAttribute, selector, reference)
}

fn xpath(element: &ElementDescriptor) -> Option<SelectorCandidate> {
    let text = element.trimmed_text();
    if element.tag_name.is_empty() || text.is_empty() || text.chars().count() >= TEXT_MAX_CHARS {
        return None;
    }
    // XPath 1.0 has no escape syntax; fall back to single quotes when needed.
    let literal = if text.contains('"') {
        if text.contains('\'') {
            return None;
        }
        format!("'{}'", text)
    } else {
        format!("\"{}\"", text)
    };
    let selector = format!("//{}[normalize-space(.)={}]", element.tag_name, literal);
    let reference = format!("xpath {}", quote(&selector));
    candidate(SelectorStrategy::XPath, selector, reference)
}
