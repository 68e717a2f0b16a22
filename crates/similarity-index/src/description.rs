//! Textual element descriptions fed to the embedding provider

use mender_core_types::{truncate_chars, ElementContext};
use selector_candidates::semantic_class_tokens;
use selector_candidates::strategies::TEST_ID_ATTRIBUTES;

const DESCRIPTION_TEXT_CHARS: usize = 100;
const DESCRIBED_ATTRIBUTES: [&str; 5] = ["aria-label", "placeholder", "name", "title", "alt"];

/// Build the description an element is embedded under.
///
/// Segments are joined with `"; "`: role and tag, visible text, key
/// attributes, test id, semantic classes, surrounding context and page title.
pub fn describe_element(context: &ElementContext) -> String {
    let element = &context.element;
    let mut parts = Vec::new();

    let tag = match element.tag_name.trim() {
        "" => "element",
        tag => tag,
    };
    match element.attr("role") {
        Some(role) => parts.push(format!("{role} {tag}")),
        None => parts.push(tag.to_string()),
    }

    let text = element.trimmed_text();
    if !text.is_empty() {
        parts.push(format!(
            "with text '{}'",
            truncate_chars(text, DESCRIPTION_TEXT_CHARS)
        ));
    }

    for name in DESCRIBED_ATTRIBUTES {
        if let Some(value) = element.attr(name) {
            parts.push(format!("{name} '{value}'"));
        }
    }

    if let Some(test_id) = TEST_ID_ATTRIBUTES.iter().find_map(|name| element.attr(name)) {
        parts.push(format!("test id '{test_id}'"));
    }

    if let Some(class_attr) = element.attr("class") {
        let classes = semantic_class_tokens(class_attr);
        if !classes.is_empty() {
            parts.push(format!("class '{}'", classes.join(" ")));
        }
    }

    let surrounding = context.surrounding_text.trim();
    if !surrounding.is_empty() {
        parts.push(format!("in {surrounding}"));
    } else if let Some(parent) = context.parent_tag.as_deref().filter(|p| !p.is_empty()) {
        parts.push(format!("in {parent}"));
    }

    let title = context.page_title.trim();
    if !title.is_empty() {
        parts.push(format!("on page '{title}'"));
    }

    parts.join("; ")
}
