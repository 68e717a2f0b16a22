//! Filtering of generated class names

use once_cell::sync::Lazy;
use regex::Regex;

const MIN_CLASS_LEN: usize = 3;
const MAX_CLASS_LEN: usize = 30;
const MAX_CLASSES: usize = 3;

const SEMANTIC_KEYWORDS: [&str; 17] = [
    "btn",
    "button",
    "input",
    "form",
    "nav",
    "header",
    "footer",
    "menu",
    "card",
    "modal",
    "dialog",
    "list",
    "item",
    "link",
    "title",
    "content",
    "container",
];

// Minified names, private names, numeric prefixes and CSS-in-JS / UI-kit prefixes.
static GENERATED_CLASS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[a-z]{1,2}\d+|_|\d|css-|sc-|chakra-|Mui[A-Za-z]+-root|ant-|el-)")
        .expect("generated-class pattern compiles")
});

/// Whether a class token looks machine-generated.
pub fn is_generated_class(token: &str) -> bool {
    let len = token.chars().count();
    len < MIN_CLASS_LEN || len > MAX_CLASS_LEN || GENERATED_CLASS.is_match(token)
}

fn is_semantic(token: &str) -> bool {
    let lower = token.to_ascii_lowercase();
    SEMANTIC_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Meaningful class tokens from a `class` attribute value.
///
/// Generated tokens are dropped, tokens containing a semantic keyword are
/// moved to the front, and at most three are kept.
pub fn semantic_class_tokens(class_attr: &str) -> Vec<String> {
    let kept: Vec<&str> = class_attr
        .split_whitespace()
        .filter(|token| !is_generated_class(token))
        .collect();
    let (semantic, plain): (Vec<&str>, Vec<&str>) = kept.into_iter().partition(|t| is_semantic(t));
    semantic
        .into_iter()
        .chain(plain)
        .take(MAX_CLASSES)
        .map(str::to_string)
        .collect()
}
