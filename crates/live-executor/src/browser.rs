//! Browser surface abstraction
//!
//! The executor never talks to a concrete driver. Anything that can locate
//! elements by role, label, placeholder, test id, text or CSS and perform the
//! usual input actions can implement [`BrowserSurface`].

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use mender_core_types::BoundingBox;
use once_cell::sync::Lazy;
use regex::Regex;
use selector_candidates::strategies::quote;
use serde::{Deserialize, Serialize};

use crate::errors::BrowserResult;

static ROLE_SELECTOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^role=([A-Za-z][\w-]*)\[name=(".*")\]$"#).expect("role selector regex compiles")
});

/// How to find an element on the page.
///
/// Surfaces resolve each variant to the first matching node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Locator {
    Role { role: String, name: String },
    Label { text: String },
    Placeholder { text: String },
    TestId { id: String },
    Text { text: String, exact: bool },
    Css { selector: String },
}

impl Locator {
    pub fn role(role: impl Into<String>, name: impl Into<String>) -> Self {
        Locator::Role {
            role: role.into(),
            name: name.into(),
        }
    }

    pub fn css(selector: impl Into<String>) -> Self {
        Locator::Css {
            selector: selector.into(),
        }
    }

    /// Interpret a selector string produced by the engine.
    ///
    /// Understands `role=<role>[name="..."]`, `label="..."`,
    /// `placeholder="..."`, `data-testid="..."`, `text="..."` (exact) and
    /// `text=...` (partial). Anything else is CSS.
    pub fn parse_selector(selector: &str) -> Self {
        let selector = selector.trim();
        if let Some(caps) = ROLE_SELECTOR.captures(selector) {
            if let Some(name) = unquote(&caps[2]) {
                return Locator::role(&caps[1], name);
            }
        }
        if let Some(text) = selector.strip_prefix("label=").and_then(unquote) {
            return Locator::Label { text };
        }
        if let Some(text) = selector.strip_prefix("placeholder=").and_then(unquote) {
            return Locator::Placeholder { text };
        }
        if let Some(id) = selector.strip_prefix("data-testid=").and_then(unquote) {
            return Locator::TestId { id };
        }
        if let Some(rest) = selector.strip_prefix("text=") {
            return match unquote(rest) {
                Some(text) => Locator::Text { text, exact: true },
                None => Locator::Text {
                    text: rest.to_string(),
                    exact: false,
                },
            };
        }
        Locator::css(selector)
    }
}

impl fmt::Display for Locator {
    /// The selector string [`Locator::parse_selector`] reads back.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Role { role, name } => write!(f, "role={}[name={}]", role, quote(name)),
            Locator::Label { text } => write!(f, "label={}", quote(text)),
            Locator::Placeholder { text } => write!(f, "placeholder={}", quote(text)),
            Locator::TestId { id } => write!(f, "data-testid={}", quote(id)),
            Locator::Text { text, exact: true } => write!(f, "text={}", quote(text)),
            Locator::Text { text, exact: false } => write!(f, "text={}", text),
            Locator::Css { selector } => f.write_str(selector),
        }
    }
}

/// Strip one pair of surrounding double quotes and undo [`quote`] escaping.
pub(crate) fn unquote(value: &str) -> Option<String> {
    let inner = value.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
    Top,
    Bottom,
}

impl ScrollDirection {
    /// Accepts `up`, `down`, `to top`, `to the bottom` and similar.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        let words: Vec<&str> = normalized
            .split_whitespace()
            .filter(|w| *w != "to" && *w != "the")
            .collect();
        match words.as_slice() {
            ["up"] => Some(ScrollDirection::Up),
            ["down"] => Some(ScrollDirection::Down),
            ["top"] => Some(ScrollDirection::Top),
            ["bottom"] => Some(ScrollDirection::Bottom),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ScrollDirection::Up => "up",
            ScrollDirection::Down => "down",
            ScrollDirection::Top => "to top",
            ScrollDirection::Bottom => "to bottom",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// Capabilities the executor needs from a live browser page.
///
/// Element operations act on the first node matched by the locator.
#[async_trait]
pub trait BrowserSurface: Send + Sync {
    async fn navigate(&self, url: &str) -> BrowserResult<()>;
    async fn go_back(&self) -> BrowserResult<()>;
    async fn go_forward(&self) -> BrowserResult<()>;
    async fn reload(&self) -> BrowserResult<()>;

    async fn current_url(&self) -> BrowserResult<String>;
    async fn title(&self) -> BrowserResult<String>;
    fn viewport(&self) -> Viewport;

    async fn count(&self, locator: &Locator) -> BrowserResult<usize>;
    async fn is_visible(&self, locator: &Locator) -> BrowserResult<bool>;
    async fn bounding_box(&self, locator: &Locator) -> BrowserResult<Option<BoundingBox>>;
    async fn text_content(&self, locator: &Locator) -> BrowserResult<Option<String>>;

    async fn click(&self, locator: &Locator) -> BrowserResult<()>;
    async fn fill(&self, locator: &Locator, value: &str) -> BrowserResult<()>;
    async fn select_option(&self, locator: &Locator, label: &str) -> BrowserResult<()>;
    async fn check(&self, locator: &Locator) -> BrowserResult<()>;
    async fn uncheck(&self, locator: &Locator) -> BrowserResult<()>;
    async fn hover(&self, locator: &Locator) -> BrowserResult<()>;
    async fn press_key(&self, key: &str) -> BrowserResult<()>;
    async fn scroll(&self, direction: ScrollDirection) -> BrowserResult<()>;
    async fn wait_visible(&self, locator: &Locator, timeout: Duration) -> BrowserResult<()>;

    /// PNG bytes of the current viewport.
    async fn screenshot(&self) -> BrowserResult<Vec<u8>>;

    /// Invoke a function expression such as `() => document.title` in the
    /// page and return its JSON-serialisable result.
    async fn evaluate(&self, script: &str) -> BrowserResult<serde_json::Value>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_engine_selectors() {
        assert_eq!(
            Locator::parse_selector(r#"role=button[name="Sign In"]"#),
            Locator::role("button", "Sign In")
        );
        assert_eq!(
            Locator::parse_selector(r#"label="Email address""#),
            Locator::Label {
                text: "Email address".into()
            }
        );
        assert_eq!(
            Locator::parse_selector(r#"placeholder="Search""#),
            Locator::Placeholder {
                text: "Search".into()
            }
        );
        assert_eq!(
            Locator::parse_selector(r#"text="Log in""#),
            Locator::Text {
                text: "Log in".into(),
                exact: true
            }
        );
        assert_eq!(
            Locator::parse_selector("text=A very long paragraph"),
            Locator::Text {
                text: "A very long paragraph".into(),
                exact: false
            }
        );
        assert_eq!(
            Locator::parse_selector(r#"[data-testid="login-btn"]"#),
            Locator::css(r#"[data-testid="login-btn"]"#)
        );
        assert_eq!(Locator::parse_selector("#main .nav"), Locator::css("#main .nav"));
    }

    #[test]
    fn test_display_reads_back() {
        let locators = [
            Locator::role("link", "Say \"hi\""),
            Locator::TestId {
                id: "submit-order".into(),
            },
            Locator::Text {
                text: "Welcome back".into(),
                exact: true,
            },
            Locator::css("button:has-text(\"Go\")"),
        ];
        for locator in locators {
            assert_eq!(Locator::parse_selector(&locator.to_string()), locator);
        }
    }

    #[test]
    fn test_scroll_direction_parse() {
        assert_eq!(ScrollDirection::parse("down"), Some(ScrollDirection::Down));
        assert_eq!(ScrollDirection::parse("to the top"), Some(ScrollDirection::Top));
        assert_eq!(ScrollDirection::parse("To Bottom"), Some(ScrollDirection::Bottom));
        assert_eq!(ScrollDirection::parse("sideways"), None);
    }
}
