//! Element location fallback chain
//!
//! (a) the engine's decision, when confident enough
//! (b) a fixed list of common locators against the live page
//! (c) a vision model pointing at the screenshot
//! (d) interactive-element extraction ranked by a completion model
//!
//! The common locators run first to pin down which page element the step
//! means. The engine decides for that element, so lookups share a
//! fingerprint with the outcome recorded after the action.
//!
//! Failures inside one strategy only move the chain along; a disconnected
//! browser aborts it.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use decision_fusion::{DecisionSource, SelectorEngine};
use mender_core_types::{truncate_chars, BoundingBox, ElementContext, ElementDescriptor};
use once_cell::sync::Lazy;
use regex::Regex;
use selector_candidates::strategies::quote;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::browser::{unquote, BrowserSurface, Locator};
use crate::completion::{complete_json, CompletionService};
use crate::errors::{BrowserError, ExecutionError, ExecutionResult};

pub const DEFAULT_DECISION_THRESHOLD: f64 = 0.8;
pub const COMMON_LOCATOR_CONFIDENCE: f64 = 0.9;
pub const VISION_CONFIDENCE: f64 = 0.7;
pub const DOM_DEFAULT_CONFIDENCE: f64 = 0.5;
/// Extracted elements shown to the model.
pub const DOM_CANDIDATE_LIMIT: usize = 50;

const ELEMENT_TEXT_CHARS: usize = 100;
const SELECTOR_TEXT_CHARS: usize = 30;

static HAS_TEXT_SELECTOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^([a-z][a-z0-9]*):has-text\((".*")\)$"#).expect("has-text regex compiles")
});
static ATTRIBUTE_SELECTOR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^([a-z][a-z0-9]*)?\[([\w-]+)\*?=(".*?")(?: i)?\]$"#)
        .expect("attribute selector regex compiles")
});
static ID_SELECTOR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^#([A-Za-z_][\w-]*)$").expect("id selector regex compiles"));

/// Which link of the chain produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocateStrategy {
    Decision,
    Common,
    Vision,
    Dom,
}

/// An element found on the live page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementMatch {
    pub selector: String,
    pub locator: Locator,
    /// What is known about the element, for fingerprinting and recording
    pub element: ElementDescriptor,
    pub confidence: f64,
    pub via: LocateStrategy,
    /// Engine strategy or common locator name
    pub strategy: String,
    /// Decision source credited with the selector; unset for model-located
    /// elements
    pub source: Option<DecisionSource>,
    pub in_shadow_dom: bool,
    pub selectors_tried: Vec<String>,
}

/// Element data returned by the in-page extraction scripts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExtractedElement {
    pub index: usize,
    pub tag_name: String,
    pub text: String,
    pub value: String,
    pub placeholder: String,
    pub aria_label: String,
    pub id: String,
    pub class_name: String,
    pub name: String,
    #[serde(rename = "type")]
    pub input_type: String,
    pub role: String,
    pub href: String,
    pub in_shadow_dom: bool,
    pub rect: Option<BoundingBox>,
}

impl ExtractedElement {
    pub fn to_descriptor(&self) -> ElementDescriptor {
        let mut element = ElementDescriptor::new(self.tag_name.trim())
            .with_text(truncate_chars(self.text.trim(), ELEMENT_TEXT_CHARS));
        let attributes = [
            ("id", &self.id),
            ("class", &self.class_name),
            ("aria-label", &self.aria_label),
            ("name", &self.name),
            ("placeholder", &self.placeholder),
            ("type", &self.input_type),
            ("role", &self.role),
            ("href", &self.href),
        ];
        for (attr, value) in attributes {
            if !value.trim().is_empty() {
                element = element.with_attr(attr, value.trim());
            }
        }
        element.bounding_box = self.rect;
        element
    }
}

/// CSS selector for an extracted element: id, aria-label, name, text,
/// first class, then the bare tag.
pub fn build_selector_from_element(element: &ExtractedElement) -> String {
    let tag = match element.tag_name.trim() {
        "" => "*",
        tag => tag,
    };
    if !element.id.trim().is_empty() {
        return format!("#{}", element.id.trim());
    }
    if !element.aria_label.trim().is_empty() {
        return format!("[aria-label={}]", quote(element.aria_label.trim()));
    }
    if !element.name.trim().is_empty() {
        return format!("{}[name={}]", tag, quote(element.name.trim()));
    }
    let text = truncate_chars(element.text.trim(), SELECTOR_TEXT_CHARS).trim_end();
    if !text.is_empty() {
        return format!("{}:has-text({})", tag, quote(text));
    }
    if let Some(class) = element.class_name.split_whitespace().next() {
        return format!("{}.{}", tag, class);
    }
    tag.to_string()
}

/// Best-effort descriptor for an element known only through a locator.
pub fn descriptor_for_locator(
    locator: &Locator,
    text: Option<&str>,
    bounding_box: Option<BoundingBox>,
) -> ElementDescriptor {
    let mut element = match locator {
        Locator::Role { role, name } => {
            let tag = match role.as_str() {
                "button" => "button",
                "link" => "a",
                "textbox" | "checkbox" | "radio" => "input",
                "combobox" | "listbox" => "select",
                _ => "",
            };
            let element = ElementDescriptor::new(tag);
            match role.as_str() {
                "button" | "link" => element.with_text(name.as_str()),
                "checkbox" | "radio" => element.with_attr("type", role.as_str()).with_label(name.as_str()),
                _ => element.with_label(name.as_str()),
            }
        }
        Locator::Label { text } => ElementDescriptor::default().with_label(text.as_str()),
        Locator::Placeholder { text } => {
            ElementDescriptor::new("input").with_attr("placeholder", text.as_str())
        }
        Locator::TestId { id } => ElementDescriptor::default().with_attr("data-testid", id.as_str()),
        Locator::Text { text, .. } => ElementDescriptor::default().with_text(text.as_str()),
        Locator::Css { selector } => descriptor_for_css(selector),
    };

    if let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) {
        element.text = truncate_chars(text, ELEMENT_TEXT_CHARS).to_string();
    }
    element.bounding_box = bounding_box.or(element.bounding_box);
    element
}

fn descriptor_for_css(selector: &str) -> ElementDescriptor {
    if let Some(caps) = ID_SELECTOR.captures(selector) {
        return ElementDescriptor::default().with_attr("id", &caps[1]);
    }
    if let Some(caps) = HAS_TEXT_SELECTOR.captures(selector) {
        let text = unquote(&caps[2]).unwrap_or_default();
        return ElementDescriptor::new(&caps[1]).with_text(text);
    }
    if let Some(caps) = ATTRIBUTE_SELECTOR.captures(selector) {
        let tag = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let value = unquote(&caps[3]).unwrap_or_default();
        return ElementDescriptor::new(tag).with_attr(&caps[2], value);
    }
    ElementDescriptor::default()
}

/// Locators tried in order by the common-strategy link.
pub fn common_locators(target: &str) -> Vec<(&'static str, Locator)> {
    let target = target.trim();
    let quoted = quote(target);
    vec![
        ("role_button", Locator::role("button", target)),
        ("role_link", Locator::role("link", target)),
        ("role_textbox", Locator::role("textbox", target)),
        ("role_checkbox", Locator::role("checkbox", target)),
        ("role_combobox", Locator::role("combobox", target)),
        (
            "label",
            Locator::Label {
                text: target.to_string(),
            },
        ),
        (
            "text",
            Locator::Text {
                text: target.to_string(),
                exact: false,
            },
        ),
        (
            "placeholder",
            Locator::Placeholder {
                text: target.to_string(),
            },
        ),
        (
            "test_id",
            Locator::TestId {
                id: target.to_lowercase().replace(' ', "-"),
            },
        ),
        ("button_text", Locator::css(format!("button:has-text({})", quoted))),
        ("link_text", Locator::css(format!("a:has-text({})", quoted))),
        (
            "input_placeholder",
            Locator::css(format!("input[placeholder*={} i]", quoted)),
        ),
        ("aria_label", Locator::css(format!("[aria-label*={} i]", quoted))),
    ]
}

/// What to look for, and where.
#[derive(Debug, Clone, Copy)]
pub struct LocateRequest<'a> {
    pub target: &'a str,
    pub step_text: &'a str,
    pub page_url: &'a str,
    pub page_title: &'a str,
}

pub struct ElementLocator {
    browser: Arc<dyn BrowserSurface>,
    engine: Arc<SelectorEngine>,
    completion: Option<Arc<dyn CompletionService>>,
    decision_threshold: f64,
}

impl ElementLocator {
    pub fn new(browser: Arc<dyn BrowserSurface>, engine: Arc<SelectorEngine>) -> Self {
        Self {
            browser,
            engine,
            completion: None,
            decision_threshold: DEFAULT_DECISION_THRESHOLD,
        }
    }

    pub fn with_completion(mut self, completion: Arc<dyn CompletionService>) -> Self {
        self.completion = Some(completion);
        self
    }

    pub fn with_decision_threshold(mut self, threshold: f64) -> Self {
        self.decision_threshold = threshold;
        self
    }

    /// Run the chain until a link produces an element.
    pub async fn locate(&self, request: &LocateRequest<'_>) -> ExecutionResult<ElementMatch> {
        let mut tried = Vec::new();

        let common = self.from_common_locators(request.target, &mut tried).await?;
        let found = match self.from_decision(request, common.as_ref(), &mut tried).await? {
            Some(found) => Some(found),
            None => common,
        };
        let found = match (found, self.completion.as_deref()) {
            (Some(found), _) => Some(found),
            (None, Some(completion)) => {
                match self.from_vision(completion, request.target, &mut tried).await? {
                    Some(found) => Some(found),
                    None => self.from_dom(completion, request.target, &mut tried).await?,
                }
            }
            (None, None) => None,
        };

        match found {
            Some(mut found) => {
                info!(
                    target = request.target,
                    selector = %found.selector,
                    via = ?found.via,
                    confidence = found.confidence,
                    "Element located"
                );
                found.selectors_tried = tried;
                Ok(found)
            }
            None => {
                debug!(target = request.target, tried = tried.len(), "All locate strategies exhausted");
                Err(ExecutionError::Resolution(request.target.to_string()))
            }
        }
    }

    /// Ask the engine about `anchor`, the element the common locators
    /// resolved. Without one only a learned correction can be confident.
    async fn from_decision(
        &self,
        request: &LocateRequest<'_>,
        anchor: Option<&ElementMatch>,
        tried: &mut Vec<String>,
    ) -> ExecutionResult<Option<ElementMatch>> {
        let element = match anchor {
            Some(anchor) => anchor.element.clone(),
            None => ElementDescriptor::default().with_text(request.target.trim()),
        };
        let context = ElementContext::new(element, request.page_url, request.page_title);
        let decision = self.engine.decide_selector(&context, request.step_text).await;
        if decision.confidence < self.decision_threshold {
            debug!(
                selector = %decision.selector,
                confidence = decision.confidence,
                "Engine decision below threshold"
            );
            return Ok(None);
        }

        let locator = Locator::parse_selector(&decision.selector);
        let element = match anchor {
            Some(anchor) if anchor.selector == decision.selector => anchor.element.clone(),
            _ => {
                tried.push(decision.selector.clone());
                let Some((text, bounding_box)) = self.probe(&locator).await? else {
                    debug!(selector = %decision.selector, "Engine selector not on page");
                    return Ok(None);
                };
                match anchor {
                    Some(anchor) => anchor.element.clone(),
                    None => descriptor_for_locator(&locator, text.as_deref(), bounding_box),
                }
            }
        };
        Ok(Some(ElementMatch {
            element,
            selector: decision.selector,
            locator,
            confidence: decision.confidence,
            via: LocateStrategy::Decision,
            strategy: decision.strategy,
            source: Some(decision.source),
            in_shadow_dom: false,
            selectors_tried: Vec::new(),
        }))
    }

    async fn from_common_locators(
        &self,
        target: &str,
        tried: &mut Vec<String>,
    ) -> ExecutionResult<Option<ElementMatch>> {
        for (name, locator) in common_locators(target) {
            let selector = locator.to_string();
            tried.push(selector.clone());
            if let Some((text, bounding_box)) = self.probe(&locator).await? {
                return Ok(Some(ElementMatch {
                    element: descriptor_for_locator(&locator, text.as_deref(), bounding_box),
                    selector,
                    locator,
                    confidence: COMMON_LOCATOR_CONFIDENCE,
                    via: LocateStrategy::Common,
                    strategy: name.to_string(),
                    source: Some(DecisionSource::Generated),
                    in_shadow_dom: false,
                    selectors_tried: Vec::new(),
                }));
            }
        }
        Ok(None)
    }

    async fn from_vision(
        &self,
        completion: &dyn CompletionService,
        target: &str,
        tried: &mut Vec<String>,
    ) -> ExecutionResult<Option<ElementMatch>> {
        let screenshot = match self.browser.screenshot().await {
            Ok(bytes) => BASE64.encode(bytes),
            Err(err) => return skip_unless_fatal(err, "screenshot for vision locate"),
        };

        let reply: VisionReply =
            match complete_json(completion, &vision_prompt(target), Some(&screenshot)).await {
                Ok(reply) => reply,
                Err(err) => {
                    warn!(error = %err, target, "Vision locate failed");
                    return Ok(None);
                }
            };
        let Some(point) = reply.approximate_location.filter(|_| reply.found) else {
            debug!(target, description = ?reply.description, "Vision model did not find element");
            return Ok(None);
        };

        let viewport = self.browser.viewport();
        let x = (point.x * f64::from(viewport.width) / 100.0).round().max(0.0);
        let y = (point.y * f64::from(viewport.height) / 100.0).round().max(0.0);
        let value = match self.browser.evaluate(&element_at_point_script(x, y)).await {
            Ok(value) => value,
            Err(err) => return skip_unless_fatal(err, "element at point"),
        };
        if value.is_null() {
            return Ok(None);
        }
        let extracted: ExtractedElement = match serde_json::from_value(value) {
            Ok(extracted) => extracted,
            Err(err) => {
                warn!(error = %err, "Unexpected element-at-point result");
                return Ok(None);
            }
        };

        let selector = build_selector_from_element(&extracted);
        tried.push(selector.clone());
        let mut element = extracted.to_descriptor();
        element.bounding_box = element
            .bounding_box
            .or(Some(BoundingBox::new(x, y, 0.0, 0.0)));
        Ok(Some(ElementMatch {
            locator: Locator::parse_selector(&selector),
            selector,
            element,
            confidence: VISION_CONFIDENCE,
            via: LocateStrategy::Vision,
            strategy: "vision".to_string(),
            source: None,
            in_shadow_dom: false,
            selectors_tried: Vec::new(),
        }))
    }

    async fn from_dom(
        &self,
        completion: &dyn CompletionService,
        target: &str,
        tried: &mut Vec<String>,
    ) -> ExecutionResult<Option<ElementMatch>> {
        let value = match self.browser.evaluate(DOM_EXTRACTION_SCRIPT).await {
            Ok(value) => value,
            Err(err) => return skip_unless_fatal(err, "interactive element extraction"),
        };
        let mut elements: Vec<ExtractedElement> = match serde_json::from_value(value) {
            Ok(elements) => elements,
            Err(err) => {
                warn!(error = %err, "Unexpected element extraction result");
                return Ok(None);
            }
        };
        elements.truncate(DOM_CANDIDATE_LIMIT);
        if elements.is_empty() {
            return Ok(None);
        }

        let listing = match serde_json::to_string_pretty(&elements) {
            Ok(listing) => listing,
            Err(err) => {
                warn!(error = %err, "Failed to serialise extracted elements");
                return Ok(None);
            }
        };
        let reply: DomReply = match complete_json(completion, &dom_prompt(target, &listing), None).await {
            Ok(reply) => reply,
            Err(err) => {
                warn!(error = %err, target, "DOM ranking failed");
                return Ok(None);
            }
        };
        let Some(chosen) = reply.index.and_then(|index| elements.get(index)) else {
            debug!(target, index = ?reply.index, "DOM ranking returned no usable index");
            return Ok(None);
        };

        let selector = build_selector_from_element(chosen);
        tried.push(selector.clone());
        Ok(Some(ElementMatch {
            locator: Locator::parse_selector(&selector),
            selector,
            element: chosen.to_descriptor(),
            confidence: reply
                .confidence
                .unwrap_or(DOM_DEFAULT_CONFIDENCE)
                .clamp(0.0, 1.0),
            via: LocateStrategy::Dom,
            strategy: "dom".to_string(),
            source: None,
            in_shadow_dom: chosen.in_shadow_dom,
            selectors_tried: Vec::new(),
        }))
    }

    /// Text and box of the first match, if it exists and is visible.
    async fn probe(
        &self,
        locator: &Locator,
    ) -> ExecutionResult<Option<(Option<String>, Option<BoundingBox>)>> {
        let visible = async {
            if self.browser.count(locator).await? == 0 {
                return Ok(false);
            }
            self.browser.is_visible(locator).await
        }
        .await;
        match visible {
            Ok(true) => {}
            Ok(false) => return Ok(None),
            Err(err) => return skip_unless_fatal(err, "locator probe"),
        }
        let text = self.browser.text_content(locator).await.ok().flatten();
        let bounding_box = self.browser.bounding_box(locator).await.ok().flatten();
        Ok(Some((text, bounding_box)))
    }
}

fn skip_unless_fatal<T>(err: BrowserError, what: &str) -> ExecutionResult<Option<T>> {
    if err.is_retryable() {
        debug!(error = %err, what, "Browser call failed; skipping");
        Ok(None)
    } else {
        Err(err.into())
    }
}

#[derive(Deserialize)]
struct VisionReply {
    #[serde(default)]
    found: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    approximate_location: Option<Point>,
}

#[derive(Deserialize)]
struct Point {
    x: f64,
    y: f64,
}

#[derive(Deserialize)]
struct DomReply {
    #[serde(default)]
    index: Option<usize>,
    #[serde(default)]
    confidence: Option<f64>,
}

fn vision_prompt(target: &str) -> String {
    format!(
        r#"Analyze this screenshot and find the element: "{target}"

Return a JSON object with:
- found: boolean
- description: what you see
- approximate_location: {{"x": percentage from left, "y": percentage from top}}
- suggested_selector: CSS selector to try

If not found, explain why in description.

JSON only:"#
    )
}

fn dom_prompt(target: &str, listing: &str) -> String {
    format!(
        r#"Find the best matching element for: "{target}"

Available elements (JSON):
{listing}

Return the index of the best match and a confidence score (0-1).
JSON format: {{"index": number, "confidence": number, "reason": "why this matches"}}

JSON only:"#
    )
}

fn element_at_point_script(x: f64, y: f64) -> String {
    format!(
        r#"() => {{
    const el = document.elementFromPoint({x}, {y});
    if (!el) return null;
    const rect = el.getBoundingClientRect();
    return {{
        tagName: el.tagName.toLowerCase(),
        text: (el.textContent || '').trim().substring(0, 100),
        id: el.id || '',
        className: typeof el.className === 'string' ? el.className : '',
        ariaLabel: el.getAttribute('aria-label') || '',
        name: el.getAttribute('name') || '',
        placeholder: el.getAttribute('placeholder') || '',
        role: el.getAttribute('role') || '',
        rect: {{ x: rect.x, y: rect.y, width: rect.width, height: rect.height }}
    }};
}}"#
    )
}

/// Visible interactive elements, descending into open shadow roots.
pub const DOM_EXTRACTION_SCRIPT: &str = r#"() => {
    const results = [];
    const interactive = 'a, button, input, select, textarea, [role="button"], [role="link"], [role="checkbox"], [role="textbox"], [onclick], [tabindex]';

    function extract(root, inShadow) {
        root.querySelectorAll(interactive).forEach((el) => {
            const rect = el.getBoundingClientRect();
            if (rect.width > 0 && rect.height > 0) {
                results.push({
                    index: results.length,
                    tagName: el.tagName.toLowerCase(),
                    text: (el.textContent || '').trim().substring(0, 100),
                    value: typeof el.value === 'string' ? el.value : '',
                    placeholder: el.getAttribute('placeholder') || '',
                    ariaLabel: el.getAttribute('aria-label') || '',
                    id: el.id || '',
                    className: typeof el.className === 'string' ? el.className : '',
                    name: el.getAttribute('name') || '',
                    type: el.getAttribute('type') || '',
                    role: el.getAttribute('role') || '',
                    href: el.getAttribute('href') || '',
                    inShadowDom: inShadow,
                    rect: { x: rect.x, y: rect.y, width: rect.width, height: rect.height }
                });
            }
        });
        root.querySelectorAll('*').forEach((el) => {
            if (el.shadowRoot) {
                extract(el.shadowRoot, true);
            }
        });
    }

    extract(document, false);
    return results;
}"#;
