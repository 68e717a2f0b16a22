//! Natural-language step parsing
//!
//! Deterministic rules cover the common phrasings; anything else goes to the
//! completion service when one is configured. Rules are matched
//! case-insensitively, but captures keep the step's original casing.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::browser::ScrollDirection;
use crate::completion::{complete_json, CompletionService};

/// Value of a navigate action that means "history back".
pub const NAVIGATE_BACK: &str = "back";
pub const NAVIGATE_FORWARD: &str = "forward";
pub const NAVIGATE_RELOAD: &str = "reload";

const GENERATED_PARSE_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Navigate,
    Click,
    Fill,
    Select,
    Check,
    Uncheck,
    Hover,
    Press,
    Wait,
    Assert,
    Screenshot,
    Scroll,
    Unknown,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Navigate => "navigate",
            ActionType::Click => "click",
            ActionType::Fill => "fill",
            ActionType::Select => "select",
            ActionType::Check => "check",
            ActionType::Uncheck => "uncheck",
            ActionType::Hover => "hover",
            ActionType::Press => "press",
            ActionType::Wait => "wait",
            ActionType::Assert => "assert",
            ActionType::Screenshot => "screenshot",
            ActionType::Scroll => "scroll",
            ActionType::Unknown => "unknown",
        }
    }

    /// Lenient lookup that also knows common synonyms (`type`, `goto`, `verify`).
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "navigate" | "goto" | "open" | "visit" => ActionType::Navigate,
            "click" | "tap" => ActionType::Click,
            "fill" | "type" | "enter" | "input" => ActionType::Fill,
            "select" | "choose" => ActionType::Select,
            "check" => ActionType::Check,
            "uncheck" => ActionType::Uncheck,
            "hover" => ActionType::Hover,
            "press" => ActionType::Press,
            "wait" => ActionType::Wait,
            "assert" | "verify" => ActionType::Assert,
            "screenshot" => ActionType::Screenshot,
            "scroll" => ActionType::Scroll,
            _ => ActionType::Unknown,
        }
    }

    /// Actions that always act on a located element.
    pub fn requires_element(&self) -> bool {
        matches!(
            self,
            ActionType::Click
                | ActionType::Fill
                | ActionType::Select
                | ActionType::Check
                | ActionType::Uncheck
                | ActionType::Hover
        )
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A step turned into something the executor can run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedAction {
    pub action_type: ActionType,
    /// Element description, or the direction of a scroll
    pub target: Option<String>,
    /// URL, typed text, option label, key name or wait seconds
    pub value: Option<String>,
    pub raw_step: String,
    pub confidence: f64,
}

impl ParsedAction {
    pub fn new(action_type: ActionType, raw_step: impl Into<String>) -> Self {
        Self {
            action_type,
            target: None,
            value: None,
            raw_step: raw_step.into(),
            confidence: 1.0,
        }
    }

    pub fn unknown(raw_step: impl Into<String>) -> Self {
        Self::new(ActionType::Unknown, raw_step)
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Description of the element this action needs located, if any.
    ///
    /// Waits and assertions only locate when they name a target; a numeric
    /// wait never does.
    pub fn element_target(&self) -> Option<&str> {
        let target = self.target.as_deref().map(str::trim).filter(|t| !t.is_empty());
        match self.action_type {
            t if t.requires_element() => target,
            ActionType::Wait if self.wait_seconds().is_none() => target,
            ActionType::Assert => target,
            _ => None,
        }
    }

    pub fn wait_seconds(&self) -> Option<u64> {
        if self.action_type != ActionType::Wait {
            return None;
        }
        self.value.as_deref().and_then(|v| v.trim().parse().ok())
    }

    pub fn scroll_direction(&self) -> Option<ScrollDirection> {
        self.target.as_deref().and_then(ScrollDirection::parse)
    }
}

#[derive(Debug, Clone, Copy)]
enum Capture {
    Url,
    Fixed(&'static str),
    Target,
    TargetValue,
    ValueTarget,
    Key,
    Seconds,
    Direction,
    OptionalName,
}

struct Rule {
    pattern: Regex,
    action: ActionType,
    capture: Capture,
}

const KNOWN_KEYS: &str = "enter|return|tab|escape|esc|backspace|delete|space|arrowup|arrowdown|arrowleft|arrowright|home|end|pageup|pagedown";

// Order matters: assertions before check, uncheck before check, key presses
// before the tap/press click form.
static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    let rule = |pattern: &str, action: ActionType, capture: Capture| Rule {
        pattern: Regex::new(&format!("(?i){}", pattern)).expect("step rule compiles"),
        action,
        capture,
    };
    vec![
        rule(r"^(?:go\s+)?back$", ActionType::Navigate, Capture::Fixed(NAVIGATE_BACK)),
        rule(r"^(?:go\s+)?forward$", ActionType::Navigate, Capture::Fixed(NAVIGATE_FORWARD)),
        rule(
            r"^(?:reload|refresh)(?:\s+(?:the\s+)?page)?$",
            ActionType::Navigate,
            Capture::Fixed(NAVIGATE_RELOAD),
        ),
        rule(
            r#"^(?:navigate|go|open|visit)\s+(?:to\s+)?["']?(.+?)["']?$"#,
            ActionType::Navigate,
            Capture::Url,
        ),
        rule(
            r#"^(?:assert|verify|check\s+that|ensure)\s+(?:the\s+)?["']?(.+?)["']?\s+(?:is\s+)?visible$"#,
            ActionType::Assert,
            Capture::Target,
        ),
        rule(
            r#"^(?:assert|verify|check\s+that|ensure)\s+(?:the\s+)?(?:text\s+)?["']?(.+?)["']?\s+(?:is\s+)?(?:displayed|shown|exists)$"#,
            ActionType::Assert,
            Capture::Target,
        ),
        rule(
            r"^wait\s+(?:for\s+)?(\d+)\s*(?:seconds?|secs?|s)$",
            ActionType::Wait,
            Capture::Seconds,
        ),
        rule(
            r#"^wait\s+(?:for\s+)?(?:the\s+)?["']?(.+?)["']?\s+(?:to\s+)?(?:be\s+)?visible$"#,
            ActionType::Wait,
            Capture::Target,
        ),
        rule(
            r#"^press\s+(?:the\s+)?["']?([\w+]+)["']?\s+key$"#,
            ActionType::Press,
            Capture::Key,
        ),
        rule(
            format!(r#"^press\s+(?:the\s+)?["']?({})["']?$"#, KNOWN_KEYS).as_str(),
            ActionType::Press,
            Capture::Key,
        ),
        rule(
            r#"^(?:fill|type|enter|input)\s+(?:in\s+)?(?:the\s+)?["']?(.+?)["']?\s+(?:with|as)\s+["']?(.+?)["']?$"#,
            ActionType::Fill,
            Capture::TargetValue,
        ),
        rule(
            r#"^(?:fill|type|enter|input)\s+["']?(.+?)["']?\s+(?:in|into)\s+(?:the\s+)?["']?(.+?)["']?$"#,
            ActionType::Fill,
            Capture::ValueTarget,
        ),
        rule(
            r#"^select\s+["']?(.+?)["']?\s+(?:from|in)\s+(?:the\s+)?["']?(.+?)["']?(?:\s+dropdown)?$"#,
            ActionType::Select,
            Capture::ValueTarget,
        ),
        rule(
            r#"^(?:choose|pick)\s+["']?(.+?)["']?\s+(?:option\s+)?(?:from|in)\s+(?:the\s+)?["']?(.+?)["']?$"#,
            ActionType::Select,
            Capture::ValueTarget,
        ),
        rule(
            r#"^uncheck\s+(?:the\s+)?["']?(.+?)["']?(?:\s+checkbox)?$"#,
            ActionType::Uncheck,
            Capture::Target,
        ),
        rule(
            r#"^check\s+(?:the\s+)?["']?(.+?)["']?(?:\s+checkbox)?$"#,
            ActionType::Check,
            Capture::Target,
        ),
        rule(
            r#"^hover\s+(?:over\s+|on\s+)?(?:the\s+)?["']?(.+?)["']?$"#,
            ActionType::Hover,
            Capture::Target,
        ),
        rule(
            r"^scroll\s+(up|down|to\s+(?:the\s+)?top|to\s+(?:the\s+)?bottom)$",
            ActionType::Scroll,
            Capture::Direction,
        ),
        rule(
            r#"^(?:take\s+(?:a\s+)?)?screenshot(?:\s+(?:as\s+)?["']?(.+?)["']?)?$"#,
            ActionType::Screenshot,
            Capture::OptionalName,
        ),
        rule(
            r#"^click\s+(?:on\s+)?(?:the\s+)?["']?(.+?)["']?(?:\s+button)?$"#,
            ActionType::Click,
            Capture::Target,
        ),
        rule(
            r#"^(?:tap|press)\s+(?:on\s+)?(?:the\s+)?["']?(.+?)["']?(?:\s+button)?$"#,
            ActionType::Click,
            Capture::Target,
        ),
    ]
});

/// Parses step text, falling back to the completion service for phrasing the
/// rules do not cover.
#[derive(Clone, Default)]
pub struct StepParser {
    completion: Option<Arc<dyn CompletionService>>,
}

impl StepParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_completion(mut self, completion: Arc<dyn CompletionService>) -> Self {
        self.completion = Some(completion);
        self
    }

    /// Rule-based parse only.
    pub fn parse_deterministic(step: &str) -> Option<ParsedAction> {
        let step = step.trim();
        if step.is_empty() {
            return None;
        }
        RULES.iter().find_map(|rule| {
            rule.pattern
                .captures(step)
                .map(|caps| build_action(rule, &caps, step))
        })
    }

    /// Parse `step`; unparsable or unavailable yields [`ActionType::Unknown`].
    pub async fn parse(&self, step: &str) -> ParsedAction {
        if let Some(action) = Self::parse_deterministic(step) {
            return action;
        }
        let step = step.trim();
        let Some(completion) = self.completion.as_deref() else {
            debug!(step, "No rule matched and no completion service configured");
            return ParsedAction::unknown(step);
        };
        if step.is_empty() {
            return ParsedAction::unknown(step);
        }

        let prompt = parse_prompt(step);
        match complete_json::<GeneratedParse>(completion, &prompt, None).await {
            Ok(reply) => {
                let mut action = ParsedAction::new(ActionType::from_name(&reply.action_type), step);
                action.target = reply.target.filter(|t| !t.trim().is_empty());
                action.value = reply.value.filter(|v| !v.trim().is_empty());
                action.confidence = GENERATED_PARSE_CONFIDENCE;
                if action.action_type == ActionType::Press {
                    action.value = action.value.map(|key| canonical_key(&key));
                }
                debug!(step, action = %action.action_type, "Step parsed by completion service");
                action
            }
            Err(err) => {
                warn!(error = %err, step, "Generated step parse failed");
                ParsedAction::unknown(step)
            }
        }
    }
}

#[derive(Deserialize)]
struct GeneratedParse {
    #[serde(default)]
    action_type: String,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    value: Option<String>,
}

fn parse_prompt(step: &str) -> String {
    format!(
        r#"Parse this test step into a structured action.

Step: "{step}"

Return a JSON object with:
- action_type: one of [navigate, click, fill, select, check, uncheck, hover, press, wait, assert, scroll, screenshot]
- target: the element description (if applicable)
- value: the value to enter/select (if applicable)

Example outputs:
- {{"action_type": "click", "target": "Login button"}}
- {{"action_type": "fill", "target": "Email field", "value": "test@example.com"}}
- {{"action_type": "navigate", "value": "https://example.com"}}

JSON only, no explanation:"#
    )
}

fn build_action(rule: &Rule, caps: &Captures<'_>, step: &str) -> ParsedAction {
    let group = |idx: usize| caps.get(idx).map(|m| m.as_str().trim().to_string());
    let action = ParsedAction::new(rule.action, step);
    match rule.capture {
        Capture::Fixed(value) => action.with_value(value),
        Capture::Url | Capture::Seconds => match group(1) {
            Some(value) => action.with_value(value),
            None => action,
        },
        Capture::Target => match group(1) {
            Some(target) => action.with_target(target),
            None => action,
        },
        Capture::TargetValue => ParsedAction {
            target: group(1),
            value: group(2),
            ..action
        },
        Capture::ValueTarget => ParsedAction {
            target: group(2),
            value: group(1),
            ..action
        },
        Capture::Key => match group(1) {
            Some(key) => action.with_value(canonical_key(&key)),
            None => action,
        },
        Capture::Direction => match group(1).as_deref().and_then(ScrollDirection::parse) {
            Some(direction) => action.with_target(direction.as_str()),
            None => action,
        },
        Capture::OptionalName => match group(1) {
            Some(name) => action.with_value(name),
            None => action,
        },
    }
}

/// Key name as browser drivers spell it (`Enter`, `ArrowDown`, `Escape`).
pub fn canonical_key(key: &str) -> String {
    let canonical = match key.trim().to_ascii_lowercase().as_str() {
        "enter" | "return" => "Enter",
        "tab" => "Tab",
        "escape" | "esc" => "Escape",
        "backspace" => "Backspace",
        "delete" => "Delete",
        "space" => "Space",
        "arrowup" => "ArrowUp",
        "arrowdown" => "ArrowDown",
        "arrowleft" => "ArrowLeft",
        "arrowright" => "ArrowRight",
        "home" => "Home",
        "end" => "End",
        "pageup" => "PageUp",
        "pagedown" => "PageDown",
        _ => return key.trim().to_string(),
    };
    canonical.to_string()
}
