//! Scenario recording
//!
//! Successful interactions become an ordered list of (action, reference)
//! steps. Elements that are clicked, filled, selected or checked are promoted
//! to named fields on a page definition so a renderer can emit reusable
//! `PageName.fieldName` references instead of raw selectors.

use std::collections::HashMap;
use std::fmt::Write as _;

use interaction_ledger::{page_url_pattern, Interaction};
use mender_core_types::{truncate_chars, ElementDescriptor};
use selector_candidates::strategies::quote;
use selector_candidates::CandidateGenerator;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::parser::{ActionType, ParsedAction, NAVIGATE_BACK, NAVIGATE_FORWARD, NAVIGATE_RELOAD};

pub const DEFAULT_FEATURE_NAME: &str = "LiveRecording";
pub const DEFAULT_SCENARIO_NAME: &str = "Live Session";

const FIELD_WORD_CHARS: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageField {
    pub name: String,
    pub strategy: String,
    /// Human-readable locator, e.g. `role "button" name "Login"`
    pub reference: String,
    pub selector: String,
    pub tag_name: String,
    pub usage_count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageDefinition {
    pub name: String,
    pub url_pattern: String,
    pub fields: Vec<PageField>,
}

impl PageDefinition {
    pub fn field(&self, name: &str) -> Option<&PageField> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedStep {
    pub action: ActionType,
    /// `Page.field`, a raw reference, or a scroll direction
    pub target: Option<String>,
    pub value: Option<String>,
    pub step_text: String,
    /// Qualified field name when the target was promoted to a page field
    pub field: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recording {
    pub feature_name: String,
    pub scenario_name: String,
    pub steps: Vec<RecordedStep>,
    pub pages: Vec<PageDefinition>,
}

/// Turns a recording into persisted test-definition text.
pub trait ArtifactRenderer: Send + Sync {
    fn render(&self, recording: &Recording) -> String;
}

/// Plain-text outline: a feature header, the scenario steps, then one block
/// per page with its fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct OutlineRenderer;

impl ArtifactRenderer for OutlineRenderer {
    fn render(&self, recording: &Recording) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Feature {}", quote(&recording.feature_name));
        if !recording.pages.is_empty() {
            out.push('\n');
            for page in &recording.pages {
                let _ = writeln!(out, "use {}", page.name);
            }
        }

        let _ = writeln!(out, "\nScenario {}", quote(&recording.scenario_name));
        for step in &recording.steps {
            let _ = writeln!(out, "  # {}", step.step_text.trim());
            let _ = writeln!(out, "  {}", outline_step(step));
        }

        for page in &recording.pages {
            let _ = writeln!(out, "\nPage {}", page.name);
            let _ = writeln!(out, "  url pattern {}", quote(&page.url_pattern));
            for field in &page.fields {
                let _ = writeln!(out, "  field {} = {}", field.name, field.reference);
            }
        }
        out
    }
}

fn outline_step(step: &RecordedStep) -> String {
    let target = step.target.as_deref().unwrap_or("page");
    let value = step.value.as_deref().unwrap_or_default();
    match step.action {
        ActionType::Navigate => match value {
            NAVIGATE_BACK => "go back".to_string(),
            NAVIGATE_FORWARD => "go forward".to_string(),
            NAVIGATE_RELOAD => "reload".to_string(),
            url => format!("navigate to {}", quote(url)),
        },
        ActionType::Click => format!("click {}", target),
        ActionType::Fill => format!("fill {} with {}", target, quote(value)),
        ActionType::Select => format!("select {} from {}", quote(value), target),
        ActionType::Check => format!("check {}", target),
        ActionType::Uncheck => format!("uncheck {}", target),
        ActionType::Hover => format!("hover over {}", target),
        ActionType::Press => format!("press {}", quote(if value.is_empty() { "Enter" } else { value })),
        ActionType::Wait => match value.trim().parse::<u64>() {
            Ok(seconds) => format!("wait {} seconds", seconds),
            Err(_) => format!("wait for {} to be visible", target),
        },
        ActionType::Assert => format!("assert {} is visible", target),
        ActionType::Scroll => format!("scroll {}", target),
        ActionType::Screenshot => {
            format!("take screenshot as {}", quote(if value.is_empty() { "step" } else { value }))
        }
        ActionType::Unknown => format!("# unrecognised: {}", step.step_text.trim()),
    }
}

/// Accumulates the steps of one live session.
pub struct ScenarioRecorder {
    generator: CandidateGenerator,
    feature_name: String,
    scenario_name: String,
    steps: Vec<RecordedStep>,
    pages: Vec<PageDefinition>,
    name_counters: HashMap<(String, String), u32>,
}

impl Default for ScenarioRecorder {
    fn default() -> Self {
        Self::new()
    }
}

impl ScenarioRecorder {
    pub fn new() -> Self {
        Self::with_names(DEFAULT_FEATURE_NAME, DEFAULT_SCENARIO_NAME)
    }

    pub fn with_names(feature_name: impl Into<String>, scenario_name: impl Into<String>) -> Self {
        Self {
            generator: CandidateGenerator::new(),
            feature_name: feature_name.into(),
            scenario_name: scenario_name.into(),
            steps: Vec::new(),
            pages: Vec::new(),
            name_counters: HashMap::new(),
        }
    }

    /// Append a successful or corrected interaction. Failures are ignored.
    pub fn record_interaction(&mut self, interaction: &Interaction) {
        if !interaction.outcome.is_success() {
            return;
        }
        let action = ActionType::from_name(&interaction.action_type);
        let element = ElementDescriptor {
            tag_name: interaction.tag_name.clone(),
            text: interaction.text.clone(),
            attributes: interaction.attributes.clone(),
            bounding_box: interaction.bounding_box,
            label: None,
        };
        let candidate = self.generator.best_selector(&element);
        let (strategy, reference) = match candidate {
            Some(candidate) => (candidate.strategy.name().to_string(), candidate.reference),
            None => (
                interaction.strategy.clone(),
                format!("css {}", quote(&interaction.selector_used)),
            ),
        };

        let (target, field) = if promotes_to_field(action) {
            let page_index = self.page_for(&interaction.page_url);
            let field_name = self.field_for(
                page_index,
                &element,
                action,
                strategy,
                reference,
                &interaction.selector_used,
            );
            let qualified = format!("{}.{}", self.pages[page_index].name, field_name);
            (Some(qualified.clone()), Some(qualified))
        } else {
            (Some(reference), None)
        };

        self.push(RecordedStep {
            action,
            target,
            value: interaction.action_value.clone(),
            step_text: interaction.step_text.clone(),
            field,
        });
    }

    /// Append an action that did not touch an element (navigation, keys,
    /// waits, scrolling, screenshots).
    pub fn record_action(&mut self, action: &ParsedAction) {
        if action.action_type == ActionType::Unknown {
            return;
        }
        self.push(RecordedStep {
            action: action.action_type,
            target: action.target.clone(),
            value: action.value.clone(),
            step_text: action.raw_step.clone(),
            field: None,
        });
    }

    pub fn recording(&self) -> Recording {
        Recording {
            feature_name: self.feature_name.clone(),
            scenario_name: self.scenario_name.clone(),
            steps: self.steps.clone(),
            pages: self.pages.clone(),
        }
    }

    pub fn render(&self, renderer: &dyn ArtifactRenderer) -> String {
        renderer.render(&self.recording())
    }

    pub fn clear(&mut self) {
        self.steps.clear();
        self.pages.clear();
        self.name_counters.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    fn push(&mut self, step: RecordedStep) {
        let repeated = self.steps.last().is_some_and(|last| {
            last.action == step.action && last.target == step.target && last.value == step.value
        });
        if !repeated {
            self.steps.push(step);
        }
    }

    fn page_for(&mut self, page_url: &str) -> usize {
        let name = page_name(page_url);
        if let Some(idx) = self.pages.iter().position(|p| p.name == name) {
            return idx;
        }
        self.pages.push(PageDefinition {
            name,
            url_pattern: page_url_pattern(page_url),
            fields: Vec::new(),
        });
        self.pages.len() - 1
    }

    fn field_for(
        &mut self,
        page_index: usize,
        element: &ElementDescriptor,
        action: ActionType,
        strategy: String,
        reference: String,
        selector: &str,
    ) -> String {
        let page = &mut self.pages[page_index];
        if let Some(existing) = page.fields.iter_mut().find(|f| f.reference == reference) {
            existing.usage_count += 1;
            return existing.name.clone();
        }

        let base = field_name(element, action);
        let counter = self
            .name_counters
            .entry((page.name.clone(), base.clone()))
            .or_insert(0);
        *counter += 1;
        let mut name = if *counter == 1 {
            base.clone()
        } else {
            format!("{}{}", base, counter)
        };
        while page.field(&name).is_some() {
            *counter += 1;
            name = format!("{}{}", base, counter);
        }

        page.fields.push(PageField {
            name: name.clone(),
            strategy,
            reference,
            selector: selector.to_string(),
            tag_name: element.tag_name.clone(),
            usage_count: 1,
        });
        name
    }
}

fn promotes_to_field(action: ActionType) -> bool {
    matches!(
        action,
        ActionType::Click | ActionType::Fill | ActionType::Select | ActionType::Check
    )
}

/// PascalCase page name from the URL path, `HomePage` for the root.
pub fn page_name(page_url: &str) -> String {
    let path = match Url::parse(page_url.trim()) {
        Ok(url) => url.path().to_string(),
        Err(_) => page_url.trim().to_string(),
    };
    let name: String = path
        .split('/')
        .filter(|segment| !segment.chars().all(|c| c.is_ascii_digit()))
        .flat_map(words)
        .map(capitalize)
        .collect();
    if name.is_empty() {
        return "HomePage".to_string();
    }
    if name.ends_with("Page") {
        name
    } else {
        format!("{}Page", name)
    }
}

/// camelCase field name from the element's most descriptive attribute.
pub fn field_name(element: &ElementDescriptor, action: ActionType) -> String {
    let sources = [
        Some(truncate_chars(element.trimmed_text(), FIELD_WORD_CHARS)),
        element.attr("aria-label").map(|v| truncate_chars(v, FIELD_WORD_CHARS)),
        element.attr("placeholder").map(|v| truncate_chars(v, FIELD_WORD_CHARS)),
        element.attr("name"),
        element.attr("data-testid"),
    ];
    let base = sources
        .into_iter()
        .flatten()
        .map(camel_case)
        .find(|name| !name.is_empty());

    let tag = element.tag_name.trim();
    let Some(base) = base else {
        let tag = if tag.is_empty() { "element" } else { tag };
        return format!("{}{}", camel_case(tag), capitalize(action.as_str()));
    };

    let suffix = match tag {
        "button" => Some("Button"),
        "a" => Some("Link"),
        "input" => Some("Input"),
        "select" => Some("Select"),
        "textarea" => Some("TextArea"),
        _ if action == ActionType::Click => Some("Button"),
        _ => None,
    };
    match suffix {
        Some(suffix) if !base.ends_with(suffix) => format!("{}{}", base, suffix),
        _ => base,
    }
}

fn words(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn camel_case(value: &str) -> String {
    let mut name = String::new();
    for (idx, word) in words(value).enumerate() {
        if idx == 0 {
            name.push_str(&word.to_lowercase());
        } else {
            name.push_str(&capitalize(word));
        }
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert_str(0, "field");
    }
    name
}
