use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::CoreError;

/// Axis-aligned box of an element in CSS pixels.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Snapshot of a UI element as seen on the page.
///
/// Attributes are kept in an ordered map so iteration never depends on the
/// order the browser reported them in.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementDescriptor {
    #[serde(default, alias = "tagName", alias = "tag")]
    pub tag_name: String,

    #[serde(default, alias = "text_content", alias = "textContent")]
    pub text: String,

    #[serde(default)]
    pub attributes: BTreeMap<String, String>,

    #[serde(default, alias = "boundingBox", alias = "rect")]
    pub bounding_box: Option<BoundingBox>,

    /// Text of an associated `<label>`, when the caller resolved one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl ElementDescriptor {
    pub fn new(tag_name: impl Into<String>) -> Self {
        Self {
            tag_name: tag_name.into().to_ascii_lowercase(),
            ..Default::default()
        }
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn with_bounding_box(mut self, bounding_box: BoundingBox) -> Self {
        self.bounding_box = Some(bounding_box);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Parse a descriptor from JSON, accepting both snake_case and DOM-style keys.
    pub fn from_json_str(raw: &str) -> Result<Self, CoreError> {
        let mut element: ElementDescriptor =
            serde_json::from_str(raw).map_err(|err| CoreError::InvalidElement(err.to_string()))?;
        element.tag_name = element.tag_name.to_ascii_lowercase();
        Ok(element)
    }

    /// Non-empty, trimmed attribute value.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// Trimmed visible text.
    pub fn trimmed_text(&self) -> &str {
        self.text.trim()
    }

    /// Whitespace-separated tokens of the `class` attribute.
    pub fn class_tokens(&self) -> Vec<&str> {
        self.attributes
            .get("class")
            .map(|value| value.split_whitespace().collect())
            .unwrap_or_default()
    }

    /// True when the descriptor carries nothing that could identify an element.
    pub fn is_empty(&self) -> bool {
        self.tag_name.trim().is_empty()
            && self.trimmed_text().is_empty()
            && self.attributes.values().all(|v| v.trim().is_empty())
    }
}

/// An element together with the page it was observed on.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementContext {
    pub element: ElementDescriptor,

    #[serde(default)]
    pub page_url: String,

    #[serde(default)]
    pub page_title: String,

    /// Nearby text such as a section heading or form legend.
    #[serde(default)]
    pub surrounding_text: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_tag: Option<String>,

    #[serde(default)]
    pub sibling_count: usize,
}

impl ElementContext {
    pub fn new(
        element: ElementDescriptor,
        page_url: impl Into<String>,
        page_title: impl Into<String>,
    ) -> Self {
        Self {
            element,
            page_url: page_url.into(),
            page_title: page_title.into(),
            ..Default::default()
        }
    }

    pub fn with_surrounding_text(mut self, text: impl Into<String>) -> Self {
        self.surrounding_text = text.into();
        self
    }

    pub fn with_parent_tag(mut self, tag: impl Into<String>) -> Self {
        self.parent_tag = Some(tag.into());
        self
    }

    pub fn with_sibling_count(mut self, count: usize) -> Self {
        self.sibling_count = count;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_json_accepts_dom_style_keys() {
        let element = ElementDescriptor::from_json_str(
            r#"{"tagName":"BUTTON","textContent":"Login","attributes":{"id":"go"},"rect":{"x":1,"y":2,"width":3,"height":4}}"#,
        )
        .unwrap();
        assert_eq!(element.tag_name, "button");
        assert_eq!(element.text, "Login");
        assert_eq!(element.attr("id"), Some("go"));
        assert_eq!(element.bounding_box.unwrap().width, 3.0);
    }

    #[test]
    fn test_attr_ignores_blank_values() {
        let element = ElementDescriptor::new("input").with_attr("name", "   ");
        assert_eq!(element.attr("name"), None);
        assert_eq!(element.attr("missing"), None);
    }

    #[test]
    fn test_is_empty() {
        assert!(ElementDescriptor::default().is_empty());
        assert!(!ElementDescriptor::new("a").is_empty());
    }

    #[test]
    fn test_bounding_box_center() {
        let bbox = BoundingBox::new(10.0, 20.0, 100.0, 40.0);
        assert_eq!(bbox.center(), (60.0, 40.0));
    }
}
