//! ARIA role and accessible-name inference

use mender_core_types::{truncate_chars, ElementDescriptor};

const MAX_TEXT_NAME_CHARS: usize = 50;

/// Implicit or explicit ARIA role of an element.
pub fn detect_role(element: &ElementDescriptor) -> Option<String> {
    if let Some(role) = element.attr("role") {
        return Some(role.to_string());
    }

    let role = match element.tag_name.as_str() {
        "button" => "button",
        "a" => "link",
        "textarea" => "textbox",
        "select" => "combobox",
        "img" => "img",
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => "heading",
        "nav" => "navigation",
        "main" => "main",
        "dialog" => "dialog",
        "input" => input_role(element.attr("type").unwrap_or("text")),
        _ => return None,
    };
    Some(role.to_string())
}

fn input_role(input_type: &str) -> &'static str {
    match input_type.to_ascii_lowercase().as_str() {
        "search" => "searchbox",
        "checkbox" => "checkbox",
        "radio" => "radio",
        "submit" | "button" | "reset" => "button",
        _ => "textbox",
    }
}

/// Accessible name: aria-label, short visible text, title, then an input's value.
pub fn accessible_name(element: &ElementDescriptor) -> Option<String> {
    if let Some(label) = element.attr("aria-label") {
        return Some(label.to_string());
    }
    let text = element.trimmed_text();
    if !text.is_empty() && text.chars().count() < MAX_TEXT_NAME_CHARS {
        return Some(text.to_string());
    }
    if let Some(title) = element.attr("title") {
        return Some(title.to_string());
    }
    if element.tag_name == "input" {
        if let Some(value) = element.attr("value") {
            return Some(truncate_chars(value, MAX_TEXT_NAME_CHARS).to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_role_wins() {
        let element = ElementDescriptor::new("div").with_attr("role", "tab");
        assert_eq!(detect_role(&element).as_deref(), Some("tab"));
    }

    #[test]
    fn test_tag_roles() {
        assert_eq!(detect_role(&ElementDescriptor::new("a")).as_deref(), Some("link"));
        assert_eq!(detect_role(&ElementDescriptor::new("h2")).as_deref(), Some("heading"));
        assert_eq!(detect_role(&ElementDescriptor::new("span")), None);
    }

    #[test]
    fn test_input_roles_by_type() {
        let input = |t: &str| ElementDescriptor::new("input").with_attr("type", t);
        assert_eq!(detect_role(&input("email")).as_deref(), Some("textbox"));
        assert_eq!(detect_role(&input("search")).as_deref(), Some("searchbox"));
        assert_eq!(detect_role(&input("checkbox")).as_deref(), Some("checkbox"));
        assert_eq!(detect_role(&input("submit")).as_deref(), Some("button"));
        assert_eq!(
            detect_role(&ElementDescriptor::new("input")).as_deref(),
            Some("textbox")
        );
    }

    #[test]
    fn test_accessible_name_order() {
        let labelled = ElementDescriptor::new("button")
            .with_text("X")
            .with_attr("aria-label", "Close dialog");
        assert_eq!(accessible_name(&labelled).as_deref(), Some("Close dialog"));

        let long_text = ElementDescriptor::new("button")
            .with_text("a".repeat(60))
            .with_attr("title", "Expand");
        assert_eq!(accessible_name(&long_text).as_deref(), Some("Expand"));

        let submit = ElementDescriptor::new("input")
            .with_attr("type", "submit")
            .with_attr("value", "Send");
        assert_eq!(accessible_name(&submit).as_deref(), Some("Send"));

        assert_eq!(accessible_name(&ElementDescriptor::new("div")), None);
    }
}
