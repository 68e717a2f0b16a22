//! Element arguments: inline JSON or `@path` to a JSON file.

use anyhow::{Context, Result};
use mender_core_types::ElementDescriptor;
use tokio::fs;

async fn read_source(raw: &str) -> Result<String> {
    match raw.strip_prefix('@') {
        Some(path) => fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path)),
        None => Ok(raw.to_string()),
    }
}

pub async fn read_element(raw: &str) -> Result<ElementDescriptor> {
    let json = read_source(raw).await?;
    ElementDescriptor::from_json_str(&json).context("Invalid element description")
}

/// A JSON array of descriptors describing every element on the page.
pub async fn read_page_elements(raw: &str) -> Result<Vec<ElementDescriptor>> {
    let json = read_source(raw).await?;
    let values: Vec<serde_json::Value> =
        serde_json::from_str(&json).context("Page elements must be a JSON array")?;
    values
        .iter()
        .enumerate()
        .map(|(idx, value)| {
            ElementDescriptor::from_json_str(&value.to_string())
                .with_context(|| format!("Invalid page element at index {}", idx))
        })
        .collect()
}
