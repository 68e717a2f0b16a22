//! Completion and vision service seam

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::errors::CompletionError;

/// Text generation, optionally grounded on a screenshot.
#[async_trait]
pub trait CompletionService: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, CompletionError>;

    /// `image_base64` is a PNG without a data-URL prefix.
    async fn generate_with_image(
        &self,
        prompt: &str,
        image_base64: &str,
    ) -> Result<String, CompletionError>;
}

/// Ask for a JSON answer and decode the first object found in the reply.
pub(crate) async fn complete_json<T: DeserializeOwned>(
    service: &dyn CompletionService,
    prompt: &str,
    image_base64: Option<&str>,
) -> Result<T, CompletionError> {
    let raw = match image_base64 {
        Some(image) => service.generate_with_image(prompt, image).await?,
        None => service.generate(prompt).await?,
    };
    let json = extract_json_object(&raw)
        .ok_or_else(|| CompletionError::Unparsable("no JSON object in response".to_string()))?;
    serde_json::from_str(&json).map_err(|err| CompletionError::Unparsable(err.to_string()))
}

/// Pull a JSON object out of a model reply that may wrap it in prose or a
/// fenced code block.
pub fn extract_json_object(raw: &str) -> Option<String> {
    if raw.trim_start().starts_with('{') {
        return Some(trim_symmetric(raw));
    }

    let fence = "```";
    if let Some(start) = raw.find(fence) {
        let after_fence = &raw[start + fence.len()..];
        let after_lang = after_fence.trim_start_matches(|c: char| c.is_alphanumeric() || c == '_');
        if let Some(end) = after_lang.find(fence) {
            let block = &after_lang[..end];
            if block.contains('{') {
                return Some(trim_symmetric(block));
            }
        }
    }

    let rest = raw.split_once('{')?.1;
    let mut depth = 1i32;
    for (idx, ch) in rest.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(trim_symmetric(&format!("{{{}", &rest[..=idx])));
                }
            }
            _ => {}
        }
    }
    None
}

fn trim_symmetric(value: &str) -> String {
    value.trim().trim_matches('`').trim().to_string()
}
