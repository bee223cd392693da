pub mod claude;
pub mod prompt;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;

use crate::error::Result;

pub use claude::ClaudeClient;

/// Text-in, text-out access to a language-generation service.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;
}

/// Pull the JSON payload out of a model response.
///
/// Handles fenced code blocks and leading/trailing prose around a single
/// object or array. Returns `None` when no JSON-looking span is present.
pub fn extract_json_block(text: &str) -> Option<&str> {
    let trimmed = text.trim();

    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        if let Some(end) = body.find("```") {
            let inner = body[..end].trim();
            if !inner.is_empty() {
                return Some(inner);
            }
        }
    }

    let open = trimmed.find(&['{', '['][..])?;
    let close_char = if trimmed.as_bytes()[open] == b'{' { '}' } else { ']' };
    let close = trimmed.rfind(close_char)?;
    if close < open {
        return None;
    }
    Some(&trimmed[open..=close])
}
