//! Extraction of structured JSON from free-form model replies.

/// Pull the JSON object out of a model reply, tolerating markdown code
/// fences and surrounding prose.
pub(crate) fn extract_json(reply: &str) -> Option<&str> {
    let trimmed = reply.trim();

    // Fenced block first: ```json ... ``` or bare ``` ... ```
    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        let body_start = after_fence.find('\n').map(|p| p + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        if let Some(end) = body.find("```") {
            let inner = body[..end].trim();
            if inner.starts_with('{') {
                return Some(inner);
            }
        }
    }

    // Otherwise take the outermost braces.
    let open = trimmed.find('{')?;
    let close = trimmed.rfind('}')?;
    if close > open {
        Some(trimmed[open..=close].trim())
    } else {
        None
    }
}
