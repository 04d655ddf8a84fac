/// Truncate a string to at most `max_bytes` bytes at a character boundary.
pub fn truncate_to_char_boundary(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    &s[..end]
}

/// Strip a markdown code fence wrapped around a response.
///
/// Handles an opening fence with any language tag (```json, ```JSON, bare ```)
/// and a closing fence. Text without fences is returned trimmed.
pub fn strip_code_blocks(response: &str) -> &str {
    let mut body = response.trim();

    if let Some(rest) = body.strip_prefix("```") {
        // Drop the language tag up to the end of the fence line.
        body = match rest.find('\n') {
            Some(newline) => &rest[newline + 1..],
            None => rest.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
        };
    }

    body.trim_end().trim_end_matches("```").trim()
}

/// Longest slice of a raw error body kept in an error message.
const MAX_ERROR_BODY: usize = 500;

/// Human-readable message from a provider error body.
///
/// Both Anthropic and Google wrap failures as `{"error": {"message": ...}}`,
/// with a `type` or `status` tag alongside. Anything else is returned raw,
/// truncated.
pub(crate) fn api_error_message(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let error = parsed.as_ref().and_then(|v| v.get("error"));
    let message = error
        .and_then(|e| e.get("message"))
        .and_then(|m| m.as_str());
    let kind = error
        .and_then(|e| e.get("type").or_else(|| e.get("status")))
        .and_then(|k| k.as_str());

    match (kind, message) {
        (Some(kind), Some(message)) => format!("{kind}: {message}"),
        (None, Some(message)) => message.to_string(),
        _ => truncate_to_char_boundary(body.trim(), MAX_ERROR_BODY).to_string(),
    }
}
