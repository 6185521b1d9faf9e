//! Pulling JSON payloads out of chatty LLM replies.
//!
//! Models often wrap JSON in markdown fences or surround it with prose. The
//! extraction strategies below are tried in order:
//!
//! 1. A ```` ```json ```` fenced block
//! 2. Any fenced block whose body parses as JSON
//! 3. The reply itself, when it starts with `{` or `[`
//! 4. The last balanced object in the reply (reasoning text usually comes first)
//! 5. The first balanced object or array anywhere
//!
//! Each candidate must parse with `serde_json` to be accepted.

use thiserror::Error;

/// Errors returned when no usable JSON can be found.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum JsonExtractionError {
    /// JSON starts but never closes, usually a token-limit cut.
    #[error("JSON output appears truncated ({unclosed} unclosed delimiters)")]
    Truncated { unclosed: usize },

    #[error("No JSON found in response: {preview}")]
    NotFound { preview: String },
}

/// Outcome of an extraction attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JsonExtractionResult {
    Success(String),
    Truncated { partial_json: String, unclosed: usize },
    NotFound,
}

impl JsonExtractionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, JsonExtractionResult::Success(_))
    }

    /// Converts into a `Result`, quoting the start of `content` when nothing was found.
    pub fn into_result(self, content: &str) -> Result<String, JsonExtractionError> {
        match self {
            JsonExtractionResult::Success(json) => Ok(json),
            JsonExtractionResult::Truncated { unclosed, .. } => {
                Err(JsonExtractionError::Truncated { unclosed })
            }
            JsonExtractionResult::NotFound => Err(JsonExtractionError::NotFound {
                preview: content.chars().take(120).collect(),
            }),
        }
    }
}

fn parses(candidate: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(candidate).is_ok()
}

/// Tries every strategy and reports success, truncation or absence.
pub fn try_extract_json_from_response(content: &str) -> JsonExtractionResult {
    let trimmed = content.trim();

    for block in fenced_blocks(trimmed) {
        if parses(block) {
            return JsonExtractionResult::Success(block.to_string());
        }
    }

    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Some(end) = find_matching_close(trimmed) {
            let candidate = &trimmed[..=end];
            if parses(candidate) {
                return JsonExtractionResult::Success(candidate.to_string());
            }
        } else {
            let unclosed = unclosed_delimiters(trimmed);
            if unclosed > 0 {
                return JsonExtractionResult::Truncated {
                    partial_json: trimmed.to_string(),
                    unclosed,
                };
            }
        }
    }

    if let Some(json) = extract_last_valid_json_object(trimmed) {
        return JsonExtractionResult::Success(json);
    }

    for open in ['{', '['] {
        if let Some(start) = trimmed.find(open) {
            let tail = &trimmed[start..];
            match find_matching_close(tail) {
                Some(end) if parses(&tail[..=end]) => {
                    return JsonExtractionResult::Success(tail[..=end].to_string());
                }
                Some(_) => {}
                None => {
                    return JsonExtractionResult::Truncated {
                        partial_json: tail.to_string(),
                        unclosed: unclosed_delimiters(tail),
                    };
                }
            }
        }
    }

    JsonExtractionResult::NotFound
}

/// Extracts JSON, falling back to the trimmed reply when none is found.
pub fn extract_json_from_response(content: &str) -> String {
    match try_extract_json_from_response(content) {
        JsonExtractionResult::Success(json) => json,
        JsonExtractionResult::Truncated { partial_json, .. } => partial_json,
        JsonExtractionResult::NotFound => content.trim().to_string(),
    }
}

/// Bodies of markdown fenced blocks, `json`-tagged ones first.
fn fenced_blocks(content: &str) -> Vec<&str> {
    let mut tagged = Vec::new();
    let mut other = Vec::new();
    let mut rest = content;

    while let Some(open) = rest.find("```") {
        let after_fence = &rest[open + 3..];
        let (info, body_start) = match after_fence.find('\n') {
            Some(nl) => (after_fence[..nl].trim(), nl + 1),
            None => break,
        };
        let body = &after_fence[body_start..];
        let Some(close) = body.find("```") else {
            break;
        };
        let block = body[..close].trim();
        if info.eq_ignore_ascii_case("json") {
            tagged.push(block);
        } else {
            other.push(block);
        }
        rest = &body[close + 3..];
    }

    tagged.extend(other);
    tagged
}

/// Index of the delimiter closing the one `s` starts with.
///
/// Braces and brackets inside string literals (including escaped quotes) are
/// ignored.
pub fn find_matching_close(s: &str) -> Option<usize> {
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (i, c) in s.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn unclosed_delimiters(s: &str) -> usize {
    let mut depth: isize = 0;
    let mut in_string = false;
    let mut escaped = false;
    for c in s.chars() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            '{' | '[' if !in_string => depth += 1,
            '}' | ']' if !in_string => depth -= 1,
            _ => {}
        }
    }
    depth.max(0) as usize + usize::from(in_string)
}

/// Last top-level balanced `{...}` in `content` that parses as JSON.
pub fn extract_last_valid_json_object(content: &str) -> Option<String> {
    let mut last = None;
    let mut cursor = 0;

    while let Some(offset) = content[cursor..].find('{') {
        let start = cursor + offset;
        let tail = &content[start..];
        match find_matching_close(tail) {
            Some(end) if parses(&tail[..=end]) => {
                last = Some(tail[..=end].to_string());
                cursor = start + end + 1;
            }
            _ => cursor = start + 1,
        }
    }
    last
}
