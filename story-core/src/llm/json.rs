//! Defensive JSON extraction from model output.
//!
//! Model replies are often wrapped in code fences, carry prose around the
//! payload, or are cut off mid-object. [`extract_json_object`] slices out the
//! outermost object, parses it strictly and falls back to [`repair_json`].

use serde_json::{Map, Value};

/// Extract the JSON object embedded in a model reply.
///
/// Returns `None` when no object can be recovered, including when the
/// payload parses to something other than an object.
pub fn extract_json_object(response: &str) -> Option<Map<String, Value>> {
    let mut cleaned = response.trim();
    if cleaned.starts_with("```") {
        if let Some(newline) = cleaned.find('\n') {
            cleaned = &cleaned[newline + 1..];
        }
        if let Some(stripped) = cleaned.trim_end().strip_suffix("```") {
            cleaned = stripped.trim();
        }
    }

    let start = cleaned.find('{')?;
    let end = cleaned.rfind('}')?;
    if end < start {
        return None;
    }
    let candidate = &cleaned[start..=end];

    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Some(map),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!(error = %e, "strict JSON parse failed, attempting repair");
            match serde_json::from_str::<Value>(&repair_json(candidate)) {
                Ok(Value::Object(map)) => Some(map),
                _ => None,
            }
        }
    }
}

/// Best-effort rewrite of near-JSON into valid JSON.
///
/// Handles trailing commas, unterminated strings, unbalanced brackets,
/// bare keys and single-quoted strings. The output is not guaranteed to
/// parse.
pub fn repair_json(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 16);
    let mut stack: Vec<char> = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '"' | '\'' => {
                i = copy_string(&chars, i, &mut out);
            }
            '{' | '[' => {
                stack.push(c);
                out.push(c);
                i += 1;
            }
            '}' | ']' => {
                let opener = if c == '}' { '{' } else { '[' };
                if stack.last() == Some(&opener) {
                    stack.pop();
                    drop_trailing_comma(&mut out);
                    out.push(c);
                }
                i += 1;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '-')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let next = chars[i..].iter().find(|ch| !ch.is_whitespace());
                let is_key = stack.last() == Some(&'{') && next == Some(&':');
                let in_number = out.ends_with(|ch: char| ch.is_ascii_digit() || ch == '.');
                if !is_key && (in_number || matches!(word.as_str(), "true" | "false" | "null")) {
                    out.push_str(&word);
                } else {
                    push_quoted(&mut out, &word);
                }
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    let trimmed_len = out.trim_end().len();
    out.truncate(trimmed_len);
    drop_trailing_comma(&mut out);
    if out.ends_with(':') {
        out.push_str("null");
    }
    while let Some(opener) = stack.pop() {
        drop_trailing_comma(&mut out);
        out.push(if opener == '{' { '}' } else { ']' });
    }
    out
}

/// Copy a string literal starting at `start`, normalizing it to a
/// double-quoted JSON string. Returns the index after the literal.
fn copy_string(chars: &[char], start: usize, out: &mut String) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    out.push('"');

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' if i + 1 < chars.len() => {
                let escaped = chars[i + 1];
                if escaped == '\'' {
                    out.push('\'');
                } else {
                    out.push('\\');
                    out.push(escaped);
                }
                i += 2;
            }
            '\\' => {
                i += 1;
            }
            c if c == quote => {
                out.push('"');
                return i + 1;
            }
            '"' => {
                out.push_str("\\\"");
                i += 1;
            }
            '\n' => {
                out.push_str("\\n");
                i += 1;
            }
            '\r' => {
                i += 1;
            }
            '\t' => {
                out.push_str("\\t");
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    // Unterminated
    out.push('"');
    i
}

fn push_quoted(out: &mut String, word: &str) {
    out.push('"');
    out.push_str(word);
    out.push('"');
}

fn drop_trailing_comma(out: &mut String) {
    let trimmed_len = out.trim_end().len();
    if out[..trimmed_len].ends_with(',') {
        out.truncate(trimmed_len - 1);
    }
}
