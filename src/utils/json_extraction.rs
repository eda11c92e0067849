//! JSON extraction for LLM replies.
//!
//! Generation prompts ask for a JSON array of objects, but models wrap it in
//! markdown fences, prepend explanations, or return an object holding the
//! array (`{"synonyms": [...]}`). Extraction tries, in order:
//!
//! 1. The body of a fenced code block (```json or bare ```)
//! 2. The whole reply, if it starts with `[` or `{`
//! 3. The first balanced `[...]` or `{...}` anywhere in the reply
//!
//! # Example
//!
//! ```
//! use search_curator::utils::json_extraction::parse_json_list;
//!
//! #[derive(serde::Deserialize)]
//! struct Word { word: String }
//!
//! let reply = "추천 결과입니다:\n```json\n[{\"word\": \"무선이어폰\"}]\n```";
//! let words: Vec<Word> = parse_json_list(reply).unwrap();
//! assert_eq!(words[0].word, "무선이어폰");
//! ```

use regex::Regex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

/// Error type for JSON extraction failures
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JsonExtractionError {
    #[error("JSON appears truncated: {unclosed} unclosed delimiter(s)")]
    Truncated { unclosed: usize },

    #[error("No JSON content found in response. Content starts with: '{content_preview}'")]
    NotFound { content_preview: String },

    #[error("JSON does not match the expected shape: {0}")]
    Invalid(String),
}

/// Extracts the first parseable JSON value from `content`.
pub fn extract_json_value(content: &str) -> Result<Value, JsonExtractionError> {
    let trimmed = content.trim();

    if let Some(block) = extract_from_code_block(trimmed) {
        if let Some(value) = first_balanced_value(&block) {
            return Ok(value);
        }
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    if let Some(value) = first_balanced_value(trimmed) {
        return Ok(value);
    }

    let unclosed = unclosed_delimiters(trimmed);
    if unclosed > 0 {
        return Err(JsonExtractionError::Truncated { unclosed });
    }

    Err(JsonExtractionError::NotFound {
        content_preview: trimmed.chars().take(50).collect(),
    })
}

/// Parses a list of `T` from an LLM reply.
///
/// Accepts a bare array, or an object whose first array-valued field holds
/// the list. Elements that fail to deserialize are skipped; a reply where
/// none deserialize is an error.
pub fn parse_json_list<T: DeserializeOwned>(content: &str) -> Result<Vec<T>, JsonExtractionError> {
    let items = match extract_json_value(content)? {
        Value::Array(items) => items,
        Value::Object(map) => map
            .into_iter()
            .find_map(|(_, v)| match v {
                Value::Array(items) => Some(items),
                _ => None,
            })
            .ok_or_else(|| JsonExtractionError::Invalid("object holds no array".to_string()))?,
        other => {
            return Err(JsonExtractionError::Invalid(format!(
                "expected an array, got {}",
                type_name(&other)
            )))
        }
    };

    if items.is_empty() {
        return Ok(Vec::new());
    }

    let total = items.len();
    let parsed: Vec<T> = items
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect();

    if parsed.is_empty() {
        return Err(JsonExtractionError::Invalid(format!(
            "none of {} elements matched",
            total
        )));
    }
    Ok(parsed)
}

/// Finds the index of the delimiter closing the one at the start of `s`.
///
/// Handles nesting, string literals and escape sequences.
pub fn find_matching_delimiter(s: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            c if c == open && !in_string => depth += 1,
            c if c == close && !in_string => {
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

/// Body of the first fenced code block, with or without a language tag.
pub fn extract_from_code_block(content: &str) -> Option<String> {
    let re = Regex::new(r"```(?:[A-Za-z]+)?\s*\n?([\s\S]*?)\n?```").ok()?;
    let caps = re.captures(content)?;
    Some(caps.get(1)?.as_str().trim().to_string())
}

fn first_balanced_value(content: &str) -> Option<Value> {
    for (start, c) in content.char_indices() {
        let close = match c {
            '[' => ']',
            '{' => '}',
            _ => continue,
        };
        let rest = &content[start..];
        // An unclosed opener means the rest of the reply was cut off.
        let end = find_matching_delimiter(rest, c, close)?;
        if let Ok(value) = serde_json::from_str::<Value>(&rest[..=end]) {
            return Some(value);
        }
    }
    None
}

fn unclosed_delimiters(content: &str) -> usize {
    let Some(start) = content.find(['[', '{']) else {
        return 0;
    };

    let mut stack = 0usize;
    let mut in_string = false;
    let mut escape_next = false;
    for c in content[start..].chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '[' | '{' if !in_string => stack += 1,
            ']' | '}' if !in_string => stack = stack.saturating_sub(1),
            _ => {}
        }
    }
    stack
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Group {
        group: String,
        #[serde(default)]
        description: String,
    }

    #[test]
    fn test_bare_array() {
        let groups: Vec<Group> =
            parse_json_list(r#"[{"group": "TV,티비", "description": "표기"}]"#).expect("parse");
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].group, "TV,티비");
    }

    #[test]
    fn test_fenced_block_with_preamble() {
        let reply = "다음은 결과입니다.\n```json\n[{\"group\": \"a,b\"}]\n```\n감사합니다.";
        let groups: Vec<Group> = parse_json_list(reply).expect("parse");
        assert_eq!(groups[0].group, "a,b");
        assert_eq!(groups[0].description, "");
    }

    #[test]
    fn test_object_wrapping_array() {
        let reply = r#"{"synonyms": [{"group": "x,y"}], "note": "ok"}"#;
        let groups: Vec<Group> = parse_json_list(reply).expect("parse");
        assert_eq!(groups[0].group, "x,y");
    }

    #[test]
    fn test_embedded_array_after_text() {
        let reply = r#"Sure! [{"group": "p,q"}] hope this helps"#;
        let groups: Vec<Group> = parse_json_list(reply).expect("parse");
        assert_eq!(groups.len(), 1);
    }

    #[test]
    fn test_brackets_inside_strings_are_ignored() {
        let s = r#"["a]b", "c"] tail"#;
        assert_eq!(find_matching_delimiter(s, '[', ']'), Some(11));
    }

    #[test]
    fn test_skips_malformed_elements() {
        let groups: Vec<Group> =
            parse_json_list(r#"[{"group": "ok"}, {"nope": 1}, 3]"#).expect("parse");
        assert_eq!(groups, vec![Group { group: "ok".to_string(), description: String::new() }]);
    }

    #[test]
    fn test_no_matching_elements_is_invalid() {
        let err = parse_json_list::<Group>(r#"[{"nope": 1}]"#).expect_err("invalid");
        assert!(matches!(err, JsonExtractionError::Invalid(_)));
    }

    #[test]
    fn test_empty_array_is_ok() {
        let groups: Vec<Group> = parse_json_list("[]").expect("parse");
        assert!(groups.is_empty());
    }

    #[test]
    fn test_truncated_reply() {
        let err = extract_json_value(r#"[{"group": "a,b"}, {"group": "c"#).expect_err("truncated");
        assert!(matches!(err, JsonExtractionError::Truncated { unclosed } if unclosed >= 1));
    }

    #[test]
    fn test_plain_text_is_not_found() {
        let err = extract_json_value("추천할 항목이 없습니다").expect_err("not found");
        assert!(matches!(err, JsonExtractionError::NotFound { .. }));
    }
}
