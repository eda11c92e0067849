//! Concrete recommendation jobs for the batch scroll processor.
//!
//! Each job reads one text field from JSON documents, asks the LLM for
//! Korean-language suggestions, and keys them for count aggregation:
//!
//! - [`SynonymRecommendationJob`]: synonym groups, keyed by normalized group
//! - [`DictionaryRecommendationJob`]: user-dictionary compound nouns
//! - [`QueryGenerationJob`]: search queries a user would type

pub mod dictionary;
pub mod queries;
pub mod runner;
pub mod synonym;

pub use dictionary::DictionaryRecommendationJob;
pub use queries::QueryGenerationJob;
pub use runner::RecommendationRunner;
pub use synonym::{normalize_group, SynonymRecommendationJob};

use serde_json::Value;

/// Texts longer than this are cut before prompting.
const MAX_TEXT_CHARS: usize = 500;

/// Trimmed, length-capped string value of `field`, if non-empty.
pub(crate) fn field_text(item: &Value, field: &str) -> Option<String> {
    let text = item.get(field)?.as_str()?.trim();
    if text.is_empty() {
        return None;
    }
    Some(text.chars().take(MAX_TEXT_CHARS).collect())
}

pub(crate) fn numbered_documents(texts: &[String]) -> String {
    texts
        .iter()
        .enumerate()
        .map(|(i, text)| format!("{}. {}", i + 1, text.replace('\n', " ")))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_text() {
        assert_eq!(
            field_text(&json!({ "title": "  렌즈  " }), "title"),
            Some("렌즈".to_string())
        );
        assert_eq!(field_text(&json!({ "title": "" }), "title"), None);
        assert_eq!(field_text(&json!({ "title": 3 }), "title"), None);
        assert_eq!(field_text(&json!({}), "title"), None);

        let long = "가".repeat(MAX_TEXT_CHARS + 10);
        let cut = field_text(&json!({ "body": long }), "body").expect("text");
        assert_eq!(cut.chars().count(), MAX_TEXT_CHARS);
    }

    #[test]
    fn test_numbered_documents_flattens_newlines() {
        let listed = numbered_documents(&["a\nb".to_string(), "c".to_string()]);
        assert_eq!(listed, "1. a b\n2. c");
    }
}
