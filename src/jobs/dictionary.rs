//! User-dictionary compound noun recommendation.

use serde::Deserialize;

use crate::batch::{BatchJob, Recommendation};
use crate::error::LlmError;
use crate::utils::parse_json_list;

use super::{field_text, numbered_documents};

const DICTIONARY_PROMPT: &str = r#"당신은 한국어 형태소 분석기의 사용자 사전을 관리하는 전문가입니다.

아래 문서들에서 형태소 분석기가 잘못 분리할 가능성이 높은 복합명사, 브랜드명, 신조어를 찾아주세요.

## 규칙
- 하나의 단어로 색인되어야 하는 용어만 추천합니다
- 공백 없이 붙여 쓴 형태로 작성합니다
- 일반 명사 하나로 이미 분석되는 단어는 제외합니다

## 출력 형식
JSON 배열만 출력하세요:
[{"word": "단어", "reason": "사전 등록이 필요한 이유"}]

## 문서
"#;

#[derive(Debug, Deserialize)]
struct DictionaryWord {
    word: String,
    #[serde(default)]
    reason: String,
}

/// Recommends user-dictionary entries found in a text field.
#[derive(Debug, Clone)]
pub struct DictionaryRecommendationJob {
    field: String,
}

impl DictionaryRecommendationJob {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl BatchJob for DictionaryRecommendationJob {
    type Item = serde_json::Value;

    fn kind(&self) -> &str {
        "dictionary"
    }

    fn extract(&self, item: &serde_json::Value) -> Option<String> {
        field_text(item, &self.field)
    }

    fn build_prompt(&self, texts: &[String]) -> String {
        format!("{}{}", DICTIONARY_PROMPT, numbered_documents(texts))
    }

    fn parse(&self, raw: &str) -> Result<Vec<Recommendation>, LlmError> {
        let words: Vec<DictionaryWord> =
            parse_json_list(raw).map_err(|e| LlmError::ParseError(e.to_string()))?;
        Ok(words
            .into_iter()
            .map(|w| Recommendation::new(w.word.trim(), w.reason.trim()))
            .collect())
    }

    fn keep(&self, recommendation: &Recommendation) -> bool {
        recommendation.key.chars().count() >= 2
            && !recommendation.key.chars().any(char::is_whitespace)
    }
}
