//! Synonym group recommendation.

use serde::Deserialize;

use crate::batch::{BatchJob, Recommendation};
use crate::error::LlmError;
use crate::utils::parse_json_list;

use super::{field_text, numbered_documents};

const SYNONYM_PROMPT: &str = r#"당신은 한국어 검색 엔진의 동의어 사전을 관리하는 전문가입니다.

아래 문서들에서 검색 사용자가 서로 바꿔 쓸 수 있는 동의어 그룹을 찾아주세요.

## 규칙
- 같은 대상을 가리키는 표기 차이(외래어/한글, 띄어쓰기, 약어)를 포함합니다
- 상위어/하위어 관계는 동의어가 아닙니다
- 그룹은 2개 이상의 용어로 구성하고 쉼표로 구분합니다

## 출력 형식
JSON 배열만 출력하세요:
[{"group": "용어1,용어2", "description": "동의어로 판단한 이유"}]

## 문서
"#;

#[derive(Debug, Deserialize)]
struct SynonymGroup {
    group: String,
    #[serde(default)]
    description: String,
}

/// Recommends synonym groups found in a text field.
#[derive(Debug, Clone)]
pub struct SynonymRecommendationJob {
    field: String,
}

impl SynonymRecommendationJob {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

/// Trims, deduplicates and sorts the terms of a comma-separated group.
pub fn normalize_group(group: &str) -> String {
    let mut terms: Vec<&str> = group
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect();
    terms.sort_unstable();
    terms.dedup();
    terms.join(",")
}

impl BatchJob for SynonymRecommendationJob {
    type Item = serde_json::Value;

    fn kind(&self) -> &str {
        "synonym"
    }

    fn extract(&self, item: &serde_json::Value) -> Option<String> {
        field_text(item, &self.field)
    }

    fn build_prompt(&self, texts: &[String]) -> String {
        format!("{}{}", SYNONYM_PROMPT, numbered_documents(texts))
    }

    fn parse(&self, raw: &str) -> Result<Vec<Recommendation>, LlmError> {
        let groups: Vec<SynonymGroup> =
            parse_json_list(raw).map_err(|e| LlmError::ParseError(e.to_string()))?;
        Ok(groups
            .into_iter()
            .map(|g| Recommendation::new(normalize_group(&g.group), g.description.trim()))
            .collect())
    }

    fn keep(&self, recommendation: &Recommendation) -> bool {
        recommendation.key.split(',').count() >= 2
    }
}
