//! Search query generation from documents.

use serde::Deserialize;

use crate::batch::{BatchJob, Recommendation};
use crate::error::LlmError;
use crate::utils::parse_json_list;

use super::{field_text, numbered_documents};

const QUERY_PROMPT: &str = r#"당신은 한국어 검색 품질 평가를 위한 테스트 쿼리를 만드는 전문가입니다.

아래 각 문서를 찾기 위해 실제 사용자가 검색창에 입력할 법한 검색어를 만들어주세요.

## 규칙
- 문서마다 1~3개의 검색어를 만듭니다
- 짧은 키워드형과 자연어 질문형을 섞습니다
- 문서 제목을 그대로 복사하지 않습니다

## 출력 형식
JSON 배열만 출력하세요:
[{"query": "검색어", "intent": "검색 의도"}]

## 문서
"#;

#[derive(Debug, Deserialize)]
struct GeneratedQuery {
    query: String,
    #[serde(default)]
    intent: String,
}

/// Generates evaluation queries for documents.
#[derive(Debug, Clone)]
pub struct QueryGenerationJob {
    field: String,
}

impl QueryGenerationJob {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

impl BatchJob for QueryGenerationJob {
    type Item = serde_json::Value;

    fn kind(&self) -> &str {
        "query"
    }

    fn extract(&self, item: &serde_json::Value) -> Option<String> {
        field_text(item, &self.field)
    }

    fn build_prompt(&self, texts: &[String]) -> String {
        format!("{}{}", QUERY_PROMPT, numbered_documents(texts))
    }

    fn parse(&self, raw: &str) -> Result<Vec<Recommendation>, LlmError> {
        let queries: Vec<GeneratedQuery> =
            parse_json_list(raw).map_err(|e| LlmError::ParseError(e.to_string()))?;
        Ok(queries
            .into_iter()
            .map(|q| {
                // Collapse internal whitespace so spacing variants share a key.
                let key = q.query.split_whitespace().collect::<Vec<_>>().join(" ");
                Recommendation::new(key, q.intent.trim())
            })
            .collect())
    }
}
