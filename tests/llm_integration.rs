//! Integration tests for the LLM client.
//!
//! These tests make real API calls to an OpenAI-compatible endpoint.
//! Run with: CURATOR_LLM_API_KEY=your_key cargo test --test llm_integration -- --ignored

use search_curator::batch::BatchJob;
use search_curator::config::CuratorConfig;
use search_curator::jobs::SynonymRecommendationJob;
use search_curator::llm::{ChatMessage, ChatRequest, LiteLlmClient, LlmClient};

fn create_test_client() -> LiteLlmClient {
    let config = CuratorConfig::from_env().expect("valid configuration");
    assert!(
        config.llm_api_key.is_some(),
        "CURATOR_LLM_API_KEY or OPENROUTER_API_KEY must be set for integration tests"
    );
    LiteLlmClient::from_config(&config).expect("client")
}

#[tokio::test]
#[ignore] // Run with: cargo test --test llm_integration -- --ignored
async fn test_chat_completion() {
    let client = create_test_client();

    let request = ChatRequest::new(
        client.model(),
        vec![
            ChatMessage::system("Reply with digits only."),
            ChatMessage::user("How many syllables are in '바나나'?"),
        ],
    )
    .with_max_tokens(5)
    .with_temperature(0.0);

    let response = client.chat(&request).await.expect("chat completion");
    let content = response.first_content().expect("first choice");
    assert!(content.contains('3'), "expected '3', got: {}", content);
}

#[tokio::test]
#[ignore]
async fn test_synonym_prompt_round_trip() {
    let client = create_test_client();
    let job = SynonymRecommendationJob::new("title");

    let prompt = job.build_prompt(&[
        "삼성 갤럭시 핸드폰 케이스".to_string(),
        "아이폰 휴대폰 거치대".to_string(),
    ]);
    let raw = client.call(&prompt, Some(0.2)).await.expect("call");
    let parsed = job.parse(&raw).expect("reply should contain a JSON list");

    assert!(
        parsed.iter().any(|r| job.keep(r)),
        "Expected at least one synonym group, got: {}",
        raw
    );
}
