//! LLM integration.
//!
//! The worker pool only depends on the [`LlmClient`] trait; [`LiteLlmClient`]
//! is the production implementation talking to any OpenAI-compatible
//! endpoint (LiteLLM proxy, OpenRouter).
//!
//! ```ignore
//! use search_curator::llm::{LiteLlmClient, LlmClient};
//!
//! let client = LiteLlmClient::new("http://localhost:4000", None, "gpt-4o-mini")?;
//! let reply = client.call("'자동차'의 동의어를 알려줘", Some(0.2)).await?;
//! ```

pub mod litellm;

pub use litellm::{
    ChatChoice, ChatMessage, ChatRequest, ChatResponse, LiteLlmClient, LlmClient, Role,
};
