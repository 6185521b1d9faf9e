//! LLM integration.
//!
//! Provides the [`LlmProvider`] abstraction used by the generation and judge
//! services, and [`LiteLlmClient`], an OpenAI-compatible HTTP client.

mod litellm;

pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message, Usage,
    DEFAULT_MODEL,
};
