//! LLM gateway: one uniform call shape for every stage.
//!
//! The entire pipeline depends on a single completion interface; centralizing
//! it here isolates the model/provider choice and the token-budget discipline.

mod gateway;
mod types;

pub use gateway::{GuardedGateway, HttpLlmGateway, LlmGateway};
pub use types::{
    estimate_tokens, ChatMessage, ChatRole, GenerationRequest, GenerationResponse, TokenUsage,
};
