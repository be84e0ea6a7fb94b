//! LLM gateway trait and the HTTP chat-completions implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::LlmConfig;
use crate::error::{Error, Result};

use super::types::{GenerationRequest, GenerationResponse, TokenUsage};

/// Uniform completion interface used by every stage.
///
/// Implementations must be thread-safe (`Send + Sync`) so one gateway can be
/// shared across concurrent requests.
#[async_trait]
pub trait LlmGateway: Send + Sync {
    /// Complete a prompt, honoring the configured deadline and token budget.
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse>;

    /// Prompt token budget available to callers composing large prompts.
    fn prompt_budget(&self) -> u64;
}

/// Gateway against an OpenAI-style `/v1/chat/completions` endpoint.
pub struct HttpLlmGateway {
    config: LlmConfig,
    http: Client,
}

// Wire types for the chat/completions endpoint.
#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<WireMessage>,
    temperature: f64,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    model: Option<String>,
    choices: Vec<ChatChoice>,
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct WireError {
    error: WireErrorDetail,
}

#[derive(Debug, Deserialize)]
struct WireErrorDetail {
    message: String,
}

impl HttpLlmGateway {
    pub fn new(config: LlmConfig) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .unwrap_or_default();
        Self { config, http }
    }

    /// Fail fast when the prompt does not fit the model's context budget.
    fn check_budget(&self, request: &GenerationRequest) -> Result<()> {
        let prompt_tokens = request.prompt_tokens();
        let budget_tokens = self.config.prompt_budget();
        if prompt_tokens > budget_tokens {
            return Err(Error::TokenBudgetExceeded {
                prompt_tokens,
                budget_tokens,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl LlmGateway for HttpLlmGateway {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse> {
        self.check_budget(&request)?;

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &request.system {
            messages.push(WireMessage {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(WireMessage {
            role: "user".to_string(),
            content: request.prompt.clone(),
        });

        let api_request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request.json_mode.then(|| ResponseFormat {
                format_type: "json_object".to_string(),
            }),
        };

        let url = format!(
            "{}/v1/chat/completions",
            self.config.base_url.trim_end_matches('/')
        );

        let response = self
            .http
            .post(&url)
            .header("content-type", "application/json")
            .json(&api_request)
            .send()
            .await
            .map_err(|e| Error::LlmUnavailable(format!("HTTP request failed: {}", e)))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::LlmUnavailable(format!("failed to read response: {}", e)))?;

        if !status.is_success() {
            if let Ok(error) = serde_json::from_str::<WireError>(&body) {
                return Err(Error::LlmUnavailable(format!(
                    "LLM API error ({}): {}",
                    status, error.error.message
                )));
            }
            return Err(Error::LlmUnavailable(format!(
                "LLM API error ({}): {}",
                status, body
            )));
        }

        let api_response: ChatCompletionResponse = serde_json::from_str(&body)
            .map_err(|e| Error::LlmMalformed(format!("failed to parse response: {}", e)))?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::LlmMalformed("no choices in response".to_string()))?;

        let usage = api_response
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(GenerationResponse {
            content: choice.message.content,
            usage,
            model: api_response.model.unwrap_or_else(|| self.config.model.clone()),
            timestamp: Utc::now(),
        })
    }

    fn prompt_budget(&self) -> u64 {
        self.config.prompt_budget()
    }
}

/// Gateway wrapper that runs every call through a circuit breaker.
///
/// Only transport-level failures (`LlmUnavailable`) trip the breaker; budget
/// misses and malformed payloads prove the service is reachable and reset the
/// failure streak instead.
pub struct GuardedGateway {
    inner: Arc<dyn LlmGateway>,
    breaker: Arc<crate::guard::CircuitBreaker>,
}

impl GuardedGateway {
    pub fn new(inner: Arc<dyn LlmGateway>, breaker: Arc<crate::guard::CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }
}

#[async_trait]
impl LlmGateway for GuardedGateway {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse> {
        self.breaker.admit()?;
        match self.inner.generate(request).await {
            Ok(response) => {
                self.breaker.record_success();
                Ok(response)
            }
            Err(err @ Error::LlmUnavailable(_)) => {
                self.breaker.record_failure();
                Err(err)
            }
            Err(other) => {
                self.breaker.record_success();
                Err(other)
            }
        }
    }

    fn prompt_budget(&self) -> u64 {
        self.inner.prompt_budget()
    }
}
