//! Pipeline configuration.
//!
//! Every knob is carried explicitly; nothing reads the environment at call
//! time. [`PipelineConfig::from_env`] snapshots the environment once at
//! construction so two orchestrators built from different environments do not
//! share hidden state.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for the LLM gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the chat/completions endpoint
    pub base_url: String,
    /// Model identifier passed on every request
    pub model: String,
    /// Hard per-call deadline in seconds
    pub timeout_secs: u64,
    /// Maximum context length of the model, in tokens
    pub max_model_len: u64,
    /// Tokens reserved for the completion
    pub output_reserve: u64,
    /// Extra headroom subtracted from the prompt budget
    pub safety_margin: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            model: "default".to_string(),
            timeout_secs: 30,
            max_model_len: 8192,
            output_reserve: 1024,
            safety_margin: 256,
        }
    }
}

impl LlmConfig {
    /// Prompt token budget: context length minus output reserve and margin.
    pub fn prompt_budget(&self) -> u64 {
        self.max_model_len
            .saturating_sub(self.output_reserve)
            .saturating_sub(self.safety_margin)
    }
}

/// Configuration for the asset context provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    /// Base URL of the asset inventory service
    pub service_url: String,
    /// Per-fetch timeout in seconds
    pub fetch_timeout_secs: u64,
    /// TTL for cached asset snapshots
    pub cache_ttl_secs: u64,
    /// Capacity of the asset cache
    pub cache_size: usize,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            service_url: "http://asset-service:3002".to_string(),
            fetch_timeout_secs: 5,
            cache_ttl_secs: 3600,
            cache_size: 256,
        }
    }
}

/// Circuit breaker thresholds shared by all guarded dependencies.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakerConfig {
    /// Consecutive failures before the circuit opens
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting a probe
    pub cooldown_ms: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_ms: 30_000,
        }
    }
}

/// Top-level configuration for the pipeline orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub llm: LlmConfig,
    pub assets: AssetConfig,
    pub breaker: BreakerConfig,
    /// Selection confidence below this triggers a clarification
    pub confidence_threshold: f64,
    /// Consecutive clarifications allowed per session before refusing
    pub max_clarification_attempts: u32,
    /// Messages retained per conversation session
    pub conversation_max_messages: usize,
    /// Maximum steps accepted in a plan
    pub max_plan_steps: usize,
    /// Maximum tools a selection may carry
    pub max_selected_tools: usize,
    /// Parallel step cap within a single plan
    pub step_concurrency_cap: usize,
    /// End-to-end request deadline in seconds
    pub pipeline_deadline_secs: u64,
    /// Ceiling on a plan's summed step estimates before a warning is raised
    pub plan_duration_ceiling_secs: u64,
    /// Candidate tools summarized into the selection prompt
    pub prompt_tool_candidates: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            assets: AssetConfig::default(),
            breaker: BreakerConfig::default(),
            confidence_threshold: 0.5,
            max_clarification_attempts: 3,
            conversation_max_messages: 20,
            max_plan_steps: 20,
            max_selected_tools: 8,
            step_concurrency_cap: 4,
            pipeline_deadline_secs: 60,
            plan_duration_ceiling_secs: 1800,
            prompt_tool_candidates: 20,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match env_string(key) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| Error::Config(format!("{} has invalid value '{}'", key, raw))),
    }
}

impl PipelineConfig {
    /// Build a configuration from environment variables, falling back to
    /// defaults for anything unset.
    ///
    /// Recognized keys: `LLM_BASE_URL`, `LLM_MODEL`, `LLM_TIMEOUT_S`,
    /// `LLM_MAX_MODEL_LEN`, `LLM_OUTPUT_RESERVE`, `LLM_SAFETY_MARGIN`,
    /// `ASSET_SERVICE_URL`, `ASSET_CACHE_TTL_S`, `ASSET_CACHE_SIZE`,
    /// `CONFIDENCE_THRESHOLD`, `MAX_CLARIFICATION_ATTEMPTS`,
    /// `CONVERSATION_MAX_MESSAGES`, `MAX_PLAN_STEPS`, `MAX_SELECTED_TOOLS`,
    /// `STEP_CONCURRENCY_CAP`, `PIPELINE_DEADLINE_S`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = env_string("LLM_BASE_URL") {
            config.llm.base_url = url;
        }
        if let Some(model) = env_string("LLM_MODEL") {
            config.llm.model = model;
        }
        if let Some(v) = env_parse("LLM_TIMEOUT_S")? {
            config.llm.timeout_secs = v;
        }
        if let Some(v) = env_parse("LLM_MAX_MODEL_LEN")? {
            config.llm.max_model_len = v;
        }
        if let Some(v) = env_parse("LLM_OUTPUT_RESERVE")? {
            config.llm.output_reserve = v;
        }
        if let Some(v) = env_parse("LLM_SAFETY_MARGIN")? {
            config.llm.safety_margin = v;
        }
        if let Some(url) = env_string("ASSET_SERVICE_URL") {
            config.assets.service_url = url;
        }
        if let Some(v) = env_parse("ASSET_CACHE_TTL_S")? {
            config.assets.cache_ttl_secs = v;
        }
        if let Some(v) = env_parse("ASSET_CACHE_SIZE")? {
            config.assets.cache_size = v;
        }
        if let Some(v) = env_parse("CONFIDENCE_THRESHOLD")? {
            config.confidence_threshold = v;
        }
        if let Some(v) = env_parse("MAX_CLARIFICATION_ATTEMPTS")? {
            config.max_clarification_attempts = v;
        }
        if let Some(v) = env_parse("CONVERSATION_MAX_MESSAGES")? {
            config.conversation_max_messages = v;
        }
        if let Some(v) = env_parse("MAX_PLAN_STEPS")? {
            config.max_plan_steps = v;
        }
        if let Some(v) = env_parse("MAX_SELECTED_TOOLS")? {
            config.max_selected_tools = v;
        }
        if let Some(v) = env_parse("STEP_CONCURRENCY_CAP")? {
            config.step_concurrency_cap = v;
        }
        if let Some(v) = env_parse("PIPELINE_DEADLINE_S")? {
            config.pipeline_deadline_secs = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot possibly work.
    pub fn validate(&self) -> Result<()> {
        if self.llm.prompt_budget() == 0 {
            return Err(Error::Config(
                "LLM output reserve and safety margin leave no prompt budget".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(Error::Config(format!(
                "confidence threshold {} outside [0, 1]",
                self.confidence_threshold
            )));
        }
        if self.max_selected_tools == 0 || self.max_plan_steps == 0 {
            return Err(Error::Config(
                "tool and step caps must be at least 1".to_string(),
            ));
        }
        if self.step_concurrency_cap == 0 {
            return Err(Error::Config(
                "step concurrency cap must be at least 1".to_string(),
            ));
        }
        if self.assets.cache_size == 0 {
            return Err(Error::Config("asset cache size must be at least 1".to_string()));
        }
        Ok(())
    }

    /// End-to-end request deadline as a [`Duration`].
    pub fn pipeline_deadline(&self) -> Duration {
        Duration::from_secs(self.pipeline_deadline_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.confidence_threshold, 0.5);
        assert_eq!(config.max_clarification_attempts, 3);
        assert_eq!(config.conversation_max_messages, 20);
        assert_eq!(config.pipeline_deadline_secs, 60);
    }

    #[test]
    fn test_prompt_budget() {
        let llm = LlmConfig {
            max_model_len: 8192,
            output_reserve: 1024,
            safety_margin: 256,
            ..LlmConfig::default()
        };
        assert_eq!(llm.prompt_budget(), 6912);
    }

    #[test]
    fn test_invalid_confidence_rejected() {
        let config = PipelineConfig {
            confidence_threshold: 1.5,
            ..PipelineConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_zero_budget_rejected() {
        let config = PipelineConfig {
            llm: LlmConfig {
                max_model_len: 1024,
                output_reserve: 1024,
                safety_margin: 0,
                ..LlmConfig::default()
            },
            ..PipelineConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
