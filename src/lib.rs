//! # opspilot-core
//!
//! The pipeline orchestration core of an AI-driven infrastructure operations
//! engine. A natural-language request from an authenticated operator flows
//! through a fixed sequence of staged reasoning steps backed by an LLM:
//! combined understanding + tool selection, plan synthesis, response shaping,
//! and (optionally) supervised execution with streaming progress.
//!
//! ## Core Components
//!
//! - **Catalog**: tool profiles indexed by name, capability, and intent
//! - **Assets**: inventory context fetching, caching, and prompt injection
//! - **Llm**: the uniform gateway every stage calls through
//! - **Guard**: circuit breaker + TTL'd LRU cache around external calls
//! - **Pipeline**: the staged processor and its orchestrator
//!
//! ## Example
//!
//! ```rust,ignore
//! use opspilot_core::{
//!     HttpLlmGateway, PipelineConfig, PipelineOrchestrator, ProfileLoader,
//!     RunnerRegistry, ToolCatalog,
//! };
//! use std::sync::Arc;
//!
//! let config = PipelineConfig::from_env()?;
//! let profiles = ProfileLoader::new("/etc/opspilot/tools").load_all()?;
//! let orchestrator = PipelineOrchestrator::new(
//!     config.clone(),
//!     Arc::new(HttpLlmGateway::new(config.llm.clone())),
//!     Arc::new(ToolCatalog::new(profiles)),
//!     Arc::new(RunnerRegistry::new()),
//! )?;
//!
//! let result = orchestrator
//!     .process_request("How many Linux servers do we have?", None, None, None, None)
//!     .await;
//! println!("{}", result.response.message);
//! ```

pub mod assets;
pub mod catalog;
pub mod config;
pub mod conversation;
pub mod deadline;
pub mod error;
pub mod guard;
pub mod llm;
pub mod metrics;
pub mod pipeline;
pub mod progress;
pub mod runner;

// Re-exports for convenience
pub use assets::{Asset, AssetContextProvider, TargetContext};
pub use catalog::{
    Capability, CatalogDistribution, FeatureVector, IntentTag, InvocationPattern, ProfileLoader,
    ToolCatalog, ToolInput, ToolProfile,
};
pub use config::{AssetConfig, BreakerConfig, LlmConfig, PipelineConfig};
pub use conversation::{ConversationMessage, ConversationRole, ConversationStore};
pub use deadline::Deadline;
pub use error::{Error, ErrorKind, Result};
pub use guard::{BreakerState, CacheStats, CircuitBreaker, TtlCache};
pub use llm::{
    estimate_tokens, GenerationRequest, GenerationResponse, GuardedGateway, HttpLlmGateway,
    LlmGateway, TokenUsage,
};
pub use metrics::{
    HealthSnapshot, HealthStatus, LatencyPercentiles, MetricsHistory, MetricsSnapshot,
    PipelineStatus, RequestMetrics,
};
pub use pipeline::{
    ApprovalPoint, Clarification, CombinedSelector, ConfidenceLevel, Entity, ExecutionMetadata,
    ExecutionPlan, ExecutionPolicy, ExecutionResult, ExecutionStatus, ExecutionSummary, NextStage,
    PipelineOrchestrator, PipelineResult, PlanStep, RequestContext, Response, ResponseType,
    RiskLevel, RollbackEntry, SelectedTool, Selection, StepResult, StepStatus,
};
pub use progress::{PipelineStage, ProgressCallback, ProgressEvent, ProgressPhase};
pub use runner::{RunnerOutput, RunnerRegistry, StepRunner};
