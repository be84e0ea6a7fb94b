//! Error types for opspilot-core.

use thiserror::Error;

/// Result type alias using opspilot-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while processing a pipeline request.
///
/// Every failure surfaced to a caller goes through one of these variants;
/// stages translate upstream failures into either a recoverable clarification
/// or a terminal error response, and the orchestrator is the only place that
/// converts an `Error` into user-facing text.
#[derive(Error, Debug)]
pub enum Error {
    /// Empty or over-long user request
    #[error("Invalid input: {0}")]
    InputInvalid(String),

    /// The LLM endpoint could not be reached or returned a transport error
    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    /// The LLM returned output that could not be parsed against the schema
    #[error("LLM returned malformed output: {0}")]
    LlmMalformed(String),

    /// Prompt would exceed the model's context budget
    #[error("Token budget exceeded: prompt needs {prompt_tokens} tokens, budget is {budget_tokens}")]
    TokenBudgetExceeded {
        prompt_tokens: u64,
        budget_tokens: u64,
    },

    /// One or more target hosts are absent from the asset inventory
    #[error("Asset not found: {}", hosts.join(", "))]
    AssetNotFound { hosts: Vec<String> },

    /// Asset service circuit open or timed out; callers may continue degraded
    #[error("Asset service degraded: {0}")]
    AssetServiceDegraded(String),

    /// A plan referenced a tool absent from the catalog
    #[error("Tool '{tool}' is not in the catalog")]
    CatalogMiss { tool: String },

    /// Dependency cycle, missing inputs, or other structural plan defect
    #[error("Invalid plan: {0}")]
    PlanInvalid(String),

    /// One or more required steps failed during execution
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    /// The request deadline expired
    #[error("Deadline exceeded in {stage}")]
    DeadlineExceeded { stage: String },

    /// The request was cancelled by the caller
    #[error("Cancelled in {stage}")]
    Cancelled { stage: String },

    /// The clarification cap was reached without resolving the request
    #[error("Insufficient confidence after {attempts} clarification attempts")]
    InsufficientConfidence { attempts: u32 },

    /// A guarded dependency is short-circuiting calls
    #[error("Circuit open for {dependency}")]
    CircuitOpen { dependency: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Tool catalog store error
    #[error("Catalog store error: {0}")]
    CatalogStore(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Machine-readable discriminant for an [`Error`], stable across message edits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    InputInvalid,
    LlmUnavailable,
    LlmMalformed,
    TokenBudgetExceeded,
    AssetNotFound,
    AssetServiceDegraded,
    CatalogMiss,
    PlanInvalid,
    ExecutionFailed,
    DeadlineExceeded,
    Cancelled,
    InsufficientConfidence,
    CircuitOpen,
    Config,
    CatalogStore,
    Serialization,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InputInvalid => "INPUT_INVALID",
            Self::LlmUnavailable => "LLM_UNAVAILABLE",
            Self::LlmMalformed => "LLM_MALFORMED",
            Self::TokenBudgetExceeded => "TOKEN_BUDGET_EXCEEDED",
            Self::AssetNotFound => "ASSET_NOT_FOUND",
            Self::AssetServiceDegraded => "ASSET_SERVICE_DEGRADED",
            Self::CatalogMiss => "CATALOG_MISS",
            Self::PlanInvalid => "PLAN_INVALID",
            Self::ExecutionFailed => "EXECUTION_FAILED",
            Self::DeadlineExceeded => "DEADLINE_EXCEEDED",
            Self::Cancelled => "CANCELLED",
            Self::InsufficientConfidence => "INSUFFICIENT_CONFIDENCE",
            Self::CircuitOpen => "CIRCUIT_OPEN",
            Self::Config => "CONFIG",
            Self::CatalogStore => "CATALOG_STORE",
            Self::Serialization => "SERIALIZATION",
            Self::Internal => "INTERNAL",
        };
        write!(f, "{}", s)
    }
}

impl Error {
    /// The machine-readable kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InputInvalid(_) => ErrorKind::InputInvalid,
            Self::LlmUnavailable(_) => ErrorKind::LlmUnavailable,
            Self::LlmMalformed(_) => ErrorKind::LlmMalformed,
            Self::TokenBudgetExceeded { .. } => ErrorKind::TokenBudgetExceeded,
            Self::AssetNotFound { .. } => ErrorKind::AssetNotFound,
            Self::AssetServiceDegraded(_) => ErrorKind::AssetServiceDegraded,
            Self::CatalogMiss { .. } => ErrorKind::CatalogMiss,
            Self::PlanInvalid(_) => ErrorKind::PlanInvalid,
            Self::ExecutionFailed(_) => ErrorKind::ExecutionFailed,
            Self::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::InsufficientConfidence { .. } => ErrorKind::InsufficientConfidence,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Config(_) => ErrorKind::Config,
            Self::CatalogStore(_) => ErrorKind::CatalogStore,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether a clarification from the user may resolve this error.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InputInvalid(_) | Self::PlanInvalid(_) | Self::LlmMalformed(_)
        )
    }

    /// Create an asset-not-found error for a set of unresolved hosts.
    pub fn asset_not_found(hosts: Vec<String>) -> Self {
        Self::AssetNotFound { hosts }
    }

    /// Create a catalog miss error.
    pub fn catalog_miss(tool: impl Into<String>) -> Self {
        Self::CatalogMiss { tool: tool.into() }
    }

    /// Create a deadline-exceeded error naming the stage reached.
    pub fn deadline_exceeded(stage: impl Into<String>) -> Self {
        Self::DeadlineExceeded {
            stage: stage.into(),
        }
    }

    /// Create a cancellation error naming the stage reached.
    pub fn cancelled(stage: impl Into<String>) -> Self {
        Self::Cancelled {
            stage: stage.into(),
        }
    }

    /// Create a circuit-open error for a named dependency.
    pub fn circuit_open(dependency: impl Into<String>) -> Self {
        Self::CircuitOpen {
            dependency: dependency.into(),
        }
    }
}
