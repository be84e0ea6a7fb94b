//! Selection record: the combined understanding + selection stage output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Operation risk level, ordered from benign to critical.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// Parse a lowercase risk string, defaulting unknown values to medium.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "low" => Self::Low,
            "medium" => Self::Medium,
            "high" => Self::High,
            "critical" => Self::Critical,
            _ => Self::Medium,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Execution policy derived from intent, risk rules, and catalog metadata.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPolicy {
    pub risk_level: RiskLevel,
    pub requires_approval: bool,
    pub auto_execute: bool,
}

impl Default for ExecutionPolicy {
    fn default() -> Self {
        Self {
            risk_level: RiskLevel::Low,
            requires_approval: false,
            auto_execute: false,
        }
    }
}

/// One tool chosen for the request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedTool {
    pub tool_name: String,
    pub capability_name: String,
    pub pattern_name: String,
    pub justification: String,
    pub execution_order: u32,
    #[serde(default)]
    pub inputs_needed: Vec<String>,
}

/// Which stage consumes this selection next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextStage {
    StageC,
    StageD,
}

/// Output of the combined understanding + selection stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub decision_id: String,
    pub timestamp: DateTime<Utc>,
    pub selected_tools: Vec<SelectedTool>,
    pub policy: ExecutionPolicy,
    /// Confidence in the selection, in [0, 1]
    pub selection_confidence: f64,
    pub next_stage: NextStage,
    /// Intent classification carried for downstream stages
    pub intent_category: String,
    pub intent_action: String,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl Selection {
    /// Build a selection, deriving `next_stage` from the tool list so the
    /// empty ⇔ stage-D invariant holds by construction.
    pub fn new(
        selected_tools: Vec<SelectedTool>,
        policy: ExecutionPolicy,
        selection_confidence: f64,
        intent_category: impl Into<String>,
        intent_action: impl Into<String>,
    ) -> Self {
        let next_stage = if selected_tools.is_empty() {
            NextStage::StageD
        } else {
            NextStage::StageC
        };
        Self {
            decision_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            selected_tools,
            policy,
            selection_confidence: selection_confidence.clamp(0.0, 1.0),
            next_stage,
            intent_category: intent_category.into(),
            intent_action: intent_action.into(),
            warnings: Vec::new(),
        }
    }

    /// An information-only selection: no tools, straight to the answerer.
    pub fn information_only(confidence: f64, intent_action: impl Into<String>) -> Self {
        Self::new(
            Vec::new(),
            ExecutionPolicy::default(),
            confidence,
            "information",
            intent_action,
        )
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.selected_tools.is_empty()
    }

    /// Whether the request is informational rather than an action.
    pub fn is_informational(&self) -> bool {
        self.intent_category.eq_ignore_ascii_case("information")
    }

    /// Canonical comparison fields: tool names in execution order.
    pub fn canonical_tools(&self) -> Vec<&str> {
        self.selected_tools
            .iter()
            .map(|t| t.tool_name.as_str())
            .collect()
    }
}
