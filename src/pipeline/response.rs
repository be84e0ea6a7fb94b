//! Response record: the answerer stage output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorKind;

use super::plan::ApprovalPoint;

/// The shape of an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseType {
    Information,
    PlanSummary,
    ApprovalRequest,
    ExecutionReady,
    Error,
    Clarification,
}

/// Coarse confidence communicated to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    /// Map a [0, 1] score onto coarse levels.
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Self::High
        } else if score >= 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// A single clarifying question posed to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clarification {
    pub question: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub required: bool,
    /// What prompted the question
    #[serde(default)]
    pub context: String,
}

/// Compact facts about a plan, supplied to the formatter so prose cannot
/// invent numbers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total_steps: usize,
    pub estimated_time_s: u64,
    #[serde(default)]
    pub tools_used: Vec<String>,
}

/// Output of the answerer stage; the only record callers ever see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub response_id: String,
    pub response_type: ResponseType,
    /// Human-readable message
    pub message: String,
    pub confidence: ConfidenceLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_summary: Option<ExecutionSummary>,
    pub approval_required: bool,
    #[serde(default)]
    pub approval_points: Vec<ApprovalPoint>,
    #[serde(default)]
    pub clarification_needed: Vec<Clarification>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_analysis: Option<String>,
    #[serde(default)]
    pub sources_consulted: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub suggested_actions: Vec<String>,
    /// Machine-readable error discriminant when `response_type` is `error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub processing_time_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl Response {
    fn base(response_type: ResponseType, message: impl Into<String>, confidence: ConfidenceLevel) -> Self {
        Self {
            response_id: format!("resp_{}", Uuid::new_v4()),
            response_type,
            message: message.into(),
            confidence,
            execution_summary: None,
            approval_required: false,
            approval_points: Vec::new(),
            clarification_needed: Vec::new(),
            partial_analysis: None,
            sources_consulted: Vec::new(),
            warnings: Vec::new(),
            suggested_actions: Vec::new(),
            error_kind: None,
            processing_time_ms: 0,
            timestamp: Utc::now(),
        }
    }

    pub fn information(message: impl Into<String>, confidence: ConfidenceLevel) -> Self {
        Self::base(ResponseType::Information, message, confidence)
    }

    pub fn plan_summary(message: impl Into<String>, confidence: ConfidenceLevel) -> Self {
        Self::base(ResponseType::PlanSummary, message, confidence)
    }

    /// An approval request. Carrying points is mandatory: an approval request
    /// with nothing to approve is a contract violation.
    pub fn approval_request(
        message: impl Into<String>,
        approval_points: Vec<ApprovalPoint>,
    ) -> Self {
        debug_assert!(!approval_points.is_empty());
        let mut response = Self::base(ResponseType::ApprovalRequest, message, ConfidenceLevel::High);
        response.approval_required = true;
        response.approval_points = approval_points;
        response
    }

    pub fn execution_ready(message: impl Into<String>, confidence: ConfidenceLevel) -> Self {
        Self::base(ResponseType::ExecutionReady, message, confidence)
    }

    pub fn clarification(
        message: impl Into<String>,
        clarification_needed: Vec<Clarification>,
    ) -> Self {
        let mut response = Self::base(ResponseType::Clarification, message, ConfidenceLevel::Low);
        response.clarification_needed = clarification_needed;
        response
    }

    pub fn error(message: impl Into<String>, kind: ErrorKind) -> Self {
        let mut response = Self::base(ResponseType::Error, message, ConfidenceLevel::Low);
        response.error_kind = Some(kind);
        response
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.sources_consulted.push(source.into());
        self
    }

    pub fn with_suggested_action(mut self, action: impl Into<String>) -> Self {
        self.suggested_actions.push(action.into());
        self
    }

    pub fn with_execution_summary(mut self, summary: ExecutionSummary) -> Self {
        self.execution_summary = Some(summary);
        self
    }

    pub fn with_processing_time(mut self, processing_time_ms: u64) -> Self {
        self.processing_time_ms = processing_time_ms;
        self
    }

    pub fn is_error(&self) -> bool {
        self.response_type == ResponseType::Error
    }

    pub fn is_clarification(&self) -> bool {
        self.response_type == ResponseType::Clarification
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::selection::RiskLevel;

    #[test]
    fn test_confidence_from_score() {
        assert_eq!(ConfidenceLevel::from_score(0.9), ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::from_score(0.8), ConfidenceLevel::High);
        assert_eq!(ConfidenceLevel::from_score(0.6), ConfidenceLevel::Medium);
        assert_eq!(ConfidenceLevel::from_score(0.2), ConfidenceLevel::Low);
    }

    #[test]
    fn test_approval_request_carries_points() {
        let response = Response::approval_request(
            "needs sign-off",
            vec![ApprovalPoint {
                step_id: "s1".to_string(),
                reason: "service restart on production".to_string(),
                risk_level: RiskLevel::High,
                operation_type: "service_restart".to_string(),
                approver_role: Some("operations_manager".to_string()),
            }],
        );
        assert!(response.approval_required);
        assert!(!response.approval_points.is_empty());
        assert_eq!(response.response_type, ResponseType::ApprovalRequest);
    }

    #[test]
    fn test_error_response_carries_kind() {
        let response = Response::error("LLM offline", ErrorKind::LlmUnavailable);
        assert!(response.is_error());
        assert_eq!(response.error_kind, Some(ErrorKind::LlmUnavailable));
        assert_eq!(response.confidence, ConfidenceLevel::Low);
    }

    #[test]
    fn test_serde_uses_snake_case_types() {
        let response = Response::information("42 servers", ConfidenceLevel::High);
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"information\""));
        assert!(json.contains("\"high\""));
    }

    #[test]
    fn test_builder_accumulators() {
        let response = Response::information("ok", ConfidenceLevel::High)
            .with_warning("asset service skipped")
            .with_source("asset-service")
            .with_suggested_action("retry later")
            .with_processing_time(12);
        assert_eq!(response.warnings.len(), 1);
        assert_eq!(response.sources_consulted, vec!["asset-service"]);
        assert_eq!(response.processing_time_ms, 12);
    }
}
