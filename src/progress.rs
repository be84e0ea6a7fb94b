//! Progress events for streaming pipeline activity to a caller.
//!
//! Stages have no back-reference to the orchestrator; everything observable
//! flows through a caller-supplied callback.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Pipeline stage identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    StageAb,
    StageC,
    StageD,
    StageE,
}

impl PipelineStage {
    /// Stable key used in metrics maps and logs.
    pub fn key(&self) -> &'static str {
        match self {
            Self::StageAb => "stage_ab",
            Self::StageC => "stage_c",
            Self::StageD => "stage_d",
            Self::StageE => "stage_e",
        }
    }

    /// Human-readable stage name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::StageAb => "Understanding & Selection",
            Self::StageC => "Planning",
            Self::StageD => "Response Generation",
            Self::StageE => "Execution",
        }
    }
}

impl std::fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key())
    }
}

/// Whether an event marks the start or the completion of a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Start,
    Complete,
}

/// One progress event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: PipelineStage,
    pub phase: ProgressPhase,
    /// Name of the unit of work (stage name, or step name within stage E)
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn start(stage: PipelineStage, name: impl Into<String>) -> Self {
        Self {
            stage,
            phase: ProgressPhase::Start,
            name: name.into(),
            duration_ms: None,
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn complete(stage: PipelineStage, name: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            stage,
            phase: ProgressPhase::Complete,
            name: name.into(),
            duration_ms: Some(duration_ms),
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Caller-supplied sink for progress events.
pub type ProgressCallback = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Emit an event if a callback is attached.
pub fn emit(callback: &Option<ProgressCallback>, event: ProgressEvent) {
    if let Some(cb) = callback {
        cb(event);
    }
}
