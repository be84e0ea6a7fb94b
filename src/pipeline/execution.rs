//! Execution result record: the executor stage output.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status of a whole execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

/// Outcome of one executed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    /// Structured output for API-style tools
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl StepResult {
    pub fn is_success(&self) -> bool {
        self.status == StepStatus::Completed
    }
}

/// Aggregate result of running a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub status: ExecutionStatus,
    pub total_steps: usize,
    pub completed_steps: usize,
    pub failed_steps: usize,
    pub progress_percentage: f64,
    pub step_results: Vec<StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl ExecutionResult {
    /// Recompute counters and progress from the step results.
    pub fn finalize(mut self) -> Self {
        self.completed_steps = self
            .step_results
            .iter()
            .filter(|r| r.status == StepStatus::Completed)
            .count();
        self.failed_steps = self
            .step_results
            .iter()
            .filter(|r| r.status == StepStatus::Failed)
            .count();
        self.progress_percentage = if self.total_steps == 0 {
            100.0
        } else {
            (self.completed_steps + self.failed_steps) as f64 / self.total_steps as f64 * 100.0
        };
        self
    }

    pub fn step(&self, step_id: &str) -> Option<&StepResult> {
        self.step_results.iter().find(|r| r.step_id == step_id)
    }
}
