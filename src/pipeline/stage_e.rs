//! Plan execution.
//!
//! Steps run in dependency order; independent steps run in parallel up to a
//! per-request concurrency cap. Retries use exponential backoff with a
//! deterministic jitter derived from the step id, and every step honors both
//! its own timeout and the request deadline.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{FuturesUnordered, StreamExt};
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::deadline::Deadline;
use crate::error::Error;
use crate::progress::{emit, PipelineStage, ProgressCallback, ProgressEvent};
use crate::runner::{RunnerRegistry, StepRunner};

use super::context::RequestContext;
use super::execution::{ExecutionResult, ExecutionStatus, StepResult, StepStatus};
use super::plan::{ExecutionPlan, PlanStep};

/// Base delay for retry backoff.
const RETRY_BASE_MS: u64 = 200;
/// Jitter ceiling added to each backoff delay.
const RETRY_JITTER_MS: u64 = 250;

/// Deterministic jitter: decorrelates retry storms without an RNG.
fn jitter_ms(step_id: &str, attempt: u32) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(step_id.as_bytes());
    hasher.update(attempt.to_le_bytes());
    let digest = hasher.finalize();
    u64::from_le_bytes(digest[..8].try_into().expect("digest is 32 bytes")) % RETRY_JITTER_MS
}

fn backoff(step_id: &str, attempt: u32) -> Duration {
    let exponential = RETRY_BASE_MS.saturating_mul(1 << attempt.min(6));
    Duration::from_millis(exponential + jitter_ms(step_id, attempt))
}

/// Stage E: dispatches plan steps to registered runners.
pub struct Executor {
    runners: Arc<RunnerRegistry>,
    concurrency_cap: usize,
}

impl Executor {
    pub fn new(runners: Arc<RunnerRegistry>, config: &PipelineConfig) -> Self {
        Self {
            runners,
            concurrency_cap: config.step_concurrency_cap.max(1),
        }
    }

    /// Run a plan to completion (or deadline), aggregating step results.
    ///
    /// The plan fails iff a failed step blocked other steps; failures on leaf
    /// steps leave the plan `completed` with the failures counted.
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        context: &RequestContext,
        deadline: Deadline,
        progress: Option<ProgressCallback>,
    ) -> ExecutionResult {
        let execution_id = format!("exec_{}", Uuid::new_v4());
        let total_steps = plan.steps.len();
        tracing::info!(%execution_id, steps = total_steps, "starting plan execution");

        let semaphore = Arc::new(Semaphore::new(self.concurrency_cap));
        let mut pending: Vec<PlanStep> = plan.steps.clone();
        let mut completed: HashSet<String> = HashSet::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut results: Vec<StepResult> = Vec::new();
        let mut running = FuturesUnordered::new();
        let mut deadline_hit = false;

        loop {
            if deadline.is_expired() && !deadline_hit {
                deadline_hit = true;
                // Pending steps are cancelled; in-flight futures get dropped
                // after the drain below.
                for step in pending.drain(..) {
                    results.push(StepResult {
                        step_id: step.id,
                        status: StepStatus::Cancelled,
                        stdout: String::new(),
                        stderr: String::new(),
                        output: None,
                        duration_ms: 0,
                        error_message: Some("request deadline expired".to_string()),
                    });
                }
            }

            // Launch every step whose dependencies are satisfied, and skip
            // every step with a failed dependency.
            let mut launched_or_skipped = true;
            while launched_or_skipped {
                launched_or_skipped = false;
                let mut index = 0;
                while index < pending.len() {
                    let step = &pending[index];
                    if step.depends_on.iter().any(|d| failed.contains(d)) {
                        let step = pending.remove(index);
                        failed.insert(step.id.clone());
                        results.push(StepResult {
                            step_id: step.id.clone(),
                            status: StepStatus::Skipped,
                            stdout: String::new(),
                            stderr: String::new(),
                            output: None,
                            duration_ms: 0,
                            error_message: Some("dependency failed".to_string()),
                        });
                        launched_or_skipped = true;
                    } else if step.depends_on.iter().all(|d| completed.contains(d)) {
                        let mut step = pending.remove(index);
                        Self::attach_caller_identity(&mut step, context);
                        running.push(self.run_step(
                            step,
                            Arc::clone(&semaphore),
                            deadline,
                            progress.clone(),
                        ));
                        launched_or_skipped = true;
                    } else {
                        index += 1;
                    }
                }
            }

            let Some(result) = running.next().await else {
                break;
            };
            let result: StepResult = result;
            if result.is_success() {
                completed.insert(result.step_id.clone());
            } else {
                failed.insert(result.step_id.clone());
            }
            results.push(result);
        }

        // Keep plan order in the report.
        let order: HashMap<&str, usize> = plan
            .steps
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.as_str(), i))
            .collect();
        results.sort_by_key(|r| order.get(r.step_id.as_str()).copied().unwrap_or(usize::MAX));

        let blocking_failure = plan.steps.iter().any(|step| {
            failed.contains(&step.id)
                && plan.steps.iter().any(|other| other.depends_on.contains(&step.id))
        });
        let any_failed = results.iter().any(|r| r.status == StepStatus::Failed);
        let status = if deadline_hit {
            ExecutionStatus::Failed
        } else if blocking_failure {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Completed
        };

        let error_message = if deadline_hit {
            Some(Error::deadline_exceeded("stage_e").to_string())
        } else if blocking_failure {
            Some("one or more required steps failed".to_string())
        } else if any_failed {
            Some("some non-blocking steps failed".to_string())
        } else {
            None
        };

        ExecutionResult {
            execution_id,
            status,
            total_steps,
            completed_steps: 0,
            failed_steps: 0,
            progress_percentage: 0.0,
            step_results: results,
            error_message,
        }
        .finalize()
    }

    /// Runners receive the caller identity with the step inputs so they can
    /// scope credentials; explicit step inputs always win.
    fn attach_caller_identity(step: &mut PlanStep, context: &RequestContext) {
        if !context.tenant_id.is_empty() {
            step.inputs
                .entry("tenant_id".to_string())
                .or_insert_with(|| serde_json::Value::String(context.tenant_id.clone()));
        }
        if !context.actor_id.is_empty() {
            step.inputs
                .entry("actor_id".to_string())
                .or_insert_with(|| serde_json::Value::String(context.actor_id.clone()));
        }
    }

    async fn run_step(
        &self,
        step: PlanStep,
        semaphore: Arc<Semaphore>,
        deadline: Deadline,
        progress: Option<ProgressCallback>,
    ) -> StepResult {
        let _permit = semaphore.acquire().await.expect("semaphore never closed");
        let started = Instant::now();
        emit(
            &progress,
            ProgressEvent::start(PipelineStage::StageE, step.name.clone()),
        );

        let Some(runner) = self.runners.get(&step.tool) else {
            tracing::warn!(tool = %step.tool, step = %step.id, "no runner registered");
            emit(
                &progress,
                ProgressEvent::complete(PipelineStage::StageE, step.name.clone(), 0)
                    .with_message("no runner registered"),
            );
            return StepResult {
                step_id: step.id,
                status: StepStatus::Failed,
                stdout: String::new(),
                stderr: String::new(),
                output: None,
                duration_ms: 0,
                error_message: Some(format!("no runner registered for tool '{}'", step.tool)),
            };
        };

        let result = self.attempt_with_retries(&step, &runner, deadline).await;
        let duration_ms = started.elapsed().as_millis() as u64;
        emit(
            &progress,
            ProgressEvent::complete(PipelineStage::StageE, step.name.clone(), duration_ms),
        );
        StepResult {
            duration_ms,
            ..result
        }
    }

    async fn attempt_with_retries(
        &self,
        step: &PlanStep,
        runner: &Arc<dyn StepRunner>,
        deadline: Deadline,
    ) -> StepResult {
        let attempts = step.retry_count + 1;
        let mut last_error = String::new();
        let mut last_stderr = String::new();

        for attempt in 0..attempts {
            if deadline.is_expired() {
                return StepResult {
                    step_id: step.id.clone(),
                    status: StepStatus::Cancelled,
                    stdout: String::new(),
                    stderr: last_stderr,
                    output: None,
                    duration_ms: 0,
                    error_message: Some("request deadline expired".to_string()),
                };
            }

            let step_timeout = deadline.clamp(Duration::from_secs(step.timeout_s));
            let outcome =
                tokio::time::timeout(step_timeout, runner.execute(&step.inputs, deadline)).await;

            match outcome {
                Ok(Ok(output)) if output.is_success() => {
                    return StepResult {
                        step_id: step.id.clone(),
                        status: StepStatus::Completed,
                        stdout: output.stdout,
                        stderr: output.stderr,
                        output: output.output,
                        duration_ms: 0,
                        error_message: None,
                    };
                }
                Ok(Ok(output)) => {
                    last_error = format!("exit code {}", output.exit_code);
                    last_stderr = output.stderr;
                }
                Ok(Err(err)) => {
                    last_error = err.to_string();
                }
                Err(_) => {
                    last_error = format!("step timed out after {}s", step.timeout_s);
                }
            }

            if attempt + 1 < attempts {
                let delay = deadline.clamp(backoff(&step.id, attempt));
                tracing::debug!(step = %step.id, attempt, ?delay, "retrying step");
                tokio::time::sleep(delay).await;
            }
        }

        StepResult {
            step_id: step.id.clone(),
            status: StepStatus::Failed,
            stdout: String::new(),
            stderr: last_stderr,
            output: None,
            duration_ms: 0,
            error_message: Some(last_error),
        }
    }
}
