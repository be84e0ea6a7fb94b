//! Response shaping.
//!
//! Decides what kind of answer the operator gets, generates the prose, and
//! surfaces clarifications and approvals. Structural facts are passed to the
//! LLM in a data block so the prose cannot invent counts or tool names; if
//! the LLM is unavailable for pure formatting, a deterministic rendering of
//! the same facts is used instead.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::assets::AssetContextProvider;
use crate::config::PipelineConfig;
use crate::deadline::Deadline;
use crate::error::{Error, ErrorKind, Result};
use crate::llm::{GenerationRequest, LlmGateway};

use super::approval;
use super::context::RequestContext;
use super::execution::{ExecutionResult, ExecutionStatus};
use super::plan::ExecutionPlan;
use super::prompts::{self, PromptTemplate};
use super::response::{
    Clarification, ConfidenceLevel, ExecutionSummary, Response, ResponseType,
};
use super::selection::Selection;

/// Words too vague to act on without clarification.
const VAGUE_ACTIONS: &[&str] = &["fix", "check", "handle", "do", "it", "this", "that", "something"];

/// Cap on stdout carried into the user-facing execution summary.
const STDOUT_CAP: usize = 100_000;

/// Cap on structured output rendered as JSON.
const OUTPUT_JSON_CAP: usize = 10_000;

/// Per-response-type counters kept by the answerer.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnswererStats {
    pub responses_generated: u64,
    pub clarifications_requested: u64,
    pub by_type: HashMap<String, u64>,
    pub average_processing_ms: f64,
    pub last_success: Option<DateTime<Utc>>,
}

/// Stage D: turns selections and plans into operator-facing responses.
pub struct Answerer {
    gateway: Arc<dyn LlmGateway>,
    assets: Arc<AssetContextProvider>,
    confidence_threshold: f64,
    max_clarification_attempts: u32,
    stats: Mutex<AnswererStats>,
}

impl Answerer {
    pub fn new(
        gateway: Arc<dyn LlmGateway>,
        assets: Arc<AssetContextProvider>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            gateway,
            assets,
            confidence_threshold: config.confidence_threshold,
            max_clarification_attempts: config.max_clarification_attempts,
            stats: Mutex::new(AnswererStats::default()),
        }
    }

    /// Generate the response for one request.
    pub async fn generate_response(
        &self,
        selection: &Selection,
        plan: Option<&ExecutionPlan>,
        context: &mut RequestContext,
        deadline: Deadline,
    ) -> Result<Response> {
        let started = Instant::now();
        let response = self
            .decide_and_build(selection, plan, context, deadline)
            .await?;
        self.record(&response, started.elapsed().as_millis() as u64);
        Ok(response)
    }

    /// The response-type ladder, evaluated in order.
    async fn decide_and_build(
        &self,
        selection: &Selection,
        plan: Option<&ExecutionPlan>,
        context: &mut RequestContext,
        deadline: Deadline,
    ) -> Result<Response> {
        // A plan that validated to nothing is a request for better input.
        if let Some(plan) = plan {
            if plan.steps.is_empty() && !plan.execution_metadata.risk_factors.is_empty() {
                return Ok(self.clarify_from_risk_factors(plan, context));
            }
        }

        if selection.is_empty() && selection.is_informational() {
            return self.information_fast_path(selection, context, deadline).await;
        }

        if selection.selection_confidence < self.confidence_threshold {
            if context.clarification_attempts >= self.max_clarification_attempts {
                return Ok(Response::error(
                    "I still do not have enough information to act on this request safely. \
                     Please start over with the target host and the exact operation you need.",
                    ErrorKind::InsufficientConfidence,
                ));
            }
            return Ok(self.build_clarification(selection, context));
        }

        match plan {
            Some(plan) if !plan.execution_metadata.approval_points.is_empty() => {
                self.build_approval_request(selection, plan, deadline).await
            }
            Some(plan) if selection.policy.auto_execute => {
                self.build_plan_response(
                    selection,
                    plan,
                    ResponseType::ExecutionReady,
                    deadline,
                )
                .await
            }
            Some(plan) => {
                self.build_plan_response(selection, plan, ResponseType::PlanSummary, deadline)
                    .await
            }
            None => {
                // Tools selected but no plan: treat as an information answer
                // grounded in what the selection learned.
                self.information_fast_path(selection, context, deadline).await
            }
        }
    }

    /// Direct answer for information-only requests; skips planning and
    /// execution entirely.
    async fn information_fast_path(
        &self,
        selection: &Selection,
        context: &RequestContext,
        deadline: Deadline,
    ) -> Result<Response> {
        let mut sources: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        let asset_context = if self.assets.should_inject(&context.original_request) {
            match self.assets.comprehensive_context(50).await {
                Ok(block) => {
                    sources.push("asset-service".to_string());
                    format!("{}\n\n", block)
                }
                Err(Error::AssetServiceDegraded(detail)) => {
                    tracing::warn!(%detail, "fast path continuing without asset context");
                    warnings.push(
                        "asset inventory was unavailable; answer may be incomplete".to_string(),
                    );
                    format!("{}\n\n", self.assets.compact_context())
                }
                Err(other) => return Err(other),
            }
        } else {
            String::new()
        };

        let system = PromptTemplate::new(prompts::FAST_PATH_SYSTEM)
            .slot("asset_context", asset_context)
            .render()?;
        let prompt = if context.conversation_history.is_empty() {
            context.original_request.clone()
        } else {
            format!("{}{}", context.conversation_history, context.original_request)
        };

        if deadline.is_expired() {
            return Err(Error::deadline_exceeded("stage_d"));
        }
        let request = GenerationRequest::new(prompt)
            .with_system(system)
            .with_temperature(0.3)
            .with_max_tokens(1024);
        let generated =
            tokio::time::timeout(deadline.remaining(), self.gateway.generate(request))
                .await
                .map_err(|_| Error::deadline_exceeded("stage_d"))??;

        let confidence = ConfidenceLevel::from_score(selection.selection_confidence);
        let mut response = Response::information(generated.content, confidence);
        for source in sources {
            response = response.with_source(source);
        }
        for warning in warnings.into_iter().chain(selection.warnings.iter().cloned()) {
            response = response.with_warning(warning);
        }
        Ok(response)
    }

    /// Clarification from planner risk factors (missing inputs and the like).
    fn clarify_from_risk_factors(
        &self,
        plan: &ExecutionPlan,
        context: &mut RequestContext,
    ) -> Response {
        context.clarification_attempts += 1;
        let clarifications = plan
            .execution_metadata
            .risk_factors
            .iter()
            .map(|factor| Clarification {
                question: format!("I could not complete planning: {}. Can you provide this?", factor),
                options: Vec::new(),
                required: true,
                context: "plan validation".to_string(),
            })
            .collect();
        Response::clarification(
            "I need a bit more information before I can build a safe execution plan.",
            clarifications,
        )
    }

    /// Rule-driven clarification questions.
    fn build_clarification(&self, selection: &Selection, context: &mut RequestContext) -> Response {
        context.clarification_attempts += 1;
        let mut clarifications: Vec<Clarification> = Vec::new();
        let request = context.original_request.trim();
        let is_action = !selection.is_informational();

        if is_action && context.entity("hostname").is_none() && context.entity("ip_address").is_none()
        {
            clarifications.push(Clarification {
                question: "Which host or IP address should this run against?".to_string(),
                options: Vec::new(),
                required: true,
                context: "no target named in the request".to_string(),
            });
        }

        let first_word = request
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_lowercase();
        if VAGUE_ACTIONS.contains(&first_word.as_str()) {
            clarifications.push(Clarification {
                question: "What exactly should be done? For example: restart a service, check disk usage, list processes.".to_string(),
                options: vec![
                    "restart a service".to_string(),
                    "check status".to_string(),
                    "collect diagnostics".to_string(),
                ],
                required: true,
                context: "the action verb is ambiguous".to_string(),
            });
        }

        if request.split_whitespace().count() < 4 && clarifications.len() < 2 {
            clarifications.push(Clarification {
                question: "Can you describe the request in more detail?".to_string(),
                options: Vec::new(),
                required: false,
                context: "the request is very short".to_string(),
            });
        }

        if clarifications.is_empty() {
            clarifications.push(Clarification {
                question: "What would you like me to do? Please name the operation and the target system.".to_string(),
                options: Vec::new(),
                required: true,
                context: "low selection confidence".to_string(),
            });
        }

        tracing::info!(
            attempts = context.clarification_attempts,
            questions = clarifications.len(),
            "requesting clarification"
        );
        Response::clarification(
            "I need a couple of details before I can proceed.",
            clarifications,
        )
    }

    async fn build_approval_request(
        &self,
        selection: &Selection,
        plan: &ExecutionPlan,
        deadline: Deadline,
    ) -> Result<Response> {
        let mut points = plan.execution_metadata.approval_points.clone();
        approval::assign_approvers(&mut points);
        let summary = approval::summarize(&points);

        let data_block = self.plan_data_block(selection, plan, Some(&summary))?;
        let message = self
            .format_message(&data_block, ", and name who must approve it", deadline)
            .await
            .unwrap_or_else(|| self.fallback_plan_message(selection, plan, Some(&summary)));

        let mut response = Response::approval_request(message, points)
            .with_execution_summary(self.execution_summary(plan))
            .with_suggested_action("approve and resume to execute this plan");
        for warning in summary.warnings.iter().chain(plan.warnings.iter()) {
            response = response.with_warning(warning.clone());
        }
        Ok(response)
    }

    async fn build_plan_response(
        &self,
        selection: &Selection,
        plan: &ExecutionPlan,
        response_type: ResponseType,
        deadline: Deadline,
    ) -> Result<Response> {
        let data_block = self.plan_data_block(selection, plan, None)?;
        let message = self
            .format_message(&data_block, "", deadline)
            .await
            .unwrap_or_else(|| self.fallback_plan_message(selection, plan, None));

        let confidence = ConfidenceLevel::from_score(selection.selection_confidence);
        let mut response = match response_type {
            ResponseType::ExecutionReady => Response::execution_ready(message, confidence),
            _ => Response::plan_summary(message, confidence),
        };
        response = response.with_execution_summary(self.execution_summary(plan));
        for warning in plan.warnings.iter().chain(selection.warnings.iter()) {
            response = response.with_warning(warning.clone());
        }
        Ok(response)
    }

    /// Structural facts the formatter may not contradict.
    fn plan_data_block(
        &self,
        selection: &Selection,
        plan: &ExecutionPlan,
        approvals: Option<&approval::ApprovalSummary>,
    ) -> Result<String> {
        let block = serde_json::json!({
            "request": selection.intent_action,
            "risk_level": selection.policy.risk_level,
            "step_count": plan.steps.len(),
            "steps": plan.steps.iter().map(|s| {
                serde_json::json!({"id": s.id, "name": s.name, "tool": s.tool})
            }).collect::<Vec<_>>(),
            "tools_used": self.tools_used(plan),
            "estimated_time_s": plan.execution_metadata.total_estimated_time_s,
            "safety_checks": plan.safety_checks,
            "approvals": approvals,
        });
        Ok(serde_json::to_string_pretty(&block)?)
    }

    /// Ask the LLM to phrase the message; `None` when generation fails so
    /// callers can fall back to a deterministic rendering.
    async fn format_message(
        &self,
        data_block: &str,
        approval_clause: &str,
        deadline: Deadline,
    ) -> Option<String> {
        let system = PromptTemplate::new(prompts::ANSWER_SYSTEM)
            .slot("data_block", data_block)
            .slot("approval_clause", approval_clause)
            .render()
            .ok()?;
        if deadline.is_expired() {
            return None;
        }
        let request = GenerationRequest::new("Write the summary.")
            .with_system(system)
            .with_temperature(0.3)
            .with_max_tokens(512);
        match tokio::time::timeout(deadline.remaining(), self.gateway.generate(request)).await {
            Ok(Ok(response)) => Some(response.content),
            Ok(Err(err)) => {
                tracing::warn!(%err, "formatter LLM call failed; using deterministic message");
                None
            }
            Err(_) => None,
        }
    }

    fn fallback_plan_message(
        &self,
        selection: &Selection,
        plan: &ExecutionPlan,
        approvals: Option<&approval::ApprovalSummary>,
    ) -> String {
        let mut message = format!(
            "Plan ready: {} step(s) using {} (risk: {}).",
            plan.steps.len(),
            self.tools_used(plan).join(", "),
            selection.policy.risk_level
        );
        if let Some(summary) = approvals {
            message.push_str(&format!(
                " Approval required from: {}.",
                summary.required_roles.join(", ")
            ));
        }
        message
    }

    fn tools_used(&self, plan: &ExecutionPlan) -> Vec<String> {
        let mut tools: Vec<String> = Vec::new();
        for step in &plan.steps {
            if !tools.contains(&step.tool) {
                tools.push(step.tool.clone());
            }
        }
        tools
    }

    fn execution_summary(&self, plan: &ExecutionPlan) -> ExecutionSummary {
        ExecutionSummary {
            total_steps: plan.steps.len(),
            estimated_time_s: plan.execution_metadata.total_estimated_time_s,
            tools_used: self.tools_used(plan),
        }
    }

    /// Rebuild the user-facing message from execution results.
    ///
    /// stdout becomes fenced text blocks, structured asset-query outputs
    /// become a count plus CSV, other structured outputs become JSON blocks,
    /// and stderr surfaces as warnings (PowerShell CLIXML progress chatter is
    /// dropped). An `execution_ready` response whose plan has now run is
    /// re-typed to `information`.
    pub fn update_with_execution(
        &self,
        mut response: Response,
        execution: &ExecutionResult,
    ) -> Response {
        match execution.status {
            ExecutionStatus::Completed => {
                let mut summary = String::new();
                for step in &execution.step_results {
                    if step.is_success() {
                        if !step.stdout.trim().is_empty() {
                            let mut stdout = step.stdout.trim().to_string();
                            if stdout.len() > STDOUT_CAP {
                                stdout.truncate(STDOUT_CAP);
                                stdout.push_str("...(truncated)");
                            }
                            summary.push_str(&format!("```text\n{}\n```\n", stdout));
                        } else if let Some(output) = &step.output {
                            summary.push_str(&Self::render_structured_output(output));
                        }
                    }
                    let stderr = step.stderr.trim();
                    if !stderr.is_empty() && !Self::is_clixml_progress(stderr) {
                        summary.push_str(&format!(
                            "Warnings/errors:\n```text\n{}\n```\n",
                            stderr
                        ));
                    }
                }
                response.message = if summary.trim().is_empty() {
                    "Execution completed.".to_string()
                } else {
                    summary.trim().to_string()
                };
            }
            ExecutionStatus::Failed => {
                let detail = execution
                    .error_message
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string());
                response.message =
                    format!("{}\n\nExecution failed: {}", response.message, detail);
            }
            _ => {}
        }

        if response.response_type == ResponseType::ExecutionReady {
            response.response_type = ResponseType::Information;
        }
        response
    }

    fn render_structured_output(output: &serde_json::Value) -> String {
        if let Some(object) = output.as_object() {
            if let (Some(count), Some(assets)) = (
                object.get("count").and_then(|c| c.as_u64()),
                object.get("assets").and_then(|a| a.as_array()),
            ) {
                let mut block = format!("**Found {} asset(s)**\n\n", count);
                if !assets.is_empty() {
                    let mut lines = vec![
                        "Hostname,IP Address,OS Type,OS Version,Status,Tags".to_string(),
                    ];
                    for asset in assets {
                        let field = |key: &str| {
                            asset.get(key).and_then(|v| v.as_str()).unwrap_or("").to_string()
                        };
                        let tags = asset
                            .get("tags")
                            .and_then(|t| t.as_array())
                            .map(|tags| {
                                tags.iter()
                                    .filter_map(|t| t.as_str())
                                    .collect::<Vec<_>>()
                                    .join("|")
                            })
                            .unwrap_or_default();
                        lines.push(format!(
                            "\"{}\",\"{}\",\"{}\",\"{}\",\"{}\",\"{}\"",
                            field("hostname"),
                            field("ip_address"),
                            field("os_type"),
                            field("os_version"),
                            field("status"),
                            tags
                        ));
                    }
                    block.push_str(&format!("```csv\n{}\n```\n", lines.join("\n")));
                }
                return block;
            }
        }

        let mut rendered = serde_json::to_string_pretty(output).unwrap_or_default();
        if rendered.len() > OUTPUT_JSON_CAP {
            rendered.truncate(OUTPUT_JSON_CAP);
            rendered.push_str("...(truncated)");
        }
        format!("```json\n{}\n```\n", rendered)
    }

    fn is_clixml_progress(stderr: &str) -> bool {
        stderr.starts_with("#< CLIXML") && stderr.to_lowercase().contains("progress")
    }

    fn record(&self, response: &Response, elapsed_ms: u64) {
        let mut stats = self.stats.lock().expect("answerer stats lock poisoned");
        let n = stats.responses_generated as f64;
        stats.average_processing_ms =
            (stats.average_processing_ms * n + elapsed_ms as f64) / (n + 1.0);
        stats.responses_generated += 1;
        if response.is_clarification() {
            stats.clarifications_requested += 1;
        }
        let key = format!("{:?}", response.response_type).to_lowercase();
        *stats.by_type.entry(key).or_default() += 1;
        if !response.is_error() {
            stats.last_success = Some(Utc::now());
        }
    }

    pub fn stats(&self) -> AnswererStats {
        self.stats.lock().expect("answerer stats lock poisoned").clone()
    }
}
