//! Plan synthesis.
//!
//! One LLM turn per selected tool emits ordered steps constrained by the
//! tool's advertised inputs; everything structural (dependencies, catalog
//! membership, caps, rollback coverage, approval attachment) is validated in
//! code afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use uuid::Uuid;

use crate::catalog::{ToolCatalog, ToolProfile};
use crate::config::PipelineConfig;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::llm::{GenerationRequest, LlmGateway};

use super::context::RequestContext;
use super::plan::{ApprovalPoint, ExecutionMetadata, ExecutionPlan, PlanStep, RollbackEntry};
use super::prompts::{self, PromptTemplate};
use super::selection::{RiskLevel, SelectedTool, Selection};

#[derive(Debug, serde::Deserialize)]
struct PlannerReply {
    #[serde(default)]
    steps: Vec<ReplyStep>,
    #[serde(default)]
    safety_checks: Vec<String>,
    #[serde(default)]
    rollback: Vec<ReplyRollback>,
}

#[derive(Debug, serde::Deserialize)]
struct ReplyStep {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    inputs: HashMap<String, Value>,
    #[serde(default)]
    timeout_s: Option<u64>,
    #[serde(default)]
    retry_count: Option<u32>,
    #[serde(default)]
    depends_on: Vec<String>,
}

#[derive(Debug, serde::Deserialize)]
struct ReplyRollback {
    step_id: String,
    description: String,
}

fn strip_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}

/// Classify an operation for approver-role overrides.
fn operation_type(profile: &ToolProfile, intent_action: &str) -> String {
    let haystack = format!(
        "{} {}",
        intent_action,
        profile
            .capabilities
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    )
    .to_lowercase();

    if haystack.contains("security") || haystack.contains("credential") {
        "security_change".to_string()
    } else if haystack.contains("restart") {
        "service_restart".to_string()
    } else if haystack.contains("deploy") {
        "production_deployment".to_string()
    } else if haystack.contains("network") || haystack.contains("firewall") {
        "network_change".to_string()
    } else if haystack.contains("database") || haystack.contains("migration") {
        "database_migration".to_string()
    } else if haystack.contains("config") {
        "configuration_change".to_string()
    } else {
        "general".to_string()
    }
}

/// Stage C: turns a selection into an executable plan.
pub struct Planner {
    gateway: Arc<dyn LlmGateway>,
    catalog: Arc<ToolCatalog>,
    max_plan_steps: usize,
    duration_ceiling_s: u64,
}

impl Planner {
    pub fn new(
        gateway: Arc<dyn LlmGateway>,
        catalog: Arc<ToolCatalog>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            gateway,
            catalog,
            max_plan_steps: config.max_plan_steps,
            duration_ceiling_s: config.plan_duration_ceiling_secs,
        }
    }

    /// Create a plan for a non-empty selection.
    ///
    /// Structural defects the user can fix (missing inputs, bad dependencies)
    /// come back as an error plan with `risk_factors` populated; a tool
    /// missing from the catalog is a hard error.
    pub async fn create_plan(
        &self,
        selection: &Selection,
        context: &RequestContext,
        deadline: Deadline,
    ) -> Result<ExecutionPlan> {
        if selection.is_empty() {
            return Err(Error::PlanInvalid(
                "cannot plan an empty selection".to_string(),
            ));
        }

        let snapshot = self.catalog.snapshot();
        let mut steps: Vec<PlanStep> = Vec::new();
        let mut safety_checks: Vec<String> = Vec::new();
        let mut rollback_plan: Vec<RollbackEntry> = Vec::new();
        let mut risk_factors: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();

        for tool in &selection.selected_tools {
            let profile = snapshot
                .by_name(&tool.tool_name)
                .ok_or_else(|| Error::catalog_miss(&tool.tool_name))?;

            let reply = match self.synthesize_steps(tool, &profile, context, deadline).await {
                Ok(reply) => reply,
                Err(Error::LlmMalformed(detail)) => {
                    risk_factors.push(format!(
                        "could not derive steps for '{}': {}",
                        tool.tool_name, detail
                    ));
                    continue;
                }
                Err(other) => return Err(other),
            };

            let offset = steps.len();
            for step in reply.steps {
                // Namespace ids per tool so two tools emitting "step_1" never collide.
                let id = format!("{}_{}", tool.execution_order, step.id);
                let depends_on = step
                    .depends_on
                    .iter()
                    .map(|d| format!("{}_{}", tool.execution_order, d))
                    .collect();
                steps.push(PlanStep {
                    id,
                    name: step.name,
                    description: step.description,
                    tool: tool.tool_name.clone(),
                    inputs: step.inputs,
                    timeout_s: step.timeout_s.unwrap_or(60),
                    retry_count: step.retry_count.unwrap_or(0),
                    depends_on,
                });
            }
            safety_checks.extend(reply.safety_checks);
            for entry in reply.rollback {
                rollback_plan.push(RollbackEntry {
                    step_id: format!("{}_{}", tool.execution_order, entry.step_id),
                    description: entry.description,
                });
            }

            // Missing required inputs are user-fixable, not fatal.
            for step in &steps[offset..] {
                for required in profile.required_inputs() {
                    if !step.inputs.contains_key(required) {
                        risk_factors.push(format!(
                            "step '{}' is missing required input '{}'",
                            step.id, required
                        ));
                    }
                }
            }

            // Destructive steps need a rollback entry or an explicit note.
            if profile.is_destructive() {
                for step in &steps[offset..] {
                    if !rollback_plan.iter().any(|r| r.step_id == step.id) {
                        rollback_plan.push(RollbackEntry::infeasible(step.id.clone()));
                    }
                }
            }
        }

        let mut plan = ExecutionPlan {
            plan_id: format!("plan_{}", Uuid::new_v4()),
            decision_id: selection.decision_id.clone(),
            steps,
            safety_checks,
            rollback_plan,
            execution_metadata: ExecutionMetadata::default(),
            warnings,
        };

        if !risk_factors.is_empty() {
            tracing::warn!(?risk_factors, "plan synthesis produced an error plan");
            plan.steps.clear();
            plan.execution_metadata.risk_factors = risk_factors;
            return Ok(plan);
        }

        if let Err(defect) = plan.validate(&snapshot, self.max_plan_steps) {
            match defect {
                Error::CatalogMiss { .. } => return Err(defect),
                other => {
                    tracing::warn!(%other, "plan failed structural validation");
                    plan.steps.clear();
                    plan.execution_metadata.risk_factors = vec![other.to_string()];
                    return Ok(plan);
                }
            }
        }

        let total = plan.estimated_sequential_time_s();
        plan.execution_metadata.total_estimated_time_s = total;
        if total > self.duration_ceiling_s {
            warnings = plan.warnings;
            warnings.push(format!(
                "estimated duration {}s exceeds the {}s ceiling; consider running steps sequentially in smaller batches",
                total, self.duration_ceiling_s
            ));
            plan.warnings = warnings;
        }

        plan.execution_metadata.approval_points =
            self.approval_points(&plan, selection, &snapshot);
        tracing::info!(
            plan_id = %plan.plan_id,
            steps = plan.steps.len(),
            approval_points = plan.execution_metadata.approval_points.len(),
            "plan created"
        );
        Ok(plan)
    }

    async fn synthesize_steps(
        &self,
        tool: &SelectedTool,
        profile: &ToolProfile,
        context: &RequestContext,
        deadline: Deadline,
    ) -> Result<PlannerReply> {
        if deadline.is_expired() {
            return Err(Error::deadline_exceeded("stage_c"));
        }

        let profile_json = serde_json::to_string_pretty(profile)?;
        let entities_json = serde_json::to_string(&context.entities)?;
        let prompt = PromptTemplate::new(prompts::PLANNER_STEPS)
            .slot("request", &context.original_request)
            .slot("tool_profile", profile_json)
            .slot("entities", entities_json)
            .slot("schema", prompts::PLANNER_SCHEMA)
            .render()?;

        let request = GenerationRequest::new(prompt)
            .with_temperature(0.1)
            .with_max_tokens(1024)
            .json();
        let response = tokio::time::timeout(deadline.remaining(), self.gateway.generate(request))
            .await
            .map_err(|_| Error::deadline_exceeded("stage_c"))??;

        let reply: PlannerReply = serde_json::from_str(strip_fences(&response.content))
            .map_err(|e| Error::LlmMalformed(e.to_string()))?;
        if reply.steps.is_empty() {
            return Err(Error::LlmMalformed(format!(
                "planner returned no steps for '{}'",
                tool.tool_name
            )));
        }
        Ok(reply)
    }

    /// Approval points derived from the selection policy, attached to the
    /// destructive steps (or the first step when none are destructive).
    fn approval_points(
        &self,
        plan: &ExecutionPlan,
        selection: &Selection,
        snapshot: &crate::catalog::CatalogIndex,
    ) -> Vec<ApprovalPoint> {
        if !selection.policy.requires_approval {
            return Vec::new();
        }

        let mut points: Vec<ApprovalPoint> = Vec::new();
        for step in &plan.steps {
            let Some(profile) = snapshot.by_name(&step.tool) else {
                continue;
            };
            if profile.is_destructive() {
                points.push(ApprovalPoint {
                    step_id: step.id.clone(),
                    reason: format!("'{}' performs a destructive operation", step.name),
                    risk_level: selection.policy.risk_level.max(RiskLevel::High),
                    operation_type: operation_type(&profile, &selection.intent_action),
                    approver_role: None,
                });
            }
        }

        if points.is_empty() {
            if let Some(first) = plan.steps.first() {
                let operation = snapshot
                    .by_name(&first.tool)
                    .map(|p| operation_type(&p, &selection.intent_action))
                    .unwrap_or_else(|| "general".to_string());
                points.push(ApprovalPoint {
                    step_id: first.id.clone(),
                    reason: "selection policy requires approval before execution".to_string(),
                    risk_level: selection.policy.risk_level,
                    operation_type: operation,
                    approver_role: None,
                });
            }
        }
        points
    }
}
