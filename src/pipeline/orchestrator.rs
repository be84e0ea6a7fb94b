//! Stage sequencing, asset validation, the clarification loop, batching, and
//! approval-gated resumption.
//!
//! The orchestrator is the only component that converts errors into
//! user-facing responses; once a stage has produced a [`Response`], nothing
//! is ever raised to the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::assets::AssetContextProvider;
use crate::catalog::ToolCatalog;
use crate::config::PipelineConfig;
use crate::conversation::{ConversationRole, ConversationStore};
use crate::deadline::Deadline;
use crate::error::{Error, ErrorKind, Result};
use crate::guard::CircuitBreaker;
use crate::llm::{GuardedGateway, LlmGateway};
use crate::metrics::{
    memory_usage_mb, HealthSnapshot, MetricsHistory, MetricsSnapshot, PipelineStatus,
    RequestMetrics,
};
use crate::progress::{emit, PipelineStage, ProgressCallback, ProgressEvent};
use crate::runner::RunnerRegistry;

use super::context::RequestContext;
use super::execution::ExecutionResult;
use super::plan::ExecutionPlan;
use super::response::{Response, ResponseType};
use super::selection::{NextStage, Selection};
use super::stage_ab::CombinedSelector;
use super::stage_c::Planner;
use super::stage_d::Answerer;
use super::stage_e::Executor;

/// Requests longer than this are asked to be rephrased rather than processed.
const MAX_REQUEST_CHARS: usize = 10_000;

/// How many prior messages are injected into prompts.
const HISTORY_INJECTION_LIMIT: usize = 10;

/// Complete result of one pipeline request.
#[derive(Debug, Clone)]
pub struct PipelineResult {
    pub response: Response,
    pub metrics: RequestMetrics,
    pub selection: Option<Selection>,
    pub plan: Option<ExecutionPlan>,
    pub execution: Option<ExecutionResult>,
    pub success: bool,
    pub error_message: Option<String>,
}

#[derive(Debug, Default, Clone)]
struct SessionState {
    /// The request being clarified, grown by each clarification turn
    awaiting_clarification: Option<String>,
    clarification_attempts: u32,
}

struct PendingExecution {
    plan: ExecutionPlan,
    context: RequestContext,
    response: Response,
    session_id: Option<String>,
}

/// The pipeline orchestrator.
pub struct PipelineOrchestrator {
    config: PipelineConfig,
    catalog: Arc<ToolCatalog>,
    assets: Arc<AssetContextProvider>,
    conversations: Arc<ConversationStore>,
    selector: CombinedSelector,
    planner: Planner,
    answerer: Answerer,
    executor: Executor,
    metrics: Arc<MetricsHistory>,
    session_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    sessions: Mutex<HashMap<String, SessionState>>,
    pending_executions: Mutex<HashMap<String, PendingExecution>>,
}

impl PipelineOrchestrator {
    /// Wire up the pipeline. The gateway is wrapped in the process-wide LLM
    /// circuit breaker here; an empty catalog is fatal.
    pub fn new(
        config: PipelineConfig,
        gateway: Arc<dyn LlmGateway>,
        catalog: Arc<ToolCatalog>,
        runners: Arc<RunnerRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        if catalog.is_empty() {
            return Err(Error::Config(
                "tool catalog is empty; nothing can be selected or planned".to_string(),
            ));
        }

        let llm_breaker = Arc::new(CircuitBreaker::new("llm", config.breaker));
        let gateway: Arc<dyn LlmGateway> = Arc::new(GuardedGateway::new(gateway, llm_breaker));

        let asset_breaker = Arc::new(CircuitBreaker::new("asset-service", config.breaker));
        let assets = Arc::new(AssetContextProvider::new(
            config.assets.clone(),
            asset_breaker,
        ));

        let conversations = Arc::new(ConversationStore::new(config.conversation_max_messages));
        let selector = CombinedSelector::new(
            Arc::clone(&gateway),
            Arc::clone(&catalog),
            Arc::clone(&assets),
            &config,
        );
        let planner = Planner::new(Arc::clone(&gateway), Arc::clone(&catalog), &config);
        let answerer = Answerer::new(Arc::clone(&gateway), Arc::clone(&assets), &config);
        let executor = Executor::new(runners, &config);

        tracing::info!(tools = catalog.len(), "pipeline orchestrator initialized");
        Ok(Self {
            config,
            catalog,
            assets,
            conversations,
            selector,
            planner,
            answerer,
            executor,
            metrics: Arc::new(MetricsHistory::new(1000)),
            session_locks: Mutex::new(HashMap::new()),
            sessions: Mutex::new(HashMap::new()),
            pending_executions: Mutex::new(HashMap::new()),
        })
    }

    /// Process one request end to end.
    pub async fn process_request(
        &self,
        user_request: &str,
        request_id: Option<String>,
        context: Option<RequestContext>,
        session_id: Option<String>,
        progress: Option<ProgressCallback>,
    ) -> PipelineResult {
        let request_id = request_id.unwrap_or_else(|| Uuid::new_v4().to_string());

        // Requests within one session are serialized in arrival order;
        // everything else runs fully concurrently.
        let session_lock = session_id.as_ref().map(|sid| self.session_lock(sid));
        let _session_guard = match &session_lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        self.metrics.request_started();
        let started = Instant::now();
        let deadline = Deadline::after(self.config.pipeline_deadline());
        tracing::info!(%request_id, "starting pipeline request");

        let mut context = context.unwrap_or_default();
        if let Some(sid) = &session_id {
            context.session_id = Some(sid.clone());
        }

        let outcome = self
            .run_stages(
                user_request,
                &request_id,
                &mut context,
                session_id.as_deref(),
                &progress,
                deadline,
            )
            .await;

        let total_ms = started.elapsed().as_secs_f64() * 1000.0;
        let (mut response, selection, plan, execution, stage_durations, error) = outcome;

        response.processing_time_ms = total_ms as u64;
        let success = error.is_none() && !response.is_error();
        let status = match &error {
            None if success => PipelineStatus::Completed,
            Some(Error::Cancelled { .. }) => PipelineStatus::Cancelled,
            _ => PipelineStatus::Failed,
        };

        if let Some(sid) = &session_id {
            self.conversations
                .add(sid, ConversationRole::Assistant, response.message.clone())
                .await;
            self.update_session_state(sid, &context, &response);
        }

        let metrics = RequestMetrics {
            request_id: request_id.clone(),
            total_ms,
            stage_durations,
            memory_mb: memory_usage_mb(),
            timestamp: Utc::now(),
            status,
            error_details: error.as_ref().map(|e| e.to_string()),
        };
        self.metrics.record(metrics.clone());
        tracing::info!(%request_id, total_ms, ?status, "pipeline request finished");

        PipelineResult {
            response,
            metrics,
            selection,
            plan,
            execution,
            success,
            error_message: error.map(|e| e.to_string()),
        }
    }

    /// Stage sequencing. Returns the response plus everything intermediate;
    /// errors come back as a value so the caller can still build metrics.
    #[allow(clippy::type_complexity)]
    async fn run_stages(
        &self,
        user_request: &str,
        request_id: &str,
        context: &mut RequestContext,
        session_id: Option<&str>,
        progress: &Option<ProgressCallback>,
        deadline: Deadline,
    ) -> (
        Response,
        Option<Selection>,
        Option<ExecutionPlan>,
        Option<ExecutionResult>,
        HashMap<String, f64>,
        Option<Error>,
    ) {
        let mut durations: HashMap<String, f64> = HashMap::new();

        // Input guards produce a clarification, never a failure.
        let trimmed = user_request.trim();
        if trimmed.is_empty() || trimmed.len() > MAX_REQUEST_CHARS {
            let question = if trimmed.is_empty() {
                "The request was empty. What would you like me to do?"
            } else {
                "The request is too long to process safely. Can you restate the essential part?"
            };
            let response = Response::clarification(
                question,
                vec![super::response::Clarification {
                    question: question.to_string(),
                    options: Vec::new(),
                    required: true,
                    context: "input validation".to_string(),
                }],
            );
            return (response, None, None, None, durations, None);
        }

        // Fold clarification answers into the original request and attach
        // session history before the selector sees anything.
        let effective_request = self
            .prepare_session(user_request, session_id, context)
            .await;
        context.original_request = effective_request.clone();

        // Stage AB: combined understanding + selection.
        emit(
            progress,
            ProgressEvent::start(PipelineStage::StageAb, PipelineStage::StageAb.display_name()),
        );
        let stage_started = Instant::now();
        let selection = match self
            .selector
            .process(&effective_request, context, deadline)
            .await
        {
            Ok(selection) => selection,
            Err(err) => {
                durations.insert("stage_ab".to_string(), ms_since(stage_started));
                return (self.error_response(&err), None, None, None, durations, Some(err));
            }
        };
        durations.insert("stage_ab".to_string(), ms_since(stage_started));
        emit(
            progress,
            ProgressEvent::complete(
                PipelineStage::StageAb,
                PipelineStage::StageAb.display_name(),
                ms_since(stage_started) as u64,
            ),
        );

        // Asset validation: every named target must resolve in inventory.
        if let Err(err) = self.validate_target_assets(context).await {
            let response = self.error_response(&err);
            return (response, Some(selection), None, None, durations, Some(err));
        }

        // Stage C: planning, only when tools were selected.
        let mut plan = None;
        if !selection.is_empty() && selection.next_stage == NextStage::StageC {
            emit(
                progress,
                ProgressEvent::start(PipelineStage::StageC, PipelineStage::StageC.display_name()),
            );
            let stage_started = Instant::now();
            match self.planner.create_plan(&selection, context, deadline).await {
                Ok(created) => plan = Some(created),
                Err(err) => {
                    durations.insert("stage_c".to_string(), ms_since(stage_started));
                    return (
                        self.error_response(&err),
                        Some(selection),
                        None,
                        None,
                        durations,
                        Some(err),
                    );
                }
            }
            durations.insert("stage_c".to_string(), ms_since(stage_started));
            emit(
                progress,
                ProgressEvent::complete(
                    PipelineStage::StageC,
                    PipelineStage::StageC.display_name(),
                    ms_since(stage_started) as u64,
                ),
            );
        }

        // Stage D: response generation.
        emit(
            progress,
            ProgressEvent::start(PipelineStage::StageD, PipelineStage::StageD.display_name()),
        );
        let stage_started = Instant::now();
        let mut response = match self
            .answerer
            .generate_response(&selection, plan.as_ref(), context, deadline)
            .await
        {
            Ok(response) => response,
            Err(err) => {
                durations.insert("stage_d".to_string(), ms_since(stage_started));
                return (
                    self.error_response(&err),
                    Some(selection),
                    plan,
                    None,
                    durations,
                    Some(err),
                );
            }
        };
        durations.insert("stage_d".to_string(), ms_since(stage_started));
        emit(
            progress,
            ProgressEvent::complete(
                PipelineStage::StageD,
                PipelineStage::StageD.display_name(),
                ms_since(stage_started) as u64,
            ),
        );

        // Stage E: execution, gated on approval.
        let mut execution = None;
        if let Some(executable) = &plan {
            if !executable.steps.is_empty() {
                if response.approval_required {
                    tracing::info!(%request_id, "plan is approval-gated; awaiting resume");
                    self.pending_executions.lock().expect("pending lock poisoned").insert(
                        request_id.to_string(),
                        PendingExecution {
                            plan: executable.clone(),
                            context: context.clone(),
                            response: response.clone(),
                            session_id: session_id.map(str::to_string),
                        },
                    );
                } else if response.response_type == ResponseType::ExecutionReady {
                    let stage_started = Instant::now();
                    let result = self
                        .executor
                        .execute(executable, context, deadline, progress.clone())
                        .await;
                    durations.insert("stage_e".to_string(), ms_since(stage_started));
                    response = self.answerer.update_with_execution(response, &result);
                    execution = Some(result);
                }
            }
        }

        (response, Some(selection), plan, execution, durations, None)
    }

    /// Execute a previously approval-gated plan.
    pub async fn approve_and_resume(&self, request_id: &str) -> PipelineResult {
        let pending = self
            .pending_executions
            .lock()
            .expect("pending lock poisoned")
            .remove(request_id);

        let Some(pending) = pending else {
            let response = Response::error(
                format!(
                    "No approval-gated plan is pending for request '{}'. It may have already run or expired with a restart.",
                    request_id
                ),
                ErrorKind::PlanInvalid,
            );
            let metrics = RequestMetrics {
                request_id: request_id.to_string(),
                total_ms: 0.0,
                stage_durations: HashMap::new(),
                memory_mb: memory_usage_mb(),
                timestamp: Utc::now(),
                status: PipelineStatus::Failed,
                error_details: Some("unknown pending request".to_string()),
            };
            return PipelineResult {
                response,
                metrics,
                selection: None,
                plan: None,
                execution: None,
                success: false,
                error_message: Some("unknown pending request".to_string()),
            };
        };

        self.metrics.request_started();
        let started = Instant::now();
        let deadline = Deadline::after(self.config.pipeline_deadline());
        tracing::info!(%request_id, "resuming approved plan");

        let result = self.executor.execute(&pending.plan, &pending.context, deadline, None).await;
        let mut response = pending.response;
        response.approval_required = false;
        response = self.answerer.update_with_execution(response, &result);
        if response.response_type == ResponseType::ApprovalRequest {
            response.response_type = ResponseType::Information;
        }

        if let Some(sid) = &pending.session_id {
            self.conversations
                .add(sid, ConversationRole::Assistant, response.message.clone())
                .await;
        }

        let total_ms = ms_since(started);
        response.processing_time_ms = total_ms as u64;
        let success = result.status == super::execution::ExecutionStatus::Completed;
        let mut stage_durations = HashMap::new();
        stage_durations.insert("stage_e".to_string(), total_ms);

        let metrics = RequestMetrics {
            request_id: request_id.to_string(),
            total_ms,
            stage_durations,
            memory_mb: memory_usage_mb(),
            timestamp: Utc::now(),
            status: if success {
                PipelineStatus::Completed
            } else {
                PipelineStatus::Failed
            },
            error_details: result.error_message.clone(),
        };
        self.metrics.record(metrics.clone());

        PipelineResult {
            response,
            metrics,
            selection: None,
            plan: Some(pending.plan),
            execution: Some(result.clone()),
            success,
            error_message: result.error_message,
        }
    }

    /// Process a batch with bounded fan-out; result order matches input order.
    pub async fn process_batch(
        &self,
        requests: Vec<String>,
        max_concurrent: usize,
    ) -> Vec<PipelineResult> {
        let semaphore = Arc::new(Semaphore::new(max_concurrent.max(1)));
        let futures = requests.into_iter().map(|request| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire().await.expect("semaphore never closed");
                self.process_request(&request, None, None, None, None).await
            }
        });
        join_all(futures).await
    }

    pub fn health(&self) -> HealthSnapshot {
        self.metrics.health()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// The conversation store, for the chat surface to inspect sessions.
    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Answerer statistics, for per-stage health reporting.
    pub fn answerer_stats(&self) -> super::stage_d::AnswererStats {
        self.answerer.stats()
    }

    /// Reload the tool catalog in place.
    pub fn reload_catalog(&self, profiles: Vec<crate::catalog::ToolProfile>) -> Result<()> {
        if profiles.is_empty() {
            return Err(Error::Config("refusing to reload an empty catalog".to_string()));
        }
        self.catalog.reload(profiles);
        Ok(())
    }

    fn session_lock(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.session_locks.lock().expect("session locks poisoned");
        Arc::clone(
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    /// Record the user turn, attach formatted history, and fold a pending
    /// clarification into a composite request.
    async fn prepare_session(
        &self,
        user_request: &str,
        session_id: Option<&str>,
        context: &mut RequestContext,
    ) -> String {
        let Some(sid) = session_id else {
            return user_request.to_string();
        };

        self.conversations
            .add(sid, ConversationRole::User, user_request)
            .await;
        context.conversation_history = self
            .conversations
            .formatted(sid, Some(HISTORY_INJECTION_LIMIT))
            .await;

        let state = self
            .sessions
            .lock()
            .expect("session state poisoned")
            .get(sid)
            .cloned()
            .unwrap_or_default();
        context.clarification_attempts = state.clarification_attempts;

        match state.awaiting_clarification {
            Some(original) => {
                let combined = format!(
                    "{}\n\nAdditional clarification provided: {}",
                    original, user_request
                );
                tracing::info!(session_id = sid, "folding clarification into composite request");
                combined
            }
            None => user_request.to_string(),
        }
    }

    /// Clarifications keep the loop open; anything else closes it.
    fn update_session_state(&self, session_id: &str, context: &RequestContext, response: &Response) {
        let mut sessions = self.sessions.lock().expect("session state poisoned");
        if response.is_clarification() {
            sessions.insert(
                session_id.to_string(),
                SessionState {
                    awaiting_clarification: Some(context.original_request.clone()),
                    clarification_attempts: context.clarification_attempts,
                },
            );
        } else {
            sessions.remove(session_id);
        }
    }

    /// Every hostname/IP entity must resolve in inventory unless tagged
    /// ad-hoc. A degraded asset service never blocks the request. Resolved
    /// target summaries are stashed in the context for downstream prompts.
    async fn validate_target_assets(&self, context: &mut RequestContext) -> Result<()> {
        let targets: Vec<String> = context
            .target_hosts()
            .iter()
            .map(|e| e.value.clone())
            .collect();
        if targets.is_empty() {
            return Ok(());
        }

        let mut unresolved: Vec<String> = Vec::new();
        let mut summaries: Vec<String> = Vec::new();
        for host in &targets {
            match self.assets.context_for_target(host).await {
                Ok(target) if target.is_asset => summaries.push(target.summary),
                Ok(_) => unresolved.push(host.clone()),
                Err(Error::AssetServiceDegraded(detail)) => {
                    tracing::warn!(%detail, host = %host, "asset validation skipped");
                }
                Err(other) => return Err(other),
            }
        }

        if !summaries.is_empty() {
            context.set_carry("target_context", serde_json::Value::from(summaries));
        }
        if unresolved.is_empty() {
            tracing::info!("asset validation passed");
            return Ok(());
        }
        Err(Error::asset_not_found(unresolved))
    }

    /// Translate an error into the user-visible response for it.
    fn error_response(&self, err: &Error) -> Response {
        let message = match err {
            Error::AssetNotFound { hosts } if hosts.len() == 1 => format!(
                "**Asset Not Found**: The hostname/IP address `{}` is not defined in the asset \
                 database. Please verify the hostname/IP address or add it to the asset database \
                 first.",
                hosts[0]
            ),
            Error::AssetNotFound { hosts } => format!(
                "**Assets Not Found**: The following hostname/IP addresses are not defined in \
                 the asset database: `{}`. Please verify these addresses or add them to the \
                 asset database first.",
                hosts.join("`, `")
            ),
            Error::LlmUnavailable(_) => "The language model backend is unavailable right now. \
                 Your request was not processed; please try again shortly."
                .to_string(),
            Error::CircuitOpen { dependency } => format!(
                "The {} backend is temporarily unavailable and calls are being short-circuited. \
                 Please retry in a minute.",
                dependency
            ),
            Error::TokenBudgetExceeded { .. } => "This request and its context are too large to \
                 process in one turn. Try a shorter request or start a new session."
                .to_string(),
            Error::DeadlineExceeded { stage } => format!(
                "The request ran out of time while in {}. Partial work was discarded; please try \
                 again or narrow the request.",
                stage
            ),
            Error::Cancelled { stage } => {
                format!("The request was cancelled while in {}.", stage)
            }
            Error::CatalogMiss { tool } => format!(
                "The plan referenced tool '{}', which is not available in this environment. \
                 Please report this; no changes were made.",
                tool
            ),
            other => format!(
                "I encountered an error processing your request: {}. No changes were made.",
                other
            ),
        };
        Response::error(message, err.kind())
    }
}

fn ms_since(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::Asset;
    use crate::catalog::test_profiles::profile;
    use crate::llm::test_gateway::ScriptedGateway;
    use crate::pipeline::execution::ExecutionStatus;
    use crate::runner::test_runners::FixedRunner;
    use std::collections::HashMap as StdHashMap;

    fn catalog() -> Arc<ToolCatalog> {
        Arc::new(ToolCatalog::new(vec![
            profile(
                "svc-restart",
                "linux",
                &["service_restart"],
                &[("action", "restart_service")],
            ),
            profile(
                "remote-shell",
                "windows",
                &["remote_shell"],
                &[("action", "run_command")],
            ),
        ]))
    }

    fn runners() -> Arc<RunnerRegistry> {
        Arc::new(
            RunnerRegistry::new()
                .with_runner("svc-restart", Arc::new(FixedRunner::ok("restarted")))
                .with_runner("remote-shell", Arc::new(FixedRunner::ok(" Directory of C:\\ \n"))),
        )
    }

    fn orchestrator_with(
        gateway: ScriptedGateway,
    ) -> (PipelineOrchestrator, Arc<ScriptedGateway>) {
        let scripted = Arc::new(gateway);
        let config = PipelineConfig {
            assets: crate::config::AssetConfig {
                service_url: "http://127.0.0.1:9".to_string(),
                fetch_timeout_secs: 1,
                ..crate::config::AssetConfig::default()
            },
            ..PipelineConfig::default()
        };
        let orchestrator = PipelineOrchestrator::new(
            config,
            Arc::clone(&scripted) as Arc<dyn LlmGateway>,
            catalog(),
            runners(),
        )
        .unwrap();
        (orchestrator, scripted)
    }

    fn orchestrator(gateway: ScriptedGateway) -> PipelineOrchestrator {
        orchestrator_with(gateway).0
    }

    fn seed_host(orchestrator: &PipelineOrchestrator, hostname: &str, ip: &str) {
        orchestrator.assets.seed_cache(
            Some(hostname),
            10,
            vec![Asset {
                id: None,
                hostname: hostname.to_string(),
                ip_address: ip.to_string(),
                os_type: "linux".to_string(),
                os_version: "22.04".to_string(),
                environment: "production".to_string(),
                tags: vec!["production".to_string()],
                status: "active".to_string(),
                extra: StdHashMap::new(),
            }],
        );
    }

    fn seed_missing_host(orchestrator: &PipelineOrchestrator, host: &str) {
        orchestrator.assets.seed_cache(Some(host), 10, Vec::new());
    }

    fn info_reply() -> String {
        serde_json::json!({
            "intent_category": "information",
            "intent_action": "list_assets",
            "entities": [],
            "required_capabilities": [],
            "candidate_tools": [],
            "risk_level": "low",
            "requires_approval": false,
            "selection_confidence": 0.95
        })
        .to_string()
    }

    fn restart_reply(host: &str) -> String {
        serde_json::json!({
            "intent_category": "action",
            "intent_action": "restart_service",
            "entities": [
                {"type": "hostname", "value": host},
                {"type": "service", "value": "nginx"}
            ],
            "required_capabilities": ["service_restart"],
            "candidate_tools": [{"tool_name": "svc-restart", "why": "restarts services"}],
            "risk_level": "medium",
            "requires_approval": false,
            "selection_confidence": 0.9
        })
        .to_string()
    }

    fn shell_reply(ips: &[&str]) -> String {
        let entities: Vec<_> = ips
            .iter()
            .map(|ip| serde_json::json!({"type": "ip_address", "value": ip}))
            .collect();
        serde_json::json!({
            "intent_category": "action",
            "intent_action": "run_command",
            "entities": entities,
            "required_capabilities": ["remote_shell"],
            "candidate_tools": [{"tool_name": "remote-shell", "why": "runs commands"}],
            "risk_level": "low",
            "requires_approval": false,
            "selection_confidence": 0.9
        })
        .to_string()
    }

    fn planner_reply(ids_and_targets: &[(&str, &str)]) -> String {
        let steps: Vec<_> = ids_and_targets
            .iter()
            .map(|(id, target)| {
                serde_json::json!({
                    "id": id,
                    "name": format!("run on {}", target),
                    "inputs": {"target": target},
                    "timeout_s": 30,
                    "retry_count": 0,
                    "depends_on": []
                })
            })
            .collect();
        serde_json::json!({"steps": steps, "safety_checks": [], "rollback": []}).to_string()
    }

    fn low_confidence_reply() -> String {
        serde_json::json!({
            "intent_category": "action",
            "intent_action": "unknown",
            "entities": [],
            "required_capabilities": [],
            "candidate_tools": [],
            "risk_level": "low",
            "requires_approval": false,
            "selection_confidence": 0.2
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_information_request_skips_planning_and_execution() {
        let gateway = ScriptedGateway::new()
            .reply(info_reply())
            .reply("We currently have 42 Linux servers.");
        let orchestrator = orchestrator(gateway);

        let result = orchestrator
            .process_request("How many Linux servers do we have?", None, None, None, None)
            .await;

        assert!(result.success);
        assert_eq!(result.response.response_type, ResponseType::Information);
        assert!(result.response.message.contains("42"));
        assert!(result.plan.is_none());
        assert!(result.execution.is_none());
        assert!(result.metrics.stage_durations.contains_key("stage_ab"));
        assert!(!result.metrics.stage_durations.contains_key("stage_e"));
        // Invariant: total time covers the stage times.
        let stage_sum: f64 = result.metrics.stage_durations.values().sum();
        assert!(result.metrics.total_ms >= stage_sum);
    }

    #[tokio::test]
    async fn test_action_with_known_target_requires_approval() {
        let gateway = ScriptedGateway::new()
            .reply(restart_reply("web-prod-01"))
            .reply(planner_reply(&[("restart", "web-prod-01")]))
            .reply("Restart of nginx on web-prod-01 is ready and needs approval.");
        let orchestrator = orchestrator(gateway);
        seed_host(&orchestrator, "web-prod-01", "10.0.0.5");

        let result = orchestrator
            .process_request(
                "Restart nginx on web-prod-01",
                Some("req-1".to_string()),
                None,
                None,
                None,
            )
            .await;

        assert!(result.success);
        assert_eq!(result.response.response_type, ResponseType::ApprovalRequest);
        assert!(result.response.approval_required);
        // Destructive + production clamps to high.
        assert!(result.selection.as_ref().unwrap().policy.risk_level >= crate::pipeline::selection::RiskLevel::High);
        // Nothing executed yet.
        assert!(result.execution.is_none());

        // Approve and resume runs the stored plan.
        let resumed = orchestrator.approve_and_resume("req-1").await;
        assert!(resumed.success);
        let execution = resumed.execution.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert!(resumed.response.message.contains("restarted"));
    }

    #[tokio::test]
    async fn test_approve_and_resume_unknown_request() {
        let orchestrator = orchestrator(ScriptedGateway::new());
        let result = orchestrator.approve_and_resume("ghost").await;
        assert!(!result.success);
        assert!(result.response.message.contains("ghost"));
    }

    #[tokio::test]
    async fn test_asset_not_found_fails_fast() {
        let gateway = ScriptedGateway::new().reply(shell_reply(&["10.0.0.99"]));
        let orchestrator = orchestrator(gateway);
        seed_missing_host(&orchestrator, "10.0.0.99");

        let result = orchestrator
            .process_request("List files on 10.0.0.99", None, None, None, None)
            .await;

        assert!(!result.success);
        assert_eq!(result.response.response_type, ResponseType::Error);
        assert_eq!(result.response.error_kind, Some(ErrorKind::AssetNotFound));
        assert!(result.response.message.contains("10.0.0.99"));
        assert!(result.plan.is_none());
        assert!(result.execution.is_none());
        assert_eq!(result.metrics.status, PipelineStatus::Failed);
    }

    #[tokio::test]
    async fn test_multi_host_execution_runs_both_steps() {
        let gateway = ScriptedGateway::new()
            .reply(shell_reply(&["192.168.50.213", "192.168.50.214"]))
            .reply(planner_reply(&[
                ("list_213", "192.168.50.213"),
                ("list_214", "192.168.50.214"),
            ]))
            .reply("Listing C:\\ on both hosts now.");
        let orchestrator = orchestrator(gateway);
        seed_host(&orchestrator, "192.168.50.213", "192.168.50.213");
        seed_host(&orchestrator, "192.168.50.214", "192.168.50.214");

        let result = orchestrator
            .process_request(
                "list C:\\ on 192.168.50.213 and 192.168.50.214",
                None,
                None,
                None,
                None,
            )
            .await;

        assert!(result.success, "error: {:?}", result.error_message);
        let execution = result.execution.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert_eq!(execution.completed_steps, 2);
        // Steps are independent, no dependencies between hosts.
        let plan = result.plan.unwrap();
        assert!(plan.steps.iter().all(|s| s.depends_on.is_empty()));
        // Each host's stdout block lands in the message.
        assert!(result.response.message.contains("Directory of C:\\"));
        assert_eq!(result.response.response_type, ResponseType::Information);
    }

    #[tokio::test]
    async fn test_clarification_loop_folds_composite_message() {
        let gateway = ScriptedGateway::new()
            .reply(low_confidence_reply())
            .reply(low_confidence_reply());
        let (orchestrator, scripted) = orchestrator_with(gateway);

        let first = orchestrator
            .process_request("fix it", None, None, Some("session-1".to_string()), None)
            .await;
        assert_eq!(first.response.response_type, ResponseType::Clarification);

        let second = orchestrator
            .process_request("nginx", None, None, Some("session-1".to_string()), None)
            .await;
        assert_eq!(second.response.response_type, ResponseType::Clarification);

        // The second selector call saw the composite request.
        let composite = "fix it\n\nAdditional clarification provided: nginx";
        let requests = scripted.requests.lock().unwrap();
        assert!(
            requests.iter().any(|r| r.prompt.contains(composite)),
            "no selector call contained the composite message"
        );
    }

    #[tokio::test]
    async fn test_clarification_cap_then_insufficient_confidence() {
        let gateway = ScriptedGateway::new()
            .reply(low_confidence_reply())
            .reply(low_confidence_reply())
            .reply(low_confidence_reply())
            .reply(low_confidence_reply());
        let orchestrator = orchestrator(gateway);
        let session = Some("session-cap".to_string());

        for _ in 0..3 {
            let result = orchestrator
                .process_request("fix it", None, None, session.clone(), None)
                .await;
            assert_eq!(result.response.response_type, ResponseType::Clarification);
        }

        let fourth = orchestrator
            .process_request("fix it", None, None, session.clone(), None)
            .await;
        assert_eq!(fourth.response.response_type, ResponseType::Error);
        assert_eq!(
            fourth.response.error_kind,
            Some(ErrorKind::InsufficientConfidence)
        );

        // The refusal closes the loop; the next turn starts fresh.
        let gateway_state = orchestrator.sessions.lock().unwrap();
        assert!(!gateway_state.contains_key("session-cap"));
    }

    #[tokio::test]
    async fn test_llm_outage_then_circuit_opens() {
        let gateway = ScriptedGateway::new()
            .reply_error(|| Error::LlmUnavailable("503".to_string()))
            .reply_error(|| Error::LlmUnavailable("503".to_string()))
            .reply_error(|| Error::LlmUnavailable("503".to_string()));
        let orchestrator = orchestrator(gateway);

        for _ in 0..3 {
            let result = orchestrator
                .process_request("hello operations", None, None, None, None)
                .await;
            assert!(!result.success);
            assert_eq!(result.response.error_kind, Some(ErrorKind::LlmUnavailable));
            assert!(result.plan.is_none());
        }

        // Breaker threshold reached: the next request fails fast without a
        // scripted reply being consumed.
        let result = orchestrator
            .process_request("hello operations", None, None, None, None)
            .await;
        assert!(!result.success);
        assert_eq!(result.response.error_kind, Some(ErrorKind::CircuitOpen));
    }

    #[tokio::test]
    async fn test_empty_request_is_clarification_not_failure() {
        let orchestrator = orchestrator(ScriptedGateway::new());
        let result = orchestrator.process_request("   ", None, None, None, None).await;
        assert!(result.success);
        assert_eq!(result.response.response_type, ResponseType::Clarification);
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let gateway = ScriptedGateway::new()
            .reply(info_reply())
            .reply("answer a")
            .reply(info_reply())
            .reply("answer b");
        let orchestrator = orchestrator(gateway);

        let results = orchestrator
            .process_batch(
                vec![
                    "how many linux servers".to_string(),
                    "how many windows servers".to_string(),
                ],
                1,
            )
            .await;

        assert_eq!(results.len(), 2);
        assert!(results[0].response.message.contains("answer a"));
        assert!(results[1].response.message.contains("answer b"));
    }

    #[tokio::test]
    async fn test_conversation_recorded_for_sessions() {
        let gateway = ScriptedGateway::new().reply(info_reply()).reply("42 servers.");
        let orchestrator = orchestrator(gateway);

        orchestrator
            .process_request(
                "How many Linux servers do we have?",
                None,
                None,
                Some("s-conv".to_string()),
                None,
            )
            .await;

        let history = orchestrator.conversations().get("s-conv", None).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, ConversationRole::User);
        assert_eq!(history[1].role, ConversationRole::Assistant);
        assert!(history[1].content.contains("42"));
    }

    #[tokio::test]
    async fn test_health_and_metrics_surface() {
        let gateway = ScriptedGateway::new().reply(info_reply()).reply("fine.");
        let orchestrator = orchestrator(gateway);

        orchestrator
            .process_request("how many servers", None, None, None, None)
            .await;

        let metrics = orchestrator.metrics();
        assert_eq!(metrics.total_requests, 1);
        assert_eq!(metrics.success_count, 1);
        let health = orchestrator.health();
        assert_eq!(health.status, crate::metrics::HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_empty_catalog_is_fatal() {
        let result = PipelineOrchestrator::new(
            PipelineConfig::default(),
            Arc::new(ScriptedGateway::new()),
            Arc::new(ToolCatalog::new(Vec::new())),
            Arc::new(RunnerRegistry::new()),
        );
        assert!(result.is_err());
    }
}
