//! Combined understanding + selection.
//!
//! One LLM turn classifies intent, extracts entities, and nominates tools;
//! deterministic post-processing scores candidates, breaks ties, clamps risk,
//! and derives the execution policy. The LLM proposes, the code decides.

use std::collections::HashSet;
use std::sync::Arc;

use crate::assets::{extract_host_candidates, AssetContextProvider};
use crate::catalog::{ToolCatalog, ToolProfile};
use crate::config::PipelineConfig;
use crate::deadline::Deadline;
use crate::error::{Error, Result};
use crate::llm::{GenerationRequest, LlmGateway};

use super::context::{Entity, RequestContext};
use super::prompts::{self, PromptTemplate};
use super::scoring::{self, ScoreWeights, ScoredCandidate};
use super::selection::{ExecutionPolicy, RiskLevel, SelectedTool, Selection};

/// Structured reply expected from the selection turn.
#[derive(Debug, serde::Deserialize)]
struct SelectorReply {
    intent_category: String,
    intent_action: String,
    #[serde(default)]
    entities: Vec<ReplyEntity>,
    #[serde(default)]
    required_capabilities: Vec<String>,
    #[serde(default)]
    candidate_tools: Vec<ReplyTool>,
    #[serde(default)]
    risk_level: Option<String>,
    #[serde(default)]
    requires_approval: bool,
    #[serde(default)]
    selection_confidence: Option<f64>,
}

#[derive(Debug, serde::Deserialize)]
struct ReplyEntity {
    #[serde(rename = "type")]
    entity_type: String,
    value: String,
}

#[derive(Debug, serde::Deserialize)]
struct ReplyTool {
    tool_name: String,
    #[serde(default)]
    why: String,
}

#[derive(Debug, serde::Deserialize)]
struct TieBreakReply {
    choice: String,
}

/// Strip optional markdown fences around a JSON payload.
fn strip_fences(content: &str) -> &str {
    let trimmed = content.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}

/// Stage AB: combined understanding and tool selection.
pub struct CombinedSelector {
    gateway: Arc<dyn LlmGateway>,
    catalog: Arc<ToolCatalog>,
    assets: Arc<AssetContextProvider>,
    weights: ScoreWeights,
    max_selected_tools: usize,
    prompt_tool_candidates: usize,
}

impl CombinedSelector {
    pub fn new(
        gateway: Arc<dyn LlmGateway>,
        catalog: Arc<ToolCatalog>,
        assets: Arc<AssetContextProvider>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            gateway,
            catalog,
            assets,
            weights: ScoreWeights::default(),
            max_selected_tools: config.max_selected_tools,
            prompt_tool_candidates: config.prompt_tool_candidates,
        }
    }

    /// Process one request into a [`Selection`], updating context entities.
    pub async fn process(
        &self,
        user_request: &str,
        context: &mut RequestContext,
        deadline: Deadline,
    ) -> Result<Selection> {
        if deadline.is_expired() {
            return Err(Error::deadline_exceeded("stage_ab"));
        }

        let mut warnings: Vec<String> = Vec::new();
        let asset_context = self.asset_context_block(user_request, false, &mut warnings).await;
        let system = self.build_system_prompt(user_request, &asset_context)?;
        let prompt = self.build_user_prompt(user_request, context);

        let reply = match self
            .call_with_shrink(user_request, &system, &prompt, context, deadline)
            .await
        {
            Ok(reply) => reply,
            Err(Error::LlmMalformed(detail)) => {
                // Structured-retry already happened inside; give Stage D a
                // clarification path instead of failing the request.
                tracing::warn!(%detail, "selection reply unusable after retry");
                let selection = Selection::new(
                    Vec::new(),
                    ExecutionPolicy::default(),
                    0.0,
                    "unknown",
                    "unparseable",
                )
                .with_warning(format!("selection output malformed: {}", detail));
                return Ok(selection);
            }
            Err(other) => return Err(other),
        };

        self.merge_entities(user_request, &reply, context);

        let (selected, mut tool_warnings) = self
            .select_tools(user_request, &reply, deadline)
            .await;
        warnings.append(&mut tool_warnings);

        let policy = self.derive_policy(&reply, &selected, user_request, context);
        let confidence = reply.selection_confidence.unwrap_or(0.0);

        let mut selection = Selection::new(
            selected,
            policy,
            confidence,
            reply.intent_category.to_lowercase(),
            reply.intent_action.to_lowercase(),
        );
        selection.warnings = warnings;
        tracing::info!(
            decision_id = %selection.decision_id,
            tools = selection.selected_tools.len(),
            confidence = selection.selection_confidence,
            next_stage = ?selection.next_stage,
            "selection complete"
        );
        Ok(selection)
    }

    /// Asset context for the selection prompt: live summary normally, compact
    /// schema when shrinking after a token-budget miss or when degraded.
    async fn asset_context_block(
        &self,
        user_request: &str,
        compact: bool,
        warnings: &mut Vec<String>,
    ) -> String {
        if !self.assets.should_inject(user_request) {
            return String::new();
        }
        if compact {
            return format!("{}\n\n", self.assets.compact_context());
        }
        match self.assets.comprehensive_context(25).await {
            Ok(block) => format!("{}\n\n", block),
            Err(Error::AssetServiceDegraded(detail)) => {
                tracing::warn!(%detail, "continuing without live asset context");
                warnings.push("asset inventory unavailable; answered without live context".to_string());
                format!("{}\n\n", self.assets.compact_context())
            }
            Err(_) => format!("{}\n\n", self.assets.compact_context()),
        }
    }

    fn build_system_prompt(&self, user_request: &str, asset_context: &str) -> Result<String> {
        let summaries = self
            .candidate_summaries(user_request)
            .join("\n");
        PromptTemplate::new(prompts::SELECTOR_SYSTEM)
            .slot("asset_context", asset_context)
            .slot("tool_summaries", summaries)
            .slot("schema", prompts::SELECTOR_SCHEMA)
            .render()
    }

    fn build_user_prompt(&self, user_request: &str, context: &RequestContext) -> String {
        if context.conversation_history.is_empty() {
            format!("Request: {}", user_request)
        } else {
            format!("{}Request: {}", context.conversation_history, user_request)
        }
    }

    /// One-line summaries for the K tools with the best keyword overlap.
    fn candidate_summaries(&self, user_request: &str) -> Vec<String> {
        let tokens: HashSet<String> = user_request
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
            .map(str::to_string)
            .collect();

        let snapshot = self.catalog.snapshot();
        let mut scored: Vec<(usize, &Arc<ToolProfile>)> = snapshot
            .all()
            .iter()
            .map(|profile| {
                let haystack = format!(
                    "{} {} {} {}",
                    profile.tool_name,
                    profile.description,
                    profile
                        .capabilities
                        .iter()
                        .map(|c| c.name.as_str())
                        .collect::<Vec<_>>()
                        .join(" "),
                    profile
                        .intent_tags
                        .iter()
                        .map(|t| t.action.as_str())
                        .collect::<Vec<_>>()
                        .join(" ")
                )
                .to_lowercase();
                let overlap = tokens.iter().filter(|t| haystack.contains(t.as_str())).count();
                (overlap, profile)
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        scored
            .into_iter()
            .take(self.prompt_tool_candidates)
            .map(|(_, profile)| format!("- {}", profile.summary_line()))
            .collect()
    }

    /// Call the LLM with one malformed-output retry and one budget-shrink
    /// retry (compact asset context, truncated history).
    async fn call_with_shrink(
        &self,
        user_request: &str,
        system: &str,
        prompt: &str,
        context: &RequestContext,
        deadline: Deadline,
    ) -> Result<SelectorReply> {
        match self.call_selector(system, prompt, deadline).await {
            Err(Error::TokenBudgetExceeded { .. }) => {
                tracing::warn!("selection prompt over budget; shrinking and retrying once");
                let mut shrink_warnings = Vec::new();
                let compact_context = self
                    .asset_context_block(user_request, true, &mut shrink_warnings)
                    .await;
                let system = self.build_system_prompt(user_request, &compact_context)?;
                let truncated = Self::truncate_history(&context.conversation_history, 4);
                let prompt = if truncated.is_empty() {
                    format!("Request: {}", user_request)
                } else {
                    format!("{}Request: {}", truncated, user_request)
                };
                self.call_selector(&system, &prompt, deadline).await
            }
            other => other,
        }
    }

    /// Keep only the trailing `keep` exchange lines of a formatted history.
    fn truncate_history(history: &str, keep: usize) -> String {
        let lines: Vec<&str> = history
            .lines()
            .filter(|l| l.starts_with("**User:**") || l.starts_with("**Assistant:**"))
            .collect();
        if lines.is_empty() {
            return String::new();
        }
        let tail = &lines[lines.len().saturating_sub(keep)..];
        format!("## Previous Conversation History:\n\n{}\n\n---\n\n", tail.join("\n"))
    }

    async fn call_selector(
        &self,
        system: &str,
        prompt: &str,
        deadline: Deadline,
    ) -> Result<SelectorReply> {
        let first = self.generate(system, prompt, deadline).await?;
        match serde_json::from_str::<SelectorReply>(strip_fences(&first)) {
            Ok(reply) => Ok(reply),
            Err(parse_err) => {
                tracing::warn!(%parse_err, "selection reply malformed; retrying with strict schema");
                let retry_system = PromptTemplate::new(prompts::SELECTOR_RETRY)
                    .slot("schema", prompts::SELECTOR_SCHEMA)
                    .render()?;
                let retry_prompt = format!("{}\n\nPrevious reply:\n{}", prompt, first);
                let second = self.generate(&retry_system, &retry_prompt, deadline).await?;
                serde_json::from_str::<SelectorReply>(strip_fences(&second))
                    .map_err(|e| Error::LlmMalformed(e.to_string()))
            }
        }
    }

    async fn generate(&self, system: &str, prompt: &str, deadline: Deadline) -> Result<String> {
        if deadline.is_expired() {
            return Err(Error::deadline_exceeded("stage_ab"));
        }
        let request = GenerationRequest::new(prompt)
            .with_system(system)
            .with_temperature(0.1)
            .with_max_tokens(1024)
            .json();
        let response = tokio::time::timeout(deadline.remaining(), self.gateway.generate(request))
            .await
            .map_err(|_| Error::deadline_exceeded("stage_ab"))??;
        Ok(response.content)
    }

    /// Merge LLM entities with deterministic IP extraction.
    fn merge_entities(&self, user_request: &str, reply: &SelectorReply, context: &mut RequestContext) {
        let mut entities: Vec<Entity> = reply
            .entities
            .iter()
            .map(|e| Entity::new(e.entity_type.to_lowercase(), e.value.clone()))
            .collect();

        for candidate in extract_host_candidates(user_request) {
            let is_ip = candidate.chars().all(|c| c.is_ascii_digit() || c == '.');
            if !is_ip {
                continue;
            }
            if !entities.iter().any(|e| e.value == candidate) {
                entities.push(Entity::new("ip_address", candidate));
            }
        }
        context.entities = entities;
    }

    /// Validate, score, tie-break, dedupe, and cap the tool list.
    async fn select_tools(
        &self,
        user_request: &str,
        reply: &SelectorReply,
        deadline: Deadline,
    ) -> (Vec<SelectedTool>, Vec<String>) {
        let mut warnings = Vec::new();
        let snapshot = self.catalog.snapshot();

        // Tools the LLM nominated, resolved against the catalog.
        let mut nominated: Vec<Arc<ToolProfile>> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut justifications: std::collections::HashMap<String, String> = Default::default();
        for candidate in &reply.candidate_tools {
            let key = candidate.tool_name.to_lowercase();
            if !seen.insert(key.clone()) {
                continue;
            }
            match snapshot.by_name(&candidate.tool_name) {
                Some(profile) => {
                    justifications.insert(key, candidate.why.clone());
                    nominated.push(profile);
                }
                None => {
                    tracing::warn!(tool = %candidate.tool_name, "dropping unknown tool from selection");
                    warnings.push(format!(
                        "tool '{}' is not in the catalog and was dropped",
                        candidate.tool_name
                    ));
                }
            }
        }

        // Catalog-derived candidates widen the scoring pool.
        let mut pool = nominated.clone();
        for profile in snapshot.by_intent(&reply.intent_category, &reply.intent_action) {
            if seen.insert(profile.tool_name.to_lowercase()) {
                pool.push(profile);
            }
        }
        for capability in &reply.required_capabilities {
            for profile in snapshot.by_capability(capability) {
                if seen.insert(profile.tool_name.to_lowercase()) {
                    pool.push(profile);
                }
            }
        }

        if pool.is_empty() {
            return (Vec::new(), warnings);
        }

        let mut ranked = scoring::rank_candidates(&pool, &reply.required_capabilities, &self.weights);

        if scoring::is_tie(&ranked, self.weights.tie_epsilon) {
            if let Some(choice) = self
                .tie_break(user_request, &ranked[0], &ranked[1], deadline)
                .await
            {
                if choice == 'B' {
                    ranked.swap(0, 1);
                }
            }
        }

        // Nominated tools are what the model committed to. Catalog extras
        // only lead when the model nominated nothing for an action intent;
        // informational requests stay tool-free and take the direct path.
        let nominated_names: HashSet<String> =
            nominated.iter().map(|p| p.tool_name.to_lowercase()).collect();
        let chosen: Vec<&ScoredCandidate> = if nominated_names.is_empty() {
            if reply.intent_category.eq_ignore_ascii_case("information") {
                Vec::new()
            } else {
                ranked.iter().take(1).collect()
            }
        } else {
            ranked
                .iter()
                .filter(|c| nominated_names.contains(&c.profile.tool_name.to_lowercase()))
                .take(self.max_selected_tools)
                .collect()
        };

        let selected = chosen
            .iter()
            .enumerate()
            .map(|(i, candidate)| SelectedTool {
                tool_name: candidate.profile.tool_name.clone(),
                capability_name: candidate.capability_name.clone(),
                pattern_name: candidate.pattern_name.clone(),
                justification: justifications
                    .get(&candidate.profile.tool_name.to_lowercase())
                    .cloned()
                    .unwrap_or_else(|| "best capability match".to_string()),
                execution_order: (i + 1) as u32,
                inputs_needed: candidate
                    .profile
                    .required_inputs()
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            })
            .collect();
        (selected, warnings)
    }

    /// At most one tie-break call per request; any failure keeps scored order.
    async fn tie_break(
        &self,
        user_request: &str,
        first: &ScoredCandidate,
        second: &ScoredCandidate,
        deadline: Deadline,
    ) -> Option<char> {
        let prompt = PromptTemplate::new(prompts::TIE_BREAK)
            .slot("request", user_request)
            .slot("tool_a", first.profile.summary_line())
            .slot("tool_b", second.profile.summary_line())
            .render()
            .ok()?;
        let content = self.generate("", &prompt, deadline).await.ok()?;
        let reply: TieBreakReply = serde_json::from_str(strip_fences(&content)).ok()?;
        match reply.choice.trim().to_uppercase().as_str() {
            "A" => Some('A'),
            "B" => Some('B'),
            _ => None,
        }
    }

    /// Risk clamping rules; deterministic, never relaxed below the LLM value.
    fn derive_policy(
        &self,
        reply: &SelectorReply,
        selected: &[SelectedTool],
        user_request: &str,
        context: &RequestContext,
    ) -> ExecutionPolicy {
        let mut risk = reply
            .risk_level
            .as_deref()
            .map(RiskLevel::parse_lenient)
            .unwrap_or(RiskLevel::Low);

        let snapshot = self.catalog.snapshot();
        let destructive = selected.iter().any(|t| {
            snapshot
                .by_name(&t.tool_name)
                .map(|p| p.is_destructive())
                .unwrap_or(false)
        });

        let request_lower = user_request.to_lowercase();
        let touches_production = request_lower.contains("production")
            || request_lower.contains("prod")
            || context
                .entities
                .iter()
                .any(|e| e.value.to_lowercase().contains("prod"));
        let security_sensitive = ["security", "credential", "password", "certificate", "firewall"]
            .iter()
            .any(|marker| {
                request_lower.contains(marker)
                    || reply
                        .required_capabilities
                        .iter()
                        .any(|c| c.to_lowercase().contains(marker))
                    || reply.intent_action.to_lowercase().contains(marker)
            });

        if touches_production {
            risk = risk.max(RiskLevel::Medium);
        }
        if destructive {
            risk = risk.max(RiskLevel::High);
        }
        if security_sensitive {
            risk = risk.max(if destructive {
                RiskLevel::Critical
            } else {
                RiskLevel::High
            });
        }

        let requires_approval =
            reply.requires_approval || risk >= RiskLevel::High || destructive;
        ExecutionPolicy {
            risk_level: risk,
            requires_approval,
            auto_execute: !requires_approval && !selected.is_empty(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::AssetContextProvider;
    use crate::catalog::test_profiles::profile;
    use crate::config::{AssetConfig, BreakerConfig, PipelineConfig};
    use crate::guard::CircuitBreaker;
    use crate::llm::test_gateway::ScriptedGateway;
    use std::time::Duration;

    fn assets() -> Arc<AssetContextProvider> {
        let breaker = Arc::new(CircuitBreaker::new("asset-service", BreakerConfig::default()));
        Arc::new(AssetContextProvider::new(
            AssetConfig {
                service_url: "http://127.0.0.1:9".to_string(),
                fetch_timeout_secs: 1,
                ..AssetConfig::default()
            },
            breaker,
        ))
    }

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
                "linux",
                &["remote_shell"],
                &[("action", "run_command")],
            ),
            profile(
                "asset-query",
                "linux",
                &["asset_inventory"],
                &[("information", "list_assets")],
            ),
        ]))
    }

    fn selector(gateway: ScriptedGateway) -> CombinedSelector {
        CombinedSelector::new(
            Arc::new(gateway),
            catalog(),
            assets(),
            &PipelineConfig::default(),
        )
    }

    fn deadline() -> Deadline {
        Deadline::after(Duration::from_secs(30))
    }

    fn restart_reply() -> String {
        serde_json::json!({
            "intent_category": "action",
            "intent_action": "restart_service",
            "entities": [
                {"type": "hostname", "value": "web-prod-01"},
                {"type": "service", "value": "nginx"}
            ],
            "required_capabilities": ["service_restart"],
            "candidate_tools": [{"tool_name": "svc-restart", "why": "restarts services"}],
            "risk_level": "medium",
            "requires_approval": false,
            "selection_confidence": 0.92
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_action_selection_with_risk_clamp() {
        let selector = selector(ScriptedGateway::new().reply(restart_reply()));
        let mut context = RequestContext::new();

        let selection = selector
            .process("Restart nginx on web-prod-01", &mut context, deadline())
            .await
            .unwrap();

        assert_eq!(selection.canonical_tools(), vec!["svc-restart"]);
        assert_eq!(selection.next_stage, crate::pipeline::selection::NextStage::StageC);
        // Destructive capability clamps to at least high, which forces approval.
        assert_eq!(selection.policy.risk_level, RiskLevel::High);
        assert!(selection.policy.requires_approval);
        assert!(!selection.policy.auto_execute);
        assert_eq!(context.entity("hostname").unwrap().value, "web-prod-01");
    }

    #[tokio::test]
    async fn test_information_request_selects_nothing() {
        let reply = serde_json::json!({
            "intent_category": "information",
            "intent_action": "list_assets",
            "entities": [],
            "required_capabilities": [],
            "candidate_tools": [],
            "risk_level": "low",
            "requires_approval": false,
            "selection_confidence": 0.95
        })
        .to_string();
        let selector = selector(ScriptedGateway::new().reply(reply));
        let mut context = RequestContext::new();

        let selection = selector
            .process("How many Linux servers do we have?", &mut context, deadline())
            .await
            .unwrap();

        assert!(selection.is_empty());
        assert_eq!(selection.next_stage, crate::pipeline::selection::NextStage::StageD);
        assert!(selection.is_informational());
    }

    #[tokio::test]
    async fn test_unknown_tool_dropped_with_warning() {
        let reply = serde_json::json!({
            "intent_category": "action",
            "intent_action": "run_command",
            "entities": [],
            "required_capabilities": ["remote_shell"],
            "candidate_tools": [
                {"tool_name": "imaginary-tool", "why": "sounds right"},
                {"tool_name": "remote-shell", "why": "runs commands"}
            ],
            "risk_level": "low",
            "requires_approval": false,
            "selection_confidence": 0.8
        })
        .to_string();
        let selector = selector(ScriptedGateway::new().reply(reply));
        let mut context = RequestContext::new();

        let selection = selector
            .process("run uptime on the fleet", &mut context, deadline())
            .await
            .unwrap();

        assert_eq!(selection.canonical_tools(), vec!["remote-shell"]);
        assert!(selection.warnings.iter().any(|w| w.contains("imaginary-tool")));
    }

    #[tokio::test]
    async fn test_malformed_reply_retries_then_clarifies() {
        let gateway = ScriptedGateway::new()
            .reply("this is not json")
            .reply("still not json");
        let selector = selector(gateway);
        let mut context = RequestContext::new();

        let selection = selector
            .process("restart something", &mut context, deadline())
            .await
            .unwrap();

        assert!(selection.is_empty());
        assert_eq!(selection.selection_confidence, 0.0);
        assert!(!selection.is_informational());
        assert!(selection.warnings.iter().any(|w| w.contains("malformed")));
    }

    #[tokio::test]
    async fn test_malformed_then_valid_retry_succeeds() {
        let gateway = ScriptedGateway::new()
            .reply("garbage")
            .reply(restart_reply());
        let selector = selector(gateway);
        let mut context = RequestContext::new();

        let selection = selector
            .process("Restart nginx on web-prod-01", &mut context, deadline())
            .await
            .unwrap();
        assert_eq!(selection.canonical_tools(), vec!["svc-restart"]);
    }

    #[tokio::test]
    async fn test_fenced_json_accepted() {
        let fenced = format!("```json\n{}\n```", restart_reply());
        let selector = selector(ScriptedGateway::new().reply(fenced));
        let mut context = RequestContext::new();

        let selection = selector
            .process("Restart nginx on web-prod-01", &mut context, deadline())
            .await
            .unwrap();
        assert_eq!(selection.canonical_tools(), vec!["svc-restart"]);
    }

    #[tokio::test]
    async fn test_ip_entities_supplemented_deterministically() {
        let reply = serde_json::json!({
            "intent_category": "action",
            "intent_action": "run_command",
            "entities": [],
            "required_capabilities": ["remote_shell"],
            "candidate_tools": [{"tool_name": "remote-shell", "why": "shell"}],
            "risk_level": "low",
            "requires_approval": false,
            "selection_confidence": 0.85
        })
        .to_string();
        let selector = selector(ScriptedGateway::new().reply(reply));
        let mut context = RequestContext::new();

        selector
            .process(
                "list C:\\ on 192.168.50.213 and 192.168.50.214",
                &mut context,
                deadline(),
            )
            .await
            .unwrap();

        let ips: Vec<&str> = context
            .entities
            .iter()
            .filter(|e| e.entity_type == "ip_address")
            .map(|e| e.value.as_str())
            .collect();
        assert_eq!(ips, vec!["192.168.50.213", "192.168.50.214"]);
    }

    #[tokio::test]
    async fn test_llm_unavailable_propagates() {
        let gateway =
            ScriptedGateway::new().reply_error(|| Error::LlmUnavailable("503".to_string()));
        let selector = selector(gateway);
        let mut context = RequestContext::new();

        let err = selector
            .process("restart nginx", &mut context, deadline())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::LlmUnavailable(_)));
    }

    #[test]
    fn test_strip_fences() {
        assert_eq!(strip_fences("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_fences("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn test_truncate_history_keeps_tail() {
        let history = "## Previous Conversation History:\n\n**User:** one\n\n**Assistant:** two\n\n**User:** three\n\n---\n";
        let truncated = CombinedSelector::truncate_history(history, 2);
        assert!(!truncated.contains("one"));
        assert!(truncated.contains("two"));
        assert!(truncated.contains("three"));
    }
}
