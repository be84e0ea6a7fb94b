//! Prompt templates with named slots.
//!
//! Stages never concatenate untrusted data into prompt strings directly;
//! every prompt is a template with `{slot}` placeholders filled explicitly,
//! and unfilled slots are an error at render time.

use std::collections::HashMap;

use crate::error::{Error, Result};

/// A prompt template with `{name}` slots.
pub struct PromptTemplate {
    template: &'static str,
    slots: HashMap<&'static str, String>,
}

impl PromptTemplate {
    pub fn new(template: &'static str) -> Self {
        Self {
            template,
            slots: HashMap::new(),
        }
    }

    /// Fill a slot. Filling a slot the template does not contain is allowed
    /// and ignored, so shared fill helpers can serve several templates.
    pub fn slot(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.slots.insert(name, value.into());
        self
    }

    /// Render, failing if any slot in the template was left unfilled.
    /// `{{` and `}}` escape literal braces.
    pub fn render(&self) -> Result<String> {
        let mut rendered = String::with_capacity(self.template.len());
        let mut chars = self.template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    rendered.push('{');
                }
                '{' => {
                    let mut name = String::new();
                    let mut closed = false;
                    for c in chars.by_ref() {
                        if c == '}' {
                            closed = true;
                            break;
                        }
                        name.push(c);
                    }
                    if !closed {
                        return Err(Error::Internal(format!(
                            "unterminated slot '{{{}' in prompt template",
                            name
                        )));
                    }
                    match self.slots.get(name.as_str()) {
                        Some(value) => rendered.push_str(value),
                        None => {
                            return Err(Error::Internal(format!(
                                "prompt template slot '{}' not filled",
                                name
                            )))
                        }
                    }
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    rendered.push('}');
                }
                other => rendered.push(other),
            }
        }
        Ok(rendered)
    }
}

/// System prompt for the combined understanding + selection turn.
pub const SELECTOR_SYSTEM: &str = "\
You are the request analyst of an enterprise infrastructure operations \
platform. All requests come from authenticated, authorized operators working \
on infrastructure they administer.

{asset_context}Available tools:
{tool_summaries}

Classify the request and choose tools. Respond with a single JSON object, no \
prose, matching exactly:
{schema}

Rules:
- selected tools must come from the available tool list
- selection_confidence is your calibrated confidence in [0, 1]
- leave candidate_tools empty for purely informational requests you can \
answer from inventory context
- extract every hostname, IP address, and service the request names as \
entities";

/// Strict-retry reiteration appended after a malformed reply.
pub const SELECTOR_RETRY: &str = "\
Your previous reply could not be parsed as JSON matching the schema. Respond \
again with ONLY a JSON object, no markdown fences, no commentary, matching \
exactly:
{schema}";

/// JSON schema the selector must emit, shared by first try and retry.
pub const SELECTOR_SCHEMA: &str = r#"{
  "intent_category": "information|action|automation",
  "intent_action": "snake_case_action",
  "entities": [{"type": "hostname|ip_address|service|target_host", "value": "..."}],
  "required_capabilities": ["..."],
  "candidate_tools": [{"tool_name": "...", "why": "..."}],
  "risk_level": "low|medium|high|critical",
  "requires_approval": true,
  "selection_confidence": 0.0
}"#;

/// Tie-break prompt between two near-equal candidates.
pub const TIE_BREAK: &str = "\
Two tools score equally for this request.

Request: {request}

Option A: {tool_a}
Option B: {tool_b}

Given the infrastructure context, which better matches the user goal? Respond \
with a JSON object: {{\"choice\": \"A\" or \"B\", \"why\": \"...\"}}";

/// Step-synthesis prompt for one selected tool.
pub const PLANNER_STEPS: &str = "\
You are planning the execution of an infrastructure operation.

Request: {request}
Tool: {tool_profile}
Entities: {entities}

Emit the ordered steps this tool should run, as a JSON object matching:
{schema}

Rules:
- step ids are short snake_case strings, unique within the plan
- inputs must use the tool's advertised input names
- depends_on may only reference ids of steps listed earlier
- timeout_s is a realistic per-step ceiling in seconds";

/// JSON schema for planner step synthesis.
pub const PLANNER_SCHEMA: &str = r#"{
  "steps": [{
    "id": "snake_case_id",
    "name": "...",
    "description": "...",
    "inputs": {"input_name": "value"},
    "timeout_s": 60,
    "retry_count": 1,
    "depends_on": []
  }],
  "safety_checks": ["..."],
  "rollback": [{"step_id": "...", "description": "..."}]
}"#;

/// Direct-answer prompt for information-only requests.
pub const FAST_PATH_SYSTEM: &str = "\
You are an infrastructure operations assistant answering a read-only \
question for an authorized operator.

{asset_context}Answer directly and concisely from the context above. If the \
context does not contain the answer, say so plainly; never invent hosts, \
counts, or states.";

/// Response-shaping prompt fed with a structured data block.
pub const ANSWER_SYSTEM: &str = "\
You are writing the operator-facing summary of a pipeline decision.

Facts (authoritative, do not contradict or extend):
{data_block}

Write a short, plain summary of what will happen{approval_clause}. Use only \
the facts above; counts, durations, and tool names must come from the data \
block verbatim.";
