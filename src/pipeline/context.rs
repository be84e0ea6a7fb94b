//! Request context threaded through all stages.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An entity extracted from the user request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Entity kind: `hostname`, `ip_address`, `target_host`, `service`, ...
    #[serde(rename = "type")]
    pub entity_type: String,
    pub value: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl Entity {
    pub fn new(entity_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            value: value.into(),
            tags: Vec::new(),
        }
    }

    /// Whether this entity names a target host needing inventory validation.
    pub fn is_target_host(&self) -> bool {
        matches!(
            self.entity_type.as_str(),
            "hostname" | "ip_address" | "target_host"
        )
    }

    /// Ad-hoc targets are exempt from inventory validation.
    pub fn is_ad_hoc(&self) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case("ad_hoc"))
    }
}

/// Mutable request-scoped context shared across stages.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestContext {
    #[serde(default)]
    pub tenant_id: String,
    #[serde(default)]
    pub actor_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// Pre-formatted prior-turn history for prompt injection
    #[serde(default)]
    pub conversation_history: String,
    #[serde(default)]
    pub clarification_attempts: u32,
    #[serde(default)]
    pub original_request: String,
    /// Entities extracted by the selection stage
    #[serde(default)]
    pub entities: Vec<Entity>,
    /// Free-form carry for stage-private annotations
    #[serde(default)]
    pub carry: HashMap<String, Value>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = tenant_id.into();
        self
    }

    pub fn with_actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = actor_id.into();
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Target-host entities requiring inventory validation.
    pub fn target_hosts(&self) -> Vec<&Entity> {
        self.entities
            .iter()
            .filter(|e| e.is_target_host() && !e.is_ad_hoc())
            .collect()
    }

    /// Any entity of the given type, first match.
    pub fn entity(&self, entity_type: &str) -> Option<&Entity> {
        self.entities.iter().find(|e| e.entity_type == entity_type)
    }

    pub fn set_carry(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.carry.insert(key.into(), value.into());
    }

    pub fn carry(&self, key: &str) -> Option<&Value> {
        self.carry.get(key)
    }
}
