//! Plan record: the planner stage output.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::catalog::CatalogIndex;
use crate::error::{Error, Result};

use super::selection::RiskLevel;

/// One ordered step of an execution plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Catalog tool executing this step
    pub tool: String,
    #[serde(default)]
    pub inputs: HashMap<String, serde_json::Value>,
    pub timeout_s: u64,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A compensating action for a destructive step, or an explicit statement
/// that none is feasible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackEntry {
    pub step_id: String,
    pub description: String,
}

impl RollbackEntry {
    /// Marker used when a destructive step cannot be compensated.
    pub const NONE_FEASIBLE: &'static str = "no rollback feasible";

    pub fn infeasible(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            description: Self::NONE_FEASIBLE.to_string(),
        }
    }
}

/// A step that cannot execute without a named role's consent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalPoint {
    pub step_id: String,
    pub reason: String,
    pub risk_level: RiskLevel,
    /// Operation classification used for approver-role overrides
    #[serde(default)]
    pub operation_type: String,
    /// Filled in by the answerer's approval surfacing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver_role: Option<String>,
}

/// Aggregate plan metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub total_estimated_time_s: u64,
    #[serde(default)]
    pub risk_factors: Vec<String>,
    #[serde(default)]
    pub approval_points: Vec<ApprovalPoint>,
}

/// Output of the planner stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    pub plan_id: String,
    pub decision_id: String,
    pub steps: Vec<PlanStep>,
    #[serde(default)]
    pub safety_checks: Vec<String>,
    #[serde(default)]
    pub rollback_plan: Vec<RollbackEntry>,
    pub execution_metadata: ExecutionMetadata,
    #[serde(default)]
    pub warnings: Vec<String>,
}

impl ExecutionPlan {
    pub fn step(&self, id: &str) -> Option<&PlanStep> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Step ids in declaration order.
    pub fn step_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.id.as_str()).collect()
    }

    /// Steps with no dependents; failures here do not block anything else.
    pub fn leaf_steps(&self) -> HashSet<&str> {
        let mut leaves: HashSet<&str> = self.steps.iter().map(|s| s.id.as_str()).collect();
        for step in &self.steps {
            for dep in &step.depends_on {
                leaves.remove(dep.as_str());
            }
        }
        leaves
    }

    /// Structural validation.
    ///
    /// - at least one step, within the configured cap
    /// - unique step ids
    /// - every `tool` resolves in the catalog (hard error)
    /// - every `depends_on` names a strictly earlier step
    pub fn validate(&self, catalog: &CatalogIndex, max_steps: usize) -> Result<()> {
        if self.steps.is_empty() {
            return Err(Error::PlanInvalid("plan has no steps".to_string()));
        }
        if self.steps.len() > max_steps {
            return Err(Error::PlanInvalid(format!(
                "plan has {} steps, cap is {}",
                self.steps.len(),
                max_steps
            )));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.id.as_str()) {
                return Err(Error::PlanInvalid(format!("duplicate step id '{}'", step.id)));
            }
        }

        let mut earlier: HashSet<&str> = HashSet::new();
        for step in &self.steps {
            if catalog.by_name(&step.tool).is_none() {
                return Err(Error::catalog_miss(&step.tool));
            }
            for dep in &step.depends_on {
                if !earlier.contains(dep.as_str()) {
                    return Err(Error::PlanInvalid(format!(
                        "step '{}' depends on '{}', which is not an earlier step",
                        step.id, dep
                    )));
                }
            }
            earlier.insert(step.id.as_str());
        }
        Ok(())
    }

    /// Sum of step timeouts, the pessimistic sequential duration.
    pub fn estimated_sequential_time_s(&self) -> u64 {
        self.steps.iter().map(|s| s.timeout_s).sum()
    }
}


#[cfg(test)]
mod tests {
    use super::test_plans::{plan, step};
    use super::*;
    use crate::catalog::ToolCatalog;

    fn catalog() -> ToolCatalog {
        ToolCatalog::new(vec![
            crate::catalog::test_profiles::profile("remote-shell", "linux", &["remote_shell"], &[]),
            crate::catalog::test_profiles::profile("svc-restart", "linux", &["service_restart"], &[]),
        ])
    }

    #[test]
    fn test_valid_plan_passes() {
        let p = plan(vec![
            step("s1", "remote-shell", &[]),
            step("s2", "svc-restart", &["s1"]),
        ]);
        assert!(p.validate(&catalog().snapshot(), 20).is_ok());
    }

    #[test]
    fn test_empty_plan_rejected() {
        let p = plan(Vec::new());
        assert!(matches!(
            p.validate(&catalog().snapshot(), 20),
            Err(Error::PlanInvalid(_))
        ));
    }

    #[test]
    fn test_unknown_tool_is_catalog_miss() {
        let p = plan(vec![step("s1", "no-such-tool", &[])]);
        assert!(matches!(
            p.validate(&catalog().snapshot(), 20),
            Err(Error::CatalogMiss { .. })
        ));
    }

    #[test]
    fn test_forward_dependency_rejected() {
        let p = plan(vec![
            step("s1", "remote-shell", &["s2"]),
            step("s2", "remote-shell", &[]),
        ]);
        assert!(matches!(
            p.validate(&catalog().snapshot(), 20),
            Err(Error::PlanInvalid(_))
        ));
    }

    #[test]
    fn test_self_dependency_rejected() {
        let p = plan(vec![step("s1", "remote-shell", &["s1"])]);
        assert!(p.validate(&catalog().snapshot(), 20).is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let p = plan(vec![
            step("s1", "remote-shell", &[]),
            step("s1", "svc-restart", &[]),
        ]);
        assert!(p.validate(&catalog().snapshot(), 20).is_err());
    }

    #[test]
    fn test_step_cap_enforced() {
        let steps = (0..5).map(|i| step(&format!("s{}", i), "remote-shell", &[])).collect();
        let p = plan(steps);
        assert!(p.validate(&catalog().snapshot(), 3).is_err());
    }

    proptest::proptest! {
        // Chains where every step depends on its predecessor always validate,
        // regardless of length (within the cap).
        #[test]
        fn prop_linear_chains_validate(len in 1usize..15) {
            let steps: Vec<PlanStep> = (0..len)
                .map(|i| {
                    let mut s = step(&format!("s{}", i), "remote-shell", &[]);
                    if i > 0 {
                        s.depends_on = vec![format!("s{}", i - 1)];
                    }
                    s
                })
                .collect();
            let p = plan(steps);
            proptest::prop_assert!(p.validate(&catalog().snapshot(), 20).is_ok());
        }

        // Reversing any dependency edge makes it forward-referencing and
        // must be rejected.
        #[test]
        fn prop_forward_references_rejected(len in 2usize..15) {
            let steps: Vec<PlanStep> = (0..len)
                .map(|i| {
                    let mut s = step(&format!("s{}", i), "remote-shell", &[]);
                    if i == 0 {
                        s.depends_on = vec![format!("s{}", len - 1)];
                    }
                    s
                })
                .collect();
            let p = plan(steps);
            proptest::prop_assert!(p.validate(&catalog().snapshot(), 20).is_err());
        }
    }

    #[test]
    fn test_leaf_steps() {
        let p = plan(vec![
            step("s1", "remote-shell", &[]),
            step("s2", "remote-shell", &["s1"]),
            step("s3", "remote-shell", &["s1"]),
        ]);
        let leaves = p.leaf_steps();
        assert!(leaves.contains("s2"));
        assert!(leaves.contains("s3"));
        assert!(!leaves.contains("s1"));
    }
}
