//! Approval surfacing: approver roles, workflow validation, and summaries.

use serde::{Deserialize, Serialize};

use super::plan::ApprovalPoint;
use super::selection::RiskLevel;

/// Maps risk levels and operation types to required approver roles.
pub struct ApprovalRoles;

impl ApprovalRoles {
    /// Role required for a risk level alone.
    pub fn for_risk(risk_level: RiskLevel) -> &'static str {
        match risk_level {
            RiskLevel::Low => "team_lead",
            RiskLevel::Medium | RiskLevel::High => "operations_manager",
            RiskLevel::Critical => "security_officer",
        }
    }

    /// Operation-type override, when one applies.
    pub fn for_operation(operation_type: &str) -> Option<&'static str> {
        match operation_type {
            "security_change" | "user_access_modification" => Some("security_officer"),
            "database_migration" => Some("dba"),
            "network_change" => Some("network_administrator"),
            "service_restart" | "configuration_change" | "production_deployment" => {
                Some("operations_manager")
            }
            _ => None,
        }
    }

    /// The approver for a point: operation override first, then risk mapping.
    pub fn resolve(risk_level: RiskLevel, operation_type: &str) -> &'static str {
        Self::for_operation(operation_type).unwrap_or_else(|| Self::for_risk(risk_level))
    }
}

/// Fill in approver roles on a set of approval points.
pub fn assign_approvers(points: &mut [ApprovalPoint]) {
    for point in points.iter_mut() {
        point.approver_role =
            Some(ApprovalRoles::resolve(point.risk_level, &point.operation_type).to_string());
    }
}

/// Coordination complexity of an approval workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalComplexity {
    Low,
    Medium,
    High,
}

/// Summary of the approvals a plan needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalSummary {
    pub total_points: usize,
    pub required_roles: Vec<String>,
    pub estimated_time_s: u64,
    pub complexity: ApprovalComplexity,
    /// Validation findings worth surfacing to the operator
    pub warnings: Vec<String>,
}

/// Validate a workflow and summarize it for the operator.
///
/// Warnings flag critical points with no security-officer approver and
/// workflows spanning more than three roles.
pub fn summarize(points: &[ApprovalPoint]) -> ApprovalSummary {
    let mut required_roles: Vec<String> = Vec::new();
    for point in points {
        if let Some(role) = &point.approver_role {
            if !required_roles.contains(role) {
                required_roles.push(role.clone());
            }
        }
    }

    let critical_count = points
        .iter()
        .filter(|p| p.risk_level == RiskLevel::Critical)
        .count();

    let mut warnings = Vec::new();
    if critical_count > 0
        && !required_roles.iter().any(|r| r == "security_officer")
    {
        warnings.push(
            "critical operations present but no security officer approval required".to_string(),
        );
    }
    if required_roles.len() > 3 {
        warnings.push(format!(
            "{} approver roles required; coordination may be complex",
            required_roles.len()
        ));
    }

    // Base review time plus per-extra-role and per-critical-point overhead.
    let role_overhead = required_roles.len().saturating_sub(1) as u64 * 180;
    let critical_overhead = critical_count as u64 * 120;
    let estimated_time_s = if points.is_empty() {
        0
    } else {
        300 + role_overhead + critical_overhead
    };

    let complexity = if critical_count > 0 || required_roles.len() > 2 {
        ApprovalComplexity::High
    } else if points.len() > 2 || required_roles.len() > 1 {
        ApprovalComplexity::Medium
    } else {
        ApprovalComplexity::Low
    };

    ApprovalSummary {
        total_points: points.len(),
        required_roles,
        estimated_time_s,
        complexity,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(step_id: &str, risk_level: RiskLevel, operation_type: &str) -> ApprovalPoint {
        ApprovalPoint {
            step_id: step_id.to_string(),
            reason: "requires consent".to_string(),
            risk_level,
            operation_type: operation_type.to_string(),
            approver_role: None,
        }
    }

    #[test]
    fn test_risk_role_mapping() {
        assert_eq!(ApprovalRoles::for_risk(RiskLevel::Low), "team_lead");
        assert_eq!(ApprovalRoles::for_risk(RiskLevel::Medium), "operations_manager");
        assert_eq!(ApprovalRoles::for_risk(RiskLevel::High), "operations_manager");
        assert_eq!(ApprovalRoles::for_risk(RiskLevel::Critical), "security_officer");
    }

    #[test]
    fn test_operation_overrides() {
        assert_eq!(
            ApprovalRoles::resolve(RiskLevel::Low, "security_change"),
            "security_officer"
        );
        assert_eq!(
            ApprovalRoles::resolve(RiskLevel::Critical, "database_migration"),
            "dba"
        );
        assert_eq!(
            ApprovalRoles::resolve(RiskLevel::Low, "network_change"),
            "network_administrator"
        );
        // No override: falls back to risk mapping.
        assert_eq!(
            ApprovalRoles::resolve(RiskLevel::High, "general"),
            "operations_manager"
        );
    }

    #[test]
    fn test_assign_approvers_fills_roles() {
        let mut points = vec![
            point("s1", RiskLevel::High, "service_restart"),
            point("s2", RiskLevel::Critical, "general"),
        ];
        assign_approvers(&mut points);
        assert_eq!(points[0].approver_role.as_deref(), Some("operations_manager"));
        assert_eq!(points[1].approver_role.as_deref(), Some("security_officer"));
    }

    #[test]
    fn test_summary_estimates_and_roles() {
        let mut points = vec![
            point("s1", RiskLevel::High, "service_restart"),
            point("s2", RiskLevel::Critical, "security_change"),
        ];
        assign_approvers(&mut points);
        let summary = summarize(&points);

        assert_eq!(summary.total_points, 2);
        assert_eq!(summary.required_roles.len(), 2);
        // 300 base + 180 for the extra role + 120 for the critical point.
        assert_eq!(summary.estimated_time_s, 600);
        assert_eq!(summary.complexity, ApprovalComplexity::High);
        assert!(summary.warnings.is_empty());
    }

    #[test]
    fn test_summary_flags_unguarded_critical() {
        // A critical point whose operation override routes away from the
        // security officer.
        let mut points = vec![point("s1", RiskLevel::Critical, "database_migration")];
        assign_approvers(&mut points);
        let summary = summarize(&points);
        assert_eq!(summary.required_roles, vec!["dba"]);
        assert_eq!(summary.warnings.len(), 1);
        assert!(summary.warnings[0].contains("security officer"));
    }

    #[test]
    fn test_empty_workflow_summary() {
        let summary = summarize(&[]);
        assert_eq!(summary.total_points, 0);
        assert_eq!(summary.estimated_time_s, 0);
        assert_eq!(summary.complexity, ApprovalComplexity::Low);
    }
}
