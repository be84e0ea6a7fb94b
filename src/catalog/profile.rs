//! Tool profile records.

use serde::{Deserialize, Serialize};

/// Capability names treated as destructive for risk clamping.
const DESTRUCTIVE_MARKERS: &[&str] = &[
    "restart", "stop", "kill", "delete", "remove", "deploy", "rollback", "reboot", "shutdown",
    "terminate", "drop", "format", "wipe",
];

/// A named behavior a tool offers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capability {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Raw feature vector advertised by an invocation pattern.
///
/// `accuracy`, `completeness`, `cost`, and `complexity` are normalized to
/// [0, 1] at authoring time; `time_ms` is an absolute estimate and is min-max
/// normalized within a candidate set at scoring time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub time_ms: f64,
    pub cost: f64,
    pub accuracy: f64,
    pub completeness: f64,
    pub complexity: f64,
    #[serde(default)]
    pub limitations: Vec<String>,
}

/// A specific invocation shape of a tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationPattern {
    pub pattern_name: String,
    #[serde(default)]
    pub description: String,
    pub features: FeatureVector,
}

/// An input field a tool expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInput {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
}

/// An `(intent_category, intent_action)` pair a tool serves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntentTag {
    pub category: String,
    pub action: String,
}

/// A catalog entry describing one tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolProfile {
    pub tool_name: String,
    pub platform: String,
    pub category: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub patterns: Vec<InvocationPattern>,
    #[serde(default)]
    pub intent_tags: Vec<IntentTag>,
    #[serde(default)]
    pub inputs: Vec<ToolInput>,
}

impl ToolProfile {
    /// Whether this tool advertises a capability by name.
    pub fn has_capability(&self, name: &str) -> bool {
        self.capabilities
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Whether any capability name carries a destructive marker
    /// (restart/delete/deploy and friends).
    pub fn is_destructive(&self) -> bool {
        self.capabilities.iter().any(|c| {
            let name = c.name.to_lowercase();
            DESTRUCTIVE_MARKERS.iter().any(|m| name.contains(m))
        })
    }

    /// The pattern with the best advertised accuracy, used when a caller does
    /// not name one.
    pub fn default_pattern(&self) -> Option<&InvocationPattern> {
        self.patterns.iter().max_by(|a, b| {
            a.features
                .accuracy
                .partial_cmp(&b.features.accuracy)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    }

    /// Names of required inputs.
    pub fn required_inputs(&self) -> Vec<&str> {
        self.inputs
            .iter()
            .filter(|i| i.required)
            .map(|i| i.name.as_str())
            .collect()
    }

    /// One-line summary used in selection prompts.
    pub fn summary_line(&self) -> String {
        let capabilities = self
            .capabilities
            .iter()
            .map(|c| c.name.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        if capabilities.is_empty() {
            format!("{} ({}): {}", self.tool_name, self.platform, self.description)
        } else {
            format!(
                "{} ({}): {} [capabilities: {}]",
                self.tool_name, self.platform, self.description, capabilities
            )
        }
    }
}

#[cfg(test)]
pub(crate) mod test_profiles {
    use super::*;

    /// A minimal profile for tests.
    pub fn profile(
        name: &str,
        platform: &str,
        capabilities: &[&str],
        intents: &[(&str, &str)],
    ) -> ToolProfile {
        ToolProfile {
            tool_name: name.to_string(),
            platform: platform.to_string(),
            category: "system".to_string(),
            description: format!("{} tool", name),
            capabilities: capabilities
                .iter()
                .map(|c| Capability {
                    name: c.to_string(),
                    description: String::new(),
                })
                .collect(),
            patterns: vec![InvocationPattern {
                pattern_name: "default".to_string(),
                description: String::new(),
                features: FeatureVector {
                    time_ms: 1000.0,
                    cost: 0.1,
                    accuracy: 0.9,
                    completeness: 0.8,
                    complexity: 0.2,
                    limitations: Vec::new(),
                },
            }],
            intent_tags: intents
                .iter()
                .map(|(c, a)| IntentTag {
                    category: c.to_string(),
                    action: a.to_string(),
                })
                .collect(),
            inputs: vec![ToolInput {
                name: "target".to_string(),
                description: "host to act on".to_string(),
                required: true,
            }],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_profiles::profile;
    use super::*;

    #[test]
    fn test_destructive_detection() {
        let restart = profile("svc-restart", "linux", &["service_restart"], &[]);
        assert!(restart.is_destructive());

        let monitor = profile("sys-monitor", "linux", &["system_monitoring"], &[]);
        assert!(!monitor.is_destructive());
    }

    #[test]
    fn test_has_capability_is_case_insensitive() {
        let p = profile("svc-restart", "linux", &["Service_Restart"], &[]);
        assert!(p.has_capability("service_restart"));
        assert!(!p.has_capability("disk_cleanup"));
    }

    #[test]
    fn test_default_pattern_prefers_accuracy() {
        let mut p = profile("shell", "linux", &["remote_shell"], &[]);
        p.patterns.push(InvocationPattern {
            pattern_name: "thorough".to_string(),
            description: String::new(),
            features: FeatureVector {
                time_ms: 5000.0,
                cost: 0.3,
                accuracy: 0.99,
                completeness: 0.95,
                complexity: 0.4,
                limitations: Vec::new(),
            },
        });
        assert_eq!(p.default_pattern().unwrap().pattern_name, "thorough");
    }

    #[test]
    fn test_summary_line_lists_capabilities() {
        let p = profile("svc-restart", "linux", &["service_restart"], &[]);
        let line = p.summary_line();
        assert!(line.contains("svc-restart"));
        assert!(line.contains("service_restart"));
    }

    #[test]
    fn test_profile_json_roundtrip() {
        let p = profile("svc-restart", "linux", &["service_restart"], &[("action", "restart_service")]);
        let json = serde_json::to_string(&p).unwrap();
        let back: ToolProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(p, back);
    }
}
