//! Step runner contract and registry.
//!
//! Concrete runners (SSH, WinRM, HTTP, PowerShell) live outside the core;
//! each registers under the tool name it serves and must honor the deadline
//! it is handed.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::deadline::Deadline;
use crate::error::Result;

/// Outcome of one runner invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunnerOutput {
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    /// Structured output for API-style tools
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    pub exit_code: i32,
}

impl RunnerOutput {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// A registered executor for one tool.
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Execute with the resolved inputs. Implementations must return (or
    /// abort) before the deadline expires.
    async fn execute(&self, inputs: &HashMap<String, Value>, deadline: Deadline)
        -> Result<RunnerOutput>;
}

/// Runner lookup by tool name.
#[derive(Default)]
pub struct RunnerRegistry {
    runners: HashMap<String, Arc<dyn StepRunner>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a runner for a tool, replacing any previous registration.
    pub fn register(&mut self, tool_name: impl Into<String>, runner: Arc<dyn StepRunner>) {
        self.runners.insert(tool_name.into().to_lowercase(), runner);
    }

    pub fn with_runner(mut self, tool_name: impl Into<String>, runner: Arc<dyn StepRunner>) -> Self {
        self.register(tool_name, runner);
        self
    }

    /// Look up the runner for a tool, case-insensitively.
    pub fn get(&self, tool_name: &str) -> Option<Arc<dyn StepRunner>> {
        self.runners.get(&tool_name.to_lowercase()).cloned()
    }

    pub fn registered_tools(&self) -> Vec<&str> {
        self.runners.keys().map(|k| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.runners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runners.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod test_runners {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Runner returning a fixed stdout, recording every call's inputs.
    pub struct FixedRunner {
        pub stdout: String,
        pub exit_code: i32,
        pub delay: Duration,
        pub calls: Mutex<Vec<HashMap<String, Value>>>,
    }

    impl FixedRunner {
        pub fn ok(stdout: impl Into<String>) -> Self {
            Self {
                stdout: stdout.into(),
                exit_code: 0,
                delay: Duration::ZERO,
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn failing() -> Self {
            Self {
                stdout: String::new(),
                exit_code: 1,
                delay: Duration::ZERO,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl StepRunner for FixedRunner {
        async fn execute(
            &self,
            inputs: &HashMap<String, Value>,
            _deadline: Deadline,
        ) -> Result<RunnerOutput> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.calls.lock().unwrap().push(inputs.clone());
            Ok(RunnerOutput {
                stdout: self.stdout.clone(),
                stderr: if self.exit_code == 0 {
                    String::new()
                } else {
                    "command failed".to_string()
                },
                output: None,
                exit_code: self.exit_code,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_runners::FixedRunner;
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_registry_lookup_is_case_insensitive() {
        let registry =
            RunnerRegistry::new().with_runner("Remote-Shell", Arc::new(FixedRunner::ok("hi")));
        assert!(registry.get("remote-shell").is_some());
        assert!(registry.get("REMOTE-SHELL").is_some());
        assert!(registry.get("other").is_none());
    }

    #[tokio::test]
    async fn test_runner_roundtrip() {
        let runner = FixedRunner::ok("total 0\n");
        let mut inputs = HashMap::new();
        inputs.insert("target".to_string(), Value::String("web-01".to_string()));

        let output = runner
            .execute(&inputs, Deadline::after(Duration::from_secs(5)))
            .await
            .unwrap();
        assert!(output.is_success());
        assert_eq!(output.stdout, "total 0\n");
        assert_eq!(runner.calls.lock().unwrap().len(), 1);
    }
}
