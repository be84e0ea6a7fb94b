//! Catalog index with O(1) name lookup and copy-on-reload swapping.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use super::profile::ToolProfile;

/// Counts of tools per platform and per category.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogDistribution {
    pub by_platform: HashMap<String, usize>,
    pub by_category: HashMap<String, usize>,
}

/// An immutable snapshot of the loaded catalog.
pub struct CatalogIndex {
    profiles: Vec<Arc<ToolProfile>>,
    by_name: HashMap<String, usize>,
    by_capability: HashMap<String, Vec<usize>>,
    by_intent: HashMap<(String, String), Vec<usize>>,
}

impl CatalogIndex {
    fn build(profiles: Vec<ToolProfile>) -> Self {
        let profiles: Vec<Arc<ToolProfile>> = profiles.into_iter().map(Arc::new).collect();
        let mut by_name = HashMap::new();
        let mut by_capability: HashMap<String, Vec<usize>> = HashMap::new();
        let mut by_intent: HashMap<(String, String), Vec<usize>> = HashMap::new();

        for (i, profile) in profiles.iter().enumerate() {
            by_name.insert(profile.tool_name.to_lowercase(), i);
            for capability in &profile.capabilities {
                by_capability
                    .entry(capability.name.to_lowercase())
                    .or_default()
                    .push(i);
            }
            for tag in &profile.intent_tags {
                by_intent
                    .entry((tag.category.to_lowercase(), tag.action.to_lowercase()))
                    .or_default()
                    .push(i);
            }
        }

        Self {
            profiles,
            by_name,
            by_capability,
            by_intent,
        }
    }

    pub fn all(&self) -> &[Arc<ToolProfile>] {
        &self.profiles
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// O(1), case-insensitive name lookup. Misses return `None`, never panic.
    pub fn by_name(&self, name: &str) -> Option<Arc<ToolProfile>> {
        self.by_name
            .get(&name.to_lowercase())
            .map(|&i| Arc::clone(&self.profiles[i]))
    }

    /// Tools advertising a capability, in load order.
    pub fn by_capability(&self, capability: &str) -> Vec<Arc<ToolProfile>> {
        self.by_capability
            .get(&capability.to_lowercase())
            .map(|indices| indices.iter().map(|&i| Arc::clone(&self.profiles[i])).collect())
            .unwrap_or_default()
    }

    /// Tools tagged for an `(intent_category, intent_action)` pair.
    pub fn by_intent(&self, category: &str, action: &str) -> Vec<Arc<ToolProfile>> {
        self.by_intent
            .get(&(category.to_lowercase(), action.to_lowercase()))
            .map(|indices| indices.iter().map(|&i| Arc::clone(&self.profiles[i])).collect())
            .unwrap_or_default()
    }

    /// Platform/category distribution for health and ops tooling.
    pub fn distribution(&self) -> CatalogDistribution {
        let mut distribution = CatalogDistribution::default();
        for profile in &self.profiles {
            *distribution
                .by_platform
                .entry(profile.platform.to_lowercase())
                .or_default() += 1;
            *distribution
                .by_category
                .entry(profile.category.to_lowercase())
                .or_default() += 1;
        }
        distribution
    }
}

/// Shared handle to the catalog. Reads clone an `Arc` snapshot; reload swaps
/// the snapshot wholesale so a request never observes a half-updated index.
pub struct ToolCatalog {
    current: RwLock<Arc<CatalogIndex>>,
}

impl ToolCatalog {
    /// Build a catalog from loaded profiles.
    pub fn new(profiles: Vec<ToolProfile>) -> Self {
        Self {
            current: RwLock::new(Arc::new(CatalogIndex::build(profiles))),
        }
    }

    /// Snapshot for the duration of one request.
    pub fn snapshot(&self) -> Arc<CatalogIndex> {
        Arc::clone(&self.current.read().expect("catalog lock poisoned"))
    }

    /// Atomically replace the index with freshly loaded profiles.
    pub fn reload(&self, profiles: Vec<ToolProfile>) {
        let next = Arc::new(CatalogIndex::build(profiles));
        *self.current.write().expect("catalog lock poisoned") = next;
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<ToolProfile>> {
        self.snapshot().by_name(name)
    }

    pub fn by_capability(&self, capability: &str) -> Vec<Arc<ToolProfile>> {
        self.snapshot().by_capability(capability)
    }

    pub fn by_intent(&self, category: &str, action: &str) -> Vec<Arc<ToolProfile>> {
        self.snapshot().by_intent(category, action)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::super::profile::test_profiles::profile;
    use super::*;

    fn catalog() -> ToolCatalog {
        ToolCatalog::new(vec![
            profile(
                "svc-restart",
                "linux",
                &["service_restart"],
                &[("action", "restart_service")],
            ),
            profile(
                "sys-monitor",
                "linux",
                &["system_monitoring"],
                &[("information", "check_status")],
            ),
            profile(
                "win-shell",
                "windows",
                &["remote_shell", "system_monitoring"],
                &[("action", "run_command")],
            ),
        ])
    }

    #[test]
    fn test_by_name_lookup() {
        let catalog = catalog();
        assert_eq!(catalog.by_name("svc-restart").unwrap().platform, "linux");
        assert_eq!(catalog.by_name("SVC-RESTART").unwrap().tool_name, "svc-restart");
        assert!(catalog.by_name("missing").is_none());
    }

    #[test]
    fn test_by_capability_preserves_load_order() {
        let catalog = catalog();
        let monitors = catalog.by_capability("system_monitoring");
        assert_eq!(monitors.len(), 2);
        assert_eq!(monitors[0].tool_name, "sys-monitor");
        assert_eq!(monitors[1].tool_name, "win-shell");
    }

    #[test]
    fn test_by_intent_lookup() {
        let catalog = catalog();
        let tools = catalog.by_intent("action", "restart_service");
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].tool_name, "svc-restart");
        assert!(catalog.by_intent("action", "unknown").is_empty());
    }

    #[test]
    fn test_reload_swaps_snapshot() {
        let catalog = catalog();
        let before = catalog.snapshot();
        assert_eq!(before.len(), 3);

        catalog.reload(vec![profile("only", "linux", &["remote_shell"], &[])]);
        assert_eq!(catalog.len(), 1);
        assert!(catalog.by_name("svc-restart").is_none());

        // The old snapshot stays consistent for requests holding it.
        assert_eq!(before.len(), 3);
        assert!(before.by_name("svc-restart").is_some());
    }

    #[test]
    fn test_distribution_counts() {
        let catalog = catalog();
        let distribution = catalog.snapshot().distribution();
        assert_eq!(distribution.by_platform["linux"], 2);
        assert_eq!(distribution.by_platform["windows"], 1);
        assert_eq!(distribution.by_category["system"], 3);
    }
}
