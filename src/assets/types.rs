//! Asset inventory records.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An inventory entry describing a managed host or device.
///
/// Unknown fields from the asset service are carried through untouched so the
/// core stays forward-compatible with inventory schema growth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub ip_address: String,
    #[serde(default)]
    pub os_type: String,
    #[serde(default)]
    pub os_version: String,
    #[serde(default)]
    pub environment: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub status: String,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl Asset {
    /// Whether this asset answers to the given hostname or IP.
    pub fn matches_host(&self, host: &str) -> bool {
        self.hostname.eq_ignore_ascii_case(host) || self.ip_address == host
    }

    /// Whether the asset carries a tag (case-insensitive).
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    /// One-line rendering for context blocks.
    pub fn summary_line(&self) -> String {
        format!(
            "{} ({}) — {} {} [{}] status={}",
            self.hostname,
            self.ip_address,
            self.os_type,
            self.os_version,
            self.environment,
            self.status
        )
    }
}

#[cfg(test)]
pub(crate) mod test_assets {
    use super::*;

    pub fn asset(hostname: &str, ip: &str, os_type: &str, environment: &str) -> Asset {
        Asset {
            id: None,
            hostname: hostname.to_string(),
            ip_address: ip.to_string(),
            os_type: os_type.to_string(),
            os_version: "1.0".to_string(),
            environment: environment.to_string(),
            tags: Vec::new(),
            status: "active".to_string(),
            extra: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_assets::asset;
    use super::*;

    #[test]
    fn test_matches_host_by_name_or_ip() {
        let a = asset("web-prod-01", "10.0.0.5", "linux", "production");
        assert!(a.matches_host("web-prod-01"));
        assert!(a.matches_host("WEB-PROD-01"));
        assert!(a.matches_host("10.0.0.5"));
        assert!(!a.matches_host("10.0.0.6"));
    }

    #[test]
    fn test_unknown_fields_pass_through() {
        let raw = r#"{
            "hostname": "db-01",
            "ip_address": "10.0.0.9",
            "os_type": "linux",
            "rack": "r7",
            "owner": {"team": "data"}
        }"#;
        let a: Asset = serde_json::from_str(raw).unwrap();
        assert_eq!(a.extra["rack"], Value::String("r7".to_string()));

        let back = serde_json::to_value(&a).unwrap();
        assert_eq!(back["rack"], Value::String("r7".to_string()));
        assert_eq!(back["owner"]["team"], Value::String("data".to_string()));
    }

    #[test]
    fn test_has_tag() {
        let mut a = asset("web-01", "10.0.0.5", "linux", "production");
        a.tags = vec!["Production".to_string(), "web".to_string()];
        assert!(a.has_tag("production"));
        assert!(!a.has_tag("database"));
    }
}
