//! Deterministic context-injection heuristic.
//!
//! A request gets the asset context block iff it mentions an infrastructure
//! noun, an environment or OS family, a well-known service, or an IP-like
//! token. Purely lexical, no I/O.

use std::sync::LazyLock;

use regex::Regex;

static INFRA_NOUNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)\b(
        host|hosts|hostname|server|servers|node|nodes|vm|vms|machine|machines|
        asset|assets|inventory|infrastructure|datacenter|cluster|fleet|
        production|prod|staging|development|dev|qa|test\s+environment|
        linux|windows|ubuntu|debian|centos|rhel|macos|
        nginx|apache|mysql|postgres|postgresql|redis|docker|kubernetes|k8s|
        iis|sqlserver|mssql|mongodb|rabbitmq|elasticsearch
        )\b",
    )
    .expect("infrastructure noun pattern compiles")
});

static IP_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").expect("IP pattern compiles")
});

static HOSTNAME_LIKE: LazyLock<Regex> = LazyLock::new(|| {
    // Dash-separated names like web-prod-01 or db-east-2.
    Regex::new(r"\b[a-zA-Z][a-zA-Z0-9]*(?:-[a-zA-Z0-9]+)+\b").expect("hostname pattern compiles")
});

/// True iff the query is about infrastructure and deserves asset context.
pub fn should_inject(query: &str) -> bool {
    INFRA_NOUNS.is_match(query) || IP_LIKE.is_match(query)
}

/// Extract tokens that look like hostnames or IP addresses.
///
/// This backs up the LLM's entity extraction: anything it misses that still
/// looks like a target host gets validated against the inventory.
pub fn extract_host_candidates(query: &str) -> Vec<String> {
    let mut candidates: Vec<String> = Vec::new();
    for m in IP_LIKE.find_iter(query) {
        let token = m.as_str().to_string();
        if !candidates.contains(&token) {
            candidates.push(token);
        }
    }
    for m in HOSTNAME_LIKE.find_iter(query) {
        let token = m.as_str().to_string();
        // Skip words the noun pattern already classifies as generic infra terms.
        if INFRA_NOUNS.is_match(&token) && !token.contains('-') {
            continue;
        }
        if !candidates.contains(&token) {
            candidates.push(token);
        }
    }
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_infrastructure_nouns_inject() {
        assert!(should_inject("How many Linux servers do we have?"));
        assert!(should_inject("restart nginx on the production host"));
        assert!(should_inject("what VMs are in staging"));
    }

    #[test]
    fn test_ip_addresses_inject() {
        assert!(should_inject("list C:\\ on 192.168.50.213"));
        assert!(should_inject("ping 10.0.0.99"));
    }

    #[test]
    fn test_small_talk_does_not_inject() {
        assert!(!should_inject("hello there"));
        assert!(!should_inject("what time is it"));
        assert!(!should_inject("thanks, that helped"));
    }

    #[test]
    fn test_extract_ips() {
        let hosts = extract_host_candidates("list C:\\ on 192.168.50.213 and 192.168.50.214");
        assert_eq!(hosts, vec!["192.168.50.213", "192.168.50.214"]);
    }

    #[test]
    fn test_extract_hostnames() {
        let hosts = extract_host_candidates("Restart nginx on web-prod-01");
        assert!(hosts.contains(&"web-prod-01".to_string()));
    }

    #[test]
    fn test_extract_deduplicates() {
        let hosts = extract_host_candidates("ping 10.0.0.1 then ping 10.0.0.1 again");
        assert_eq!(hosts, vec!["10.0.0.1"]);
    }
}
