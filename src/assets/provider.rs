//! Asset context provider: guarded fetching and prompt-ready formatting.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use crate::config::AssetConfig;
use crate::error::{Error, Result};
use crate::guard::{CircuitBreaker, TtlCache};

use super::heuristic;
use super::types::Asset;

/// Upper bound on the compact schema-only context block.
pub const COMPACT_CONTEXT_MAX_LEN: usize = 1024;

/// Schema-only context, injected when live data is unavailable or oversized.
const COMPACT_CONTEXT: &str = "\
## Asset Inventory Schema
Each managed asset carries: hostname, ip_address, os_type, os_version, \
environment (production/staging/development), tags, status, and \
service-specific metadata. Query the inventory before asserting anything \
about concrete hosts; hosts outside the inventory are ad-hoc targets.";

/// Resolution result for one user-named target.
#[derive(Debug, Clone)]
pub struct TargetContext {
    /// Whether the target resolved to an inventory asset
    pub is_asset: bool,
    /// The matching record, when resolved
    pub asset: Option<Asset>,
    /// Prompt-ready one-liner describing the target
    pub summary: String,
}

#[derive(Debug, Deserialize)]
struct AssetEnvelope {
    data: AssetData,
}

#[derive(Debug, Deserialize)]
struct AssetData {
    #[serde(default)]
    assets: Vec<Asset>,
}

/// Fetches and formats infrastructure inventory for prompt injection.
///
/// Every fetch is wrapped by the shared asset-service circuit breaker and a
/// TTL'd LRU cache keyed by the query fingerprint.
pub struct AssetContextProvider {
    config: AssetConfig,
    http: Client,
    cache: TtlCache<Vec<Asset>>,
    breaker: Arc<CircuitBreaker>,
}

impl AssetContextProvider {
    pub fn new(config: AssetConfig, breaker: Arc<CircuitBreaker>) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.fetch_timeout_secs))
            .build()
            .unwrap_or_default();
        let cache = TtlCache::new(config.cache_size, Duration::from_secs(config.cache_ttl_secs));
        Self {
            config,
            http,
            cache,
            breaker,
        }
    }

    /// Deterministic injection heuristic; see [`heuristic::should_inject`].
    pub fn should_inject(&self, query: &str) -> bool {
        heuristic::should_inject(query)
    }

    fn cache_key(filter: Option<&str>, limit: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(filter.unwrap_or("").as_bytes());
        hasher.update(b"|");
        hasher.update(limit.to_string().as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Fetch assets matching `filter`, up to `limit`.
    ///
    /// Cache hits skip the service entirely. Circuit-open and transport
    /// failures surface as [`Error::AssetServiceDegraded`] so callers can
    /// continue without context.
    pub async fn fetch_assets(&self, filter: Option<&str>, limit: usize) -> Result<Vec<Asset>> {
        let key = Self::cache_key(filter, limit);
        if let Some(assets) = self.cache.get(&key) {
            tracing::debug!(filter = filter.unwrap_or(""), limit, "asset cache hit");
            return Ok(assets);
        }

        let url = self.config.service_url.clone();
        let http = self.http.clone();
        let filter_owned = filter.map(str::to_string);

        let assets = self
            .breaker
            .call(move || async move {
                let mut request = http.get(format!("{}/", url.trim_end_matches('/')));
                if let Some(search) = &filter_owned {
                    request = request.query(&[("search", search.as_str())]);
                }
                request = request.query(&[("limit", limit.to_string())]);

                let response = request.send().await.map_err(|e| {
                    Error::AssetServiceDegraded(format!("asset service request failed: {}", e))
                })?;

                let status = response.status();
                if !status.is_success() {
                    return Err(Error::AssetServiceDegraded(format!(
                        "asset service returned {}",
                        status
                    )));
                }

                let envelope: AssetEnvelope = response.json().await.map_err(|e| {
                    Error::AssetServiceDegraded(format!("asset payload unreadable: {}", e))
                })?;
                Ok(envelope.data.assets)
            })
            .await
            .map_err(|e| match e {
                Error::CircuitOpen { .. } => {
                    Error::AssetServiceDegraded("asset service circuit open".to_string())
                }
                other => other,
            })?;

        self.cache.put(key, assets.clone());
        Ok(assets)
    }

    /// Schema-only context block, fixed size, no I/O.
    pub fn compact_context(&self) -> &'static str {
        debug_assert!(COMPACT_CONTEXT.len() <= COMPACT_CONTEXT_MAX_LEN);
        COMPACT_CONTEXT
    }

    /// Schema plus a live-data summary for up to `max_assets` hosts.
    pub async fn comprehensive_context(&self, max_assets: usize) -> Result<String> {
        let assets = self.fetch_assets(None, max_assets).await?;

        let mut by_os: std::collections::BTreeMap<String, usize> = Default::default();
        let mut by_environment: std::collections::BTreeMap<String, usize> = Default::default();
        for asset in &assets {
            *by_os.entry(asset.os_type.to_lowercase()).or_default() += 1;
            *by_environment
                .entry(asset.environment.to_lowercase())
                .or_default() += 1;
        }

        let mut block = String::from(COMPACT_CONTEXT);
        block.push_str("\n\n## Live Inventory Summary\n");
        block.push_str(&format!("Total assets (sampled): {}\n", assets.len()));
        block.push_str("By OS: ");
        block.push_str(
            &by_os
                .iter()
                .map(|(os, n)| format!("{}={}", os, n))
                .collect::<Vec<_>>()
                .join(", "),
        );
        block.push_str("\nBy environment: ");
        block.push_str(
            &by_environment
                .iter()
                .map(|(env, n)| format!("{}={}", env, n))
                .collect::<Vec<_>>()
                .join(", "),
        );
        block.push_str("\n\n## Assets\n");
        for asset in &assets {
            block.push_str("- ");
            block.push_str(&asset.summary_line());
            block.push('\n');
        }
        Ok(block)
    }

    /// Resolve a hostname or IP against the inventory.
    pub async fn context_for_target(&self, target: &str) -> Result<TargetContext> {
        let asset = self.resolve_host(target).await?;
        Ok(match asset {
            Some(asset) => TargetContext {
                is_asset: true,
                summary: format!("Inventory asset: {}", asset.summary_line()),
                asset: Some(asset),
            },
            None => TargetContext {
                is_asset: false,
                asset: None,
                summary: format!("Ad-hoc target '{}', not in inventory", target),
            },
        })
    }

    /// Find the inventory record answering to a hostname or IP, if any.
    pub async fn resolve_host(&self, host: &str) -> Result<Option<Asset>> {
        let assets = self.fetch_assets(Some(host), 10).await?;
        Ok(assets.into_iter().find(|a| a.matches_host(host)))
    }

    /// Cache statistics for observability.
    pub fn cache_stats(&self) -> crate::guard::CacheStats {
        self.cache.stats()
    }

    #[cfg(test)]
    pub(crate) fn seed_cache(&self, filter: Option<&str>, limit: usize, assets: Vec<Asset>) {
        self.cache.put(Self::cache_key(filter, limit), assets);
    }
}
