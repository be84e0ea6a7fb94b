//! Rolling pipeline metrics and health grading.
//!
//! Per-request metrics are appended to a bounded history under a mutex; reads
//! take a snapshot copy so aggregation never blocks request processing.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Terminal status of a pipeline request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

/// Metrics for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestMetrics {
    pub request_id: String,
    pub total_ms: f64,
    /// Stage key → duration in ms
    pub stage_durations: HashMap<String, f64>,
    pub memory_mb: f64,
    pub timestamp: DateTime<Utc>,
    pub status: PipelineStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_details: Option<String>,
}

/// Latency percentiles over the retained history.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LatencyPercentiles {
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

/// Aggregate metrics snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_requests: usize,
    pub success_count: u64,
    pub error_count: u64,
    pub success_rate: f64,
    pub average_total_ms: f64,
    pub total_percentiles: LatencyPercentiles,
    /// Stage key → average duration in ms
    pub stage_averages: HashMap<String, f64>,
    /// Stage key → latency percentiles
    pub stage_percentiles: HashMap<String, LatencyPercentiles>,
}

/// Overall health grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Health report derived from the rolling metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    pub success_rate: f64,
    pub average_total_ms: f64,
    pub active_requests: usize,
    /// Stage key → last successful completion
    pub stage_last_success: HashMap<String, DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
}

/// Nearest-rank percentile over unsorted samples.
fn percentile(samples: &[f64], p: f64) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[rank.min(sorted.len() - 1)]
}

fn percentiles(samples: &[f64]) -> LatencyPercentiles {
    LatencyPercentiles {
        p50: percentile(samples, 50.0),
        p90: percentile(samples, 90.0),
        p95: percentile(samples, 95.0),
        p99: percentile(samples, 99.0),
    }
}

struct HistoryInner {
    completed: VecDeque<RequestMetrics>,
    success_count: u64,
    error_count: u64,
    active_requests: usize,
    stage_last_success: HashMap<String, DateTime<Utc>>,
}

/// Bounded metrics history shared by the orchestrator.
pub struct MetricsHistory {
    max_history: usize,
    inner: Mutex<HistoryInner>,
}

impl MetricsHistory {
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history: max_history.max(1),
            inner: Mutex::new(HistoryInner {
                completed: VecDeque::new(),
                success_count: 0,
                error_count: 0,
                active_requests: 0,
                stage_last_success: HashMap::new(),
            }),
        }
    }

    pub fn request_started(&self) {
        self.inner.lock().expect("metrics lock poisoned").active_requests += 1;
    }

    /// Record a finished request and retire its active slot.
    pub fn record(&self, metrics: RequestMetrics) {
        let mut inner = self.inner.lock().expect("metrics lock poisoned");
        inner.active_requests = inner.active_requests.saturating_sub(1);
        match metrics.status {
            PipelineStatus::Completed => {
                inner.success_count += 1;
                let now = metrics.timestamp;
                for stage in metrics.stage_durations.keys() {
                    inner.stage_last_success.insert(stage.clone(), now);
                }
            }
            _ => inner.error_count += 1,
        }
        inner.completed.push_back(metrics);
        while inner.completed.len() > self.max_history {
            inner.completed.pop_front();
        }
    }

    /// Aggregate snapshot over the retained history.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.inner.lock().expect("metrics lock poisoned");
        let completed: Vec<RequestMetrics> = inner.completed.iter().cloned().collect();
        let success_count = inner.success_count;
        let error_count = inner.error_count;
        drop(inner);

        let totals: Vec<f64> = completed.iter().map(|m| m.total_ms).collect();
        let average_total_ms = if totals.is_empty() {
            0.0
        } else {
            totals.iter().sum::<f64>() / totals.len() as f64
        };

        let mut stage_samples: HashMap<String, Vec<f64>> = HashMap::new();
        for metrics in &completed {
            for (stage, duration) in &metrics.stage_durations {
                stage_samples.entry(stage.clone()).or_default().push(*duration);
            }
        }

        let stage_averages = stage_samples
            .iter()
            .map(|(stage, samples)| {
                (stage.clone(), samples.iter().sum::<f64>() / samples.len() as f64)
            })
            .collect();
        let stage_percentiles = stage_samples
            .iter()
            .map(|(stage, samples)| (stage.clone(), percentiles(samples)))
            .collect();

        let attempts = success_count + error_count;
        MetricsSnapshot {
            total_requests: completed.len(),
            success_count,
            error_count,
            success_rate: if attempts == 0 {
                1.0
            } else {
                success_count as f64 / attempts as f64
            },
            average_total_ms,
            total_percentiles: percentiles(&totals),
            stage_averages,
            stage_percentiles,
        }
    }

    /// Health grade: healthy at ≥95% success and ≤10s average latency,
    /// degraded at ≥80% success, unhealthy below.
    pub fn health(&self) -> HealthSnapshot {
        let snapshot = self.snapshot();
        let inner = self.inner.lock().expect("metrics lock poisoned");
        let active_requests = inner.active_requests;
        let stage_last_success = inner.stage_last_success.clone();
        drop(inner);

        let status = if snapshot.success_rate >= 0.95 && snapshot.average_total_ms <= 10_000.0 {
            HealthStatus::Healthy
        } else if snapshot.success_rate >= 0.80 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };

        HealthSnapshot {
            status,
            success_rate: snapshot.success_rate,
            average_total_ms: snapshot.average_total_ms,
            active_requests,
            stage_last_success,
            timestamp: Utc::now(),
        }
    }
}

/// Resident set size in MB, best effort; 0.0 where unavailable.
pub fn memory_usage_mb() -> f64 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            for line in status.lines() {
                if let Some(rest) = line.strip_prefix("VmRSS:") {
                    let kb: f64 = rest
                        .trim()
                        .trim_end_matches("kB")
                        .trim()
                        .parse()
                        .unwrap_or(0.0);
                    return kb / 1024.0;
                }
            }
        }
    }
    0.0
}
