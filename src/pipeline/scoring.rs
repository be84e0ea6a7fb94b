//! Deterministic candidate scoring for tool selection.
//!
//! Each candidate is a (tool, invocation pattern) pair. The score rewards
//! accuracy, completeness, and capability overlap with the request, and
//! penalizes time, cost, and complexity. `time_ms` is min-max normalized
//! within the candidate set so absolute estimates only matter relatively.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::ToolProfile;

/// Scoring weights. Production values are design-time constants; tests and
/// experiments may override individual knobs.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub accuracy: f64,
    pub completeness: f64,
    pub time: f64,
    pub cost: f64,
    pub complexity: f64,
    pub capability_match: f64,
    /// Two candidates within this margin are considered tied
    pub tie_epsilon: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            accuracy: 0.30,
            completeness: 0.20,
            time: 0.15,
            cost: 0.10,
            complexity: 0.10,
            capability_match: 0.40,
            tie_epsilon: 0.02,
        }
    }
}

/// A scored (tool, pattern) candidate.
#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub profile: Arc<ToolProfile>,
    pub pattern_name: String,
    /// Capability that matched the request, or the tool's first capability
    pub capability_name: String,
    pub score: f64,
}

/// Fraction of required capabilities the tool covers, in [0, 1].
fn capability_overlap(required: &[String], profile: &ToolProfile) -> f64 {
    if required.is_empty() {
        return 0.0;
    }
    let covered = required
        .iter()
        .filter(|r| profile.has_capability(r))
        .count();
    covered as f64 / required.len() as f64
}

fn matched_capability(required: &[String], profile: &ToolProfile) -> String {
    required
        .iter()
        .find(|r| profile.has_capability(r))
        .cloned()
        .or_else(|| profile.capabilities.first().map(|c| c.name.clone()))
        .unwrap_or_default()
}

/// Rank candidates best-first. Each tool contributes its best-scoring
/// pattern; tools without patterns are skipped.
pub fn rank_candidates(
    candidates: &[Arc<ToolProfile>],
    required_capabilities: &[String],
    weights: &ScoreWeights,
) -> Vec<ScoredCandidate> {
    // Min-max bounds for time normalization across every pattern in the set.
    let times: Vec<f64> = candidates
        .iter()
        .flat_map(|p| p.patterns.iter().map(|pat| pat.features.time_ms))
        .collect();
    let (t_min, t_max) = times.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &t| {
        (lo.min(t), hi.max(t))
    });
    let t_span = (t_max - t_min).max(f64::EPSILON);

    let mut ranked: Vec<ScoredCandidate> = Vec::new();
    for profile in candidates {
        let overlap = capability_overlap(required_capabilities, profile);
        let best = profile
            .patterns
            .iter()
            .map(|pattern| {
                let f = &pattern.features;
                let norm_time = if times.len() <= 1 {
                    0.0
                } else {
                    (f.time_ms - t_min) / t_span
                };
                let score = weights.accuracy * f.accuracy
                    + weights.completeness * f.completeness
                    - weights.time * norm_time
                    - weights.cost * f.cost
                    - weights.complexity * f.complexity
                    + weights.capability_match * overlap;
                (pattern, score)
            })
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        if let Some((pattern, score)) = best {
            ranked.push(ScoredCandidate {
                profile: Arc::clone(profile),
                pattern_name: pattern.pattern_name.clone(),
                capability_name: matched_capability(required_capabilities, profile),
                score,
            });
        }
    }

    // Stable sort keeps first-occurrence order among exact equals.
    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    ranked
}

/// Whether the top two candidates are within the tie margin.
pub fn is_tie(ranked: &[ScoredCandidate], tie_epsilon: f64) -> bool {
    match ranked {
        [first, second, ..] => (first.score - second.score).abs() <= tie_epsilon,
        _ => false,
    }
}
