//! Weighted risk aggregation.
//!
//! This module combines per-module results and per-institution weights
//! into one integrity score, a risk level, a confidence estimate and an
//! evidence trail.

use crate::models::{
    round4, AggregatedResult, BreakdownEntry, Flag, FlagSeverity, ModuleResult, RiskLevel,
    RiskThresholds,
};
use std::collections::{BTreeMap, HashMap};

/// Floor for the total-weight denominator.
const WEIGHT_EPSILON: f64 = 1e-9;

/// Weight assumed for modules missing from the weight map.
const DEFAULT_WEIGHT: f64 = 1.0;

/// Thresholds driving categorization and flagging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AggregatorConfig {
    pub thresholds: RiskThresholds,
    /// Module scores at or above this raise a flag.
    pub flag_threshold: f64,
    /// Flags at or above this are HIGH severity, otherwise MEDIUM.
    pub flag_high_threshold: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            thresholds: RiskThresholds::default(),
            flag_threshold: 0.65,
            flag_high_threshold: 0.80,
        }
    }
}

/// Deterministic combiner of module results.
#[derive(Debug, Clone, Default)]
pub struct RiskAggregator {
    config: AggregatorConfig,
}

impl RiskAggregator {
    pub fn new(config: AggregatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Classify a score using the configured thresholds.
    pub fn categorize(&self, score: f64) -> RiskLevel {
        self.config.thresholds.categorize(score)
    }

    /// Combine `results` under `weights`.
    ///
    /// Results carrying an error are ignored. Modules absent from `weights`
    /// weigh 1.0; modules weighing 0 are left out of both the weighted sum
    /// and the denominator. Flags keep the iteration order of `results`.
    pub fn aggregate(
        &self,
        results: &[ModuleResult],
        weights: &HashMap<String, f64>,
    ) -> AggregatedResult {
        let valid: Vec<&ModuleResult> = results.iter().filter(|r| !r.is_error()).collect();

        if valid.is_empty() {
            return AggregatedResult::empty();
        }

        let mut included: Vec<(&ModuleResult, f64)> = Vec::with_capacity(valid.len());
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;

        for result in &valid {
            let w = weights
                .get(&result.module_id)
                .copied()
                .unwrap_or(DEFAULT_WEIGHT);
            if w == 0.0 {
                continue;
            }
            weighted_sum += result.score * w;
            total_weight += w;
            included.push((result, w));
        }

        let denominator = f64::max(total_weight, WEIGHT_EPSILON);
        let score = round4((weighted_sum / denominator).clamp(0.0, 1.0));
        let risk_level = self.categorize(score);

        let confidence = if included.is_empty() {
            0.0
        } else {
            let sum: f64 = included.iter().map(|(r, _)| r.confidence).sum();
            round4(sum / included.len() as f64)
        };

        // Contributions use the final denominator so they sum to the score.
        let mut breakdown = BTreeMap::new();
        let mut flags = Vec::new();
        for (result, w) in &included {
            breakdown.insert(
                result.module_id.clone(),
                BreakdownEntry {
                    score: round4(result.score),
                    weight: *w,
                    weighted_contribution: round4(result.score * w / denominator),
                    confidence: round4(result.confidence),
                    evidence: result.evidence.clone(),
                    processing_ms: result.processing_ms,
                },
            );

            if let Some(flag) = self.flag_for(result) {
                flags.push(flag);
            }
        }

        let module_scores = valid
            .iter()
            .map(|r| (r.module_id.clone(), r.score))
            .collect();

        AggregatedResult {
            integrity_score: score,
            risk_level,
            module_scores,
            confidence,
            breakdown,
            recommendation: risk_level.recommendation().to_string(),
            flags,
        }
    }

    fn flag_for(&self, result: &ModuleResult) -> Option<Flag> {
        if result.score < self.config.flag_threshold {
            return None;
        }
        let severity = if result.score >= self.config.flag_high_threshold {
            FlagSeverity::High
        } else {
            FlagSeverity::Medium
        };
        Some(Flag {
            module: result.module_id.clone(),
            score: round4(result.score),
            severity,
        })
    }
}

/// The `n` modules contributing most to the integrity score.
pub fn strongest_contributors(result: &AggregatedResult, n: usize) -> Vec<(&str, &BreakdownEntry)> {
    let mut entries: Vec<_> = result
        .breakdown
        .iter()
        .map(|(id, entry)| (id.as_str(), entry))
        .filter(|(_, entry)| entry.weighted_contribution > 0.0)
        .collect();

    entries.sort_by(|a, b| {
        b.1.weighted_contribution
            .partial_cmp(&a.1.weighted_contribution)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    entries.truncate(n);
    entries
}
