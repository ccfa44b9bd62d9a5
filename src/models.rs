//! Data models for the integrity engine.
//!
//! This module contains the core data structures exchanged between the
//! analysis modules, the controller, the aggregator and the event channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Opaque per-submission metadata, passed verbatim to every module.
pub type Metadata = serde_json::Map<String, Value>;

/// Coarse risk classification derived from the integrity score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    /// Submission looks consistent with expected work
    Low,
    /// Some integrity signals, review recommended
    Medium,
    /// Strong integrity signals, escalate
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "LOW"),
            RiskLevel::Medium => write!(f, "MEDIUM"),
            RiskLevel::High => write!(f, "HIGH"),
        }
    }
}

impl RiskLevel {
    /// Human-readable recommendation attached verbatim to every result.
    pub fn recommendation(&self) -> &'static str {
        match self {
            RiskLevel::Low => "Submission appears consistent with student's expected work.",
            RiskLevel::Medium => "Review recommended. Some signals of integrity concern detected.",
            RiskLevel::High => "Escalate for manual review. Multiple integrity flags detected.",
        }
    }

    /// Returns an emoji representation of the risk level.
    pub fn emoji(&self) -> &'static str {
        match self {
            RiskLevel::Low => "🟢",
            RiskLevel::Medium => "🟡",
            RiskLevel::High => "🔴",
        }
    }
}

/// Score thresholds separating the risk levels.
///
/// Both bounds are half-open: `score < low` is LOW, `low <= score < high`
/// is MEDIUM and `score >= high` is HIGH.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    pub low: f64,
    pub high: f64,
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            low: 0.35,
            high: 0.65,
        }
    }
}

impl RiskThresholds {
    /// Classify a score into a risk level.
    pub fn categorize(&self, score: f64) -> RiskLevel {
        if score < self.low {
            RiskLevel::Low
        } else if score < self.high {
            RiskLevel::Medium
        } else {
            RiskLevel::High
        }
    }
}

/// Coarse completion status of one module within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleStatus {
    Done,
    Error,
}

/// Output of a single module for a single submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleResult {
    /// Identifier of the module that produced this result.
    pub module_id: String,
    /// Suspicion score in `[0, 1]`, higher is more suspicious.
    pub score: f64,
    /// Confidence in the score, `[0, 1]`.
    pub confidence: f64,
    /// Module-specific evidence payload.
    pub evidence: Value,
    /// Wall-clock processing time in milliseconds.
    pub processing_ms: u64,
    /// Error message if the module failed or timed out.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ModuleResult {
    /// Creates a failed result carrying `error`.
    pub fn failed(module_id: impl Into<String>, error: impl Into<String>, processing_ms: u64) -> Self {
        let error = error.into();
        Self {
            module_id: module_id.into(),
            score: 0.0,
            confidence: 0.0,
            evidence: serde_json::json!({ "error": error }),
            processing_ms,
            error: Some(error),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn status(&self) -> ModuleStatus {
        if self.is_error() {
            ModuleStatus::Error
        } else {
            ModuleStatus::Done
        }
    }
}

/// Severity attached to a per-module flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FlagSeverity {
    Medium,
    High,
}

impl fmt::Display for FlagSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagSeverity::Medium => write!(f, "MEDIUM"),
            FlagSeverity::High => write!(f, "HIGH"),
        }
    }
}

/// A high-signal module result surfaced next to the aggregate score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Flag {
    pub module: String,
    pub score: f64,
    pub severity: FlagSeverity,
}

/// Per-module line of the aggregate breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakdownEntry {
    pub score: f64,
    pub weight: f64,
    /// `score * weight / total_weight`; entries sum to the integrity score.
    pub weighted_contribution: f64,
    pub confidence: f64,
    pub evidence: Value,
    pub processing_ms: u64,
}

/// Final combined result of one analysis run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedResult {
    /// 0.0 (clean) to 1.0 (high risk).
    pub integrity_score: f64,
    pub risk_level: RiskLevel,
    pub module_scores: BTreeMap<String, f64>,
    pub confidence: f64,
    pub breakdown: BTreeMap<String, BreakdownEntry>,
    pub recommendation: String,
    pub flags: Vec<Flag>,
}

impl AggregatedResult {
    /// The terminal result used when no module produced a usable score.
    pub fn empty() -> Self {
        Self {
            integrity_score: 0.0,
            risk_level: RiskLevel::Low,
            module_scores: BTreeMap::new(),
            confidence: 0.0,
            breakdown: BTreeMap::new(),
            recommendation: NO_RESULTS_RECOMMENDATION.to_string(),
            flags: Vec::new(),
        }
    }

    /// Returns true if no module contributed to this result.
    pub fn is_empty(&self) -> bool {
        self.module_scores.is_empty()
    }
}

/// Recommendation attached when no module produced results.
pub const NO_RESULTS_RECOMMENDATION: &str = "No modules produced results.";

/// Descriptor of an installed module, as exposed to admin surfaces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub module_id: String,
    pub version: String,
    pub default_weight: f64,
    pub healthy: bool,
}

/// Context of one analysis run, shown in the report header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub submission_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institution_id: Option<String>,
    pub analysis_date: DateTime<Utc>,
    /// Input file, or `<stdin>`.
    pub source: String,
    pub word_count: usize,
    pub duration_seconds: f64,
}

/// A rendered-ready report: run context plus the aggregated result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionReport {
    pub metadata: ReportMetadata,
    pub result: AggregatedResult,
}

/// Round to four decimal digits.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}
