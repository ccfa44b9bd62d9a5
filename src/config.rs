//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.integrity.toml` files.

use crate::analysis::AggregatorConfig;
use crate::detectors::ai_detection::{self, AiDetectionConfig};
use crate::detectors::plagiarism::{self, PlagiarismConfig};
use crate::detectors::proctoring::{self, ProctoringConfig};
use crate::detectors::writing_profile::{self, WritingProfileConfig};
use crate::engine::controller::DEFAULT_MODULE_TIMEOUT;
use crate::engine::ControllerConfig;
use crate::models::RiskThresholds;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".integrity.toml";

/// Longest accepted module or stream timeout, in seconds.
pub const MAX_TIMEOUT_SECONDS: f64 = 86_400.0;

/// Timeout for `seconds`, or `None` unless it is positive and at most
/// [`MAX_TIMEOUT_SECONDS`].
pub fn timeout_from_secs(seconds: f64) -> Option<Duration> {
    if !(seconds > 0.0 && seconds <= MAX_TIMEOUT_SECONDS) {
        return None;
    }
    Duration::try_from_secs_f64(seconds).ok()
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Orchestration settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Risk banding and flagging.
    #[serde(default)]
    pub risk: RiskConfig,

    /// Default module weights.
    #[serde(default)]
    pub weights: WeightsConfig,

    /// Privacy settings for stored profiles.
    #[serde(default)]
    pub privacy: PrivacyConfig,

    /// AI-text detector settings.
    #[serde(default)]
    pub ai_detection: AiDetectionSection,

    /// Near-duplicate detector settings.
    #[serde(default)]
    pub plagiarism: PlagiarismSection,
}

/// Orchestration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Per-module analysis timeout in seconds.
    #[serde(default = "default_module_timeout")]
    pub module_timeout_seconds: f64,

    /// Buffered events per stream subscriber before it is dropped.
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,

    /// How long a stream waits for the next event.
    #[serde(default = "default_stream_timeout")]
    pub stream_timeout_seconds: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            module_timeout_seconds: default_module_timeout(),
            event_queue_capacity: default_event_queue_capacity(),
            stream_timeout_seconds: default_stream_timeout(),
        }
    }
}

fn default_module_timeout() -> f64 {
    8.0
}

fn default_event_queue_capacity() -> usize {
    100
}

fn default_stream_timeout() -> f64 {
    30.0
}

/// Risk banding and flagging thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Scores below this are LOW.
    #[serde(default = "default_low_threshold")]
    pub low_threshold: f64,

    /// Scores at or above this are HIGH.
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f64,

    /// Module score at or above which a flag is raised.
    #[serde(default = "default_flag_threshold")]
    pub flag_threshold: f64,

    /// Module score at or above which a flag is HIGH severity.
    #[serde(default = "default_flag_high_threshold")]
    pub flag_high_threshold: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            low_threshold: default_low_threshold(),
            high_threshold: default_high_threshold(),
            flag_threshold: default_flag_threshold(),
            flag_high_threshold: default_flag_high_threshold(),
        }
    }
}

fn default_low_threshold() -> f64 {
    0.35
}

fn default_high_threshold() -> f64 {
    0.65
}

fn default_flag_threshold() -> f64 {
    0.65
}

fn default_flag_high_threshold() -> f64 {
    0.80
}

/// Default weights the bundled modules are registered with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeightsConfig {
    #[serde(default = "default_ai_weight")]
    pub ai_detection: f64,

    #[serde(default = "default_plagiarism_weight")]
    pub plagiarism: f64,

    #[serde(default = "default_writing_profile_weight")]
    pub writing_profile: f64,

    /// Zero keeps the module disabled until toggled on.
    #[serde(default)]
    pub proctoring: f64,
}

impl Default for WeightsConfig {
    fn default() -> Self {
        Self {
            ai_detection: default_ai_weight(),
            plagiarism: default_plagiarism_weight(),
            writing_profile: default_writing_profile_weight(),
            proctoring: 0.0,
        }
    }
}

fn default_ai_weight() -> f64 {
    0.35
}

fn default_plagiarism_weight() -> f64 {
    0.40
}

fn default_writing_profile_weight() -> f64 {
    0.25
}

/// Privacy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacyConfig {
    /// Laplace noise budget for stored writing profiles.
    #[serde(default = "default_dp_epsilon")]
    pub dp_epsilon: f64,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            dp_epsilon: default_dp_epsilon(),
        }
    }
}

fn default_dp_epsilon() -> f64 {
    1.0
}

/// AI-text detector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiDetectionSection {
    /// Chunk score at or above which a paragraph is flagged.
    #[serde(default = "default_flag_threshold")]
    pub flag_threshold: f64,
}

impl Default for AiDetectionSection {
    fn default() -> Self {
        Self {
            flag_threshold: default_flag_threshold(),
        }
    }
}

/// Near-duplicate detector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlagiarismSection {
    /// MinHash permutations.
    #[serde(default = "default_num_perm")]
    pub num_perm: usize,

    /// Words per shingle.
    #[serde(default = "default_shingle_size")]
    pub shingle_size: usize,

    /// SimHash pre-filter distance.
    #[serde(default = "default_max_hamming")]
    pub max_hamming: u32,

    /// Similarity above which a stored document is a match.
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f64,
}

impl Default for PlagiarismSection {
    fn default() -> Self {
        Self {
            num_perm: default_num_perm(),
            shingle_size: default_shingle_size(),
            max_hamming: default_max_hamming(),
            match_threshold: default_match_threshold(),
        }
    }
}

fn default_num_perm() -> usize {
    128
}

fn default_shingle_size() -> usize {
    5
}

fn default_max_hamming() -> u32 {
    20
}

fn default_match_threshold() -> f64 {
    0.3
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// This method only overrides config when CLI provides explicit values.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(timeout) = args.timeout {
            self.engine.module_timeout_seconds = timeout;
        }

        if let Some(timeout) = args.stream_timeout {
            self.engine.stream_timeout_seconds = timeout;
        }
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let positive = |name: &str, v: f64| -> Result<()> {
            if !(v.is_finite() && v > 0.0) {
                bail!("{name} must be a positive number, got {v}");
            }
            Ok(())
        };
        for (name, seconds) in [
            ("engine.module_timeout_seconds", self.engine.module_timeout_seconds),
            ("engine.stream_timeout_seconds", self.engine.stream_timeout_seconds),
        ] {
            if timeout_from_secs(seconds).is_none() {
                bail!("{name} must be between 0 and {MAX_TIMEOUT_SECONDS} seconds, got {seconds}");
            }
        }
        positive("privacy.dp_epsilon", self.privacy.dp_epsilon)?;

        if self.engine.event_queue_capacity == 0 {
            bail!("engine.event_queue_capacity must be at least 1");
        }

        let risk = &self.risk;
        if !(0.0..=1.0).contains(&risk.low_threshold)
            || !(0.0..=1.0).contains(&risk.high_threshold)
            || risk.low_threshold > risk.high_threshold
        {
            bail!("risk thresholds must satisfy 0 <= low_threshold <= high_threshold <= 1");
        }
        if risk.flag_threshold > risk.flag_high_threshold {
            bail!("risk.flag_threshold must not exceed risk.flag_high_threshold");
        }

        for (id, weight) in self.default_weights() {
            if !(weight.is_finite() && weight >= 0.0) {
                bail!("weights.{id} must be a non-negative number, got {weight}");
            }
        }

        if self.plagiarism.num_perm == 0 || self.plagiarism.shingle_size == 0 {
            bail!("plagiarism.num_perm and plagiarism.shingle_size must be at least 1");
        }

        Ok(())
    }

    /// Default weight per bundled module id.
    pub fn default_weights(&self) -> HashMap<String, f64> {
        HashMap::from([
            (ai_detection::MODULE_ID.to_string(), self.weights.ai_detection),
            (plagiarism::MODULE_ID.to_string(), self.weights.plagiarism),
            (writing_profile::MODULE_ID.to_string(), self.weights.writing_profile),
            (proctoring::MODULE_ID.to_string(), self.weights.proctoring),
        ])
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            thresholds: RiskThresholds {
                low: self.risk.low_threshold,
                high: self.risk.high_threshold,
            },
            flag_threshold: self.risk.flag_threshold,
            flag_high_threshold: self.risk.flag_high_threshold,
        }
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            module_timeout: timeout_from_secs(self.engine.module_timeout_seconds)
                .unwrap_or(DEFAULT_MODULE_TIMEOUT),
        }
    }

    pub fn stream_timeout(&self) -> Duration {
        timeout_from_secs(self.engine.stream_timeout_seconds)
            .unwrap_or_else(|| Duration::from_secs_f64(default_stream_timeout()))
    }

    pub fn ai_detection_config(&self) -> AiDetectionConfig {
        AiDetectionConfig {
            default_weight: self.weights.ai_detection,
            flag_threshold: self.ai_detection.flag_threshold,
        }
    }

    pub fn plagiarism_config(&self) -> PlagiarismConfig {
        PlagiarismConfig {
            default_weight: self.weights.plagiarism,
            num_perm: self.plagiarism.num_perm,
            shingle_size: self.plagiarism.shingle_size,
            max_hamming: self.plagiarism.max_hamming,
            match_threshold: self.plagiarism.match_threshold,
        }
    }

    pub fn writing_profile_config(&self) -> WritingProfileConfig {
        WritingProfileConfig {
            default_weight: self.weights.writing_profile,
            dp_epsilon: self.privacy.dp_epsilon,
        }
    }

    pub fn proctoring_config(&self) -> ProctoringConfig {
        ProctoringConfig {
            default_weight: self.weights.proctoring,
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
