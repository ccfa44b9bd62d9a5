//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::config::{timeout_from_secs, MAX_TIMEOUT_SECONDS};
use crate::models::RiskLevel;
use clap::Parser;
use std::collections::HashMap;
use std::path::PathBuf;

/// integrity-engine - concurrent academic-integrity risk scoring
///
/// Runs every enabled analysis module over a submission, combines their
/// scores into one integrity score and renders a Markdown or JSON report.
///
/// Examples:
///   integrity-engine --input essay.txt --user-id student-42
///   integrity-engine --input submissions/ --format json --output report.json
///   cat essay.txt | integrity-engine --stream
///   integrity-engine --list-modules
///   integrity-engine --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Plain-text submission to analyze
    ///
    /// A directory analyzes every .txt file below it as a separate
    /// submission. Reads stdin when omitted.
    #[arg(short, long, value_name = "PATH")]
    pub input: Option<PathBuf>,

    /// Submission identifier (random UUID when omitted)
    #[arg(short, long, value_name = "ID")]
    pub submission_id: Option<String>,

    /// Author of the submission, used for writing-profile comparison
    #[arg(short, long, value_name = "ID", env = "INTEGRITY_USER_ID")]
    pub user_id: Option<String>,

    /// Institution whose enablement and weights apply
    #[arg(long, value_name = "ID", env = "INTEGRITY_INSTITUTION")]
    pub institution: Option<String>,

    /// Only run these modules (comma-separated)
    ///
    /// Example: --modules ai_detection,plagiarism
    #[arg(short, long, value_name = "IDS", value_delimiter = ',')]
    pub modules: Option<Vec<String>>,

    /// JSON file with extra submission metadata
    ///
    /// Must contain an object, e.g. {"session": {"paste_events": 4}}.
    #[arg(long, value_name = "FILE")]
    pub metadata: Option<PathBuf>,

    /// Enable modules before analyzing (comma-separated)
    ///
    /// Applies at institution scope when --institution is given.
    #[arg(long, value_name = "IDS", value_delimiter = ',')]
    pub enable: Vec<String>,

    /// Disable modules before analyzing (comma-separated)
    #[arg(long, value_name = "IDS", value_delimiter = ',')]
    pub disable: Vec<String>,

    /// Override module weights before analyzing
    ///
    /// Example: --weights ai_detection=0.5,plagiarism=0.5
    #[arg(long, value_name = "ID=WEIGHT,...")]
    pub weights: Option<String>,

    /// Print progress events as JSON lines while analyzing
    #[arg(long)]
    pub stream: bool,

    /// List installed modules and exit
    #[arg(long)]
    pub list_modules: bool,

    /// Output format (markdown, json)
    #[arg(short, long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Output file path for the report (stdout when omitted)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Fail if the risk level is at or above this level
    ///
    /// Useful for CI pipelines. Exit code 2 when threshold is reached.
    /// Values: low, medium, high
    #[arg(long, value_name = "LEVEL")]
    pub fail_on: Option<FailOnLevel>,

    /// Per-module timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<f64>,

    /// Seconds a --stream observer waits for the next event
    #[arg(long, value_name = "SECS")]
    pub stream_timeout: Option<f64>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .integrity.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .integrity.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

/// Risk level for --fail-on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, clap::ValueEnum)]
pub enum FailOnLevel {
    Low,
    Medium,
    High,
}

impl FailOnLevel {
    pub fn risk_level(self) -> RiskLevel {
        match self {
            FailOnLevel::Low => RiskLevel::Low,
            FailOnLevel::Medium => RiskLevel::Medium,
            FailOnLevel::High => RiskLevel::High,
        }
    }

    /// Whether `level` reaches this threshold.
    pub fn is_reached_by(self, level: RiskLevel) -> bool {
        level >= self.risk_level()
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(timeout) = self.timeout {
            if timeout_from_secs(timeout).is_none() {
                return Err(format!(
                    "Timeout must be between 0 and {} seconds",
                    MAX_TIMEOUT_SECONDS
                ));
            }
        }

        if let Some(timeout) = self.stream_timeout {
            if timeout_from_secs(timeout).is_none() {
                return Err(format!(
                    "Stream timeout must be between 0 and {} seconds",
                    MAX_TIMEOUT_SECONDS
                ));
            }
        }

        if let Some(overlap) = self.enable.iter().find(|id| self.disable.contains(*id)) {
            return Err(format!("Module '{}' is both enabled and disabled", overlap));
        }

        self.parse_weights()?;

        if let Some(ref input) = self.input {
            if !input.exists() {
                return Err(format!("Input path does not exist: {}", input.display()));
            }
            if input.is_dir() && self.submission_id.is_some() {
                return Err("--submission-id cannot be used with a directory input".to_string());
            }
        }

        if let Some(ref metadata) = self.metadata {
            if !metadata.is_file() {
                return Err(format!("Metadata file does not exist: {}", metadata.display()));
            }
        }

        Ok(())
    }

    /// Parse `--weights id=w,id=w` into a map.
    pub fn parse_weights(&self) -> Result<Option<HashMap<String, f64>>, String> {
        let Some(ref raw) = self.weights else {
            return Ok(None);
        };

        let mut weights = HashMap::new();
        for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (id, value) = pair
                .split_once('=')
                .ok_or_else(|| format!("Invalid weight '{}', expected ID=WEIGHT", pair))?;
            let weight: f64 = value
                .trim()
                .parse()
                .map_err(|_| format!("Invalid weight value for '{}': {}", id.trim(), value))?;
            weights.insert(id.trim().to_string(), weight);
        }

        if weights.is_empty() {
            return Err("--weights needs at least one ID=WEIGHT pair".to_string());
        }
        Ok(Some(weights))
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
