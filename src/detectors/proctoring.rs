//! Behavioral signals recorded by the submission client.
//!
//! Reads `metadata.session` and scores paste, focus, typing-speed and idle
//! activity. Registered with a default weight of zero, so it stays disabled
//! until an institution opts in.

use crate::analysis::{elapsed_ms, AnalysisModule};
use crate::error::ModuleError;
use crate::models::{round4, Metadata, ModuleResult};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;

pub const MODULE_ID: &str = "proctoring";

/// Idle period length, in seconds, counted as a long idle.
const LONG_IDLE_SECONDS: f64 = 300.0;
const TYPING_SPEED_FACTOR: f64 = 1.5;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SessionSignals {
    pub paste_events: u32,
    pub tab_switches: u32,
    pub focus_lost_count: u32,
    /// Self-reported or historical baseline typing speed.
    pub typing_speed_wpm: Option<f64>,
    pub duration_minutes: Option<f64>,
    /// Idle period lengths in seconds.
    pub idle_periods: Vec<f64>,
}

impl SessionSignals {
    fn long_idle_count(&self) -> usize {
        self.idle_periods
            .iter()
            .filter(|p| **p > LONG_IDLE_SECONDS)
            .count()
    }

    /// Additive score and the human-readable reasons behind it.
    fn score(&self, word_count: usize) -> (f64, Vec<String>) {
        let mut score = 0.0;
        let mut flags = Vec::new();

        if self.paste_events > 3 {
            flags.push(format!("High paste activity: {} events", self.paste_events));
            score += (self.paste_events as f64 / 10.0).min(0.4);
        }

        if self.tab_switches > 5 {
            flags.push(format!("Frequent tab switching: {}", self.tab_switches));
            score += (self.tab_switches as f64 / 20.0).min(0.2);
        }

        if self.focus_lost_count > 3 {
            flags.push(format!("Lost focus {} times", self.focus_lost_count));
            score += (self.focus_lost_count as f64 / 10.0).min(0.2);
        }

        if let (Some(baseline), Some(minutes)) = (self.typing_speed_wpm, self.duration_minutes) {
            if baseline > 0.0 && minutes > 0.0 {
                let actual = word_count as f64 / minutes;
                if actual > baseline * TYPING_SPEED_FACTOR {
                    flags.push(format!(
                        "Typing speed anomaly: {actual:.0} WPM actual vs {baseline} WPM baseline"
                    ));
                    score += 0.2;
                }
            }
        }

        let long_idles = self.long_idle_count();
        if long_idles > 0 {
            flags.push(format!("{long_idles} long idle periods detected"));
            score += (long_idles as f64 / 5.0).min(0.2);
        }

        (f64::min(score, 1.0), flags)
    }
}

#[derive(Debug, Clone)]
pub struct ProctoringConfig {
    pub default_weight: f64,
}

impl Default for ProctoringConfig {
    fn default() -> Self {
        Self {
            default_weight: 0.0,
        }
    }
}

pub struct ProctoringModule {
    config: ProctoringConfig,
}

impl ProctoringModule {
    pub fn new(config: ProctoringConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl AnalysisModule for ProctoringModule {
    fn module_id(&self) -> &str {
        MODULE_ID
    }

    fn default_weight(&self) -> f64 {
        self.config.default_weight
    }

    async fn analyze(&self, text: &str, metadata: &Metadata) -> Result<ModuleResult, ModuleError> {
        let start = Instant::now();

        let (signals, available) = match metadata.get("session") {
            None | Some(serde_json::Value::Null) => (SessionSignals::default(), false),
            Some(value) => {
                let signals = SessionSignals::deserialize(value).map_err(|e| {
                    ModuleError::InvalidInput(format!("malformed session metadata: {e}"))
                })?;
                let available = value.as_object().is_some_and(|o| !o.is_empty());
                (signals, available)
            }
        };

        let (score, flags) = signals.score(text.split_whitespace().count());
        let confidence = if signals.paste_events > 0 || signals.tab_switches > 0 {
            0.70
        } else {
            0.30
        };

        Ok(ModuleResult {
            module_id: MODULE_ID.to_string(),
            score: round4(score),
            confidence,
            evidence: json!({
                "flags": flags,
                "paste_events": signals.paste_events,
                "tab_switches": signals.tab_switches,
                "focus_lost_count": signals.focus_lost_count,
                "typing_speed_wpm": signals.typing_speed_wpm,
                "session_duration_min": signals.duration_minutes,
                "long_idle_count": signals.long_idle_count(),
                "behavioral_signals_available": available,
            }),
            processing_ms: elapsed_ms(start),
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn with_session(session: Value) -> Metadata {
        let mut m = Metadata::new();
        m.insert("session".into(), session);
        m
    }

    async fn analyze(text: &str, metadata: &Metadata) -> ModuleResult {
        ProctoringModule::new(ProctoringConfig::default())
            .analyze(text, metadata)
            .await
            .unwrap()
    }

    #[test]
    fn test_disabled_by_default() {
        let module = ProctoringModule::new(ProctoringConfig::default());
        assert_eq!(module.default_weight(), 0.0);
        assert_eq!(module.module_id(), "proctoring");
    }

    #[tokio::test]
    async fn test_no_session_data() {
        let result = analyze("some text", &Metadata::new()).await;
        assert_eq!(result.score, 0.0);
        assert_eq!(result.confidence, 0.30);
        assert_eq!(result.evidence["behavioral_signals_available"], false);
        assert_eq!(result.evidence["flags"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_paste_and_tab_activity() {
        let metadata = with_session(json!({"paste_events": 5, "tab_switches": 10}));
        let result = analyze("some text", &metadata).await;
        // min(5/10, 0.4) + min(10/20, 0.2)
        assert!((result.score - 0.6).abs() < 1e-9);
        assert_eq!(result.confidence, 0.70);
        assert_eq!(result.evidence["flags"].as_array().unwrap().len(), 2);
        assert_eq!(result.evidence["behavioral_signals_available"], true);
    }

    #[tokio::test]
    async fn test_score_is_capped() {
        let metadata = with_session(json!({
            "paste_events": 50,
            "tab_switches": 50,
            "focus_lost_count": 50,
            "typing_speed_wpm": 10,
            "duration_minutes": 1,
            "idle_periods": [400, 500, 600, 700, 800, 900]
        }));
        let text = "word ".repeat(100);
        let result = analyze(&text, &metadata).await;
        assert_eq!(result.score, 1.0);
        assert_eq!(result.evidence["flags"].as_array().unwrap().len(), 5);
        assert_eq!(result.evidence["long_idle_count"], 6);
    }

    #[tokio::test]
    async fn test_typing_speed_anomaly() {
        let metadata = with_session(json!({"typing_speed_wpm": 40, "duration_minutes": 2}));
        let fast = "word ".repeat(200);
        let result = analyze(&fast, &metadata).await;
        assert!((result.score - 0.2).abs() < 1e-9);

        let normal = "word ".repeat(60);
        let result = analyze(&normal, &metadata).await;
        assert_eq!(result.score, 0.0);
    }

    #[tokio::test]
    async fn test_short_idles_are_ignored() {
        let metadata = with_session(json!({"idle_periods": [10, 120, 300]}));
        let result = analyze("text", &metadata).await;
        assert_eq!(result.score, 0.0);
        assert_eq!(result.evidence["long_idle_count"], 0);
    }

    #[tokio::test]
    async fn test_malformed_session_is_invalid_input() {
        let module = ProctoringModule::new(ProctoringConfig::default());
        let metadata = with_session(json!({"paste_events": "many"}));
        let err = module.analyze("text", &metadata).await.unwrap_err();
        assert!(matches!(err, ModuleError::InvalidInput(_)));
    }
}
