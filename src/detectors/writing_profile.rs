//! Stylometric drift against a per-user writing profile.
//!
//! A user's first submission becomes their baseline. Later submissions are
//! compared to it by cosine distance over a fixed feature vector, and the
//! profile then drifts towards the new text. Stored profiles always carry
//! Laplace noise.

use crate::analysis::{elapsed_ms, AnalysisModule};
use crate::detectors::text::paragraphs;
use crate::error::ModuleError;
use crate::models::{round4, Metadata, ModuleResult};
use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::sync::{Arc, LazyLock};
use std::time::Instant;
use tracing::{debug, info};

pub const MODULE_ID: &str = "writing_profile";

pub const FEATURE_KEYS: [&str; 14] = [
    "avg_sentence_len",
    "vocab_richness",
    "punctuation_density",
    "passive_voice_ratio",
    "avg_word_length",
    "connective_frequency",
    "question_frequency",
    "exclamation_frequency",
    "avg_paragraph_len",
    "capitalization_ratio",
    "digit_ratio",
    "short_sentence_ratio",
    "long_sentence_ratio",
    "unique_word_ratio",
];

const CONNECTIVES: [&str; 14] = [
    "however",
    "therefore",
    "furthermore",
    "moreover",
    "although",
    "nevertheless",
    "consequently",
    "additionally",
    "meanwhile",
    "nonetheless",
    "otherwise",
    "subsequently",
    "thus",
    "hence",
];

const PASSIVE_INDICATORS: [&str; 7] = ["was", "were", "been", "being", "is", "are", "am"];

const PUNCTUATION: &str = ".,;:!?-\u{2014}()[]\"'";

const MIN_TEXT_CHARS: usize = 50;
const PROFILE_DECAY: f64 = 0.8;
const FLAG_DEVIATION_PCT: f64 = 50.0;
const CONFIDENCE: f64 = 0.75;

static SENTENCE_SPLIT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+").expect("valid regex"));
static ALPHA_WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[a-zA-Z]+\b").expect("valid regex"));

pub type FeatureVector = [f64; FEATURE_KEYS.len()];

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Stylometric features in [`FEATURE_KEYS`] order.
///
/// Texts under 50 characters (after trimming) or without alphabetic words
/// produce the zero vector.
pub fn extract_features(text: &str) -> FeatureVector {
    if text.trim().chars().count() < MIN_TEXT_CHARS {
        return [0.0; FEATURE_KEYS.len()];
    }

    let lower = text.to_lowercase();
    let words: Vec<&str> = ALPHA_WORD_RE.find_iter(&lower).map(|m| m.as_str()).collect();
    if words.is_empty() {
        return [0.0; FEATURE_KEYS.len()];
    }

    let sentences: Vec<&str> = SENTENCE_SPLIT_RE
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    let sentence_count = sentences.len().max(1) as f64;
    let sentence_lens: Vec<f64> = if sentences.is_empty() {
        vec![0.0]
    } else {
        sentences
            .iter()
            .map(|s| s.split_whitespace().count() as f64)
            .collect()
    };

    let char_count = text.chars().count().max(1) as f64;
    let word_count = words.len() as f64;
    let unique_words = words
        .iter()
        .collect::<std::collections::HashSet<_>>()
        .len() as f64;

    let punct = text.chars().filter(|c| PUNCTUATION.contains(*c)).count() as f64;

    let passive = sentences
        .iter()
        .filter(|s| {
            let has_aux = s
                .to_lowercase()
                .split_whitespace()
                .any(|w| PASSIVE_INDICATORS.contains(&w));
            has_aux
                && s.split_whitespace()
                    .any(|w| w.ends_with("ed") || w.ends_with("en"))
        })
        .count() as f64;

    let connectives = words.iter().filter(|w| CONNECTIVES.contains(*w)).count() as f64;

    let para_lens: Vec<f64> = {
        let paras = paragraphs(text);
        if paras.is_empty() {
            vec![0.0]
        } else {
            paras
                .iter()
                .map(|p| p.split_whitespace().count() as f64)
                .collect()
        }
    };

    let raw_words: Vec<&str> = text.split_whitespace().collect();
    let capitalized = raw_words
        .iter()
        .filter(|w| w.chars().next().is_some_and(char::is_uppercase))
        .count() as f64;

    let digits = text.chars().filter(|c| c.is_ascii_digit()).count() as f64;
    let short = sentence_lens.iter().filter(|l| **l <= 8.0).count() as f64;
    let long = sentence_lens.iter().filter(|l| **l >= 30.0).count() as f64;
    let word_lens: Vec<f64> = words.iter().map(|w| w.chars().count() as f64).collect();

    [
        mean(&sentence_lens),
        unique_words / word_count,
        punct / char_count * 100.0,
        passive / sentence_count,
        mean(&word_lens),
        connectives / word_count * 100.0,
        text.matches('?').count() as f64 / sentence_count,
        text.matches('!').count() as f64 / sentence_count,
        mean(&para_lens),
        capitalized / raw_words.len().max(1) as f64,
        digits / char_count,
        short / sentence_count,
        long / sentence_count,
        unique_words / word_count,
    ]
}

/// `1 - cosine(profile, current)`; 0.5 when either vector has zero norm.
pub fn deviation_score(profile: &[f64], current: &[f64]) -> f64 {
    let dot: f64 = profile.iter().zip(current).map(|(a, b)| a * b).sum();
    let pnorm = profile.iter().map(|v| v * v).sum::<f64>().sqrt();
    let cnorm = current.iter().map(|v| v * v).sum::<f64>().sqrt();

    if pnorm == 0.0 || cnorm == 0.0 {
        return 0.5;
    }

    1.0 - dot / (pnorm * cnorm)
}

/// Adds Laplace(0, 1/epsilon) noise to every component.
///
/// `epsilon` must be positive; `f64::INFINITY` disables the noise.
pub fn dp_privatize(vector: &FeatureVector, epsilon: f64) -> FeatureVector {
    let scale = 1.0 / epsilon;
    let mut rng = rand::thread_rng();
    let mut out = *vector;
    for v in out.iter_mut() {
        // Inverse CDF of the Laplace distribution.
        let u: f64 = rng.gen::<f64>() - 0.5;
        let tail = (1.0 - 2.0 * u.abs()).max(f64::MIN_POSITIVE);
        *v -= scale * u.signum() * tail.ln();
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredProfile {
    pub vector: FeatureVector,
    pub samples: u64,
}

/// Per-user writing profiles.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn load(&self, user_id: &str) -> Option<StoredProfile>;

    /// Replaces the user's vector and bumps the sample count.
    async fn save(&self, user_id: &str, vector: FeatureVector);
}

#[derive(Debug, Default)]
pub struct MemoryProfileStore {
    profiles: DashMap<String, StoredProfile>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn load(&self, user_id: &str) -> Option<StoredProfile> {
        self.profiles.get(user_id).map(|p| p.value().clone())
    }

    async fn save(&self, user_id: &str, vector: FeatureVector) {
        self.profiles
            .entry(user_id.to_string())
            .and_modify(|p| {
                p.vector = vector;
                p.samples += 1;
            })
            .or_insert(StoredProfile { vector, samples: 1 });
    }
}

#[derive(Debug, Clone)]
pub struct WritingProfileConfig {
    pub default_weight: f64,
    /// Differential-privacy budget for stored profiles.
    pub dp_epsilon: f64,
}

impl Default for WritingProfileConfig {
    fn default() -> Self {
        Self {
            default_weight: 0.25,
            dp_epsilon: 1.0,
        }
    }
}

pub struct WritingProfileModule {
    config: WritingProfileConfig,
    store: Arc<dyn ProfileStore>,
}

impl WritingProfileModule {
    pub fn new(config: WritingProfileConfig, store: Arc<dyn ProfileStore>) -> Self {
        Self { config, store }
    }

    fn neutral(&self, status: &str, note: &str, features: Value, start: Instant) -> ModuleResult {
        ModuleResult {
            module_id: MODULE_ID.to_string(),
            score: 0.0,
            confidence: 0.0,
            evidence: json!({
                "status": status,
                "features": features,
                "note": note,
            }),
            processing_ms: elapsed_ms(start),
            error: None,
        }
    }
}

fn feature_map(vector: &FeatureVector) -> Value {
    let map: Map<String, Value> = FEATURE_KEYS
        .iter()
        .zip(vector)
        .map(|(k, v)| (k.to_string(), json!((v * 1e6).round() / 1e6)))
        .collect();
    Value::Object(map)
}

#[async_trait]
impl AnalysisModule for WritingProfileModule {
    fn module_id(&self) -> &str {
        MODULE_ID
    }

    fn default_weight(&self) -> f64 {
        self.config.default_weight
    }

    async fn analyze(&self, text: &str, metadata: &Metadata) -> Result<ModuleResult, ModuleError> {
        let start = Instant::now();
        let current = extract_features(text);
        let features = feature_map(&current);

        let Some(user_id) = metadata
            .get("user_id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
        else {
            debug!("No user_id in metadata, skipping profile comparison");
            return Ok(self.neutral(
                "no_user_id",
                "No user id, profile comparison skipped.",
                features,
                start,
            ));
        };

        let Some(profile) = self.store.load(user_id).await else {
            self.store
                .save(user_id, dp_privatize(&current, self.config.dp_epsilon))
                .await;
            info!(user_id, "Writing profile baseline created");
            return Ok(self.neutral(
                "baseline_created",
                "First submission used as writing baseline.",
                features,
                start,
            ));
        };

        let baseline = profile.vector;
        let deviation = deviation_score(&baseline, &current);

        let mut deviations = Map::new();
        let mut flagged = Vec::new();
        for ((key, base), cur) in FEATURE_KEYS.iter().zip(&baseline).zip(&current) {
            if base.abs() <= 0.001 {
                continue;
            }
            let pct = (cur - base).abs() / base.abs() * 100.0;
            if pct > FLAG_DEVIATION_PCT {
                flagged.push(*key);
            }
            deviations.insert(
                key.to_string(),
                json!({
                    "baseline": round4(*base),
                    "current": round4(*cur),
                    "deviation_pct": (pct * 100.0).round() / 100.0,
                }),
            );
        }

        let mut blended = [0.0; FEATURE_KEYS.len()];
        for (out, (base, cur)) in blended.iter_mut().zip(baseline.iter().zip(&current)) {
            *out = PROFILE_DECAY * base + (1.0 - PROFILE_DECAY) * cur;
        }
        self.store
            .save(user_id, dp_privatize(&blended, self.config.dp_epsilon))
            .await;

        let score = round4(deviation.clamp(0.0, 1.0));
        debug!(user_id, score, flagged = flagged.len(), "Writing profile compared");

        Ok(ModuleResult {
            module_id: MODULE_ID.to_string(),
            score,
            confidence: CONFIDENCE,
            evidence: json!({
                "deviation_score": round4(deviation),
                "features": features,
                "feature_deviations": deviations,
                "flagged_features": flagged,
                "profile_samples": profile.samples,
            }),
            processing_ms: elapsed_ms(start),
            error: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CASUAL: &str = "I went to the shop today. It was fun! Did you go? \
        We bought 3 apples and some bread. Then we walked home.";

    const FORMAL: &str = "Furthermore, the comprehensive evaluation of institutional \
        frameworks was conducted in accordance with established methodological \
        principles, and consequently the subsequent analysis demonstrated that \
        regulatory mechanisms were insufficiently calibrated to accommodate the \
        heterogeneous requirements of contemporary stakeholders; nevertheless, \
        considerable progress has been achieved throughout the preceding decade.";

    fn noiseless() -> (WritingProfileModule, Arc<MemoryProfileStore>) {
        let store = Arc::new(MemoryProfileStore::new());
        let config = WritingProfileConfig {
            default_weight: 0.25,
            dp_epsilon: f64::INFINITY,
        };
        (WritingProfileModule::new(config, store.clone()), store)
    }

    fn with_user(user_id: &str) -> Metadata {
        let mut m = Metadata::new();
        m.insert("user_id".into(), json!(user_id));
        m
    }

    #[test]
    fn test_extract_features_short_text_is_zero() {
        assert_eq!(extract_features("too short"), [0.0; 14]);
        assert_eq!(extract_features(&"1234 ".repeat(20)), [0.0; 14]);
    }

    #[test]
    fn test_extract_features_values() {
        let f = extract_features(CASUAL);
        // 5 sentences.
        assert!((f[6] - 0.2).abs() < 1e-9, "question_frequency");
        assert!((f[7] - 0.2).abs() < 1e-9, "exclamation_frequency");
        assert_eq!(f[11], 1.0, "every sentence is short");
        assert_eq!(f[12], 0.0);
        assert!(f[10] > 0.0, "contains a digit");
        assert_eq!(f[1], f[13]);
    }

    #[test]
    fn test_deviation_score() {
        let a = [1.0, 2.0, 3.0];
        assert!(deviation_score(&a, &a).abs() < 1e-12);
        assert_eq!(deviation_score(&[0.0; 3], &a), 0.5);
        assert!((deviation_score(&[1.0, 0.0], &[0.0, 1.0]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_dp_privatize_adds_noise() {
        let v = [1.0; 14];
        assert_eq!(dp_privatize(&v, f64::INFINITY), v);
        let noisy = dp_privatize(&v, 1.0);
        assert!(noisy.iter().all(|x| x.is_finite()));
        assert_ne!(noisy, v);
    }

    #[tokio::test]
    async fn test_no_user_id() {
        let (module, store) = noiseless();
        let result = module.analyze(CASUAL, &Metadata::new()).await.unwrap();
        assert_eq!(result.score, 0.0);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.evidence["status"], "no_user_id");
        assert!(store.profiles.is_empty());
    }

    #[tokio::test]
    async fn test_first_submission_creates_baseline() {
        let (module, store) = noiseless();
        let result = module.analyze(CASUAL, &with_user("u1")).await.unwrap();
        assert_eq!(result.evidence["status"], "baseline_created");
        assert_eq!(result.score, 0.0);
        assert_eq!(result.confidence, 0.0);

        let stored = store.load("u1").await.unwrap();
        assert_eq!(stored.vector, extract_features(CASUAL));
        assert_eq!(stored.samples, 1);
    }

    #[tokio::test]
    async fn test_same_style_scores_low() {
        let (module, _store) = noiseless();
        module.analyze(CASUAL, &with_user("u1")).await.unwrap();
        let result = module.analyze(CASUAL, &with_user("u1")).await.unwrap();

        assert!(result.score < 0.01);
        assert_eq!(result.confidence, CONFIDENCE);
        assert_eq!(result.evidence["flagged_features"].as_array().unwrap().len(), 0);
        assert_eq!(result.evidence["profile_samples"], 1);
    }

    #[tokio::test]
    async fn test_style_change_is_flagged_and_profile_updates() {
        let (module, store) = noiseless();
        module.analyze(CASUAL, &with_user("u1")).await.unwrap();
        let result = module.analyze(FORMAL, &with_user("u1")).await.unwrap();

        assert!(result.score > 0.0);
        let flagged = result.evidence["flagged_features"].as_array().unwrap();
        assert!(flagged.iter().any(|f| f == "avg_sentence_len"));

        let baseline = extract_features(CASUAL);
        let current = extract_features(FORMAL);
        let stored = store.load("u1").await.unwrap();
        assert_eq!(stored.samples, 2);
        assert!((stored.vector[0] - (0.8 * baseline[0] + 0.2 * current[0])).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_profiles_are_per_user() {
        let (module, _store) = noiseless();
        module.analyze(CASUAL, &with_user("u1")).await.unwrap();
        let result = module.analyze(FORMAL, &with_user("u2")).await.unwrap();
        assert_eq!(result.evidence["status"], "baseline_created");
    }
}
