//! Near-duplicate detection against previously seen submissions.
//!
//! Every submission is fingerprinted twice: a 64-bit SimHash used as a cheap
//! pre-filter and a MinHash signature over word shingles used to estimate
//! Jaccard similarity. Fingerprints are kept in a [`FingerprintIndex`] so
//! later submissions can be compared against earlier ones.

use crate::analysis::{elapsed_ms, AnalysisModule};
use crate::detectors::text::{paragraphs, word_tokens};
use crate::error::ModuleError;
use crate::models::{round4, Metadata, ModuleResult};
use async_trait::async_trait;
use dashmap::DashMap;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

pub const MODULE_ID: &str = "plagiarism";

/// Mersenne prime 2^61 - 1, modulus for the MinHash permutations.
const MERSENNE_PRIME: u64 = (1 << 61) - 1;
const PERMUTATION_SEED: u64 = 1;

const SUSPICIOUS_PHRASES: [&str; 4] = [
    "this essay will examine",
    "throughout this paper",
    "as stated by many scholars",
    "according to various sources",
];

const MIN_PARAGRAPH_CHARS: usize = 50;
const MAX_REPORTED_MATCHES: usize = 10;
const SCAN_YIELD_INTERVAL: usize = 64;

#[derive(Debug, Clone)]
pub struct PlagiarismConfig {
    pub default_weight: f64,
    pub num_perm: usize,
    pub shingle_size: usize,
    /// SimHash distance above which a stored document is skipped.
    pub max_hamming: u32,
    /// MinHash similarity above which a stored document counts as a match.
    pub match_threshold: f64,
}

impl Default for PlagiarismConfig {
    fn default() -> Self {
        Self {
            default_weight: 0.40,
            num_perm: 128,
            shingle_size: 5,
            max_hamming: 20,
            match_threshold: 0.3,
        }
    }
}

/// Fingerprint of a stored submission.
#[derive(Debug, Clone)]
pub struct StoredFingerprint {
    /// `None` when the text had fewer words than one shingle.
    pub minhash: Option<Vec<u64>>,
    pub simhash: u64,
    pub user_id: String,
}

/// Storage for fingerprints of previously analyzed submissions.
#[async_trait]
pub trait FingerprintIndex: Send + Sync {
    /// Point-in-time copy of every stored fingerprint.
    async fn snapshot(&self) -> Vec<(String, StoredFingerprint)>;

    async fn insert(&self, doc_id: &str, fingerprint: StoredFingerprint);

    async fn len(&self) -> usize;
}

#[derive(Debug, Default)]
pub struct MemoryFingerprintIndex {
    docs: DashMap<String, StoredFingerprint>,
}

impl MemoryFingerprintIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FingerprintIndex for MemoryFingerprintIndex {
    async fn snapshot(&self) -> Vec<(String, StoredFingerprint)> {
        self.docs
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    async fn insert(&self, doc_id: &str, fingerprint: StoredFingerprint) {
        self.docs.insert(doc_id.to_string(), fingerprint);
    }

    async fn len(&self) -> usize {
        self.docs.len()
    }
}

/// 64-bit token hash: the first eight bytes of SHA-256.
fn hash64(token: &str) -> u64 {
    let digest = Sha256::digest(token.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

pub struct Fingerprinter {
    shingle_size: usize,
    permutations: Vec<(u64, u64)>,
}

impl Fingerprinter {
    pub fn new(num_perm: usize, shingle_size: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(PERMUTATION_SEED);
        let permutations = (0..num_perm.max(1))
            .map(|_| {
                (
                    rng.gen_range(1..MERSENNE_PRIME),
                    rng.gen_range(0..MERSENNE_PRIME),
                )
            })
            .collect();

        Self {
            shingle_size: shingle_size.max(1),
            permutations,
        }
    }

    fn shingles(&self, text: &str) -> HashSet<String> {
        let tokens = word_tokens(text);
        tokens
            .windows(self.shingle_size)
            .map(|window| window.join(" "))
            .collect()
    }

    /// MinHash signature, or `None` if the text yields no shingles.
    pub fn minhash(&self, text: &str) -> Option<Vec<u64>> {
        let shingles = self.shingles(text);
        if shingles.is_empty() {
            return None;
        }

        let hashes: Vec<u64> = shingles
            .iter()
            .map(|s| hash64(s) % MERSENNE_PRIME)
            .collect();

        let signature = self
            .permutations
            .iter()
            .map(|&(a, b)| {
                hashes
                    .iter()
                    .map(|&h| {
                        ((a as u128 * h as u128 + b as u128) % MERSENNE_PRIME as u128) as u64
                    })
                    .min()
                    .unwrap_or(u64::MAX)
            })
            .collect();

        Some(signature)
    }

    /// Estimated Jaccard similarity; 0 when either side is missing.
    pub fn similarity(a: Option<&[u64]>, b: Option<&[u64]>) -> f64 {
        match (a, b) {
            (Some(a), Some(b)) if a.len() == b.len() && !a.is_empty() => {
                let equal = a.iter().zip(b).filter(|(x, y)| x == y).count();
                equal as f64 / a.len() as f64
            }
            _ => 0.0,
        }
    }

    pub fn simhash(&self, text: &str) -> u64 {
        let mut weights = [0i64; 64];
        for token in word_tokens(text) {
            let h = hash64(&token);
            for (bit, weight) in weights.iter_mut().enumerate() {
                if h & (1 << bit) != 0 {
                    *weight += 1;
                } else {
                    *weight -= 1;
                }
            }
        }

        weights
            .iter()
            .enumerate()
            .filter(|(_, w)| **w > 0)
            .fold(0u64, |acc, (bit, _)| acc | (1 << bit))
    }

    /// Highest pairwise similarity among substantial paragraphs.
    fn internal_repetition(&self, text: &str) -> f64 {
        let signatures: Vec<Option<Vec<u64>>> = paragraphs(text)
            .into_iter()
            .filter(|p| p.chars().count() > MIN_PARAGRAPH_CHARS)
            .map(|p| self.minhash(p))
            .collect();

        let mut max_sim: f64 = 0.0;
        for (i, a) in signatures.iter().enumerate() {
            for b in &signatures[i + 1..] {
                let sim = Fingerprinter::similarity(a.as_deref(), b.as_deref());
                max_sim = max_sim.max(sim);
            }
        }
        max_sim
    }

    pub fn hamming_distance(a: u64, b: u64) -> u32 {
        (a ^ b).count_ones()
    }
}

#[derive(Debug, Clone)]
struct Match {
    doc_id: String,
    similarity: f64,
    user_id: String,
}

pub struct PlagiarismModule {
    config: PlagiarismConfig,
    fingerprinter: Arc<Fingerprinter>,
    index: Arc<dyn FingerprintIndex>,
}

impl PlagiarismModule {
    pub fn new(config: PlagiarismConfig, index: Arc<dyn FingerprintIndex>) -> Self {
        let fingerprinter = Arc::new(Fingerprinter::new(config.num_perm, config.shingle_size));
        Self {
            config,
            fingerprinter,
            index,
        }
    }

    async fn find_matches(
        &self,
        submission_id: Option<&str>,
        minhash: Option<&[u64]>,
        simhash: u64,
    ) -> Vec<Match> {
        let mut matches = Vec::new();

        for (n, (doc_id, stored)) in self.index.snapshot().await.into_iter().enumerate() {
            if n > 0 && n % SCAN_YIELD_INTERVAL == 0 {
                tokio::task::yield_now().await;
            }

            if Some(doc_id.as_str()) == submission_id {
                continue;
            }

            if Fingerprinter::hamming_distance(simhash, stored.simhash) > self.config.max_hamming {
                continue;
            }

            let similarity = Fingerprinter::similarity(minhash, stored.minhash.as_deref());
            if similarity > self.config.match_threshold {
                matches.push(Match {
                    doc_id,
                    similarity,
                    user_id: stored.user_id,
                });
            }
        }

        matches.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.doc_id.cmp(&b.doc_id))
        });
        matches
    }
}

#[async_trait]
impl AnalysisModule for PlagiarismModule {
    fn module_id(&self) -> &str {
        MODULE_ID
    }

    fn default_weight(&self) -> f64 {
        self.config.default_weight
    }

    async fn analyze(&self, text: &str, metadata: &Metadata) -> Result<ModuleResult, ModuleError> {
        let start = Instant::now();
        let submission_id = metadata.get("submission_id").and_then(|v| v.as_str());
        let user_id = metadata
            .get("user_id")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown");

        let fingerprinter = Arc::clone(&self.fingerprinter);
        let owned = text.to_string();
        let (minhash, simhash, internal) = tokio::task::spawn_blocking(move || {
            (
                fingerprinter.minhash(&owned),
                fingerprinter.simhash(&owned),
                fingerprinter.internal_repetition(&owned),
            )
        })
        .await
        .map_err(|e| ModuleError::Analysis(format!("fingerprinting task failed: {e}")))?;

        let matches = self
            .find_matches(submission_id, minhash.as_deref(), simhash)
            .await;
        let max_similarity = matches.first().map(|m| m.similarity).unwrap_or(0.0);

        let lower = text.to_lowercase();
        let suspicious: Vec<&str> = SUSPICIOUS_PHRASES
            .iter()
            .copied()
            .filter(|p| lower.contains(p))
            .collect();
        let phrase_score = (suspicious.len() as f64 / 3.0).min(1.0);

        match submission_id {
            Some(id) => {
                self.index
                    .insert(
                        id,
                        StoredFingerprint {
                            minhash,
                            simhash,
                            user_id: user_id.to_string(),
                        },
                    )
                    .await;
            }
            None => debug!("No submission_id in metadata, fingerprint not stored"),
        }

        let score = (max_similarity * 0.7 + phrase_score * 0.2 + internal * 0.1).clamp(0.0, 1.0);
        let confidence = if matches.is_empty() { 0.60 } else { 0.80 };

        if !matches.is_empty() {
            info!(
                submission_id = submission_id.unwrap_or("unknown"),
                matches = matches.len(),
                max_similarity,
                "Near-duplicate submissions found"
            );
        }

        let reported: Vec<serde_json::Value> = matches
            .iter()
            .take(MAX_REPORTED_MATCHES)
            .map(|m| {
                json!({
                    "doc_id": m.doc_id,
                    "similarity": round4(m.similarity),
                    "user_id": m.user_id,
                })
            })
            .collect();

        Ok(ModuleResult {
            module_id: MODULE_ID.to_string(),
            score: round4(score),
            confidence,
            evidence: json!({
                "matches": reported,
                "max_similarity": round4(max_similarity),
                "suspicious_phrases": suspicious,
                "internal_repetition": round4(internal),
                "documents_checked": self.index.len().await,
            }),
            processing_ms: elapsed_ms(start),
            error: None,
        })
    }
}
