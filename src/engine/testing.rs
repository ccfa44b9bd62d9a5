//! Configurable stand-ins for engine tests.

use crate::analysis::AnalysisModule;
use crate::engine::store::KeyValueStore;
use crate::error::{EngineError, ModuleError};
use crate::models::{Metadata, ModuleResult};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

enum Outcome {
    Score(f64),
    Fail(String),
    Panic,
}

pub(crate) struct StubModule {
    id: String,
    default_weight: f64,
    outcome: Outcome,
    delay: Option<Duration>,
    blocking: Option<Duration>,
    warmup_fails: bool,
    calls: AtomicUsize,
}

impl StubModule {
    fn new(id: &str, default_weight: f64, outcome: Outcome) -> Self {
        Self {
            id: id.to_string(),
            default_weight,
            outcome,
            delay: None,
            blocking: None,
            warmup_fails: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn scoring(id: &str, default_weight: f64, score: f64) -> Self {
        Self::new(id, default_weight, Outcome::Score(score))
    }

    pub(crate) fn failing(id: &str, message: &str) -> Self {
        Self::new(id, 1.0, Outcome::Fail(message.to_string()))
    }

    pub(crate) fn panicking(id: &str) -> Self {
        Self::new(id, 1.0, Outcome::Panic)
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Hold the worker thread without yielding.
    pub(crate) fn with_blocking(mut self, duration: Duration) -> Self {
        self.blocking = Some(duration);
        self
    }

    pub(crate) fn with_failing_warmup(mut self) -> Self {
        self.warmup_fails = true;
        self
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalysisModule for StubModule {
    fn module_id(&self) -> &str {
        &self.id
    }

    fn default_weight(&self) -> f64 {
        self.default_weight
    }

    async fn analyze(&self, _text: &str, metadata: &Metadata) -> Result<ModuleResult, ModuleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(duration) = self.blocking {
            std::thread::sleep(duration);
        }
        match &self.outcome {
            Outcome::Score(score) => Ok(ModuleResult {
                module_id: self.id.clone(),
                score: *score,
                confidence: 0.8,
                evidence: json!({ "seen_metadata": metadata.len() }),
                processing_ms: 1,
                error: None,
            }),
            Outcome::Fail(message) => Err(ModuleError::Analysis(message.clone())),
            Outcome::Panic => panic!("stub module {} exploded", self.id),
        }
    }

    async fn warmup(&self) -> Result<(), ModuleError> {
        if self.warmup_fails {
            Err(ModuleError::Unavailable("weights missing".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Store whose backend is unreachable.
pub(crate) struct UnreachableStore;

#[async_trait]
impl KeyValueStore for UnreachableStore {
    async fn get(&self, key: &str) -> crate::error::Result<Option<String>> {
        Err(EngineError::Store(format!("connection refused reading {key}")))
    }

    async fn set(&self, key: &str, _value: String) -> crate::error::Result<()> {
        Err(EngineError::Store(format!("connection refused writing {key}")))
    }

    async fn set_if_absent(&self, key: &str, _value: String) -> crate::error::Result<bool> {
        Err(EngineError::Store(format!("connection refused writing {key}")))
    }
}
