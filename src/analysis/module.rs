//! The analysis module capability.
//!
//! Every analysis strategy (AI-text detection, near-duplicate detection,
//! stylometric drift, behavioral signals) implements [`AnalysisModule`].
//! The controller and registry depend only on this trait.

use crate::error::ModuleError;
use crate::models::{Metadata, ModuleInfo, ModuleResult};
use async_trait::async_trait;
use std::time::Instant;

/// Trait that all analysis modules must implement.
#[async_trait]
pub trait AnalysisModule: Send + Sync {
    /// Unique, stable module identifier.
    fn module_id(&self) -> &str;

    /// Module version string.
    fn version(&self) -> &str {
        "1.0.0"
    }

    /// Weight used when no weight map has been configured.
    fn default_weight(&self) -> f64;

    /// Analyze `text`. Expected-bad input should yield a low-confidence
    /// result rather than an error.
    async fn analyze(&self, text: &str, metadata: &Metadata) -> Result<ModuleResult, ModuleError>;

    /// Cheap, side-effect-free health check.
    fn is_healthy(&self) -> bool {
        true
    }

    /// Called once at process start. Failures are logged and ignored.
    async fn warmup(&self) -> Result<(), ModuleError> {
        Ok(())
    }

    /// Descriptor for admin listings.
    fn info(&self) -> ModuleInfo {
        ModuleInfo {
            module_id: self.module_id().to_string(),
            version: self.version().to_string(),
            default_weight: self.default_weight(),
            healthy: self.is_healthy(),
        }
    }
}

/// Milliseconds elapsed since `start`.
pub fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
