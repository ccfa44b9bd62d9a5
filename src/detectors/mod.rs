//! Bundled analysis modules.

pub mod ai_detection;
pub mod plagiarism;
pub mod proctoring;
pub mod text;
pub mod writing_profile;

use crate::analysis::AnalysisModule;
use crate::config::Config;
use std::sync::Arc;

pub use ai_detection::AiDetectionModule;
pub use plagiarism::{FingerprintIndex, MemoryFingerprintIndex, PlagiarismModule};
pub use proctoring::ProctoringModule;
pub use writing_profile::{MemoryProfileStore, ProfileStore, WritingProfileModule};

/// The four bundled modules, backed by in-memory stores.
pub fn standard_modules(config: &Config) -> Vec<Arc<dyn AnalysisModule>> {
    vec![
        Arc::new(AiDetectionModule::new(config.ai_detection_config())),
        Arc::new(PlagiarismModule::new(
            config.plagiarism_config(),
            Arc::new(MemoryFingerprintIndex::new()),
        )),
        Arc::new(WritingProfileModule::new(
            config.writing_profile_config(),
            Arc::new(MemoryProfileStore::new()),
        )),
        Arc::new(ProctoringModule::new(config.proctoring_config())),
    ]
}
