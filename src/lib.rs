//! Integrity engine: concurrent, pluggable academic-integrity risk scoring.
//!
//! A [`ModuleRegistry`] decides which [`AnalysisModule`]s run for a
//! submission and how they are weighted, the [`IntegrityController`] runs
//! them concurrently under a per-module timeout, the [`RiskAggregator`]
//! folds their results into one score and the [`EventChannel`] streams
//! progress to observers.

pub mod analysis;
pub mod cli;
pub mod config;
pub mod detectors;
pub mod engine;
pub mod error;
pub mod input;
pub mod models;
pub mod report;

pub use analysis::{AggregatorConfig, AnalysisModule, RiskAggregator};
pub use engine::{
    AnalysisRequest, ControllerConfig, Event, EventChannel, EventKind, IntegrityController,
    KeyValueStore, MemoryStore, ModuleRegistry,
};
pub use error::{EngineError, ModuleError};
pub use models::{AggregatedResult, Metadata, ModuleResult, RiskLevel};
