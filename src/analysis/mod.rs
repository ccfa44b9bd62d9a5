//! Analysis capability and score aggregation.
//!
//! This module defines the contract every analysis strategy implements
//! and the aggregator that folds their results into one risk score.

pub mod aggregator;
pub mod module;

pub use aggregator::{AggregatorConfig, RiskAggregator};
pub use module::{elapsed_ms, AnalysisModule};
