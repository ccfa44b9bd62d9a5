//! Orchestration engine.
//!
//! The registry decides which modules run and how they are weighted, the
//! controller runs them, and the event channel reports progress.

pub mod controller;
pub mod events;
pub mod registry;
pub mod store;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::{AnalysisRequest, ControllerConfig, IntegrityController};
pub use events::{Event, EventChannel, EventKind, Subscription};
pub use registry::ModuleRegistry;
pub use store::{KeyValueStore, MemoryStore};
