//! Analysis run orchestration.
//!
//! One [`IntegrityController::run`] call resolves the active modules,
//! dispatches them concurrently under a hard per-module timeout, streams
//! progress into the [`EventChannel`], and aggregates once every module has
//! reached a terminal state.

use crate::analysis::{elapsed_ms, AnalysisModule, RiskAggregator};
use crate::engine::events::{EventChannel, EventKind};
use crate::engine::registry::ModuleRegistry;
use crate::error::Result;
use crate::models::{AggregatedResult, Metadata, ModuleResult};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default hard timeout applied to each module.
pub const DEFAULT_MODULE_TIMEOUT: Duration = Duration::from_secs(8);

/// Controller settings.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub module_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            module_timeout: DEFAULT_MODULE_TIMEOUT,
        }
    }
}

/// Inputs of one analysis run.
#[derive(Debug, Clone, Default)]
pub struct AnalysisRequest {
    pub submission_id: String,
    pub text: String,
    /// Passed verbatim to every module.
    pub metadata: Metadata,
    /// Restrict the run to these module ids; `None` runs every enabled module.
    pub requested_modules: Option<Vec<String>>,
    pub institution_id: Option<String>,
}

impl AnalysisRequest {
    pub fn new(submission_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            submission_id: submission_id.into(),
            text: text.into(),
            ..Self::default()
        }
    }
}

/// Executes analysis runs against a shared registry and event channel.
pub struct IntegrityController {
    registry: Arc<ModuleRegistry>,
    aggregator: RiskAggregator,
    events: Arc<EventChannel>,
    config: ControllerConfig,
}

impl IntegrityController {
    pub fn new(
        registry: Arc<ModuleRegistry>,
        aggregator: RiskAggregator,
        events: Arc<EventChannel>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            registry,
            aggregator,
            events,
            config,
        }
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &Arc<EventChannel> {
        &self.events
    }

    /// Run every active module on the submission and aggregate the results.
    ///
    /// Module errors, panics and timeouts become error results; only
    /// registry failures make this return `Err`.
    pub async fn run(&self, request: AnalysisRequest) -> Result<AggregatedResult> {
        let AnalysisRequest {
            submission_id,
            text,
            metadata,
            requested_modules,
            institution_id,
        } = request;
        let sid = submission_id.as_str();

        info!(
            submission_id = sid,
            word_count = text.split_whitespace().count(),
            "Analysis run started"
        );
        self.events.emit(sid, EventKind::AnalysisStarted);

        let active = self
            .registry
            .get_active_modules(requested_modules.as_deref(), institution_id.as_deref())
            .await?;

        if active.is_empty() {
            warn!(submission_id = sid, "No active modules for submission");
            self.events.emit(
                sid,
                EventKind::Completed {
                    integrity_score: None,
                    risk_level: None,
                    error: Some("No active modules".to_string()),
                },
            );
            return Ok(AggregatedResult::empty());
        }

        let order: Vec<String> = active.iter().map(|m| m.module_id().to_string()).collect();
        let text: Arc<str> = Arc::from(text);
        let metadata = Arc::new(metadata);

        let timeout = self.config.module_timeout;
        let mut tasks = FuturesUnordered::new();
        for module in active {
            let module_id = module.module_id().to_string();
            let start = Instant::now();
            let mut handle = self.spawn_module(sid, module, Arc::clone(&text), Arc::clone(&metadata));
            tasks.push(async move {
                // Enforced outside the module task: a module that never yields
                // still cannot hold the run past the deadline.
                let joined = match tokio::time::timeout(timeout, &mut handle).await {
                    Ok(joined) => Some(joined),
                    Err(_) => {
                        handle.abort();
                        None
                    }
                };
                (module_id, joined, elapsed_ms(start))
            });
        }

        let mut collected: Vec<ModuleResult> = Vec::with_capacity(order.len());
        while let Some((module_id, joined, waited_ms)) = tasks.next().await {
            let result = match joined {
                None => {
                    warn!(
                        submission_id = sid,
                        module_id = %module_id,
                        timeout_secs = timeout.as_secs_f64(),
                        "Module timed out"
                    );
                    ModuleResult::failed(
                        &module_id,
                        format!("Module timed out after {}s", timeout.as_secs_f64()),
                        waited_ms,
                    )
                }
                Some(Ok(result)) => result,
                Some(Err(e)) => {
                    let message = if e.is_panic() {
                        panic_message(e.into_panic())
                    } else {
                        e.to_string()
                    };
                    error!(submission_id = sid, module_id = %module_id, error = %message, "Module task aborted");
                    ModuleResult::failed(&module_id, message, 0)
                }
            };

            self.events.emit(
                sid,
                EventKind::ModuleComplete {
                    module_id: module_id.clone(),
                    score: Some(result.score),
                    confidence: Some(result.confidence),
                    status: result.status(),
                    processing_ms: result.processing_ms,
                },
            );
            collected.push(result);
        }

        // Aggregate in dispatch order so flag order is deterministic.
        collected.sort_by_key(|r| {
            order
                .iter()
                .position(|id| *id == r.module_id)
                .unwrap_or(usize::MAX)
        });

        let weights = self
            .registry
            .get_weights(institution_id.as_deref())
            .await?;
        let final_result = self.aggregator.aggregate(&collected, &weights);

        self.events.emit(
            sid,
            EventKind::Completed {
                integrity_score: Some(final_result.integrity_score),
                risk_level: Some(final_result.risk_level),
                error: None,
            },
        );

        info!(
            submission_id = sid,
            score = final_result.integrity_score,
            risk = %final_result.risk_level,
            modules = collected.len(),
            "Analysis run completed"
        );

        Ok(final_result)
    }

    /// Spawn `run` onto the runtime with its own error boundary.
    ///
    /// Failures are logged and yield `None`; progress remains observable
    /// through the event channel.
    pub fn spawn_run(self: &Arc<Self>, request: AnalysisRequest) -> JoinHandle<Option<AggregatedResult>> {
        let controller = Arc::clone(self);
        tokio::spawn(async move {
            let submission_id = request.submission_id.clone();
            match controller.run(request).await {
                Ok(result) => Some(result),
                Err(e) => {
                    error!(submission_id = %submission_id, error = %e, "Background analysis run failed");
                    controller.events.emit(
                        &submission_id,
                        EventKind::Completed {
                            integrity_score: None,
                            risk_level: None,
                            error: Some(e.to_string()),
                        },
                    );
                    None
                }
            }
        })
    }

    /// Spawn one module's analysis. The caller owns the timeout; an
    /// aborted task is cancelled at its next await point.
    fn spawn_module(
        &self,
        submission_id: &str,
        module: Arc<dyn AnalysisModule>,
        text: Arc<str>,
        metadata: Arc<Metadata>,
    ) -> JoinHandle<ModuleResult> {
        let submission_id = submission_id.to_string();

        tokio::spawn(async move {
            let module_id = module.module_id().to_string();
            let start = Instant::now();

            match module.analyze(&text, &metadata).await {
                Ok(result) => {
                    debug!(
                        submission_id = %submission_id,
                        module_id = %module_id,
                        score = result.score,
                        "Module finished"
                    );
                    result
                }
                Err(e) => {
                    error!(submission_id = %submission_id, module_id = %module_id, error = %e, "Module failed");
                    ModuleResult::failed(module_id, e.to_string(), elapsed_ms(start))
                }
            }
        })
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("Module panicked: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("Module panicked: {}", s)
    } else {
        "Module panicked".to_string()
    }
}
