//! Module registry: enablement and weights per scope.
//!
//! State lives in a shared [`KeyValueStore`] so toggles take effect on the
//! next run without a restart. Institution-scoped entries override the
//! global ones for enablement; weight maps are resolved whole, never merged.

use crate::analysis::AnalysisModule;
use crate::engine::store::KeyValueStore;
use crate::error::{EngineError, Result};
use crate::models::ModuleInfo;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

const ENABLED: &str = "1";
const DISABLED: &str = "0";

fn enabled_key(module_id: &str, institution_id: Option<&str>) -> String {
    match institution_id {
        Some(inst) => format!("module:enabled:{}:{}", inst, module_id),
        None => format!("module:enabled:{}", module_id),
    }
}

fn weights_key(institution_id: Option<&str>) -> String {
    match institution_id {
        Some(inst) => format!("module:weights:{}", inst),
        None => "module:weights".to_string(),
    }
}

/// Installed modules plus their per-scope enablement and weights.
pub struct ModuleRegistry {
    modules: Vec<Arc<dyn AnalysisModule>>,
    index: HashMap<String, usize>,
    store: Arc<dyn KeyValueStore>,
}

impl ModuleRegistry {
    /// Create a registry over `modules`. Later duplicates of a module id are ignored.
    pub fn new(store: Arc<dyn KeyValueStore>, modules: Vec<Arc<dyn AnalysisModule>>) -> Self {
        let mut unique: Vec<Arc<dyn AnalysisModule>> = Vec::with_capacity(modules.len());
        let mut index = HashMap::new();

        for module in modules {
            let id = module.module_id().to_string();
            if index.contains_key(&id) {
                warn!(module_id = %id, "Duplicate module id ignored");
                continue;
            }
            index.insert(id, unique.len());
            unique.push(module);
        }

        Self {
            modules: unique,
            index,
            store,
        }
    }

    /// Seed global enablement and the global weight map where missing.
    ///
    /// Modules with a zero default weight start disabled. Safe to call on
    /// every start.
    pub async fn initialize(&self) -> Result<()> {
        for module in &self.modules {
            let enabled = module.default_weight() != 0.0;
            let value = if enabled { ENABLED } else { DISABLED };
            let key = enabled_key(module.module_id(), None);
            if self.store.set_if_absent(&key, value.to_string()).await? {
                debug!(module_id = module.module_id(), enabled, "Seeded module enablement");
            }
        }

        let defaults: BTreeMap<String, f64> = self.default_weights().into_iter().collect();
        self.store
            .set_if_absent(&weights_key(None), serde_json::to_string(&defaults)?)
            .await?;

        info!(modules = ?self.module_ids(), "Module registry initialized");
        Ok(())
    }

    /// Run every module's warmup. Failures are logged, never fatal.
    pub async fn warmup_all(&self) {
        for module in &self.modules {
            match module.warmup().await {
                Ok(()) => debug!(module_id = module.module_id(), "Module warmed up"),
                Err(e) => warn!(module_id = module.module_id(), error = %e, "Module warmup failed"),
            }
        }
    }

    /// Effective enablement of `module_id` at the given scope.
    ///
    /// For an institution, its own entry wins when present; otherwise the
    /// global entry applies. A missing global entry reads as disabled.
    pub async fn is_enabled(&self, module_id: &str, institution_id: Option<&str>) -> Result<bool> {
        if let Some(inst) = institution_id {
            if let Some(value) = self.enablement_entry(module_id, Some(inst)).await? {
                return Ok(value);
            }
        }
        Ok(self
            .enablement_entry(module_id, None)
            .await?
            .unwrap_or(false))
    }

    /// Enable or disable a module globally or for one institution.
    pub async fn toggle(
        &self,
        module_id: &str,
        enabled: bool,
        institution_id: Option<&str>,
    ) -> Result<()> {
        if !self.index.contains_key(module_id) {
            return Err(EngineError::UnknownModule(module_id.to_string()));
        }

        let value = if enabled { ENABLED } else { DISABLED };
        self.store
            .set(&enabled_key(module_id, institution_id), value.to_string())
            .await?;

        info!(
            module_id,
            enabled,
            institution = institution_id.unwrap_or("global"),
            "Module toggled"
        );
        Ok(())
    }

    /// Resolve the enabled modules among `requested`.
    ///
    /// `None`, or a request with no non-blank ids, means all modules.
    /// Unknown ids are skipped; the result follows the request order.
    pub async fn get_active_modules(
        &self,
        requested: Option<&[String]>,
        institution_id: Option<&str>,
    ) -> Result<Vec<Arc<dyn AnalysisModule>>> {
        let requested: Vec<&str> = requested
            .unwrap_or_default()
            .iter()
            .map(|id| id.trim())
            .filter(|id| !id.is_empty())
            .collect();
        let targets: Vec<&str> = if requested.is_empty() {
            self.modules.iter().map(|m| m.module_id()).collect()
        } else {
            requested
        };

        let mut seen = HashSet::new();
        let mut active = Vec::new();

        for id in targets {
            let Some(&idx) = self.index.get(id) else {
                debug!(module_id = id, "Requested module not installed, skipping");
                continue;
            };
            if !seen.insert(id) {
                continue;
            }
            if self.is_enabled(id, institution_id).await? {
                active.push(Arc::clone(&self.modules[idx]));
            }
        }

        Ok(active)
    }

    /// Effective weight map: the institution's own map, else the global
    /// map, else module defaults.
    pub async fn get_weights(&self, institution_id: Option<&str>) -> Result<HashMap<String, f64>> {
        if let Some(inst) = institution_id {
            if let Some(raw) = self.store.get(&weights_key(Some(inst))).await? {
                return Ok(serde_json::from_str(&raw)?);
            }
        }
        if let Some(raw) = self.store.get(&weights_key(None)).await? {
            return Ok(serde_json::from_str(&raw)?);
        }
        Ok(self.default_weights())
    }

    /// Replace the whole weight map at the given scope in one write.
    ///
    /// Weights need not sum to 1. Unknown module ids and negative or
    /// non-finite weights are rejected without touching stored state.
    pub async fn set_weights(
        &self,
        weights: HashMap<String, f64>,
        institution_id: Option<&str>,
    ) -> Result<()> {
        for (module_id, weight) in &weights {
            if !self.index.contains_key(module_id) {
                return Err(EngineError::UnknownModule(module_id.clone()));
            }
            if !weight.is_finite() || *weight < 0.0 {
                return Err(EngineError::InvalidWeight {
                    module_id: module_id.clone(),
                    weight: *weight,
                });
            }
        }

        let ordered: BTreeMap<&String, &f64> = weights.iter().collect();
        self.store
            .set(&weights_key(institution_id), serde_json::to_string(&ordered)?)
            .await?;

        info!(
            institution = institution_id.unwrap_or("global"),
            weights = ?ordered,
            "Module weights updated"
        );
        Ok(())
    }

    /// Descriptors of every installed module, in installation order.
    pub fn list_modules(&self) -> Vec<ModuleInfo> {
        self.modules.iter().map(|m| m.info()).collect()
    }

    pub fn get_module(&self, module_id: &str) -> Option<Arc<dyn AnalysisModule>> {
        self.index.get(module_id).map(|&i| Arc::clone(&self.modules[i]))
    }

    pub fn module_ids(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.module_id()).collect()
    }

    pub fn default_weights(&self) -> HashMap<String, f64> {
        self.modules
            .iter()
            .map(|m| (m.module_id().to_string(), m.default_weight()))
            .collect()
    }

    async fn enablement_entry(&self, module_id: &str, institution_id: Option<&str>) -> Result<Option<bool>> {
        let raw = self.store.get(&enabled_key(module_id, institution_id)).await?;
        Ok(raw.map(|v| v == ENABLED))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::store::MemoryStore;
    use crate::engine::testing::StubModule;

    fn registry_with(store: Arc<MemoryStore>) -> ModuleRegistry {
        let modules: Vec<Arc<dyn AnalysisModule>> = vec![
            Arc::new(StubModule::scoring("ai_detection", 0.35, 0.5)),
            Arc::new(StubModule::scoring("plagiarism", 0.40, 0.5)),
            Arc::new(StubModule::scoring("proctoring", 0.0, 0.5)),
        ];
        ModuleRegistry::new(store, modules)
    }

    async fn initialized() -> (ModuleRegistry, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_with(Arc::clone(&store));
        registry.initialize().await.unwrap();
        (registry, store)
    }

    fn ids(modules: &[Arc<dyn AnalysisModule>]) -> Vec<String> {
        modules.iter().map(|m| m.module_id().to_string()).collect()
    }

    #[tokio::test]
    async fn test_initialize_seeds_defaults() {
        let (registry, _) = initialized().await;
        assert!(registry.is_enabled("ai_detection", None).await.unwrap());
        assert!(registry.is_enabled("plagiarism", None).await.unwrap());
        // Zero default weight starts disabled.
        assert!(!registry.is_enabled("proctoring", None).await.unwrap());

        let weights = registry.get_weights(None).await.unwrap();
        assert_eq!(weights.get("plagiarism"), Some(&0.40));
        assert_eq!(weights.get("proctoring"), Some(&0.0));
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let (registry, store) = initialized().await;
        registry.toggle("ai_detection", false, None).await.unwrap();
        let mut custom = HashMap::new();
        custom.insert("ai_detection".to_string(), 2.0);
        registry.set_weights(custom, None).await.unwrap();

        // A second start must not reset state.
        let again = registry_with(store);
        again.initialize().await.unwrap();
        assert!(!again.is_enabled("ai_detection", None).await.unwrap());
        assert_eq!(again.get_weights(None).await.unwrap().get("ai_detection"), Some(&2.0));
    }

    #[tokio::test]
    async fn test_toggle_unknown_module() {
        let (registry, store) = initialized().await;
        let before = store.len();
        let err = registry.toggle("nope", true, None).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownModule(ref id) if id == "nope"));
        assert_eq!(store.len(), before);
    }

    #[tokio::test]
    async fn test_active_modules_global() {
        let (registry, _) = initialized().await;
        let active = registry.get_active_modules(None, None).await.unwrap();
        assert_eq!(ids(&active), vec!["ai_detection", "plagiarism"]);
    }

    #[tokio::test]
    async fn test_institution_disable_overrides_global() {
        let (registry, _) = initialized().await;
        registry.toggle("plagiarism", false, Some("uni-1")).await.unwrap();

        let active = registry.get_active_modules(None, Some("uni-1")).await.unwrap();
        assert_eq!(ids(&active), vec!["ai_detection"]);

        // Other institutions and the global scope are unaffected.
        let other = registry.get_active_modules(None, Some("uni-2")).await.unwrap();
        assert_eq!(ids(&other), vec!["ai_detection", "plagiarism"]);
        assert!(registry.is_enabled("plagiarism", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_institution_enable_overrides_global_disable() {
        let (registry, _) = initialized().await;
        registry.toggle("proctoring", true, Some("uni-1")).await.unwrap();

        let active = registry.get_active_modules(None, Some("uni-1")).await.unwrap();
        assert_eq!(ids(&active), vec!["ai_detection", "plagiarism", "proctoring"]);
        assert!(!registry.is_enabled("proctoring", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_institution_disable_without_global_entry() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_with(Arc::clone(&store));
        // No initialize: no global entries at all.
        registry.toggle("plagiarism", false, Some("uni-1")).await.unwrap();
        registry.toggle("ai_detection", true, Some("uni-1")).await.unwrap();

        let active = registry.get_active_modules(None, Some("uni-1")).await.unwrap();
        assert_eq!(ids(&active), vec!["ai_detection"]);
    }

    #[tokio::test]
    async fn test_requested_filter_skips_unknown_and_keeps_order() {
        let (registry, _) = initialized().await;
        let requested = vec![
            "plagiarism".to_string(),
            "ghost".to_string(),
            "ai_detection".to_string(),
            "plagiarism".to_string(),
        ];
        let active = registry
            .get_active_modules(Some(&requested), None)
            .await
            .unwrap();
        assert_eq!(ids(&active), vec!["plagiarism", "ai_detection"]);
    }

    #[tokio::test]
    async fn test_empty_request_means_all_modules() {
        let (registry, _) = initialized().await;
        let empty: Vec<String> = Vec::new();
        let active = registry.get_active_modules(Some(&empty), None).await.unwrap();
        assert_eq!(ids(&active), vec!["ai_detection", "plagiarism"]);

        let blank = vec!["".to_string(), " ".to_string()];
        let active = registry.get_active_modules(Some(&blank), None).await.unwrap();
        assert_eq!(ids(&active), vec!["ai_detection", "plagiarism"]);

        // Only unknown ids is still an explicit request.
        let unknown = vec!["ghost".to_string()];
        assert!(registry.get_active_modules(Some(&unknown), None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_weight_precedence() {
        let store = Arc::new(MemoryStore::new());
        let registry = registry_with(Arc::clone(&store));

        // Nothing stored: module defaults.
        let defaults = registry.get_weights(Some("uni-1")).await.unwrap();
        assert_eq!(defaults.get("ai_detection"), Some(&0.35));

        let mut global = HashMap::new();
        global.insert("ai_detection".to_string(), 0.5);
        global.insert("plagiarism".to_string(), 0.5);
        registry.set_weights(global, None).await.unwrap();

        // Institution without its own map falls back to global.
        let resolved = registry.get_weights(Some("uni-1")).await.unwrap();
        assert_eq!(resolved.get("ai_detection"), Some(&0.5));

        // An institution map replaces global wholesale, no merge.
        let mut inst = HashMap::new();
        inst.insert("plagiarism".to_string(), 1.0);
        registry.set_weights(inst, Some("uni-1")).await.unwrap();
        let resolved = registry.get_weights(Some("uni-1")).await.unwrap();
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved.get("plagiarism"), Some(&1.0));
        assert_eq!(resolved.get("ai_detection"), None);
    }

    #[tokio::test]
    async fn test_set_weights_rejects_unknown_and_invalid() {
        let (registry, _) = initialized().await;

        let mut unknown = HashMap::new();
        unknown.insert("ghost".to_string(), 1.0);
        assert!(matches!(
            registry.set_weights(unknown, None).await,
            Err(EngineError::UnknownModule(_))
        ));

        let mut negative = HashMap::new();
        negative.insert("plagiarism".to_string(), -0.1);
        assert!(matches!(
            registry.set_weights(negative, None).await,
            Err(EngineError::InvalidWeight { .. })
        ));

        // State untouched.
        let weights = registry.get_weights(None).await.unwrap();
        assert_eq!(weights.get("plagiarism"), Some(&0.40));
    }

    #[tokio::test]
    async fn test_set_weights_does_not_require_unit_sum() {
        let (registry, _) = initialized().await;
        let mut w = HashMap::new();
        w.insert("ai_detection".to_string(), 3.0);
        w.insert("plagiarism".to_string(), 4.0);
        registry.set_weights(w, None).await.unwrap();
        let weights = registry.get_weights(None).await.unwrap();
        assert_eq!(weights.get("plagiarism"), Some(&4.0));
    }

    #[tokio::test]
    async fn test_corrupt_weight_map_is_serialization_error() {
        let (registry, store) = initialized().await;
        store.set("module:weights", "not json".to_string()).await.unwrap();
        assert!(matches!(
            registry.get_weights(None).await,
            Err(EngineError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_list_modules() {
        let (registry, _) = initialized().await;
        let listed = registry.list_modules();
        assert_eq!(listed.len(), 3);
        assert_eq!(listed[0].module_id, "ai_detection");
        assert_eq!(listed[0].version, "1.0.0");
        assert_eq!(listed[2].default_weight, 0.0);
        assert!(listed.iter().all(|m| m.healthy));
        assert!(registry.get_module("plagiarism").is_some());
        assert!(registry.get_module("ghost").is_none());
    }

    #[tokio::test]
    async fn test_concurrent_toggles_of_different_modules() {
        let (registry, _) = initialized().await;
        let registry = Arc::new(registry);

        let a = {
            let r = Arc::clone(&registry);
            tokio::spawn(async move { r.toggle("ai_detection", false, Some("uni")).await })
        };
        let b = {
            let r = Arc::clone(&registry);
            tokio::spawn(async move { r.toggle("plagiarism", false, Some("uni")).await })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let active = registry.get_active_modules(None, Some("uni")).await.unwrap();
        assert!(active.is_empty());
    }

    #[tokio::test]
    async fn test_warmup_failures_are_not_fatal() {
        let store = Arc::new(MemoryStore::new());
        let modules: Vec<Arc<dyn AnalysisModule>> = vec![
            Arc::new(StubModule::scoring("a", 1.0, 0.1).with_failing_warmup()),
            Arc::new(StubModule::scoring("b", 1.0, 0.1)),
        ];
        let registry = ModuleRegistry::new(store, modules);
        registry.warmup_all().await;
        registry.initialize().await.unwrap();
        assert_eq!(registry.get_active_modules(None, None).await.unwrap().len(), 2);
    }
}
