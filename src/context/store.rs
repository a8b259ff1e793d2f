//! In-memory cache plus durable backend for semantic contexts.

use crate::context::semantic::SemanticContext;
use crate::error::StoreError;
use crate::persistence::KeyValueStore;
use crate::types::CapabilityCategory;
use crate::understanding::Understanding;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// Live contexts stay visible for 24 hours, archives for 7 days.
pub const LIVE_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const ARCHIVE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

fn context_key(workflow_id: &str) -> String {
    format!("semantic_context:{}", workflow_id)
}

fn archive_key(workflow_id: &str) -> String {
    format!("archived_context:{}", workflow_id)
}

fn session_key(session_id: &str) -> String {
    format!("session_workflows:{}", session_id)
}

/// Store for per-workflow [`SemanticContext`] documents.
///
/// Reads hit a local cache first and fall back to the backend; every write
/// goes to both. Mutations of one workflow's context are serialized by a
/// per-workflow lock so concurrent workers cannot lose updates. The backend
/// keeps a session index so all workflows of a session can be found later.
#[derive(Debug)]
pub struct ContextStore {
    cache: DashMap<String, SemanticContext>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    backend: Arc<dyn KeyValueStore>,
}

impl ContextStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            cache: DashMap::new(),
            locks: DashMap::new(),
            backend,
        }
    }

    fn lock_for(&self, workflow_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(workflow_id.to_string())
            .or_default()
            .clone()
    }

    /// Create the initial context for a workflow from its understanding.
    pub fn create(
        &self,
        workflow_id: &str,
        session_id: &str,
        understanding: &Understanding,
    ) -> Result<SemanticContext, StoreError> {
        let context = SemanticContext::from_understanding(workflow_id, session_id, understanding);
        self.persist(&context)?;
        self.cache.insert(workflow_id.to_string(), context.clone());
        log::debug!("Created semantic context for workflow {}", workflow_id);
        Ok(context)
    }

    /// Fetch a context, cache first, then the backend.
    pub fn get(&self, workflow_id: &str) -> Result<SemanticContext, StoreError> {
        if let Some(context) = self.cache.get(workflow_id) {
            return Ok(context.clone());
        }

        let value = self
            .backend
            .get(&context_key(workflow_id))?
            .ok_or_else(|| StoreError::NotFound {
                workflow_id: workflow_id.to_string(),
            })?;
        let context: SemanticContext = serde_json::from_value(value)?;
        self.cache.insert(workflow_id.to_string(), context.clone());
        Ok(context)
    }

    /// Fold a worker result into the workflow's context.
    pub fn record_worker_result(
        &self,
        workflow_id: &str,
        worker_id: &str,
        result: &Value,
    ) -> Result<(), StoreError> {
        let lock = self.lock_for(workflow_id);
        let _guard = lock.lock();
        let mut context = self.get(workflow_id)?;
        context.update_from_worker_result(worker_id, result);
        self.persist(&context)?;
        self.cache.insert(workflow_id.to_string(), context);
        Ok(())
    }

    /// Append an evolution entry without a worker result.
    pub fn record_evolution(
        &self,
        workflow_id: &str,
        change_type: &str,
        description: &str,
        data: Value,
    ) -> Result<(), StoreError> {
        let lock = self.lock_for(workflow_id);
        let _guard = lock.lock();
        let mut context = self.get(workflow_id)?;
        context.add_evolution(change_type, description, data);
        self.persist(&context)?;
        self.cache.insert(workflow_id.to_string(), context);
        Ok(())
    }

    /// Assemble the input blob for one worker.
    pub fn to_worker_input(
        &self,
        workflow_id: &str,
        worker_id: &str,
        capability: CapabilityCategory,
    ) -> Result<Value, StoreError> {
        let context = self.get(workflow_id)?;
        Ok(context.to_worker_input(worker_id, capability))
    }

    /// Archive a finished workflow's context: drop the live entry, keep a
    /// read-only copy for a week, evict the cache.
    pub fn archive(&self, workflow_id: &str) -> Result<(), StoreError> {
        let lock = self.lock_for(workflow_id);
        let _guard = lock.lock();
        let mut context = self.get(workflow_id)?;
        context.archived = true;

        let value = serde_json::to_value(&context)?;
        self.backend
            .set(&archive_key(workflow_id), &value, ARCHIVE_TTL)?;
        self.backend.delete(&context_key(workflow_id))?;
        self.cache.remove(workflow_id);

        log::debug!("Archived semantic context for workflow {}", workflow_id);
        Ok(())
    }

    /// All workflow ids recorded for a session.
    pub fn session_workflows(&self, session_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.backend.index_members(&session_key(session_id))?)
    }

    /// Compact context summary for monitoring.
    pub fn summary(&self, workflow_id: &str) -> Result<Value, StoreError> {
        let context = self.get(workflow_id)?;
        let mut result_keys: Vec<&String> = context.intermediate_results.keys().collect();
        result_keys.sort();
        Ok(json!({
            "business_goal": context.business_goal,
            "domain": context.domain,
            "execution_strategy": context.execution_strategy,
            "selected_workers": context.selected_workers,
            "capabilities": context.required_capabilities,
            "evolution_entries": context.evolution.len(),
            "intermediate_results": result_keys,
            "archived": context.archived,
            "created_at": context.created_at,
            "updated_at": context.updated_at,
        }))
    }

    fn persist(&self, context: &SemanticContext) -> Result<(), StoreError> {
        let value = serde_json::to_value(context)?;
        self.backend
            .set(&context_key(&context.workflow_id), &value, LIVE_TTL)?;
        self.backend.index_add(
            &session_key(&context.session_id),
            &context.workflow_id,
            LIVE_TTL,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::InMemoryKeyValueStore;

    fn store() -> ContextStore {
        ContextStore::new(Arc::new(InMemoryKeyValueStore::new()))
    }

    fn understanding() -> Understanding {
        Understanding::fallback("open a bakery", "n/a")
    }

    #[test]
    fn test_create_then_get() {
        let store = store();
        store.create("wf-1", "s-1", &understanding()).unwrap();

        let context = store.get("wf-1").unwrap();
        assert_eq!(context.workflow_id, "wf-1");
        assert_eq!(context.session_id, "s-1");
    }

    #[test]
    fn test_get_survives_cache_eviction() {
        let store = store();
        store.create("wf-1", "s-1", &understanding()).unwrap();
        store.cache.remove("wf-1");

        // Reloads from the backend.
        let context = store.get("wf-1").unwrap();
        assert_eq!(context.business_goal, "Unclear request");
    }

    #[test]
    fn test_missing_context_is_not_found() {
        let store = store();
        assert!(matches!(
            store.get("ghost"),
            Err(StoreError::NotFound { .. })
        ));
    }

    #[test]
    fn test_record_worker_result_updates_context() {
        let store = store();
        store.create("wf-1", "s-1", &understanding()).unwrap();
        store
            .record_worker_result("wf-1", "branding_agent", &json!({"brand_name": "Crumb"}))
            .unwrap();

        let input = store
            .to_worker_input("wf-1", "logo_generation_agent", CapabilityCategory::LogoGeneration)
            .unwrap();
        assert_eq!(
            input["previous_results"]["branding_agent"]["brand_name"],
            "Crumb"
        );
    }

    #[test]
    fn test_concurrent_worker_results_are_all_kept() {
        // Two workers recording into the same workflow at once must not
        // lose each other's update. Repeated to make interleaving likely.
        let store = Arc::new(store());
        for round in 0..50 {
            let workflow_id = format!("wf-{}", round);
            store.create(&workflow_id, "s-1", &understanding()).unwrap();

            let handles: Vec<_> = ["worker_a", "worker_b"]
                .into_iter()
                .map(|worker| {
                    let store = Arc::clone(&store);
                    let workflow_id = workflow_id.clone();
                    std::thread::spawn(move || {
                        store
                            .record_worker_result(
                                &workflow_id,
                                worker,
                                &json!({"output": worker}),
                            )
                            .unwrap();
                    })
                })
                .collect();
            for handle in handles {
                handle.join().unwrap();
            }

            let context = store.get(&workflow_id).unwrap();
            assert!(context.intermediate_results.contains_key("worker_a"));
            assert!(context.intermediate_results.contains_key("worker_b"));
        }
    }

    #[test]
    fn test_archive_moves_context() {
        let store = store();
        store.create("wf-1", "s-1", &understanding()).unwrap();
        store.archive("wf-1").unwrap();

        // Live entry is gone.
        assert!(store.get("wf-1").is_err());
        // Archived copy remains in the backend.
        let archived = store
            .backend
            .get("archived_context:wf-1")
            .unwrap()
            .unwrap();
        assert_eq!(archived["archived"], true);
    }

    #[test]
    fn test_session_index_tracks_workflows() {
        let store = store();
        store.create("wf-1", "s-1", &understanding()).unwrap();
        store.create("wf-2", "s-1", &understanding()).unwrap();
        store.create("wf-3", "s-2", &understanding()).unwrap();

        let workflows = store.session_workflows("s-1").unwrap();
        assert_eq!(workflows.len(), 2);
        assert!(workflows.contains(&"wf-1".to_string()));
        assert!(workflows.contains(&"wf-2".to_string()));
    }

    #[test]
    fn test_summary_shape() {
        let store = store();
        store.create("wf-1", "s-1", &understanding()).unwrap();
        store
            .record_worker_result("wf-1", "general_agent", &json!({"output": "x"}))
            .unwrap();

        let summary = store.summary("wf-1").unwrap();
        assert_eq!(summary["evolution_entries"], 1);
        assert_eq!(summary["intermediate_results"][0], "general_agent");
    }
}
