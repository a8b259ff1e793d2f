//! The semantic context document and its evolution log.

use crate::types::{CapabilityCategory, ExecutionStrategy};
use crate::understanding::Understanding;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;

/// One append-only record of how the context changed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvolutionEntry {
    pub timestamp: DateTime<Utc>,
    pub change_type: String,
    pub description: String,
    #[serde(default)]
    pub data: Value,
}

/// Rich semantic context for one workflow.
///
/// Built once from the understanding, then enriched after every worker
/// result. Everything a worker needs to know comes from
/// [`SemanticContext::to_worker_input`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticContext {
    pub workflow_id: String,
    pub session_id: String,

    pub business_goal: String,
    pub intent_summary: String,
    #[serde(default)]
    pub domain: Option<String>,

    #[serde(default)]
    pub business_context: Map<String, Value>,
    #[serde(default)]
    pub user_preferences: Map<String, Value>,
    /// Preferences surfaced by workers during execution. Overlay on top of
    /// `user_preferences` when assembling worker input.
    #[serde(default)]
    pub learned_preferences: Map<String, Value>,

    #[serde(default)]
    pub required_capabilities: Vec<CapabilityCategory>,
    #[serde(default)]
    pub selected_workers: Vec<String>,
    #[serde(default)]
    pub execution_strategy: ExecutionStrategy,

    /// Worker id → that worker's full result blob.
    #[serde(default)]
    pub intermediate_results: HashMap<String, Value>,
    #[serde(default)]
    pub evolution: Vec<EvolutionEntry>,

    #[serde(default)]
    pub archived: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SemanticContext {
    pub fn from_understanding(
        workflow_id: impl Into<String>,
        session_id: impl Into<String>,
        understanding: &Understanding,
    ) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: workflow_id.into(),
            session_id: session_id.into(),
            business_goal: understanding.business_goal.clone(),
            intent_summary: understanding.intent_summary.clone(),
            domain: understanding.business_domain.clone(),
            business_context: understanding.business_context.clone(),
            user_preferences: understanding.user_preferences.clone(),
            learned_preferences: Map::new(),
            required_capabilities: understanding.all_capabilities(),
            selected_workers: understanding.recommended_workers.clone(),
            execution_strategy: understanding.execution_strategy,
            intermediate_results: HashMap::new(),
            evolution: Vec::new(),
            archived: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Append an evolution entry and bump `updated_at`.
    pub fn add_evolution(
        &mut self,
        change_type: impl Into<String>,
        description: impl Into<String>,
        data: Value,
    ) {
        self.evolution.push(EvolutionEntry {
            timestamp: Utc::now(),
            change_type: change_type.into(),
            description: description.into(),
            data,
        });
        self.updated_at = Utc::now();
    }

    /// Fold one worker result into the context: store the result, lift any
    /// `preferences` and `context_updates` the worker surfaced, and log the
    /// evolution.
    pub fn update_from_worker_result(&mut self, worker_id: &str, result: &Value) {
        self.intermediate_results
            .insert(worker_id.to_string(), result.clone());

        if let Some(prefs) = result.get("preferences").and_then(Value::as_object) {
            for (k, v) in prefs {
                self.learned_preferences.insert(k.clone(), v.clone());
            }
        }
        if let Some(updates) = result.get("context_updates").and_then(Value::as_object) {
            for (k, v) in updates {
                self.business_context.insert(k.clone(), v.clone());
            }
        }

        let result_keys: Vec<&str> = result
            .as_object()
            .map(|m| m.keys().map(String::as_str).collect())
            .unwrap_or_default();
        self.add_evolution(
            "worker_result",
            format!("Updated context from {} execution", worker_id),
            json!({ "worker_id": worker_id, "result_keys": result_keys }),
        );
    }

    /// Assemble the single input blob a worker receives: goal, merged
    /// preferences, previous results keyed by worker id, and workflow
    /// identity.
    pub fn to_worker_input(&self, worker_id: &str, capability: CapabilityCategory) -> Value {
        let mut preferences = self.user_preferences.clone();
        for (k, v) in &self.learned_preferences {
            preferences.insert(k.clone(), v.clone());
        }

        json!({
            "business_goal": self.business_goal,
            "user_intent": self.intent_summary,
            "domain": self.domain,
            "business_context": self.business_context,
            "user_preferences": preferences,

            "worker_id": worker_id,
            "assigned_capability": capability,
            "execution_strategy": self.execution_strategy,

            "previous_results": self.intermediate_results,

            "workflow_id": self.workflow_id,
            "session_id": self.session_id,
            "context_created_at": self.created_at,
            "context_updated_at": self.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> SemanticContext {
        let understanding = Understanding::fallback("build me a brand", "n/a");
        SemanticContext::from_understanding("wf-1", "s-1", &understanding)
    }

    #[test]
    fn test_worker_result_lifts_preferences_and_updates() {
        let mut ctx = context();
        let result = json!({
            "output": "done",
            "preferences": {"tone": "playful"},
            "context_updates": {"audience": "locals"}
        });
        ctx.update_from_worker_result("branding_agent", &result);

        assert_eq!(ctx.learned_preferences["tone"], "playful");
        assert_eq!(ctx.business_context["audience"], "locals");
        assert!(ctx.intermediate_results.contains_key("branding_agent"));
        assert_eq!(ctx.evolution.len(), 1);
        assert_eq!(ctx.evolution[0].change_type, "worker_result");
    }

    #[test]
    fn test_worker_input_merges_preferences() {
        let mut ctx = context();
        ctx.user_preferences
            .insert("tone".to_string(), json!("formal"));
        ctx.user_preferences
            .insert("palette".to_string(), json!("warm"));
        ctx.learned_preferences
            .insert("tone".to_string(), json!("playful"));

        let input = ctx.to_worker_input("logo_generation_agent", CapabilityCategory::LogoGeneration);
        // Learned preferences win over the originals.
        assert_eq!(input["user_preferences"]["tone"], "playful");
        assert_eq!(input["user_preferences"]["palette"], "warm");
        assert_eq!(input["worker_id"], "logo_generation_agent");
        assert_eq!(input["assigned_capability"], "logo_generation");
        assert_eq!(input["workflow_id"], "wf-1");
    }

    #[test]
    fn test_worker_input_carries_previous_results() {
        let mut ctx = context();
        ctx.update_from_worker_result("branding_agent", &json!({"brand_name": "Crumb"}));

        let input = ctx.to_worker_input("logo_generation_agent", CapabilityCategory::LogoGeneration);
        assert_eq!(
            input["previous_results"]["branding_agent"]["brand_name"],
            "Crumb"
        );
    }
}
