//! The structured understanding a request parses into.

use crate::types::{CapabilityCategory, ExecutionStrategy, Urgency};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Per-worker entry in the execution plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMapping {
    pub capability: CapabilityCategory,
    #[serde(default)]
    pub estimated_duration_secs: Option<u64>,
    #[serde(default)]
    pub requirements: HashMap<String, Value>,
}

/// How the workers for one request should be scheduled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Free-text description of the approach.
    #[serde(default)]
    pub description: String,

    /// For sequential/hybrid plans, the intended order, free text.
    #[serde(default)]
    pub sequence: String,

    /// For parallel/hybrid plans, worker ids grouped by phase.
    #[serde(default)]
    pub parallel_groups: Vec<Vec<String>>,

    /// Set when the request does not map to anything we can do.
    #[serde(default)]
    pub off_key: bool,

    /// For off-key requests, what the user might want instead.
    #[serde(default)]
    pub suggestion: Option<String>,

    /// For off-key requests, the closest capabilities we do offer.
    #[serde(default)]
    pub alternatives: Vec<CapabilityCategory>,

    /// Worker id → capability, duration, requirements.
    #[serde(default)]
    pub agent_mappings: HashMap<String, AgentMapping>,

    /// Capabilities in dependency-resolved execution order.
    #[serde(default)]
    pub resolved_capability_order: Vec<CapabilityCategory>,
}

/// Complete semantic understanding of one user request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Understanding {
    pub business_goal: String,
    pub intent_summary: String,
    #[serde(default)]
    pub business_domain: Option<String>,
    #[serde(default)]
    pub urgency: Urgency,

    pub primary_capabilities: Vec<CapabilityCategory>,
    #[serde(default)]
    pub secondary_capabilities: Vec<CapabilityCategory>,

    /// Worker ids that should handle the request, execution order.
    pub recommended_workers: Vec<String>,
    pub execution_strategy: ExecutionStrategy,
    pub plan: ExecutionPlan,

    #[serde(default)]
    pub extracted_parameters: Map<String, Value>,
    #[serde(default)]
    pub business_context: Map<String, Value>,
    #[serde(default)]
    pub user_preferences: Map<String, Value>,

    /// How sure the analysis is, in [0, 1].
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub challenges: Vec<String>,
}

impl Understanding {
    /// Minimal fallback when analysis fails entirely. Low confidence,
    /// marked off-key, with a non-empty set of alternatives so the caller
    /// always has something to suggest.
    pub fn fallback(request: &str, error: &str) -> Self {
        Self {
            business_goal: "Unclear request".to_string(),
            intent_summary: request.chars().take(100).collect(),
            business_domain: None,
            urgency: Urgency::Medium,
            primary_capabilities: vec![CapabilityCategory::ContentCreation],
            secondary_capabilities: Vec::new(),
            recommended_workers: vec!["general_agent".to_string()],
            execution_strategy: ExecutionStrategy::Single,
            plan: ExecutionPlan {
                off_key: true,
                suggestion: Some(
                    "Could you rephrase your request? Available services cover \
                     logos, branding, market research, websites, and sales materials."
                        .to_string(),
                ),
                alternatives: vec![
                    CapabilityCategory::LogoGeneration,
                    CapabilityCategory::BrandCreation,
                    CapabilityCategory::MarketAnalysis,
                    CapabilityCategory::WebsiteBuilding,
                    CapabilityCategory::SalesOutreach,
                ],
                ..ExecutionPlan::default()
            },
            extracted_parameters: Map::new(),
            business_context: Map::new(),
            user_preferences: Map::new(),
            confidence: 0.1,
            reasoning: format!("Analysis failed: {}", error),
            challenges: Vec::new(),
        }
    }

    /// All capabilities, primary first, duplicates removed.
    pub fn all_capabilities(&self) -> Vec<CapabilityCategory> {
        let mut all = Vec::new();
        for &cap in self
            .primary_capabilities
            .iter()
            .chain(self.secondary_capabilities.iter())
        {
            if !all.contains(&cap) {
                all.push(cap);
            }
        }
        all
    }
}
