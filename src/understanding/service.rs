//! Single-call semantic analysis of user requests.
//!
//! One reasoning call produces the whole understanding: goal, capabilities,
//! workers, strategy, and plan. Everything the collaborator returns is
//! normalized locally against the closed vocabularies; a malformed or
//! low-confidence reply degrades to an off-key suggestion or, in the worst
//! case, a minimal fallback. `parse` never errors.

use crate::capabilities::CapabilityRegistry;
use crate::reasoning::{call_with_timeout, ReasoningService};
use crate::types::{CapabilityCategory, ExecutionStrategy, Urgency};
use crate::understanding::types::{AgentMapping, ExecutionPlan, Understanding};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

const ANALYSIS_TIMEOUT: Duration = Duration::from_secs(120);
const OFF_KEY_TIMEOUT: Duration = Duration::from_secs(60);

/// Reply shape the analysis prompt asks for. Every field defaults so a
/// partially well-formed reply still parses.
#[derive(Debug, Default, Deserialize)]
struct RawUnderstanding {
    #[serde(default)]
    business_goal: String,
    #[serde(default)]
    user_intent_summary: String,
    #[serde(default)]
    business_domain: Option<String>,
    #[serde(default)]
    urgency_level: String,
    #[serde(default)]
    primary_capabilities: Vec<String>,
    #[serde(default)]
    secondary_capabilities: Vec<String>,
    #[serde(default)]
    recommended_agents: Vec<String>,
    #[serde(default)]
    execution_strategy: String,
    #[serde(default)]
    execution_plan: RawPlan,
    #[serde(default)]
    extracted_parameters: Map<String, Value>,
    #[serde(default)]
    business_context: Map<String, Value>,
    #[serde(default)]
    user_preferences: Map<String, Value>,
    #[serde(default = "default_confidence")]
    confidence_score: f64,
    #[serde(default)]
    reasoning: String,
    #[serde(default)]
    potential_challenges: Vec<String>,
}

fn default_confidence() -> f64 {
    0.5
}

#[derive(Debug, Default, Deserialize)]
struct RawPlan {
    #[serde(default)]
    description: String,
    #[serde(default)]
    sequence: String,
    #[serde(default)]
    parallel_groups: Value,
    #[serde(default)]
    off_key_request: bool,
    #[serde(default)]
    suggestion: Option<String>,
    #[serde(default)]
    available_alternatives: Vec<String>,
}

/// Turns free-text requests into validated [`Understanding`] values.
#[derive(Debug)]
pub struct UnderstandingService {
    reasoner: Arc<dyn ReasoningService>,
    registry: Arc<CapabilityRegistry>,
    fence_re: Regex,
}

impl UnderstandingService {
    pub fn new(reasoner: Arc<dyn ReasoningService>, registry: Arc<CapabilityRegistry>) -> Self {
        // Matches ```json ... ``` or plain ``` ... ``` fences.
        let fence_re = Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```")
            .unwrap_or_else(|e| panic!("invalid fence regex: {}", e));
        Self {
            reasoner,
            registry,
            fence_re,
        }
    }

    /// Analyze a request, optionally with prior conversation context.
    ///
    /// This never fails: collaborator or parse failures degrade to the
    /// off-key path and then to [`Understanding::fallback`].
    pub async fn parse(
        &self,
        request: &str,
        conversation_context: Option<&Value>,
    ) -> Understanding {
        let prompt = self.build_analysis_prompt(request, conversation_context);

        let reply = match call_with_timeout(&*self.reasoner, &prompt, ANALYSIS_TIMEOUT).await {
            Ok(reply) => reply,
            Err(e) => {
                log::error!("Semantic analysis call failed: {}", e);
                return self.off_key_fallback(request, &e.to_string()).await;
            }
        };

        let mut understanding = match self.parse_reply(&reply, request) {
            Ok(u) => u,
            Err(e) => {
                log::error!("Failed to parse analysis reply: {}", e);
                log::debug!("Raw reply: {}", reply);
                return self.off_key_fallback(request, &e).await;
            }
        };

        if understanding.plan.off_key {
            // The collaborator flagged the request itself; complete the
            // suggestion locally instead of making a second call.
            mark_off_key(&mut understanding);
        } else {
            if understanding.primary_capabilities.is_empty() {
                log::info!("No recognized capabilities, taking the off-key path");
                return self
                    .off_key_fallback(request, "no capability matched the request")
                    .await;
            }
            if understanding.confidence < 0.5 {
                log::info!(
                    "Low-confidence analysis ({:.2}), taking the off-key path",
                    understanding.confidence
                );
                return self
                    .off_key_fallback(request, "analysis confidence below threshold")
                    .await;
            }
        }

        self.enhance_with_capability_mapping(&mut understanding);
        understanding
    }

    /// Fill in agent mappings and dependency-resolved capability order.
    /// Replaces `recommended_workers` when the registry produces a mapping.
    pub fn enhance_with_capability_mapping(&self, understanding: &mut Understanding) {
        let resolved = self.registry.resolve_order(&understanding.all_capabilities());

        let mut workers: Vec<String> = Vec::new();
        let mut mappings: HashMap<String, AgentMapping> = HashMap::new();

        for &capability in &resolved {
            let Some(agent) = self.registry.best_agent(capability) else {
                continue;
            };
            if workers.contains(&agent.worker_id) {
                continue;
            }
            workers.push(agent.worker_id.clone());
            mappings.insert(
                agent.worker_id.clone(),
                AgentMapping {
                    capability,
                    estimated_duration_secs: agent.estimated_duration_secs,
                    requirements: agent.execution_requirements.clone(),
                },
            );
        }

        if !workers.is_empty() {
            understanding.recommended_workers = workers;
        }
        understanding.plan.agent_mappings = mappings;
        understanding.plan.resolved_capability_order = resolved;
    }

    /// Check that the plan can actually run. Empty result means valid.
    pub fn validate_plan(&self, understanding: &Understanding) -> Vec<String> {
        let mut issues = Vec::new();

        for worker_id in &understanding.recommended_workers {
            if !self.registry.worker_exists(worker_id) {
                issues.push(format!("Worker {} is not available", worker_id));
            }
        }

        for &capability in &understanding.primary_capabilities {
            if self.registry.agents_for(capability).is_empty() {
                issues.push(format!("No workers available for {}", capability));
            }
        }

        if understanding.execution_strategy == ExecutionStrategy::Parallel
            && understanding.recommended_workers.len() < 2
        {
            issues.push("Parallel execution requires multiple workers".to_string());
        }

        issues
    }

    fn build_analysis_prompt(&self, request: &str, context: Option<&Value>) -> String {
        let capabilities: String = CapabilityCategory::ALL
            .iter()
            .map(|cap| format!("- {}: {}", cap, cap.description()))
            .collect::<Vec<_>>()
            .join("\n");

        let context_str = match context {
            Some(ctx) => format!(
                "\nConversation Context:\n{}",
                serde_json::to_string_pretty(ctx).unwrap_or_default()
            ),
            None => String::new(),
        };

        format!(
            r#"You are a semantic business request analyzer. Analyze this user request and provide a comprehensive understanding in JSON format.

USER REQUEST: "{request}"{context_str}

Available Capabilities:
{capabilities}

Available Workers:
{workers}

Analyze the request and respond with ONLY a JSON object containing:

{{
    "business_goal": "Clear statement of what the user wants to achieve",
    "user_intent_summary": "Concise summary of the user's intent",
    "business_domain": "Industry/domain if identifiable",
    "urgency_level": "low|medium|high",
    "primary_capabilities": ["main capabilities needed"],
    "secondary_capabilities": ["supporting capabilities"],
    "recommended_agents": ["worker ids that should handle this"],
    "execution_strategy": "single|parallel|sequential|hybrid",
    "execution_plan": {{
        "description": "How to execute this request",
        "sequence": "If sequential/hybrid, the order",
        "parallel_groups": [["workers that can run together"]]
    }},
    "extracted_parameters": {{}},
    "business_context": {{}},
    "user_preferences": {{}},
    "confidence_score": 0.95,
    "reasoning": "Explanation of the analysis",
    "potential_challenges": []
}}

Focus on the BUSINESS INTENT and map directly to workers that can deliver results.
Prefer simpler execution strategies; recommend ONE worker unless the user explicitly asks for multiple services.
If the request does not clearly map to the available capabilities, set confidence_score below 0.5, include "off_key_request": true in the execution_plan, and suggest the closest available capabilities."#,
            request = request,
            context_str = context_str,
            capabilities = capabilities,
            workers = self.registry.worker_descriptions(),
        )
    }

    fn parse_reply(&self, reply: &str, request: &str) -> Result<Understanding, String> {
        let body = match self.fence_re.captures(reply.trim()) {
            Some(caps) => caps.get(1).map(|m| m.as_str()).unwrap_or(reply),
            None => reply.trim(),
        };

        let raw: RawUnderstanding =
            serde_json::from_str(body).map_err(|e| format!("invalid JSON: {}", e))?;

        let primary = normalize_capabilities(&raw.primary_capabilities);
        let secondary = normalize_capabilities(&raw.secondary_capabilities);

        let strategy = match ExecutionStrategy::normalize(&raw.execution_strategy) {
            Some(s) => s,
            None => {
                if !raw.execution_strategy.trim().is_empty() {
                    log::warn!(
                        "Unknown execution strategy '{}', defaulting to single",
                        raw.execution_strategy
                    );
                }
                ExecutionStrategy::Single
            }
        };

        let intent_summary = if raw.user_intent_summary.is_empty() {
            request.chars().take(100).collect()
        } else {
            raw.user_intent_summary
        };

        Ok(Understanding {
            business_goal: if raw.business_goal.is_empty() {
                "Unclear goal".to_string()
            } else {
                raw.business_goal
            },
            intent_summary,
            business_domain: raw.business_domain,
            urgency: Urgency::normalize(&raw.urgency_level),
            primary_capabilities: primary,
            secondary_capabilities: secondary,
            recommended_workers: raw.recommended_agents,
            execution_strategy: strategy,
            plan: ExecutionPlan {
                description: raw.execution_plan.description,
                sequence: raw.execution_plan.sequence,
                parallel_groups: parse_parallel_groups(&raw.execution_plan.parallel_groups),
                off_key: raw.execution_plan.off_key_request,
                suggestion: raw.execution_plan.suggestion,
                alternatives: normalize_capabilities(&raw.execution_plan.available_alternatives),
                agent_mappings: HashMap::new(),
                resolved_capability_order: Vec::new(),
            },
            extracted_parameters: raw.extracted_parameters,
            business_context: raw.business_context,
            user_preferences: raw.user_preferences,
            confidence: raw.confidence_score.clamp(0.0, 1.0),
            reasoning: raw.reasoning,
            challenges: raw.potential_challenges,
        })
    }

    /// One extra collaborator call to produce helpful suggestions for a
    /// request the system cannot serve. Always returns marked off-key with
    /// confidence capped at 0.4; a second failure yields the minimal
    /// fallback.
    async fn off_key_fallback(&self, request: &str, error: &str) -> Understanding {
        let prompt = format!(
            r#"The user made this request: "{request}"

The system could not process this request normally. Provide a helpful response that acknowledges what they are asking for, explains that specific capability is unavailable, and suggests the closest available capabilities from this list:

{capabilities}

Respond with ONLY a JSON object in the same shape as a normal analysis, with confidence_score at most 0.4 and an execution_plan containing "off_key_request": true, a "suggestion" string, and "available_alternatives"."#,
            request = request,
            capabilities = CapabilityCategory::ALL
                .iter()
                .map(|cap| format!("- {}: {}", cap, cap.description()))
                .collect::<Vec<_>>()
                .join("\n"),
        );

        match call_with_timeout(&*self.reasoner, &prompt, OFF_KEY_TIMEOUT).await {
            Ok(reply) => match self.parse_reply(&reply, request) {
                Ok(mut understanding) => {
                    mark_off_key(&mut understanding);
                    understanding
                }
                Err(e) => {
                    log::error!("Off-key suggestion reply unparseable: {}", e);
                    Understanding::fallback(request, error)
                }
            },
            Err(e) => {
                log::error!("Off-key suggestion call failed: {}", e);
                Understanding::fallback(request, error)
            }
        }
    }
}

/// Finish an off-key understanding: confidence capped at 0.4, a default
/// primary capability, and a non-empty alternatives list.
fn mark_off_key(understanding: &mut Understanding) {
    understanding.plan.off_key = true;
    understanding.confidence = understanding.confidence.min(0.4);
    if understanding.primary_capabilities.is_empty() {
        understanding
            .primary_capabilities
            .push(CapabilityCategory::ContentCreation);
    }
    if understanding.plan.alternatives.is_empty() {
        understanding.plan.alternatives = vec![
            CapabilityCategory::LogoGeneration,
            CapabilityCategory::BrandCreation,
            CapabilityCategory::MarketAnalysis,
            CapabilityCategory::WebsiteBuilding,
            CapabilityCategory::SalesOutreach,
        ];
    }
}

/// Normalize a list of capability names, dropping unknowns with a warning.
fn normalize_capabilities(raw: &[String]) -> Vec<CapabilityCategory> {
    let mut parsed = Vec::new();
    for name in raw {
        match CapabilityCategory::normalize(name) {
            Some(cap) => {
                if !parsed.contains(&cap) {
                    parsed.push(cap);
                }
            }
            None => {
                if !name.trim().is_empty() {
                    log::warn!("Unknown capability '{}', skipping", name);
                }
            }
        }
    }
    parsed
}

/// Collaborators return parallel_groups as a list of lists, a flat list,
/// or free text. Only the first two carry information.
fn parse_parallel_groups(value: &Value) -> Vec<Vec<String>> {
    match value {
        Value::Array(items) => {
            let mut groups = Vec::new();
            let mut flat = Vec::new();
            for item in items {
                match item {
                    Value::Array(inner) => {
                        let group: Vec<String> = inner
                            .iter()
                            .filter_map(|v| v.as_str().map(str::to_string))
                            .collect();
                        if !group.is_empty() {
                            groups.push(group);
                        }
                    }
                    Value::String(s) => flat.push(s.clone()),
                    _ => {}
                }
            }
            if groups.is_empty() && !flat.is_empty() {
                groups.push(flat);
            }
            groups
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::{FailingReasoner, ScriptedReasoner};
    use serde_json::json;

    fn service_with(reply: &str) -> UnderstandingService {
        UnderstandingService::new(
            Arc::new(ScriptedReasoner::single(reply)),
            Arc::new(CapabilityRegistry::with_builtins()),
        )
    }

    fn analysis_reply(confidence: f64) -> String {
        json!({
            "business_goal": "Launch a bakery brand",
            "user_intent_summary": "Logo for a bakery",
            "business_domain": "food",
            "urgency_level": "medium",
            "primary_capabilities": ["logo_generation"],
            "secondary_capabilities": [],
            "recommended_agents": ["logo_generation_agent"],
            "execution_strategy": "single",
            "execution_plan": {"description": "One logo pass"},
            "confidence_score": confidence,
            "reasoning": "Clear single-capability request"
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_parse_happy_path() {
        let service = service_with(&analysis_reply(0.92));
        let u = service.parse("Create a logo for my bakery", None).await;

        assert_eq!(u.primary_capabilities, vec![CapabilityCategory::LogoGeneration]);
        assert_eq!(u.execution_strategy, ExecutionStrategy::Single);
        assert_eq!(u.recommended_workers, vec!["logo_generation_agent"]);
        assert!(u.plan.agent_mappings.contains_key("logo_generation_agent"));
        assert!(!u.plan.off_key);
        assert!((u.confidence - 0.92).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_parse_strips_markdown_fences() {
        let fenced = format!("```json\n{}\n```", analysis_reply(0.9));
        let service = service_with(&fenced);
        let u = service.parse("logo please", None).await;
        assert_eq!(u.primary_capabilities, vec![CapabilityCategory::LogoGeneration]);
    }

    #[tokio::test]
    async fn test_low_confidence_goes_off_key() {
        // First reply is the low-confidence analysis, second drives the
        // off-key suggestion path.
        let reasoner = ScriptedReasoner::new(vec![
            analysis_reply(0.3),
            json!({
                "business_goal": "Unsupported request",
                "user_intent_summary": "Wants something else",
                "primary_capabilities": [],
                "recommended_agents": [],
                "execution_strategy": "single",
                "execution_plan": {
                    "off_key_request": true,
                    "suggestion": "Try a logo instead",
                    "available_alternatives": ["logo_generation"]
                },
                "confidence_score": 0.3,
                "reasoning": "No matching capability"
            })
            .to_string(),
        ]);
        let service = UnderstandingService::new(
            Arc::new(reasoner),
            Arc::new(CapabilityRegistry::with_builtins()),
        );

        let u = service.parse("teach my parrot to sing opera", None).await;
        assert!(u.plan.off_key);
        assert!(u.confidence < 0.5);
        assert!(!u.plan.alternatives.is_empty());
    }

    #[tokio::test]
    async fn test_reasoner_failure_yields_fallback() {
        let service = UnderstandingService::new(
            Arc::new(FailingReasoner),
            Arc::new(CapabilityRegistry::with_builtins()),
        );
        let u = service.parse("anything", None).await;
        assert!((u.confidence - 0.1).abs() < 1e-9);
        assert!(u.plan.off_key);
        assert_eq!(u.primary_capabilities, vec![CapabilityCategory::ContentCreation]);
    }

    #[tokio::test]
    async fn test_garbage_reply_yields_fallback() {
        // Both the analysis and off-key calls replay the same garbage.
        let service = service_with("this is not json at all");
        let u = service.parse("make me a logo", None).await;
        assert!(u.plan.off_key);
        assert!(u.confidence <= 0.1 + 1e-9);
    }

    #[tokio::test]
    async fn test_no_recognized_capability_goes_off_key() {
        // High confidence but nothing in the vocabulary matched, so the
        // off-key path runs (replaying the same reply) and the result is a
        // suggestion, not a plan.
        let reply = json!({
            "business_goal": "g",
            "user_intent_summary": "s",
            "primary_capabilities": ["quantum_computing"],
            "recommended_agents": ["general_agent"],
            "execution_strategy": "single",
            "execution_plan": {},
            "confidence_score": 0.8,
            "reasoning": "r"
        })
        .to_string();
        let service = service_with(&reply);
        let u = service.parse("do the thing", None).await;
        assert!(u.plan.off_key);
        assert!(u.confidence <= 0.4 + 1e-9);
        assert_eq!(u.primary_capabilities, vec![CapabilityCategory::ContentCreation]);
        assert!(!u.plan.alternatives.is_empty());
    }

    #[tokio::test]
    async fn test_off_key_reply_without_alternatives_gets_defaults() {
        // The collaborator flags the request itself but omits alternatives;
        // the result must still carry a non-empty list.
        let reply = json!({
            "business_goal": "Out of scope",
            "user_intent_summary": "Unsupported ask",
            "primary_capabilities": [],
            "recommended_agents": [],
            "execution_strategy": "single",
            "execution_plan": {
                "off_key_request": true,
                "suggestion": "Nothing here fits"
            },
            "confidence_score": 0.3,
            "reasoning": "No matching capability"
        })
        .to_string();
        let service = service_with(&reply);
        let u = service.parse("fold my laundry", None).await;

        assert!(u.plan.off_key);
        assert!(u.confidence <= 0.4 + 1e-9);
        assert!(!u.plan.alternatives.is_empty());
        assert_eq!(u.primary_capabilities, vec![CapabilityCategory::ContentCreation]);
    }

    #[test]
    fn test_validate_plan_catches_issues() {
        let service = service_with("unused");
        let mut u = Understanding::fallback("x", "e");
        u.plan.off_key = false;
        u.recommended_workers = vec!["ghost_agent".to_string()];
        u.execution_strategy = ExecutionStrategy::Parallel;

        let issues = service.validate_plan(&u);
        assert!(issues.iter().any(|i| i.contains("ghost_agent")));
        assert!(issues.iter().any(|i| i.contains("Parallel")));
    }

    #[test]
    fn test_parallel_groups_coercion() {
        assert_eq!(
            parse_parallel_groups(&json!([["a", "b"], ["c"]])),
            vec![vec!["a".to_string(), "b".to_string()], vec!["c".to_string()]]
        );
        assert_eq!(
            parse_parallel_groups(&json!(["a", "b"])),
            vec![vec!["a".to_string(), "b".to_string()]]
        );
        assert!(parse_parallel_groups(&json!("free text")).is_empty());
    }
}
