//! Next-step recommendations and human decision processing.

use crate::error::DecisionError;
use crate::intelligence::models::{HumanDecision, NextStepOption, RiskLevel};
use crate::reasoning::{call_with_timeout, ReasoningService};
use std::sync::Arc;
use std::time::Duration;

const RECOMMENDATION_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_RECOMMENDATIONS: usize = 4;

/// What a processed human decision means for the workflow.
#[derive(Debug, Clone)]
pub enum DecisionOutcome {
    /// Run this step next.
    Execute(NextStepOption),
    /// Hold the workflow until the user resumes it.
    Pause,
    /// Stop the workflow.
    Cancel,
}

/// Generates next-step options and turns human decisions into executable
/// steps.
#[derive(Debug)]
pub struct DecisionEngine {
    reasoner: Arc<dyn ReasoningService>,
}

impl DecisionEngine {
    pub fn new(reasoner: Arc<dyn ReasoningService>) -> Self {
        Self { reasoner }
    }

    /// Ask the collaborator for 2-4 recommended next steps. Falls back to
    /// rule-based recommendations when the call fails or nothing parses.
    pub async fn next_step_recommendations(
        &self,
        business_goal: &str,
        completed_steps: &[String],
        accumulated_keys: &[String],
    ) -> Vec<NextStepOption> {
        let prompt = self.build_recommendation_prompt(business_goal, completed_steps, accumulated_keys);

        let reply = match call_with_timeout(&*self.reasoner, &prompt, RECOMMENDATION_TIMEOUT).await
        {
            Ok(reply) => reply,
            Err(e) => {
                log::warn!("Recommendation call failed, using rule-based fallback: {}", e);
                return rule_based_recommendations(accumulated_keys);
            }
        };

        let recommendations = parse_recommendations(&reply);
        if recommendations.is_empty() {
            log::warn!("No parseable recommendations in reply, using rule-based fallback");
            return rule_based_recommendations(accumulated_keys);
        }
        recommendations
    }

    /// Turn a human decision into an outcome against the pending options.
    ///
    /// `choice` is an option id, `custom:<free text>` (at least 5 chars of
    /// text), or `pause` / `cancel`. Anything else falls back to the
    /// highest-confidence option at 0.8x its confidence.
    pub fn process_decision(
        &self,
        decision: &HumanDecision,
        options: &[NextStepOption],
    ) -> Result<DecisionOutcome, DecisionError> {
        let choice = decision.choice.trim();

        match choice {
            "pause" => return Ok(DecisionOutcome::Pause),
            "cancel" => return Ok(DecisionOutcome::Cancel),
            _ => {}
        }

        if options.is_empty() {
            return Err(DecisionError::NoPendingOptions {
                workflow_id: decision.workflow_id.clone(),
            });
        }

        if let Some(option) = options.iter().find(|o| o.option_id == choice) {
            return Ok(DecisionOutcome::Execute(option.clone()));
        }

        if let Some(custom) = choice.strip_prefix("custom:") {
            let custom = custom.trim();
            if custom.len() >= 5 {
                return Ok(DecisionOutcome::Execute(analyze_custom_input(custom)));
            }
            log::warn!("Custom input too short, falling back to best option");
        } else {
            log::warn!("Unrecognized decision '{}', falling back to best option", choice);
        }

        let best = best_option(options).ok_or_else(|| DecisionError::Invalid {
            message: "no option to fall back to".to_string(),
        })?;
        let mut fallback = best.clone();
        fallback.confidence *= 0.8;
        fallback.reasoning = format!(
            "Fallback after unusable decision '{}': {}",
            choice, fallback.reasoning
        );
        Ok(DecisionOutcome::Execute(fallback))
    }

    fn build_recommendation_prompt(
        &self,
        business_goal: &str,
        completed_steps: &[String],
        accumulated_keys: &[String],
    ) -> String {
        let completed = if completed_steps.is_empty() {
            "(none)".to_string()
        } else {
            completed_steps
                .iter()
                .map(|s| format!("- {}", s))
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            r#"Analyze the current workflow state and recommend optimal next steps.

WORKFLOW CONTEXT:
- Business Goal: {goal}
- Completed Steps: {count}
- Accumulated Data: {keys:?}

COMPLETED STEPS:
{completed}

Provide 2-4 recommended next steps in this EXACT format:

RECOMMENDATIONS:
1. STEP_TYPE: [step_type]
   AGENT: [worker_id]
   DESCRIPTION: [clear description of what this step does]
   ESTIMATED_TIME: [minutes]
   CONFIDENCE: [0.0-1.0]
   RISK_LEVEL: [LOW/MEDIUM/HIGH/CRITICAL]
   REASONING: [why this step is recommended now]
   REQUIRED_INPUTS: [comma-separated list]
   EXPECTED_OUTPUTS: [comma-separated list]

2. [repeat format for each recommendation]

Focus on the most logical next steps given the current state and goals.
Consider dependencies, available data, and workflow efficiency."#,
            goal = business_goal,
            count = completed_steps.len(),
            keys = accumulated_keys,
            completed = completed,
        )
    }
}

/// Parse the line-oriented recommendation format. Sections are separated by
/// blank lines; a section without STEP_TYPE, AGENT, and DESCRIPTION is
/// dropped. At most four recommendations come back.
fn parse_recommendations(reply: &str) -> Vec<NextStepOption> {
    let mut recommendations = Vec::new();

    for section in reply.split("\n\n") {
        if !section.contains("STEP_TYPE:") {
            continue;
        }
        if let Some(option) = parse_single_recommendation(section) {
            recommendations.push(option);
            if recommendations.len() == MAX_RECOMMENDATIONS {
                break;
            }
        }
    }

    recommendations
}

fn parse_single_recommendation(section: &str) -> Option<NextStepOption> {
    let mut step_type = None;
    let mut worker_id = None;
    let mut description = None;
    let mut estimated_time = 15u32;
    let mut confidence = 0.7f64;
    let mut risk_level = RiskLevel::Medium;
    let mut reasoning = String::new();
    let mut required_inputs = Vec::new();
    let mut expected_outputs = Vec::new();

    for line in section.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        // Strip any leading list numbering like "1. STEP_TYPE".
        let key = key
            .trim()
            .trim_start_matches(|c: char| c.is_ascii_digit() || c == '.' || c == ' ')
            .to_lowercase();
        let value = value.trim();

        match key.as_str() {
            "step_type" => step_type = Some(value.to_string()),
            "agent" | "worker" => worker_id = Some(value.to_string()),
            "description" => description = Some(value.to_string()),
            "estimated_time" => {
                estimated_time = value
                    .split_whitespace()
                    .next()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(15);
            }
            "confidence" => {
                confidence = value.parse().unwrap_or(0.7);
            }
            "risk_level" => risk_level = RiskLevel::normalize(value),
            "reasoning" => reasoning = value.to_string(),
            "required_inputs" => {
                required_inputs = split_list(value);
            }
            "expected_outputs" => {
                expected_outputs = split_list(value);
            }
            _ => {}
        }
    }

    let mut option = NextStepOption::new(step_type?, worker_id?, description?);
    option.estimated_time_minutes = estimated_time;
    option.confidence = confidence.clamp(0.0, 1.0);
    option.risk_level = risk_level;
    option.reasoning = reasoning;
    option.required_inputs = required_inputs;
    option.expected_outputs = expected_outputs;
    Some(option)
}

fn split_list(value: &str) -> Vec<String> {
    value
        .trim_matches(|c| c == '[' || c == ']')
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Deterministic recommendations when the collaborator is unavailable:
/// propose market research and branding when those results are missing,
/// otherwise a generic review step.
pub fn rule_based_recommendations(accumulated_keys: &[String]) -> Vec<NextStepOption> {
    let mut recommendations = Vec::new();

    if !accumulated_keys.iter().any(|k| k.contains("market")) {
        let mut option = NextStepOption::new(
            "market_research",
            "market_research_agent",
            "Conduct market research analysis",
        );
        option.estimated_time_minutes = 20;
        option.confidence = 0.8;
        option.risk_level = RiskLevel::Low;
        option.reasoning = "No market research results in context yet".to_string();
        recommendations.push(option);
    }

    if !accumulated_keys.iter().any(|k| k.contains("brand")) {
        let mut option = NextStepOption::new(
            "branding",
            "branding_agent",
            "Develop brand strategy and identity",
        );
        option.estimated_time_minutes = 25;
        option.confidence = 0.75;
        option.risk_level = RiskLevel::Low;
        option.reasoning = "No branding results in context yet".to_string();
        recommendations.push(option);
    }

    if recommendations.is_empty() {
        let mut option = NextStepOption::new(
            "review_results",
            "general_agent",
            "Review accumulated results and summarize progress",
        );
        option.confidence = 0.6;
        option.risk_level = RiskLevel::Low;
        option.reasoning = "Core results present, a review is the safe default".to_string();
        recommendations.push(option);
    }

    recommendations
}

/// Keyword analysis for `custom:` free-text overrides.
fn analyze_custom_input(input: &str) -> NextStepOption {
    let lower = input.to_lowercase();

    let (step_type, worker_id) = if ["research", "analyze", "market", "competitor"]
        .iter()
        .any(|k| lower.contains(k))
    {
        ("market_research", "market_research_agent")
    } else if ["brand", "logo", "design", "name"]
        .iter()
        .any(|k| lower.contains(k))
    {
        ("branding", "branding_agent")
    } else if ["strategy", "plan", "business"]
        .iter()
        .any(|k| lower.contains(k))
    {
        ("business_planning", "general_agent")
    } else {
        ("custom_analysis", "general_agent")
    };

    let mut option = NextStepOption::new(step_type, worker_id, input);
    option.confidence = 0.7;
    option.reasoning = "Derived from custom human input".to_string();
    option
}

fn best_option(options: &[NextStepOption]) -> Option<&NextStepOption> {
    options
        .iter()
        .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::{FailingReasoner, ScriptedReasoner};

    const SAMPLE_REPLY: &str = r#"RECOMMENDATIONS:
1. STEP_TYPE: market_research
   AGENT: market_research_agent
   DESCRIPTION: Size the local bakery market
   ESTIMATED_TIME: 20 minutes
   CONFIDENCE: 0.9
   RISK_LEVEL: LOW
   REASONING: No market data yet
   REQUIRED_INPUTS: business_idea
   EXPECTED_OUTPUTS: market_report, competitor_list

2. STEP_TYPE: branding
   AGENT: branding_agent
   DESCRIPTION: Draft brand identity
   ESTIMATED_TIME: 25
   CONFIDENCE: 0.8
   RISK_LEVEL: MEDIUM
   REASONING: Branding unlocks the logo work"#;

    #[test]
    fn test_parse_recommendations() {
        let options = parse_recommendations(SAMPLE_REPLY);
        assert_eq!(options.len(), 2);
        assert_eq!(options[0].step_type, "market_research");
        assert_eq!(options[0].worker_id, "market_research_agent");
        assert_eq!(options[0].estimated_time_minutes, 20);
        assert!((options[0].confidence - 0.9).abs() < 1e-9);
        assert_eq!(options[0].risk_level, RiskLevel::Low);
        assert_eq!(
            options[0].expected_outputs,
            vec!["market_report", "competitor_list"]
        );
        assert_eq!(options[1].risk_level, RiskLevel::Medium);
    }

    #[test]
    fn test_parse_drops_incomplete_sections() {
        let reply = "STEP_TYPE: x\nCONFIDENCE: 0.9";
        assert!(parse_recommendations(reply).is_empty());
    }

    #[tokio::test]
    async fn test_recommendations_fall_back_on_failure() {
        let engine = DecisionEngine::new(Arc::new(FailingReasoner));
        let options = engine
            .next_step_recommendations("open a bakery", &[], &[])
            .await;
        assert!(!options.is_empty());
        assert_eq!(options[0].step_type, "market_research");
    }

    #[tokio::test]
    async fn test_recommendations_fall_back_on_garbage() {
        let engine = DecisionEngine::new(Arc::new(ScriptedReasoner::single("no structure here")));
        let options = engine
            .next_step_recommendations(
                "open a bakery",
                &[],
                &["market_research_output".to_string()],
            )
            .await;
        // Market data present, so the rule-based path proposes branding.
        assert_eq!(options[0].step_type, "branding");
    }

    #[test]
    fn test_rule_based_generic_when_core_results_present() {
        let keys = vec!["market_report".to_string(), "brand_identity".to_string()];
        let options = rule_based_recommendations(&keys);
        assert_eq!(options.len(), 1);
        assert_eq!(options[0].step_type, "review_results");
    }

    fn engine() -> DecisionEngine {
        DecisionEngine::new(Arc::new(FailingReasoner))
    }

    fn options() -> Vec<NextStepOption> {
        let mut a = NextStepOption::new("market_research", "market_research_agent", "a");
        a.confidence = 0.9;
        let mut b = NextStepOption::new("branding", "branding_agent", "b");
        b.confidence = 0.6;
        vec![a, b]
    }

    #[test]
    fn test_option_selection() {
        let opts = options();
        let decision = HumanDecision::new("wf-1", opts[1].option_id.clone());
        match engine().process_decision(&decision, &opts).unwrap() {
            DecisionOutcome::Execute(step) => assert_eq!(step.step_type, "branding"),
            other => panic!("expected Execute, got {:?}", other),
        }
    }

    #[test]
    fn test_custom_input_keyword_analysis() {
        let opts = options();
        let decision = HumanDecision::new("wf-1", "custom: research the competitor landscape");
        match engine().process_decision(&decision, &opts).unwrap() {
            DecisionOutcome::Execute(step) => {
                assert_eq!(step.worker_id, "market_research_agent");
                assert!((step.confidence - 0.7).abs() < 1e-9);
            }
            other => panic!("expected Execute, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_choice_falls_back_to_best_at_reduced_confidence() {
        let opts = options();
        let decision = HumanDecision::new("wf-1", "not-an-option");
        match engine().process_decision(&decision, &opts).unwrap() {
            DecisionOutcome::Execute(step) => {
                assert_eq!(step.step_type, "market_research");
                assert!((step.confidence - 0.72).abs() < 1e-9);
            }
            other => panic!("expected Execute, got {:?}", other),
        }
    }

    #[test]
    fn test_short_custom_input_falls_back() {
        let opts = options();
        let decision = HumanDecision::new("wf-1", "custom: ok");
        match engine().process_decision(&decision, &opts).unwrap() {
            DecisionOutcome::Execute(step) => assert_eq!(step.step_type, "market_research"),
            other => panic!("expected Execute, got {:?}", other),
        }
    }

    #[test]
    fn test_control_commands() {
        let opts = options();
        assert!(matches!(
            engine()
                .process_decision(&HumanDecision::new("wf-1", "pause"), &opts)
                .unwrap(),
            DecisionOutcome::Pause
        ));
        assert!(matches!(
            engine()
                .process_decision(&HumanDecision::new("wf-1", "cancel"), &opts)
                .unwrap(),
            DecisionOutcome::Cancel
        ));
    }

    #[test]
    fn test_no_options_is_an_error() {
        let decision = HumanDecision::new("wf-1", "anything");
        assert!(matches!(
            engine().process_decision(&decision, &[]),
            Err(DecisionError::NoPendingOptions { .. })
        ));
    }
}
