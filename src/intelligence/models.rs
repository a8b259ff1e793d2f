//! Shared types for the decision engine and autopilot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// How much the engine may do without asking a human.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AutopilotMode {
    /// Every step needs a human decision.
    #[default]
    Off,
    /// Proceed automatically on high-confidence, low-risk steps.
    Smart,
    /// Proceed on everything except critical-risk steps.
    Full,
}

/// Risk attached to a recommended step. Ordered: Low < Medium < High < Critical.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Parse the RISK_LEVEL field of a recommendation. Unknown → Medium.
    pub fn normalize(raw: &str) -> RiskLevel {
        match raw.trim().to_lowercase().as_str() {
            "low" => RiskLevel::Low,
            "high" => RiskLevel::High,
            "critical" => RiskLevel::Critical,
            _ => RiskLevel::Medium,
        }
    }
}

/// One recommended next step, either collaborator-generated or rule-based.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NextStepOption {
    pub option_id: String,
    pub step_type: String,
    pub description: String,
    pub worker_id: String,
    pub estimated_time_minutes: u32,
    #[serde(default)]
    pub required_inputs: Vec<String>,
    #[serde(default)]
    pub expected_outputs: Vec<String>,
    pub confidence: f64,
    pub risk_level: RiskLevel,
    #[serde(default)]
    pub reasoning: String,
}

impl NextStepOption {
    pub fn new(
        step_type: impl Into<String>,
        worker_id: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            option_id: Uuid::new_v4().to_string(),
            step_type: step_type.into(),
            description: description.into(),
            worker_id: worker_id.into(),
            estimated_time_minutes: 15,
            required_inputs: Vec::new(),
            expected_outputs: Vec::new(),
            confidence: 0.7,
            risk_level: RiskLevel::Medium,
            reasoning: String::new(),
        }
    }
}

/// A human's answer to a set of pending options.
///
/// `choice` is an option id, a `custom:` free-text override, or one of the
/// control commands `pause` / `cancel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HumanDecision {
    pub workflow_id: String,
    pub choice: String,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl HumanDecision {
    pub fn new(workflow_id: impl Into<String>, choice: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            choice: choice.into(),
            timestamp: Some(Utc::now()),
        }
    }
}

/// The autopilot's verdict on a set of options.
#[derive(Debug, Clone)]
pub struct AutopilotDecision {
    pub proceed: bool,
    pub chosen_option: Option<NextStepOption>,
    pub reasoning: String,
}

/// Per-workflow autopilot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutopilotSettings {
    pub mode: AutopilotMode,
    pub confidence_threshold: f64,
    pub risk_threshold: RiskLevel,
    pub max_consecutive_auto_steps: u32,
}

impl Default for AutopilotSettings {
    fn default() -> Self {
        Self {
            mode: AutopilotMode::Off,
            confidence_threshold: 0.85,
            risk_threshold: RiskLevel::Medium,
            max_consecutive_auto_steps: 5,
        }
    }
}

impl AutopilotSettings {
    pub fn smart() -> Self {
        Self {
            mode: AutopilotMode::Smart,
            ..Self::default()
        }
    }

    pub fn full() -> Self {
        Self {
            mode: AutopilotMode::Full,
            ..Self::default()
        }
    }
}
