//! Decision Engine and Autopilot Manager: next-step recommendations,
//! human decision processing, and the proceed-or-defer gate.

pub mod autopilot;
pub mod decision_engine;
pub mod models;

pub use autopilot::AutopilotManager;
pub use decision_engine::{DecisionEngine, DecisionOutcome};
pub use models::{
    AutopilotDecision, AutopilotMode, AutopilotSettings, HumanDecision, NextStepOption, RiskLevel,
};
