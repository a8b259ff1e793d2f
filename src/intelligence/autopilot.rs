//! The proceed-or-defer gate for automated steps.

use crate::intelligence::models::{
    AutopilotDecision, AutopilotMode, AutopilotSettings, NextStepOption, RiskLevel,
};
use dashmap::DashMap;

/// Consecutive automatic failures before autopilot is forced off for the
/// rest of the workflow.
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

/// Decides whether the engine may run the next step without a human.
///
/// Tracks per-workflow counters: consecutive automatic steps (capped in
/// Smart mode) and consecutive automatic failures (three force the
/// autopilot off permanently for that workflow). Human intervention resets
/// the counters but never un-forces a forced-off workflow.
#[derive(Debug, Default)]
pub struct AutopilotManager {
    consecutive_auto: DashMap<String, u32>,
    consecutive_failures: DashMap<String, u32>,
    forced_off: DashMap<String, ()>,
}

impl AutopilotManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate the pending options for a workflow under the given settings.
    pub fn evaluate(
        &self,
        workflow_id: &str,
        options: &[NextStepOption],
        settings: &AutopilotSettings,
    ) -> AutopilotDecision {
        if self.is_forced_off(workflow_id) {
            return defer("Autopilot disabled after repeated automatic failures");
        }

        let failures = self
            .consecutive_failures
            .get(workflow_id)
            .map(|c| *c)
            .unwrap_or(0);
        if failures >= MAX_CONSECUTIVE_FAILURES {
            self.forced_off.insert(workflow_id.to_string(), ());
            log::warn!(
                "Workflow {}: {} consecutive automatic failures, forcing autopilot off",
                workflow_id,
                failures
            );
            return defer("Autopilot disabled after repeated automatic failures");
        }

        if settings.mode == AutopilotMode::Off {
            return defer("Autopilot is off, every step needs a human decision");
        }

        let Some(best) = options
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        else {
            return defer("No recommended options to act on");
        };

        match settings.mode {
            AutopilotMode::Off => unreachable!("handled above"),
            AutopilotMode::Full => {
                if best.risk_level == RiskLevel::Critical {
                    defer("Full auto blocks critical-risk steps")
                } else {
                    AutopilotDecision {
                        proceed: true,
                        chosen_option: Some(best.clone()),
                        reasoning: format!(
                            "Full auto: proceeding with '{}' ({:.0}% confidence)",
                            best.step_type,
                            best.confidence * 100.0
                        ),
                    }
                }
            }
            AutopilotMode::Smart => {
                let auto_count = self
                    .consecutive_auto
                    .get(workflow_id)
                    .map(|c| *c)
                    .unwrap_or(0);
                if auto_count >= settings.max_consecutive_auto_steps {
                    return defer(&format!(
                        "Reached {} consecutive automatic steps, human check-in required",
                        auto_count
                    ));
                }
                if best.confidence < settings.confidence_threshold {
                    return defer(&format!(
                        "Smart auto: confidence too low ({:.0}% < {:.0}%)",
                        best.confidence * 100.0,
                        settings.confidence_threshold * 100.0
                    ));
                }
                if best.risk_level > settings.risk_threshold {
                    return defer(&format!(
                        "Smart auto: risk {:?} exceeds threshold {:?}",
                        best.risk_level, settings.risk_threshold
                    ));
                }
                AutopilotDecision {
                    proceed: true,
                    chosen_option: Some(best.clone()),
                    reasoning: format!(
                        "Smart auto: '{}' meets the confidence and risk thresholds",
                        best.step_type
                    ),
                }
            }
        }
    }

    /// Record a successful automatic step.
    pub fn record_success(&self, workflow_id: &str) {
        *self
            .consecutive_auto
            .entry(workflow_id.to_string())
            .or_insert(0) += 1;
        self.consecutive_failures.insert(workflow_id.to_string(), 0);
    }

    /// Record a failed automatic step. The third consecutive failure forces
    /// autopilot off for this workflow.
    pub fn record_failure(&self, workflow_id: &str) {
        self.consecutive_auto.insert(workflow_id.to_string(), 0);
        let mut failures = self
            .consecutive_failures
            .entry(workflow_id.to_string())
            .or_insert(0);
        *failures += 1;
        if *failures >= MAX_CONSECUTIVE_FAILURES {
            self.forced_off.insert(workflow_id.to_string(), ());
            log::warn!(
                "Workflow {}: autopilot forced off after {} consecutive failures",
                workflow_id,
                *failures
            );
        }
    }

    /// A human intervened: reset the counters. Forced-off stays sticky.
    pub fn record_human_intervention(&self, workflow_id: &str) {
        self.consecutive_auto.insert(workflow_id.to_string(), 0);
        self.consecutive_failures.insert(workflow_id.to_string(), 0);
    }

    pub fn is_forced_off(&self, workflow_id: &str) -> bool {
        self.forced_off.contains_key(workflow_id)
    }
}

fn defer(reasoning: &str) -> AutopilotDecision {
    AutopilotDecision {
        proceed: false,
        chosen_option: None,
        reasoning: reasoning.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(confidence: f64, risk: RiskLevel) -> NextStepOption {
        let mut o = NextStepOption::new("step", "general_agent", "d");
        o.confidence = confidence;
        o.risk_level = risk;
        o
    }

    #[test]
    fn test_off_mode_always_defers() {
        let manager = AutopilotManager::new();
        let decision = manager.evaluate(
            "wf",
            &[option(0.99, RiskLevel::Low)],
            &AutopilotSettings::default(),
        );
        assert!(!decision.proceed);
    }

    #[test]
    fn test_smart_mode_thresholds() {
        let manager = AutopilotManager::new();
        let settings = AutopilotSettings::smart();

        assert!(
            manager
                .evaluate("wf", &[option(0.9, RiskLevel::Low)], &settings)
                .proceed
        );
        assert!(
            !manager
                .evaluate("wf", &[option(0.8, RiskLevel::Low)], &settings)
                .proceed
        );
        assert!(
            !manager
                .evaluate("wf", &[option(0.9, RiskLevel::High)], &settings)
                .proceed
        );
    }

    #[test]
    fn test_smart_mode_picks_highest_confidence() {
        let manager = AutopilotManager::new();
        let options = vec![option(0.86, RiskLevel::Low), option(0.95, RiskLevel::Low)];
        let decision = manager.evaluate("wf", &options, &AutopilotSettings::smart());
        assert!(decision.proceed);
        assert!(
            (decision.chosen_option.unwrap().confidence - 0.95).abs() < 1e-9
        );
    }

    #[test]
    fn test_full_mode_blocks_only_critical() {
        let manager = AutopilotManager::new();
        let settings = AutopilotSettings::full();

        assert!(
            manager
                .evaluate("wf", &[option(0.4, RiskLevel::High)], &settings)
                .proceed
        );
        assert!(
            !manager
                .evaluate("wf", &[option(0.99, RiskLevel::Critical)], &settings)
                .proceed
        );
    }

    #[test]
    fn test_consecutive_auto_cap() {
        let manager = AutopilotManager::new();
        let settings = AutopilotSettings::smart();
        let options = [option(0.95, RiskLevel::Low)];

        for _ in 0..settings.max_consecutive_auto_steps {
            assert!(manager.evaluate("wf", &options, &settings).proceed);
            manager.record_success("wf");
        }
        assert!(!manager.evaluate("wf", &options, &settings).proceed);

        // Human intervention resets the counter.
        manager.record_human_intervention("wf");
        assert!(manager.evaluate("wf", &options, &settings).proceed);
    }

    #[test]
    fn test_three_failures_force_off_permanently() {
        let manager = AutopilotManager::new();
        let settings = AutopilotSettings::full();
        let options = [option(0.99, RiskLevel::Low)];

        for _ in 0..3 {
            manager.record_failure("wf");
        }
        assert!(manager.is_forced_off("wf"));
        assert!(!manager.evaluate("wf", &options, &settings).proceed);

        // Resets do not lift the forced-off state.
        manager.record_human_intervention("wf");
        assert!(!manager.evaluate("wf", &options, &settings).proceed);

        // Other workflows are unaffected.
        assert!(manager.evaluate("wf-other", &options, &settings).proceed);
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let manager = AutopilotManager::new();
        manager.record_failure("wf");
        manager.record_failure("wf");
        manager.record_success("wf");
        manager.record_failure("wf");
        assert!(!manager.is_forced_off("wf"));
    }
}
