//! Workflow and per-worker execution state.

use crate::intelligence::models::NextStepOption;
use crate::types::CapabilityCategory;
use crate::understanding::Understanding;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Lifecycle of one workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Understanding the request.
    Analyzing,
    /// Validating the execution plan.
    Planning,
    /// Workers are running.
    Executing,
    /// Deferred to a human, waiting for a decision.
    AwaitingHuman,
    /// Held by user request, resumable.
    Paused,
    /// All workers succeeded.
    Completed,
    /// Some workers succeeded, some failed.
    Partial,
    /// Nothing usable came out, or the plan was invalid.
    Failed,
    /// Stopped by user request.
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed
                | WorkflowStatus::Partial
                | WorkflowStatus::Failed
                | WorkflowStatus::Cancelled
        )
    }
}

/// Lifecycle of one worker within a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Everything tracked for one worker invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerExecutionState {
    pub worker_id: String,
    pub capability: CapabilityCategory,
    pub status: WorkerStatus,
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// Coarse progress in [0, 1].
    pub progress: f64,
}

impl WorkerExecutionState {
    pub fn new(worker_id: impl Into<String>, capability: CapabilityCategory) -> Self {
        Self {
            worker_id: worker_id.into(),
            capability,
            status: WorkerStatus::Pending,
            input: None,
            output: None,
            error: None,
            started_at: None,
            completed_at: None,
            progress: 0.0,
        }
    }

    /// Wall-clock duration, once both timestamps exist.
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// One executed step in the decision-driven stepper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    pub step_id: String,
    pub step_type: String,
    pub worker_id: String,
    pub description: String,
    pub succeeded: bool,
    pub confidence: f64,
    /// True when a human chose or overrode this step.
    pub human_directed: bool,
    pub executed_at: DateTime<Utc>,
}

/// Complete state of one workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowState {
    pub workflow_id: String,
    pub session_id: String,
    pub original_request: String,
    pub understanding: Understanding,

    pub status: WorkflowStatus,
    #[serde(default)]
    pub worker_states: HashMap<String, WorkerExecutionState>,
    /// Accumulated results, keyed `<worker_id>_output`.
    #[serde(default)]
    pub results: HashMap<String, Value>,
    #[serde(default)]
    pub consolidated: Option<Value>,

    /// Options awaiting a human decision, set while AwaitingHuman.
    #[serde(default)]
    pub pending_options: Vec<NextStepOption>,
    #[serde(default)]
    pub completed_steps: Vec<StepRecord>,
    #[serde(default)]
    pub human_decision_count: u32,

    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Rollup of per-worker progress, in [0, 1].
    #[serde(default)]
    pub progress: f64,

    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowState {
    pub fn new(
        workflow_id: impl Into<String>,
        session_id: impl Into<String>,
        original_request: impl Into<String>,
        understanding: Understanding,
    ) -> Self {
        let now = Utc::now();
        Self {
            workflow_id: workflow_id.into(),
            session_id: session_id.into(),
            original_request: original_request.into(),
            understanding,
            status: WorkflowStatus::Analyzing,
            worker_states: HashMap::new(),
            results: HashMap::new(),
            consolidated: None,
            pending_options: Vec::new(),
            completed_steps: Vec::new(),
            human_decision_count: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
            progress: 0.0,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    pub fn add_error(&mut self, message: impl Into<String>, worker_id: Option<&str>) {
        let message = message.into();
        let entry = match worker_id {
            Some(id) => format!("[{}] {}", id, message),
            None => message,
        };
        log::error!("Workflow {}: {}", self.workflow_id, entry);
        self.errors.push(entry);
        self.updated_at = Utc::now();
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        let message = message.into();
        log::warn!("Workflow {}: {}", self.workflow_id, message);
        self.warnings.push(message);
        self.updated_at = Utc::now();
    }

    /// Roll per-worker progress up into overall progress.
    pub fn update_progress(&mut self) {
        if self.worker_states.is_empty() {
            self.progress = 0.0;
            return;
        }
        let total: f64 = self.worker_states.values().map(|s| s.progress).sum();
        self.progress = total / self.worker_states.len() as f64;
        self.updated_at = Utc::now();
    }

    /// Keys of accumulated results, sorted for stable output.
    pub fn result_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.results.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// One-line summaries of executed steps, for recommendation prompts.
    pub fn step_summaries(&self) -> Vec<String> {
        self.completed_steps
            .iter()
            .map(|s| {
                format!(
                    "{} via {} ({})",
                    s.step_type,
                    s.worker_id,
                    if s.succeeded { "succeeded" } else { "failed" }
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> WorkflowState {
        WorkflowState::new(
            "wf-1",
            "s-1",
            "open a bakery",
            Understanding::fallback("open a bakery", "n/a"),
        )
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Cancelled.is_terminal());
        assert!(!WorkflowStatus::Executing.is_terminal());
        assert!(!WorkflowStatus::AwaitingHuman.is_terminal());
    }

    #[test]
    fn test_progress_rollup() {
        let mut s = state();
        s.update_progress();
        assert_eq!(s.progress, 0.0);

        let mut a = WorkerExecutionState::new("a", CapabilityCategory::BrandCreation);
        a.progress = 1.0;
        let mut b = WorkerExecutionState::new("b", CapabilityCategory::LogoGeneration);
        b.progress = 0.5;
        s.worker_states.insert("a".to_string(), a);
        s.worker_states.insert("b".to_string(), b);

        s.update_progress();
        assert!((s.progress - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_error_attribution() {
        let mut s = state();
        s.add_error("timed out", Some("logo_generation_agent"));
        s.add_error("plan invalid", None);
        assert_eq!(s.errors[0], "[logo_generation_agent] timed out");
        assert_eq!(s.errors[1], "plan invalid");
    }

    #[test]
    fn test_worker_duration() {
        let mut w = WorkerExecutionState::new("a", CapabilityCategory::BrandCreation);
        assert!(w.duration().is_none());
        w.started_at = Some(Utc::now());
        w.completed_at = Some(w.started_at.unwrap() + Duration::seconds(7));
        assert_eq!(w.duration().unwrap().num_seconds(), 7);
    }
}
