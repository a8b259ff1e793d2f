//! The workflow orchestrator.
//!
//! Takes a request through `Analyzing -> Planning -> Executing` and into a
//! terminal status, dispatching workers per the understood strategy. The
//! decision-driven stepper (`advance` / `submit_human_decision`) extends a
//! workflow beyond its initial plan, gated by the autopilot.

use crate::capabilities::CapabilityRegistry;
use crate::context::store::LIVE_TTL;
use crate::context::ContextStore;
use crate::error::{OrchestratorError, WorkerError};
use crate::intelligence::decision_engine::DecisionOutcome;
use crate::intelligence::models::{AutopilotSettings, HumanDecision, NextStepOption};
use crate::intelligence::{AutopilotManager, DecisionEngine};
use crate::persistence::KeyValueStore;
use crate::reasoning::ReasoningService;
use crate::types::{CapabilityCategory, ExecutionStrategy};
use crate::understanding::{Understanding, UnderstandingService};
use crate::workflow::state::{
    StepRecord, WorkerExecutionState, WorkerStatus, WorkflowState, WorkflowStatus,
};
use crate::workflow::worker::{invoke_with_timeout, WorkerInvoker, DEFAULT_WORKER_TIMEOUT};
use chrono::Utc;
use dashmap::DashMap;
use futures::future::join_all;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

/// One-shot cancellation signal shared between the dispatcher and `cancel`.
#[derive(Debug, Default)]
struct CancelToken {
    flag: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Orchestrates workflows end to end.
#[derive(Debug)]
pub struct Orchestrator {
    understanding: UnderstandingService,
    registry: Arc<CapabilityRegistry>,
    contexts: ContextStore,
    backend: Arc<dyn KeyValueStore>,
    invoker: Arc<dyn WorkerInvoker>,
    decisions: DecisionEngine,
    autopilot: AutopilotManager,
    default_autopilot: parking_lot::RwLock<AutopilotSettings>,
    workflow_autopilot: DashMap<String, AutopilotSettings>,
    workflows: DashMap<String, Arc<RwLock<WorkflowState>>>,
    cancel_tokens: DashMap<String, Arc<CancelToken>>,
    worker_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        reasoner: Arc<dyn ReasoningService>,
        registry: Arc<CapabilityRegistry>,
        backend: Arc<dyn KeyValueStore>,
        invoker: Arc<dyn WorkerInvoker>,
    ) -> Self {
        Self {
            understanding: UnderstandingService::new(reasoner.clone(), registry.clone()),
            registry,
            contexts: ContextStore::new(backend.clone()),
            backend,
            invoker,
            decisions: DecisionEngine::new(reasoner),
            autopilot: AutopilotManager::new(),
            default_autopilot: parking_lot::RwLock::new(AutopilotSettings::default()),
            workflow_autopilot: DashMap::new(),
            workflows: DashMap::new(),
            cancel_tokens: DashMap::new(),
            worker_timeout: DEFAULT_WORKER_TIMEOUT,
        }
    }

    pub fn with_worker_timeout(mut self, timeout: Duration) -> Self {
        self.worker_timeout = timeout;
        self
    }

    /// Autopilot settings applied to workflows without an explicit override.
    pub fn set_default_autopilot(&self, settings: AutopilotSettings) {
        *self.default_autopilot.write() = settings;
    }

    /// Per-workflow autopilot override.
    pub fn set_workflow_autopilot(&self, workflow_id: &str, settings: AutopilotSettings) {
        self.workflow_autopilot
            .insert(workflow_id.to_string(), settings);
    }

    pub fn contexts(&self) -> &ContextStore {
        &self.contexts
    }

    /// Process a request end to end and return the final workflow state.
    pub async fn submit(
        &self,
        request: &str,
        session_id: &str,
        conversation_context: Option<&Value>,
    ) -> Result<WorkflowState, OrchestratorError> {
        let workflow_id = Uuid::new_v4().to_string();
        log::info!("[{}] Starting semantic analysis", workflow_id);

        let understanding = self.understanding.parse(request, conversation_context).await;

        let mut state = WorkflowState::new(&workflow_id, session_id, request, understanding);
        state.status = WorkflowStatus::Planning;

        self.contexts
            .create(&workflow_id, session_id, &state.understanding)?;

        let workflow = Arc::new(RwLock::new(state));
        self.workflows.insert(workflow_id.clone(), workflow.clone());
        let token = Arc::new(CancelToken::default());
        self.cancel_tokens.insert(workflow_id.clone(), token.clone());

        // Off-key requests never execute workers: the result is the
        // suggestion itself.
        if workflow.read().await.understanding.plan.off_key {
            let mut state = workflow.write().await;
            let consolidated = json!({
                "off_key_request": true,
                "suggestion": state.understanding.plan.suggestion,
                "available_alternatives": state.understanding.plan.alternatives,
                "confidence": state.understanding.confidence,
                "reasoning": state.understanding.reasoning,
            });
            state.consolidated = Some(consolidated);
            state.add_warning("Request did not map to available capabilities");
            state.status = WorkflowStatus::Completed;
            state.completed_at = Some(Utc::now());
            log::info!("[{}] Off-key request answered with suggestions", workflow_id);
            let snapshot = state.clone();
            self.persist_state(&snapshot);
            return Ok(snapshot);
        }

        let issues = {
            let state = workflow.read().await;
            self.understanding.validate_plan(&state.understanding)
        };
        if !issues.is_empty() {
            let mut state = workflow.write().await;
            state.add_error(format!("Invalid execution plan: {}", issues.join("; ")), None);
            state.status = WorkflowStatus::Failed;
            state.completed_at = Some(Utc::now());
            let snapshot = state.clone();
            self.persist_state(&snapshot);
            return Ok(snapshot);
        }

        {
            let mut state = workflow.write().await;
            state.status = WorkflowStatus::Executing;
            state.started_at = Some(Utc::now());
        }

        let strategy = workflow.read().await.understanding.execution_strategy;
        log::info!("[{}] Executing with {} strategy", workflow_id, strategy);
        match strategy {
            ExecutionStrategy::Single => self.run_single(&workflow, &token).await,
            ExecutionStrategy::Parallel => self.run_parallel(&workflow, &token).await,
            ExecutionStrategy::Sequential => self.run_sequential(&workflow, &token).await,
            ExecutionStrategy::Hybrid => self.run_hybrid(&workflow, &token).await,
        }

        let mut state = workflow.write().await;
        consolidate(&mut state, token.is_cancelled());
        log::info!("[{}] Workflow finished: {:?}", workflow_id, state.status);
        let snapshot = state.clone();
        self.persist_state(&snapshot);
        Ok(snapshot)
    }

    /// Snapshot of a workflow's current state.
    pub async fn status(&self, workflow_id: &str) -> Result<WorkflowState, OrchestratorError> {
        let workflow = self.lookup(workflow_id)?;
        let state = workflow.read().await;
        Ok(state.clone())
    }

    /// Workflow ids that have not reached a terminal status.
    pub async fn list_active(&self) -> Vec<String> {
        // Snapshot the map before awaiting so no shard lock is held across
        // an await point.
        let entries: Vec<(String, Arc<RwLock<WorkflowState>>)> = self
            .workflows
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut active = Vec::new();
        for (workflow_id, workflow) in entries {
            if !workflow.read().await.status.is_terminal() {
                active.push(workflow_id);
            }
        }
        active
    }

    /// Cancel a workflow. Completed worker results are retained; the
    /// workflow ends Failed with a cancellation error. Returns false for
    /// unknown or already-terminal workflows.
    pub async fn cancel(&self, workflow_id: &str) -> bool {
        let Ok(workflow) = self.lookup(workflow_id) else {
            return false;
        };

        let mut state = workflow.write().await;
        if state.status.is_terminal() {
            return false;
        }

        if let Some(token) = self.cancel_tokens.get(workflow_id) {
            token.cancel();
        }
        state.add_error("workflow cancelled", None);
        state.status = WorkflowStatus::Failed;
        state.completed_at = Some(Utc::now());
        self.persist_state(&state);

        if let Err(e) = self.contexts.archive(workflow_id) {
            log::warn!("[{}] Failed to archive context on cancel: {}", workflow_id, e);
        }
        true
    }

    /// Archive the semantic context of a finished workflow.
    ///
    /// Completion does not archive automatically, since the stepper may
    /// still extend the workflow and needs the live context. Callers that
    /// are done with a workflow archive it here; cancellation (via
    /// [`Self::cancel`] or a human cancel decision) archives on its own.
    pub fn archive_context(&self, workflow_id: &str) -> Result<(), OrchestratorError> {
        self.contexts.archive(workflow_id)?;
        Ok(())
    }

    /// One step of the decision-driven stepper: fetch recommendations, let
    /// the autopilot decide, then either execute the chosen step or move
    /// the workflow to AwaitingHuman with the options pending.
    pub async fn advance(&self, workflow_id: &str) -> Result<WorkflowState, OrchestratorError> {
        let workflow = self.lookup(workflow_id)?;

        let (goal, steps, keys) = {
            let state = workflow.read().await;
            match state.status {
                WorkflowStatus::AwaitingHuman
                | WorkflowStatus::Paused
                | WorkflowStatus::Failed
                | WorkflowStatus::Cancelled => {
                    return Err(OrchestratorError::InvalidState {
                        workflow_id: workflow_id.to_string(),
                        status: format!("{:?}", state.status),
                        expected: "an advanceable status".to_string(),
                    });
                }
                _ => {}
            }
            (
                state.understanding.business_goal.clone(),
                state.step_summaries(),
                state.result_keys(),
            )
        };

        let options = self
            .decisions
            .next_step_recommendations(&goal, &steps, &keys)
            .await;

        let settings = self.settings_for(workflow_id);
        let decision = self.autopilot.evaluate(workflow_id, &options, &settings);

        if decision.proceed {
            if let Some(option) = decision.chosen_option {
                log::info!("[{}] Autopilot proceeding: {}", workflow_id, decision.reasoning);
                {
                    let mut state = workflow.write().await;
                    state.status = WorkflowStatus::Executing;
                    state.pending_options.clear();
                }
                self.execute_step(&workflow, option, false).await;
                let snapshot = workflow.read().await.clone();
                self.persist_state(&snapshot);
                return Ok(snapshot);
            }
        }

        log::info!("[{}] Deferring to human: {}", workflow_id, decision.reasoning);
        let mut state = workflow.write().await;
        state.status = WorkflowStatus::AwaitingHuman;
        state.pending_options = options;
        let snapshot = state.clone();
        self.persist_state(&snapshot);
        Ok(snapshot)
    }

    /// Consume one human decision for a deferred workflow.
    pub async fn submit_human_decision(
        &self,
        decision: &HumanDecision,
    ) -> Result<WorkflowState, OrchestratorError> {
        let workflow_id = decision.workflow_id.as_str();
        let workflow = self.lookup(workflow_id)?;

        let options = {
            let state = workflow.read().await;
            if !matches!(
                state.status,
                WorkflowStatus::AwaitingHuman | WorkflowStatus::Paused
            ) {
                return Err(OrchestratorError::InvalidState {
                    workflow_id: workflow_id.to_string(),
                    status: format!("{:?}", state.status),
                    expected: "AwaitingHuman or Paused".to_string(),
                });
            }
            state.pending_options.clone()
        };

        let outcome = self.decisions.process_decision(decision, &options)?;
        self.autopilot.record_human_intervention(workflow_id);
        {
            let mut state = workflow.write().await;
            state.human_decision_count += 1;
        }

        match outcome {
            DecisionOutcome::Execute(option) => {
                {
                    let mut state = workflow.write().await;
                    state.pending_options.clear();
                    state.status = WorkflowStatus::Executing;
                }
                self.execute_step(&workflow, option, true).await;
            }
            DecisionOutcome::Pause => {
                let mut state = workflow.write().await;
                state.status = WorkflowStatus::Paused;
                log::info!("[{}] Paused by user", workflow_id);
            }
            DecisionOutcome::Cancel => {
                let mut state = workflow.write().await;
                state.pending_options.clear();
                state.status = WorkflowStatus::Cancelled;
                state.completed_at = Some(Utc::now());
                drop(state);
                if let Err(e) = self.contexts.archive(workflow_id) {
                    log::warn!("[{}] Failed to archive context: {}", workflow_id, e);
                }
                log::info!("[{}] Cancelled by user", workflow_id);
            }
        }

        let snapshot = workflow.read().await.clone();
        self.persist_state(&snapshot);
        Ok(snapshot)
    }

    /// Write a workflow-state snapshot to the backend. Best effort: a
    /// persistence failure is logged, never surfaced, since the in-memory
    /// state stays authoritative.
    fn persist_state(&self, state: &WorkflowState) {
        let key = format!("workflow_state:{}", state.workflow_id);
        match serde_json::to_value(state) {
            Ok(value) => {
                if let Err(e) = self.backend.set(&key, &value, LIVE_TTL) {
                    log::warn!(
                        "[{}] Failed to persist workflow state: {}",
                        state.workflow_id,
                        e
                    );
                }
            }
            Err(e) => {
                log::warn!(
                    "[{}] Failed to serialize workflow state: {}",
                    state.workflow_id,
                    e
                );
            }
        }
    }

    fn lookup(&self, workflow_id: &str) -> Result<Arc<RwLock<WorkflowState>>, OrchestratorError> {
        self.workflows
            .get(workflow_id)
            .map(|w| w.clone())
            .ok_or_else(|| OrchestratorError::WorkflowNotFound {
                workflow_id: workflow_id.to_string(),
            })
    }

    fn settings_for(&self, workflow_id: &str) -> AutopilotSettings {
        self.workflow_autopilot
            .get(workflow_id)
            .map(|s| s.clone())
            .unwrap_or_else(|| self.default_autopilot.read().clone())
    }

    async fn run_single(&self, workflow: &Arc<RwLock<WorkflowState>>, token: &CancelToken) {
        let (worker_id, capability) = {
            let state = workflow.read().await;
            let Some(worker_id) = state.understanding.recommended_workers.first().cloned()
            else {
                drop(state);
                let mut state = workflow.write().await;
                state.add_error("No workers recommended for single execution", None);
                return;
            };
            let capability = self.capability_for(&state.understanding, &worker_id);
            (worker_id, capability)
        };

        self.dispatch_worker(workflow, &worker_id, capability, token)
            .await;
    }

    async fn run_parallel(&self, workflow: &Arc<RwLock<WorkflowState>>, token: &CancelToken) {
        let assignments = self.worker_assignments(workflow).await;
        let dispatches = assignments.iter().map(|(worker_id, capability)| {
            self.dispatch_worker(workflow, worker_id, *capability, token)
        });
        join_all(dispatches).await;
    }

    async fn run_sequential(&self, workflow: &Arc<RwLock<WorkflowState>>, token: &CancelToken) {
        let assignments = self.worker_assignments(workflow).await;
        for (worker_id, capability) in assignments {
            if token.is_cancelled() {
                break;
            }
            // Each result is folded into context before the next dispatch,
            // so later workers see earlier outputs.
            self.dispatch_worker(workflow, &worker_id, capability, token)
                .await;
        }
    }

    async fn run_hybrid(&self, workflow: &Arc<RwLock<WorkflowState>>, token: &CancelToken) {
        let groups = {
            let state = workflow.read().await;
            state.understanding.plan.parallel_groups.clone()
        };
        if groups.is_empty() {
            log::debug!("Hybrid plan has no groups, falling back to parallel");
            return self.run_parallel(workflow, token).await;
        }

        let understanding = workflow.read().await.understanding.clone();
        for group in groups {
            if token.is_cancelled() {
                break;
            }
            let dispatches: Vec<_> = group
                .iter()
                .map(|worker_id| {
                    let capability = self.capability_for(&understanding, worker_id);
                    (worker_id.clone(), capability)
                })
                .collect();
            join_all(dispatches.iter().map(|(worker_id, capability)| {
                self.dispatch_worker(workflow, worker_id, *capability, token)
            }))
            .await;
        }
    }

    /// Recommended workers paired with their capabilities, duplicates
    /// removed, plan order preserved.
    async fn worker_assignments(
        &self,
        workflow: &Arc<RwLock<WorkflowState>>,
    ) -> Vec<(String, CapabilityCategory)> {
        let state = workflow.read().await;
        let mut assignments = Vec::new();
        for worker_id in &state.understanding.recommended_workers {
            if assignments.iter().any(|(id, _)| id == worker_id) {
                continue;
            }
            let capability = self.capability_for(&state.understanding, worker_id);
            assignments.push((worker_id.clone(), capability));
        }
        assignments
    }

    fn capability_for(
        &self,
        understanding: &Understanding,
        worker_id: &str,
    ) -> CapabilityCategory {
        if let Some(mapping) = understanding.plan.agent_mappings.get(worker_id) {
            return mapping.capability;
        }
        if let Some(descriptor) = self.registry.find_worker(worker_id) {
            return descriptor.capability;
        }
        understanding
            .primary_capabilities
            .first()
            .copied()
            .unwrap_or(CapabilityCategory::ContentCreation)
    }

    /// Run one worker: Pending -> InProgress -> Completed/Failed, with the
    /// result folded into the semantic context and the accumulated results.
    /// Returns whether the worker succeeded.
    async fn dispatch_worker(
        &self,
        workflow: &Arc<RwLock<WorkflowState>>,
        worker_id: &str,
        capability: CapabilityCategory,
        token: &CancelToken,
    ) -> bool {
        let workflow_id = {
            let mut state = workflow.write().await;
            if token.is_cancelled() {
                return false;
            }
            let worker = state
                .worker_states
                .entry(worker_id.to_string())
                .or_insert_with(|| WorkerExecutionState::new(worker_id, capability));
            worker.status = WorkerStatus::InProgress;
            worker.started_at = Some(Utc::now());
            worker.progress = 0.1;
            state.workflow_id.clone()
        };

        log::info!("[{}] Executing {} for {}", workflow_id, worker_id, capability);

        let input = match self.contexts.to_worker_input(&workflow_id, worker_id, capability) {
            Ok(input) => input,
            Err(e) => {
                self.mark_worker_failed(workflow, worker_id, &e.to_string())
                    .await;
                return false;
            }
        };

        {
            let mut state = workflow.write().await;
            if let Some(worker) = state.worker_states.get_mut(worker_id) {
                worker.input = Some(input.clone());
                worker.progress = 0.3;
            }
        }

        let result = tokio::select! {
            result = invoke_with_timeout(&*self.invoker, worker_id, &input, self.worker_timeout) => result,
            _ = token.cancelled() => Err(WorkerError::Cancelled),
        };

        match result {
            Ok(output) => {
                if let Err(e) = self
                    .contexts
                    .record_worker_result(&workflow_id, worker_id, &output)
                {
                    log::warn!(
                        "[{}] Failed to persist result for {}: {}",
                        workflow_id,
                        worker_id,
                        e
                    );
                }
                let mut state = workflow.write().await;
                if let Some(worker) = state.worker_states.get_mut(worker_id) {
                    worker.status = WorkerStatus::Completed;
                    worker.output = Some(output.clone());
                    worker.completed_at = Some(Utc::now());
                    worker.progress = 1.0;
                }
                state
                    .results
                    .insert(format!("{}_output", worker_id), output);
                state.update_progress();
                log::info!("[{}] {} completed", workflow_id, worker_id);
                true
            }
            Err(e) => {
                self.mark_worker_failed(workflow, worker_id, &e.to_string())
                    .await;
                false
            }
        }
    }

    async fn mark_worker_failed(
        &self,
        workflow: &Arc<RwLock<WorkflowState>>,
        worker_id: &str,
        error: &str,
    ) {
        let mut state = workflow.write().await;
        if let Some(worker) = state.worker_states.get_mut(worker_id) {
            worker.status = WorkerStatus::Failed;
            worker.error = Some(error.to_string());
            worker.completed_at = Some(Utc::now());
        }
        state.add_error(error, Some(worker_id));
        state.update_progress();
    }

    /// Execute one stepper-chosen step and record it. Automatic steps feed
    /// the autopilot's success/failure counters; human-directed steps do
    /// not.
    async fn execute_step(
        &self,
        workflow: &Arc<RwLock<WorkflowState>>,
        option: NextStepOption,
        human_directed: bool,
    ) {
        let workflow_id = workflow.read().await.workflow_id.clone();
        let token = self
            .cancel_tokens
            .get(&workflow_id)
            .map(|t| t.clone())
            .unwrap_or_default();

        let capability = self
            .registry
            .find_worker(&option.worker_id)
            .map(|d| d.capability)
            .unwrap_or(CapabilityCategory::ContentCreation);

        let succeeded = self
            .dispatch_worker(workflow, &option.worker_id, capability, &token)
            .await;

        {
            let mut state = workflow.write().await;
            state.completed_steps.push(StepRecord {
                step_id: option.option_id.clone(),
                step_type: option.step_type.clone(),
                worker_id: option.worker_id.clone(),
                description: option.description.clone(),
                succeeded,
                confidence: option.confidence,
                human_directed,
                executed_at: Utc::now(),
            });
        }

        if !human_directed {
            if succeeded {
                self.autopilot.record_success(&workflow_id);
            } else {
                self.autopilot.record_failure(&workflow_id);
            }
        }
    }
}

/// Decide the terminal status from worker outcomes and build the
/// consolidated result.
fn consolidate(state: &mut WorkflowState, cancelled: bool) {
    let completed = state
        .worker_states
        .values()
        .filter(|w| w.status == WorkerStatus::Completed)
        .count();
    let failed = state
        .worker_states
        .values()
        .filter(|w| w.status == WorkerStatus::Failed)
        .count();

    state.status = if cancelled {
        WorkflowStatus::Failed
    } else if failed == 0 && completed > 0 {
        WorkflowStatus::Completed
    } else if completed > 0 {
        WorkflowStatus::Partial
    } else {
        WorkflowStatus::Failed
    };

    if state.results.is_empty() {
        state.consolidated = Some(json!({ "message": "No results generated" }));
    } else {
        let mut workers: Vec<&String> = state.worker_states.keys().collect();
        workers.sort();
        let duration = state
            .started_at
            .map(|start| (Utc::now() - start).to_string())
            .unwrap_or_default();
        state.consolidated = Some(json!({
            "business_goal": state.understanding.business_goal,
            "execution_summary": {
                "strategy": state.understanding.execution_strategy,
                "workers_executed": workers,
                "total_duration": duration,
            },
            "results": state.results,
        }));
    }

    state.completed_at = Some(Utc::now());
    state.updated_at = Utc::now();
}
