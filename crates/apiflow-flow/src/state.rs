//! Flow lifecycle state machine and bounded history
//!
//! Every flow execution is tracked by a [`FlowState`] owned by the
//! [`FlowStateManager`]. The legal transitions are:
//!
//! ```text
//! Idle -> Running -> {Completed, Failed, Stopped}
//! ```
//!
//! The three terminal states are absorbing: the only thing that happens to a
//! terminal entry is the move into per-flow-id history, where age-based
//! [`FlowStateManager::cleanup`] can eventually evict it. Live entries are
//! never evicted.

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::{FlowError, Result};
use apiflow_protocol::models::{
    FlowConfig, FlowState, FlowStats, FlowStatus, FlowStep, FlowValidation, StepResult,
};

/// Owner of all live and historical flow state
#[derive(Debug, Default)]
pub struct FlowStateManager {
    active: HashMap<String, FlowState>,
    history: HashMap<String, Vec<FlowState>>,
    total_executions: usize,
}

impl FlowStateManager {
    /// Create an empty manager
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new flow record in `Idle`.
    ///
    /// Fails with [`FlowError::DuplicateFlow`] when a live (non-terminal)
    /// entry already uses the id; terminal entries in history do not block
    /// re-use.
    pub fn create_flow_state(&mut self, flow_id: &str, steps: &[FlowStep]) -> Result<FlowState> {
        if self.active.contains_key(flow_id) {
            return Err(FlowError::DuplicateFlow(flow_id.to_string()));
        }
        let state = FlowState::new(flow_id, steps.len());
        debug!(flow_id, total_steps = steps.len(), "created flow state");
        self.active.insert(flow_id.to_string(), state.clone());
        Ok(state)
    }

    /// `Idle -> Running`; records the start time.
    ///
    /// Returns `None` (no-op) when the flow does not exist or is not idle.
    pub fn start_flow(&mut self, flow_id: &str) -> Option<DateTime<Utc>> {
        let state = self.active.get_mut(flow_id)?;
        if state.status != FlowStatus::Idle {
            warn!(flow_id, status = %state.status, "start_flow ignored: not idle");
            return None;
        }
        let now = Utc::now();
        state.status = FlowStatus::Running;
        state.start_time = Some(now);
        info!(flow_id, "flow started");
        Some(now)
    }

    /// Append a step outcome; valid only while running. Returns whether the
    /// result was recorded.
    pub fn add_step_result(&mut self, flow_id: &str, result: StepResult) -> bool {
        match self.running_mut(flow_id) {
            Some(state) => {
                state.results.push(result);
                state.current_step = state.results.len().min(state.total_steps);
                true
            }
            None => false,
        }
    }

    /// Append an error message; valid only while running
    pub fn add_flow_error(&mut self, flow_id: &str, error: impl Into<String>) -> bool {
        match self.running_mut(flow_id) {
            Some(state) => {
                state.errors.push(error.into());
                true
            }
            None => false,
        }
    }

    /// Merge values into the flow's variable snapshot; valid only while
    /// running
    pub fn update_flow_variables(
        &mut self,
        flow_id: &str,
        variables: HashMap<String, Value>,
    ) -> bool {
        match self.running_mut(flow_id) {
            Some(state) => {
                state.variables.extend(variables);
                true
            }
            None => false,
        }
    }

    /// `Running -> Completed` (success) or `Running -> Failed`; records end
    /// time and execution time, then moves the entry into history.
    ///
    /// Returns the terminal state, or `None` when the flow does not exist or
    /// is not running.
    pub fn complete_flow(&mut self, flow_id: &str, success: bool) -> Option<FlowState> {
        let status = if success {
            FlowStatus::Completed
        } else {
            FlowStatus::Failed
        };
        self.finish_flow(flow_id, status)
    }

    /// `Running -> Stopped` (external cancellation); same bookkeeping as
    /// completion
    pub fn stop_flow(&mut self, flow_id: &str) -> Option<FlowState> {
        self.finish_flow(flow_id, FlowStatus::Stopped)
    }

    fn finish_flow(&mut self, flow_id: &str, status: FlowStatus) -> Option<FlowState> {
        if self.active.get(flow_id)?.status != FlowStatus::Running {
            warn!(flow_id, "finish ignored: flow is not running");
            return None;
        }
        let mut state = self.active.remove(flow_id)?;
        let now = Utc::now();
        state.status = status;
        state.end_time = Some(now);
        state.execution_time_ms = state
            .start_time
            .map(|start| (now - start).num_milliseconds().max(0) as u64);
        info!(flow_id, status = %status, "flow finished");

        self.total_executions += 1;
        self.move_to_history(state.clone());
        Some(state)
    }

    fn move_to_history(&mut self, state: FlowState) {
        self.history.entry(state.id.clone()).or_default().push(state);
    }

    fn running_mut(&mut self, flow_id: &str) -> Option<&mut FlowState> {
        self.active
            .get_mut(flow_id)
            .filter(|state| state.status == FlowStatus::Running)
    }

    /// Evict history entries whose `end_time` is older than `max_age`.
    ///
    /// Live flows are held outside history and are never touched. Returns
    /// the number of evicted entries.
    pub fn cleanup(&mut self, max_age: Duration) -> usize {
        let cutoff = Utc::now() - max_age;
        let mut evicted = 0;
        self.history.retain(|flow_id, entries| {
            let before = entries.len();
            entries.retain(|state| state.end_time.map(|end| end >= cutoff).unwrap_or(true));
            let removed = before - entries.len();
            if removed > 0 {
                debug!(flow_id = %flow_id, removed, "evicted flow history entries");
                evicted += removed;
            }
            !entries.is_empty()
        });
        evicted
    }

    /// Current state of a flow: the live entry, or the most recent
    /// historical one
    pub fn get_flow_state(&self, flow_id: &str) -> Option<FlowState> {
        self.active
            .get(flow_id)
            .or_else(|| self.history.get(flow_id).and_then(|h| h.last()))
            .cloned()
    }

    /// All live (non-terminal) flows
    pub fn get_active_flows(&self) -> Vec<FlowState> {
        self.active.values().cloned().collect()
    }

    /// Aggregated lifecycle counters; purely derived, never mutates
    pub fn get_flow_stats(&self) -> FlowStats {
        let mut stats = FlowStats {
            active: self.active.len(),
            total_executions: self.total_executions,
            ..FlowStats::default()
        };
        for state in self.history.values().flatten() {
            match state.status {
                FlowStatus::Completed => stats.completed += 1,
                FlowStatus::Failed => stats.failed += 1,
                FlowStatus::Stopped => stats.stopped += 1,
                _ => {}
            }
        }
        stats
    }

    /// Structural validation of a flow definition. Mutates nothing.
    pub fn validate_flow(steps: &[FlowStep], config: &FlowConfig) -> FlowValidation {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        if steps.is_empty() {
            errors.push("flow has no steps".to_string());
        }

        let mut seen_ids: Vec<&str> = Vec::new();
        for (index, step) in steps.iter().enumerate() {
            if step.id.is_empty() {
                errors.push(format!("step at index {} has an empty id", index));
                continue;
            }
            if seen_ids.contains(&step.id.as_str()) {
                errors.push(format!("duplicate step id '{}'", step.id));
            }
            seen_ids.push(&step.id);

            if step.endpoint_id.is_none() && step.url.is_none() {
                warnings.push(format!(
                    "step '{}' has neither an endpoint reference nor an inline url",
                    step.id
                ));
            }

            if config.parallel {
                let references_steps = step
                    .url
                    .as_deref()
                    .map(crate::interpolate::reference_scopes)
                    .unwrap_or_default()
                    .iter()
                    .any(|s| s == "step");
                if references_steps {
                    warnings.push(format!(
                        "step '{}' references step outputs in a parallel flow; \
                         execution order is not guaranteed",
                        step.id
                    ));
                }
            }
        }

        if config.parallel && config.max_concurrency < 1 {
            errors.push("parallel flows require max_concurrency >= 1".to_string());
        }

        FlowValidation {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Serialize a flow's current state for persistence-adjacent tooling
    pub fn export_flow_state(&self, flow_id: &str) -> Option<Value> {
        self.get_flow_state(flow_id)
            .and_then(|state| serde_json::to_value(state).ok())
    }

    /// Import a previously exported terminal state into history.
    ///
    /// Non-terminal states are rejected: live execution cannot be
    /// reconstructed from a snapshot.
    pub fn import_flow_state(&mut self, data: Value) -> Result<String> {
        let state: FlowState = serde_json::from_value(data)?;
        if !state.status.is_terminal() {
            return Err(FlowError::Validation(vec![format!(
                "cannot import flow '{}' in non-terminal status {}",
                state.id, state.status
            )]));
        }
        let id = state.id.clone();
        self.total_executions += 1;
        self.move_to_history(state);
        Ok(id)
    }
}
