//! Flow orchestration
//!
//! The [`FlowExecutor`] turns a validated step list plus a [`FlowConfig`]
//! into a sequence of executed HTTP requests, updating the
//! [`FlowStateManager`] as it goes and producing an [`ExecutionReport`].
//!
//! Scheduling is cooperative: "parallel" means multiple outstanding network
//! operations interleaved on the runtime, bounded by a semaphore admission
//! gate. Cancellation is a stop flag consulted before each dispatch;
//! in-flight requests are never forcibly aborted.

use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, info, instrument, warn};

use crate::interpolate::{self, InterpolationContext};
use crate::session::SessionStore;
use crate::state::FlowStateManager;
use crate::{FlowError, Result};
use apiflow_backend::StepRunner;
use apiflow_protocol::models::{
    Endpoint, ExecutionReport, FlowConfig, FlowState, FlowStep, MaterializedRequest, StepResult,
};

/// How a pass over the steps ended
enum RunOutcome {
    /// Every step that should run has run
    Finished {
        /// Whether any attempted step failed
        any_failed: bool,
    },
    /// An external stop request was observed before dispatching a step
    Stopped,
    /// The whole-flow deadline fired
    TimedOut,
}

/// A step merged with its endpoint defaults, ready for interpolation
struct MergedStep {
    method: String,
    url: String,
    headers: HashMap<String, String>,
    body: Option<Value>,
    timeout_ms: Option<u64>,
}

/// Drives flows to completion against an injected [`StepRunner`]
#[derive(Clone)]
pub struct FlowExecutor {
    state: Arc<RwLock<FlowStateManager>>,
    session: SessionStore,
    runner: Arc<dyn StepRunner>,
    endpoints: Arc<RwLock<HashMap<String, Endpoint>>>,
    stop_flags: Arc<RwLock<HashMap<String, Arc<AtomicBool>>>>,
}

impl FlowExecutor {
    /// Create an executor over the given session and step runner
    pub fn new(session: SessionStore, runner: Arc<dyn StepRunner>) -> Self {
        Self {
            state: Arc::new(RwLock::new(FlowStateManager::new())),
            session,
            runner,
            endpoints: Arc::new(RwLock::new(HashMap::new())),
            stop_flags: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Shared handle to the flow state manager, for status and stats surfaces
    pub fn state_manager(&self) -> Arc<RwLock<FlowStateManager>> {
        Arc::clone(&self.state)
    }

    /// Handle to the session store backing interpolation
    pub fn session(&self) -> SessionStore {
        self.session.clone()
    }

    /// Make an endpoint definition available to steps referencing it by id
    pub async fn register_endpoint(&self, endpoint: Endpoint) {
        self.endpoints
            .write()
            .await
            .insert(endpoint.id.clone(), endpoint);
    }

    /// Request cooperative cancellation of a running flow.
    ///
    /// The flag is consulted before each new dispatch; already-dispatched
    /// network calls finish on their own. Returns whether a running flow
    /// with that id was found.
    pub async fn request_stop(&self, flow_id: &str) -> bool {
        match self.stop_flags.read().await.get(flow_id) {
            Some(flag) => {
                info!(flow_id, "stop requested");
                flag.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// Execute a flow to a terminal state and return the report.
    ///
    /// Validation problems and duplicate flow ids are reported immediately
    /// without executing a single step. Step failures surface through the
    /// report once the flow is terminal.
    #[instrument(skip(self, steps, config, inputs), fields(steps = steps.len()))]
    pub async fn run(
        &self,
        flow_id: &str,
        steps: Vec<FlowStep>,
        config: FlowConfig,
        inputs: HashMap<String, Value>,
    ) -> Result<ExecutionReport> {
        let validation = FlowStateManager::validate_flow(&steps, &config);
        if !validation.valid {
            return Err(FlowError::Validation(validation.errors));
        }
        for warning in &validation.warnings {
            warn!(flow_id, %warning, "flow validation warning");
        }

        {
            let mut mgr = self.state.write().await;
            mgr.create_flow_state(flow_id, &steps)?;
            mgr.start_flow(flow_id);
        }
        self.session.begin_flow(flow_id, inputs).await;

        let stop_flag = Arc::new(AtomicBool::new(false));
        self.stop_flags
            .write()
            .await
            .insert(flow_id.to_string(), Arc::clone(&stop_flag));

        let started = Instant::now();
        let outcome = match config.timeout_ms {
            Some(ms) => {
                let deadline = Duration::from_millis(ms);
                match tokio::time::timeout(
                    deadline,
                    self.run_steps(flow_id, &steps, &config, &stop_flag),
                )
                .await
                {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        self.record_timeout(flow_id, &steps, ms).await;
                        RunOutcome::TimedOut
                    }
                }
            }
            None => self.run_steps(flow_id, &steps, &config, &stop_flag).await,
        };

        // Snapshot flow-scoped runtime variables while the record still
        // accepts mutation.
        let runtime_vars = self.session.read().await.runtime_vars();
        if !runtime_vars.is_empty() {
            self.state
                .write()
                .await
                .update_flow_variables(flow_id, runtime_vars);
        }

        let final_state = {
            let mut mgr = self.state.write().await;
            match outcome {
                RunOutcome::Stopped => mgr.stop_flow(flow_id),
                RunOutcome::Finished { any_failed } => mgr.complete_flow(flow_id, !any_failed),
                RunOutcome::TimedOut => mgr.complete_flow(flow_id, false),
            }
        };
        self.stop_flags.write().await.remove(flow_id);

        // A concurrent caller may have finished the flow through the manager;
        // fall back to whatever terminal state it recorded.
        let state = match final_state {
            Some(state) => state,
            None => self
                .state
                .read()
                .await
                .get_flow_state(flow_id)
                .ok_or_else(|| FlowError::StepExecution {
                    step_id: flow_id.to_string(),
                    message: "flow state vanished before completion".to_string(),
                })?,
        };

        Ok(build_report(state, started.elapsed()))
    }

    async fn run_steps(
        &self,
        flow_id: &str,
        steps: &[FlowStep],
        config: &FlowConfig,
        stop_flag: &Arc<AtomicBool>,
    ) -> RunOutcome {
        if config.parallel {
            self.run_parallel(flow_id, steps, config, stop_flag).await
        } else {
            self.run_sequential(flow_id, steps, config, stop_flag).await
        }
    }

    /// Strict list-order execution. Each step sees all prior steps' outputs.
    async fn run_sequential(
        &self,
        flow_id: &str,
        steps: &[FlowStep],
        config: &FlowConfig,
        stop_flag: &Arc<AtomicBool>,
    ) -> RunOutcome {
        let mut any_failed = false;

        for step in steps {
            if stop_flag.load(Ordering::SeqCst) {
                return RunOutcome::Stopped;
            }

            let result = self.execute_step(step, false).await;
            let success = result.success;
            self.record_result(flow_id, result).await;

            if !success {
                any_failed = true;
                if config.stop_on_error {
                    debug!(flow_id, step_id = %step.id, "halting flow on step failure");
                    break;
                }
            }
        }

        RunOutcome::Finished { any_failed }
    }

    /// Bounded-concurrency execution. Admission is a counting semaphore;
    /// after a failure under `stop_on_error` no new step is dispatched, but
    /// in-flight steps finish.
    async fn run_parallel(
        &self,
        flow_id: &str,
        steps: &[FlowStep],
        config: &FlowConfig,
        stop_flag: &Arc<AtomicBool>,
    ) -> RunOutcome {
        let semaphore = Arc::new(Semaphore::new(config.max_concurrency));
        let halt = Arc::new(AtomicBool::new(false));

        let step_futures = steps.iter().map(|step| {
            let semaphore = Arc::clone(&semaphore);
            let stop_flag = Arc::clone(stop_flag);
            let halt = Arc::clone(&halt);
            async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return None,
                };
                if stop_flag.load(Ordering::SeqCst) || halt.load(Ordering::SeqCst) {
                    debug!(flow_id, step_id = %step.id, "step skipped: flow halted");
                    return None;
                }

                let result = self.execute_step(step, true).await;
                if !result.success && config.stop_on_error {
                    halt.store(true, Ordering::SeqCst);
                }
                let success = result.success;
                self.record_result(flow_id, result).await;
                Some(success)
            }
        });

        let outcomes = futures::future::join_all(step_futures).await;

        if stop_flag.load(Ordering::SeqCst) {
            return RunOutcome::Stopped;
        }
        let any_failed = outcomes.iter().flatten().any(|success| !success);
        RunOutcome::Finished { any_failed }
    }

    async fn record_result(&self, flow_id: &str, result: StepResult) {
        let mut mgr = self.state.write().await;
        if let Some(error) = &result.error {
            mgr.add_flow_error(flow_id, format!("step '{}': {}", result.step_id, error));
        }
        mgr.add_step_result(flow_id, result);
    }

    /// Materialize and execute one step.
    ///
    /// In parallel mode, `step.*` references are exempt from fail-fast
    /// validation: a concurrent step's output may legitimately not exist
    /// yet, and such references pass through verbatim instead of blocking.
    async fn execute_step(&self, step: &FlowStep, parallel: bool) -> StepResult {
        let started = Instant::now();

        let merged = match self.merge_endpoint(step).await {
            Ok(merged) => merged,
            Err(message) => {
                return failed_result(step, fallback_request(step), started, message);
            }
        };

        // Headers resolve first so the `header` scope covers this step's
        // in-flight request for url/body references.
        let resolved_headers: HashMap<String, String> = {
            let session = self.session.read().await;
            let ctx = InterpolationContext::new(&session).with_step(&step.id);
            merged
                .headers
                .iter()
                .map(|(k, v)| (k.clone(), interpolate::resolve_text(v, &ctx)))
                .collect()
        };
        self.session
            .write()
            .await
            .set_current_headers(resolved_headers.clone());

        let (request, validation) = {
            let session = self.session.read().await;
            let ctx = InterpolationContext::new(&session).with_step(&step.id);

            let mut references = interpolate::extract_references(&merged.url);
            for value in merged.headers.values() {
                references.extend(interpolate::extract_references(value));
            }
            if let Some(body) = &merged.body {
                references.extend(interpolate::extract_value_references(body));
            }
            if parallel {
                references.retain(|r| {
                    !r.trim_start_matches("{{").starts_with("step.")
                });
            }
            let validation = interpolate::validate_references(&references, &ctx);

            let request = MaterializedRequest {
                method: merged.method.clone(),
                url: interpolate::resolve_text(&merged.url, &ctx),
                headers: resolved_headers,
                body: merged
                    .body
                    .as_ref()
                    .map(|body| interpolate::resolve_value(body, &ctx)),
            };
            (request, validation)
        };

        if !validation.is_clean() {
            self.session.write().await.clear_current_headers();
            let detail = validation
                .invalid
                .iter()
                .map(|inv| format!("{} ({})", inv.reference, inv.error))
                .collect::<Vec<_>>()
                .join(", ");
            return failed_result(
                step,
                request,
                started,
                format!("unresolved references: {}", detail),
            );
        }

        let timeout = merged.timeout_ms.map(Duration::from_millis);
        let outcome = self.runner.execute(&request, timeout).await;
        self.session.write().await.clear_current_headers();

        match outcome {
            Ok(response) => {
                let success = match step.expected_status {
                    Some(expected) => response.status == expected,
                    None => response.is_success(),
                };
                // The raw response is recorded even on status mismatch so
                // later steps can still reference it.
                if let Ok(output) = serde_json::to_value(&response) {
                    self.session
                        .write()
                        .await
                        .record_step_output(step.id.as_str(), output);
                }
                let error = if success {
                    None
                } else {
                    Some(match step.expected_status {
                        Some(expected) => format!(
                            "expected status {}, got {}",
                            expected, response.status
                        ),
                        None => format!("unexpected status {}", response.status),
                    })
                };
                StepResult {
                    step_id: step.id.clone(),
                    step_name: step.name.clone(),
                    success,
                    execution_time_ms: started.elapsed().as_millis() as u64,
                    request,
                    response: Some(response),
                    error,
                }
            }
            Err(err) => StepResult {
                step_id: step.id.clone(),
                step_name: step.name.clone(),
                success: false,
                execution_time_ms: started.elapsed().as_millis() as u64,
                request,
                response: None,
                error: Some(err.to_string()),
            },
        }
    }

    /// Combine a step with its referenced endpoint; inline fields win
    async fn merge_endpoint(&self, step: &FlowStep) -> std::result::Result<MergedStep, String> {
        let endpoint = match &step.endpoint_id {
            Some(endpoint_id) => Some(
                self.endpoints
                    .read()
                    .await
                    .get(endpoint_id)
                    .cloned()
                    .ok_or_else(|| format!("unknown endpoint '{}'", endpoint_id))?,
            ),
            None => None,
        };

        let method = step
            .method
            .clone()
            .or_else(|| endpoint.as_ref().map(|e| e.method.clone()))
            .ok_or_else(|| format!("step '{}' has no method", step.id))?;
        let url = step
            .url
            .clone()
            .or_else(|| endpoint.as_ref().map(|e| e.url.clone()))
            .ok_or_else(|| format!("step '{}' has no url", step.id))?;

        let mut headers = endpoint
            .as_ref()
            .and_then(|e| e.headers.clone())
            .unwrap_or_default();
        if let Some(step_headers) = &step.headers {
            headers.extend(step_headers.clone());
        }

        let body = step
            .body
            .clone()
            .or_else(|| endpoint.as_ref().and_then(|e| e.body.clone()));
        let timeout_ms = step
            .timeout_ms
            .or_else(|| endpoint.as_ref().and_then(|e| e.timeout_ms));

        Ok(MergedStep {
            method,
            url,
            headers,
            body,
            timeout_ms,
        })
    }

    /// Record deadline errors for every step without a result
    async fn record_timeout(&self, flow_id: &str, steps: &[FlowStep], deadline_ms: u64) {
        let mut mgr = self.state.write().await;
        let attempted: HashSet<String> = mgr
            .get_flow_state(flow_id)
            .map(|state| state.results.iter().map(|r| r.step_id.clone()).collect())
            .unwrap_or_default();

        mgr.add_flow_error(flow_id, format!("flow deadline of {} ms exceeded", deadline_ms));
        for step in steps {
            if !attempted.contains(&step.id) {
                mgr.add_flow_error(
                    flow_id,
                    format!("step '{}' did not complete before the flow deadline", step.id),
                );
            }
        }
    }
}

fn fallback_request(step: &FlowStep) -> MaterializedRequest {
    MaterializedRequest {
        method: step.method.clone().unwrap_or_default(),
        url: step.url.clone().unwrap_or_default(),
        headers: step.headers.clone().unwrap_or_default(),
        body: step.body.clone(),
    }
}

fn failed_result(
    step: &FlowStep,
    request: MaterializedRequest,
    started: Instant,
    message: String,
) -> StepResult {
    StepResult {
        step_id: step.id.clone(),
        step_name: step.name.clone(),
        success: false,
        execution_time_ms: started.elapsed().as_millis() as u64,
        request,
        response: None,
        error: Some(message),
    }
}

fn build_report(state: FlowState, elapsed: Duration) -> ExecutionReport {
    let completed_steps = state.results.iter().filter(|r| r.success).count();
    let failed_steps = state.results.len() - completed_steps;
    ExecutionReport {
        flow_id: state.id.clone(),
        status: state.status,
        total_steps: state.total_steps,
        completed_steps,
        failed_steps,
        execution_time_ms: state
            .execution_time_ms
            .unwrap_or(elapsed.as_millis() as u64),
        results: state.results,
        errors: state.errors,
    }
}
