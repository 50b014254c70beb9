//! Per-session scoped variable store
//!
//! One [`SessionState`] exists per client session. It holds the layered
//! scopes consulted during interpolation: flow inputs, environment
//! variables, runtime variables, step outputs, read-only config, and the
//! headers of the step currently in flight. All mutation goes through the
//! accessor methods; values are opaque [`Value`]s until interpolation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// The closed set of variable namespaces recognized by the interpolator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Flow inputs, set once per flow invocation (`{{input.*}}`)
    Input,
    /// Externally supplied environment variables (`{{env.*}}`)
    Env,
    /// Runtime variables mutated during execution (`{{runtime.*}}`)
    Runtime,
    /// Read-only configuration (`{{config.*}}`)
    Config,
    /// Headers of the step currently executing (`{{header.*}}`)
    Header,
    /// Prior step outputs (`{{step.<id>.*}}`)
    Step,
}

impl Scope {
    /// Canonical lowercase name used in references
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Input => "input",
            Scope::Env => "env",
            Scope::Runtime => "runtime",
            Scope::Config => "config",
            Scope::Header => "header",
            Scope::Step => "step",
        }
    }
}

impl FromStr for Scope {
    type Err = ();

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "input" => Ok(Scope::Input),
            "env" => Ok(Scope::Env),
            "runtime" => Ok(Scope::Runtime),
            "config" => Ok(Scope::Config),
            "header" => Ok(Scope::Header),
            "step" => Ok(Scope::Step),
            _ => Err(()),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable copy of a session's scopes, for diagnostics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Flow inputs
    pub flow_inputs: HashMap<String, Value>,
    /// Environment variables
    pub environment: HashMap<String, String>,
    /// Runtime variables
    pub runtime_vars: HashMap<String, Value>,
    /// Step outputs keyed by step id
    pub step_outputs: HashMap<String, Value>,
    /// Read-only configuration
    pub config: HashMap<String, Value>,
    /// Headers of the in-flight step, if any
    pub current_headers: Option<HashMap<String, String>>,
    /// Last time any scope was written
    pub last_activity: DateTime<Utc>,
}

/// Scoped variable state for one client session
#[derive(Debug)]
pub struct SessionState {
    flow_inputs: HashMap<String, Value>,
    environment: HashMap<String, String>,
    runtime_vars: HashMap<String, Value>,
    step_outputs: HashMap<String, Value>,
    config: HashMap<String, Value>,
    current_headers: Option<HashMap<String, String>>,
    current_flow_id: Option<String>,
    last_activity: DateTime<Utc>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            flow_inputs: HashMap::new(),
            environment: HashMap::new(),
            runtime_vars: HashMap::new(),
            step_outputs: HashMap::new(),
            config: HashMap::new(),
            current_headers: None,
            current_flow_id: None,
            last_activity: Utc::now(),
        }
    }
}

impl SessionState {
    /// Create an empty session
    pub fn new() -> Self {
        Self::default()
    }

    fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Look up a key in the given scope.
    ///
    /// For the `step` scope, `key` is a step id and the whole recorded output
    /// is returned; deeper navigation is the interpolator's job.
    pub fn get(&self, scope: Scope, key: &str) -> Option<Value> {
        match scope {
            Scope::Input => self.flow_inputs.get(key).cloned(),
            Scope::Env => self.environment.get(key).cloned().map(Value::String),
            Scope::Runtime => self.runtime_vars.get(key).cloned(),
            Scope::Config => self.config.get(key).cloned(),
            Scope::Header => self
                .current_headers
                .as_ref()
                .and_then(|h| h.get(key))
                .cloned()
                .map(Value::String),
            Scope::Step => self.step_outputs.get(key).cloned(),
        }
    }

    /// Write a key into the given scope.
    ///
    /// String-typed scopes (`env`, `header`) coerce non-string values to
    /// their JSON text. Updates `last_activity`.
    pub fn set(&mut self, scope: Scope, key: impl Into<String>, value: Value) {
        let key = key.into();
        match scope {
            Scope::Input => {
                self.flow_inputs.insert(key, value);
            }
            Scope::Env => {
                self.environment.insert(key, value_to_text(&value));
            }
            Scope::Runtime => {
                self.runtime_vars.insert(key, value);
            }
            Scope::Config => {
                self.config.insert(key, value);
            }
            Scope::Header => {
                self.current_headers
                    .get_or_insert_with(HashMap::new)
                    .insert(key, value_to_text(&value));
            }
            Scope::Step => {
                self.step_outputs.insert(key, value);
            }
        }
        self.touch();
    }

    /// Remove every key from the given scope
    pub fn clear(&mut self, scope: Scope) {
        match scope {
            Scope::Input => self.flow_inputs.clear(),
            Scope::Env => self.environment.clear(),
            Scope::Runtime => self.runtime_vars.clear(),
            Scope::Config => self.config.clear(),
            Scope::Header => self.current_headers = None,
            Scope::Step => self.step_outputs.clear(),
        }
        self.touch();
    }

    /// Install flow inputs and re-key the step-output scope for a new run.
    ///
    /// `step_outputs` is flow-scoped: outputs from an earlier, unrelated flow
    /// must never satisfy a later flow's references.
    pub fn begin_flow(&mut self, flow_id: impl Into<String>, inputs: HashMap<String, Value>) {
        let flow_id = flow_id.into();
        debug!(flow_id = %flow_id, inputs = inputs.len(), "beginning flow scope");
        self.flow_inputs = inputs;
        self.step_outputs.clear();
        self.current_headers = None;
        self.current_flow_id = Some(flow_id);
        self.touch();
    }

    /// Record one step's raw output for later `{{step.<id>.*}}` references
    pub fn record_step_output(&mut self, step_id: impl Into<String>, output: Value) {
        self.step_outputs.insert(step_id.into(), output);
        self.touch();
    }

    /// Install the headers of the step about to execute
    pub fn set_current_headers(&mut self, headers: HashMap<String, String>) {
        self.current_headers = Some(headers);
        self.touch();
    }

    /// Drop the in-flight step headers
    pub fn clear_current_headers(&mut self) {
        self.current_headers = None;
        self.touch();
    }

    /// Merge externally supplied environment variables
    pub fn seed_environment(&mut self, vars: HashMap<String, String>) {
        self.environment.extend(vars);
        self.touch();
    }

    /// Merge read-only configuration values
    pub fn seed_config(&mut self, values: HashMap<String, Value>) {
        self.config.extend(values);
        self.touch();
    }

    /// Id of the flow currently owning the step-output scope
    pub fn current_flow_id(&self) -> Option<&str> {
        self.current_flow_id.as_deref()
    }

    /// Last time any scope was written; consumed by idle-session cleanup
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    /// Number of keys in a scope, for diagnostics
    pub fn scope_len(&self, scope: Scope) -> usize {
        match scope {
            Scope::Input => self.flow_inputs.len(),
            Scope::Env => self.environment.len(),
            Scope::Runtime => self.runtime_vars.len(),
            Scope::Config => self.config.len(),
            Scope::Header => self.current_headers.as_ref().map_or(0, |h| h.len()),
            Scope::Step => self.step_outputs.len(),
        }
    }

    /// Keys present in a scope, for diagnostics
    pub fn scope_keys(&self, scope: Scope) -> Vec<String> {
        match scope {
            Scope::Input => self.flow_inputs.keys().cloned().collect(),
            Scope::Env => self.environment.keys().cloned().collect(),
            Scope::Runtime => self.runtime_vars.keys().cloned().collect(),
            Scope::Config => self.config.keys().cloned().collect(),
            Scope::Header => self
                .current_headers
                .as_ref()
                .map(|h| h.keys().cloned().collect())
                .unwrap_or_default(),
            Scope::Step => self.step_outputs.keys().cloned().collect(),
        }
    }

    /// Snapshot of the runtime variable scope
    pub fn runtime_vars(&self) -> HashMap<String, Value> {
        self.runtime_vars.clone()
    }

    /// Immutable copy of all scopes
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            flow_inputs: self.flow_inputs.clone(),
            environment: self.environment.clone(),
            runtime_vars: self.runtime_vars.clone(),
            step_outputs: self.step_outputs.clone(),
            config: self.config.clone(),
            current_headers: self.current_headers.clone(),
            last_activity: self.last_activity,
        }
    }
}

/// Coerce a JSON value to header/env text: strings stay raw, everything else
/// becomes its JSON representation
fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Cheaply clonable handle owning a [`SessionState`]
///
/// All components share the session through this handle; the state itself is
/// mutated only via the accessors.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<SessionState>>,
}

impl SessionStore {
    /// Create a store around an empty session
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire a read guard for interpolation-time access
    pub async fn read(&self) -> RwLockReadGuard<'_, SessionState> {
        self.inner.read().await
    }

    /// Acquire a write guard for accessor-mediated mutation
    pub async fn write(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.inner.write().await
    }

    /// Look up a key in the given scope
    pub async fn get(&self, scope: Scope, key: &str) -> Option<Value> {
        self.inner.read().await.get(scope, key)
    }

    /// Write a key into the given scope
    pub async fn set(&self, scope: Scope, key: impl Into<String>, value: Value) {
        self.inner.write().await.set(scope, key, value);
    }

    /// Remove every key from the given scope
    pub async fn clear(&self, scope: Scope) {
        self.inner.write().await.clear(scope);
    }

    /// Install flow inputs and reset the step-output scope
    pub async fn begin_flow(&self, flow_id: impl Into<String>, inputs: HashMap<String, Value>) {
        self.inner.write().await.begin_flow(flow_id, inputs);
    }

    /// Immutable copy of all scopes
    pub async fn snapshot(&self) -> SessionSnapshot {
        self.inner.read().await.snapshot()
    }
}
