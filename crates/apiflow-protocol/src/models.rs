use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Lifecycle status of a flow execution
///
/// The only legal transitions are `Idle -> Running` and
/// `Running -> {Completed, Failed, Stopped}`. The three right-hand states are
/// terminal: once reached, the flow record only moves into history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FlowStatus {
    /// Created but not yet started
    Idle,
    /// Steps are being executed
    Running,
    /// All attempted steps succeeded
    Completed,
    /// At least one step failed, or the flow timed out
    Failed,
    /// Execution was cancelled by an external caller
    Stopped,
}

impl FlowStatus {
    /// Whether this status accepts no further mutation except archival
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowStatus::Completed | FlowStatus::Failed | FlowStatus::Stopped
        )
    }
}

impl std::fmt::Display for FlowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FlowStatus::Idle => write!(f, "idle"),
            FlowStatus::Running => write!(f, "running"),
            FlowStatus::Completed => write!(f, "completed"),
            FlowStatus::Failed => write!(f, "failed"),
            FlowStatus::Stopped => write!(f, "stopped"),
        }
    }
}

/// A single HTTP step within a flow
///
/// A step either references a pre-registered [`Endpoint`] by id or carries an
/// inline request definition. Inline fields win over endpoint defaults when
/// both are present. Steps are immutable once a flow begins.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FlowStep {
    /// Unique identifier within the flow; later steps reference outputs as
    /// `{{step.<id>.<path>}}`
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Reference to a pre-registered endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_id: Option<String>,
    /// HTTP method (e.g. "GET", "POST")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Request URL, may contain `{{scope.path}}` references
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Request headers, values may contain references
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    /// Request body, string leaves may contain references
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Per-step timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Exact status code required for the step to count as successful.
    /// When unset, any 2xx status is accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_status: Option<u16>,
}

impl FlowStep {
    /// Create an inline step with the given method and URL
    pub fn new(id: impl Into<String>, method: impl Into<String>, url: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            endpoint_id: None,
            method: Some(method.into()),
            url: Some(url.into()),
            headers: None,
            body: None,
            timeout_ms: None,
            expected_status: None,
        }
    }

    /// Create an inline GET step
    pub fn get(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self::new(id, "GET", url)
    }

    /// Create a step referencing a registered endpoint
    pub fn from_endpoint(id: impl Into<String>, endpoint_id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            endpoint_id: Some(endpoint_id.into()),
            method: None,
            url: None,
            headers: None,
            body: None,
            timeout_ms: None,
            expected_status: None,
        }
    }

    /// Set the human-readable name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the request body
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Set a request header
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Require an exact response status for success
    pub fn with_expected_status(mut self, status: u16) -> Self {
        self.expected_status = Some(status);
        self
    }
}

/// Execution policy for one flow run
///
/// Immutable for the duration of the run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FlowConfig {
    /// Deadline for the whole flow in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Halt on the first failed step (sequential) or stop dispatching new
    /// steps after a failure (parallel)
    #[serde(default = "default_stop_on_error")]
    pub stop_on_error: bool,
    /// Execute steps concurrently instead of in list order
    #[serde(default)]
    pub parallel: bool,
    /// Upper bound on simultaneously in-flight steps in parallel mode
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_stop_on_error() -> bool {
    true
}

fn default_max_concurrency() -> usize {
    1
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            stop_on_error: default_stop_on_error(),
            parallel: false,
            max_concurrency: default_max_concurrency(),
        }
    }
}

impl FlowConfig {
    /// Policy for parallel execution with the given concurrency bound
    pub fn parallel(max_concurrency: usize) -> Self {
        Self {
            parallel: true,
            max_concurrency,
            ..Self::default()
        }
    }

    /// Set the whole-flow deadline
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the error-stop policy
    pub fn with_stop_on_error(mut self, stop: bool) -> Self {
        self.stop_on_error = stop;
        self
    }
}

/// The request actually sent to the step runner after interpolation
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MaterializedRequest {
    /// HTTP method
    pub method: String,
    /// Fully interpolated URL
    pub url: String,
    /// Interpolated headers
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Interpolated body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// The raw response returned by the step runner
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Response body, parsed as JSON when possible, else a string
    pub body: Value,
    /// Wall-clock time of the network call in milliseconds
    pub elapsed_ms: u64,
}

impl StepResponse {
    /// Whether the status code is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Outcome of one step attempt
///
/// Appended exactly once per attempt and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct StepResult {
    /// Step identifier
    pub step_id: String,
    /// Step name at execution time
    pub step_name: String,
    /// Whether the step succeeded
    pub success: bool,
    /// Wall-clock execution time in milliseconds
    pub execution_time_ms: u64,
    /// The request actually sent
    pub request: MaterializedRequest,
    /// The raw response, if the runner returned one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<StepResponse>,
    /// Error description for failed steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Lifecycle record of one flow execution
///
/// Created in [`FlowStatus::Idle`], mutated only by the flow state manager,
/// and moved into bounded history on reaching a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FlowState {
    /// Flow identifier
    pub id: String,
    /// Current lifecycle status
    pub status: FlowStatus,
    /// Index of the step being executed; meaningful only while running
    pub current_step: usize,
    /// Number of steps in the flow definition
    pub total_steps: usize,
    /// When the flow entered `Running`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    /// When the flow reached a terminal status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Total execution time in milliseconds, set on termination
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    /// Snapshot of flow-scoped runtime variables
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    /// Ordered per-step outcomes
    #[serde(default)]
    pub results: Vec<StepResult>,
    /// Ordered error messages accumulated during the run
    #[serde(default)]
    pub errors: Vec<String>,
}

impl FlowState {
    /// Allocate a fresh record in `Idle` for a flow with `total_steps` steps
    pub fn new(id: impl Into<String>, total_steps: usize) -> Self {
        Self {
            id: id.into(),
            status: FlowStatus::Idle,
            current_step: 0,
            total_steps,
            start_time: None,
            end_time: None,
            execution_time_ms: None,
            variables: HashMap::new(),
            results: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// What a caller receives once a flow reaches a terminal state
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecutionReport {
    /// Flow identifier
    pub flow_id: String,
    /// Terminal status of the run
    pub status: FlowStatus,
    /// Number of steps in the definition
    pub total_steps: usize,
    /// Steps that completed successfully
    pub completed_steps: usize,
    /// Steps that were attempted and failed
    pub failed_steps: usize,
    /// Total elapsed time in milliseconds
    pub execution_time_ms: u64,
    /// Ordered per-step outcomes for every attempted step
    pub results: Vec<StepResult>,
    /// Error messages accumulated during the run
    pub errors: Vec<String>,
}

/// A named, registerable flow: ordered steps plus execution policy
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FlowDefinition {
    /// Unique identifier
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Ordered step list
    pub steps: Vec<FlowStep>,
    /// Execution policy
    #[serde(default)]
    pub config: FlowConfig,
}

/// Aggregated lifecycle counters, derived from live and historical state
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct FlowStats {
    /// Live (non-terminal) flows
    pub active: usize,
    /// Historical flows that completed successfully
    pub completed: usize,
    /// Historical flows that failed
    pub failed: usize,
    /// Historical flows that were stopped externally
    pub stopped: usize,
    /// Lifetime count of flows that reached a terminal state
    pub total_executions: usize,
}

/// Result of structural flow validation, produced without mutating any state
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FlowValidation {
    /// Whether the flow may be executed
    pub valid: bool,
    /// Problems that prevent execution
    pub errors: Vec<String>,
    /// Non-fatal observations (e.g. unresolvable-looking references)
    pub warnings: Vec<String>,
}

/// A project grouping folders and endpoints on the remote backend
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Project {
    /// Unique ID assigned by the backend
    pub id: String,
    /// Project name
    pub name: String,
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Timestamp of creation
    pub created_at: DateTime<Utc>,
    /// Timestamp of last update
    pub updated_at: DateTime<Utc>,
}

/// A folder within a project
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Folder {
    /// Unique ID assigned by the backend
    pub id: String,
    /// Owning project
    pub project_id: String,
    /// Folder name
    pub name: String,
    /// Parent folder for nesting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

/// A reusable HTTP request definition registered on the backend
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Endpoint {
    /// Unique ID assigned by the backend
    pub id: String,
    /// Owning project
    pub project_id: String,
    /// Containing folder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    /// Endpoint name
    pub name: String,
    /// HTTP method
    pub method: String,
    /// Request URL, may contain `{{scope.path}}` references
    pub url: String,
    /// Default headers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    /// Default body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Default per-request timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// A named set of string variables, exposed to flows via the `env` scope
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Environment {
    /// Unique ID assigned by the backend
    pub id: String,
    /// Owning project, if project-scoped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Environment name
    pub name: String,
    /// Variable map
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

/// Fields accepted when creating or replacing a project
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProjectDraft {
    /// Project name
    pub name: String,
    /// Optional description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Fields accepted when creating or replacing a folder
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct FolderDraft {
    /// Owning project
    pub project_id: String,
    /// Folder name
    pub name: String,
    /// Parent folder for nesting
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

/// Fields accepted when creating or replacing an endpoint
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EndpointDraft {
    /// Owning project
    pub project_id: String,
    /// Containing folder
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub folder_id: Option<String>,
    /// Endpoint name
    pub name: String,
    /// HTTP method
    pub method: String,
    /// Request URL
    pub url: String,
    /// Default headers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    /// Default body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Default per-request timeout in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

/// Fields accepted when creating or replacing an environment
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EnvironmentDraft {
    /// Owning project, if project-scoped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    /// Environment name
    pub name: String,
    /// Variable map
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

/// Definition of a callable tool exposed to AI assistants
///
/// Tools are functions the assistant can call to proxy backend operations
/// or drive flow execution.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ToolDefinition {
    /// Unique name of the tool
    pub name: String,
    /// Human-readable description of what the tool does
    pub description: String,
    /// JSON Schema defining the tool's input parameters
    pub input_schema: Value,
}
