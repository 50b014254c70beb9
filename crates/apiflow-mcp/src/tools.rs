//! Tool handlers exposed to AI assistants
//!
//! Two families of tools are registered:
//! - CRUD proxies that forward project/folder/endpoint/environment
//!   operations to the remote backend
//! - Flow tools that define, validate, run, inspect, and stop flows

use anyhow::anyhow;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::registry::{ToolError, ToolRegistry};
use apiflow_backend::BackendClient;
use apiflow_flow::{
    build_variable_summary, FlowExecutor, FlowStateManager, InterpolationContext, Scope,
};
use apiflow_protocol::models::{
    EndpointDraft, EnvironmentDraft, FlowDefinition, FolderDraft, ProjectDraft, ToolDefinition,
};

/// Shared collaborators handed to every tool handler
#[derive(Clone)]
pub struct ToolContext {
    /// Client for the fixed remote backend
    pub backend: Arc<BackendClient>,
    /// The flow engine for this session
    pub executor: FlowExecutor,
    /// Flow definitions registered via `flow_define` or the file loader
    pub flows: Arc<RwLock<HashMap<String, FlowDefinition>>>,
}

impl ToolContext {
    /// Create a context over the given collaborators
    pub fn new(backend: Arc<BackendClient>, executor: FlowExecutor) -> Self {
        Self {
            backend,
            executor,
            flows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Pre-register a flow definition (used by the file loader)
    pub async fn add_flow(&self, definition: FlowDefinition) {
        self.flows
            .write()
            .await
            .insert(definition.id.clone(), definition);
    }
}

fn definition(name: &str, description: &str, input_schema: Value) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

fn id_schema() -> Value {
    json!({
        "type": "object",
        "properties": { "id": { "type": "string" } },
        "required": ["id"]
    })
}

fn require_id(args: &Value) -> anyhow::Result<String> {
    args.get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("missing 'id'"))
}

/// Register the full tool surface on the given registry
pub async fn register_all(registry: &ToolRegistry, ctx: &ToolContext) -> Result<(), ToolError> {
    register_project_tools(registry, ctx).await?;
    register_folder_tools(registry, ctx).await?;
    register_endpoint_tools(registry, ctx).await?;
    register_environment_tools(registry, ctx).await?;
    register_flow_tools(registry, ctx).await?;
    register_session_tools(registry, ctx).await?;
    info!("registered {} tools", registry.list_tools().await.len());
    Ok(())
}

async fn register_project_tools(
    registry: &ToolRegistry,
    ctx: &ToolContext,
) -> Result<(), ToolError> {
    let backend = Arc::clone(&ctx.backend);
    registry
        .register(
            definition(
                "project_list",
                "List all projects on the backend",
                json!({ "type": "object", "properties": {} }),
            ),
            Box::new(move |_args| {
                let backend = Arc::clone(&backend);
                Box::pin(async move {
                    let projects = backend.list_projects().await?;
                    Ok(serde_json::to_value(projects)?)
                })
            }),
        )
        .await?;

    let backend = Arc::clone(&ctx.backend);
    registry
        .register(
            definition(
                "project_create",
                "Create a project",
                json!({
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "description": { "type": "string" }
                    },
                    "required": ["name"]
                }),
            ),
            Box::new(move |args| {
                let backend = Arc::clone(&backend);
                Box::pin(async move {
                    let draft: ProjectDraft = serde_json::from_value(args)?;
                    let project = backend.create_project(&draft).await?;
                    Ok(serde_json::to_value(project)?)
                })
            }),
        )
        .await?;

    let backend = Arc::clone(&ctx.backend);
    registry
        .register(
            definition(
                "project_update",
                "Replace a project's fields",
                json!({
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "name": { "type": "string" },
                        "description": { "type": "string" }
                    },
                    "required": ["id", "name"]
                }),
            ),
            Box::new(move |args| {
                let backend = Arc::clone(&backend);
                Box::pin(async move {
                    let id = require_id(&args)?;
                    let draft: ProjectDraft = serde_json::from_value(args)?;
                    let project = backend.update_project(&id, &draft).await?;
                    Ok(serde_json::to_value(project)?)
                })
            }),
        )
        .await?;

    let backend = Arc::clone(&ctx.backend);
    registry
        .register(
            definition("project_delete", "Delete a project", id_schema()),
            Box::new(move |args| {
                let backend = Arc::clone(&backend);
                Box::pin(async move {
                    let id = require_id(&args)?;
                    backend.delete_project(&id).await?;
                    Ok(json!({ "deleted": id }))
                })
            }),
        )
        .await?;

    Ok(())
}

async fn register_folder_tools(
    registry: &ToolRegistry,
    ctx: &ToolContext,
) -> Result<(), ToolError> {
    let backend = Arc::clone(&ctx.backend);
    registry
        .register(
            definition(
                "folder_list",
                "List all folders on the backend",
                json!({ "type": "object", "properties": {} }),
            ),
            Box::new(move |_args| {
                let backend = Arc::clone(&backend);
                Box::pin(async move {
                    let folders = backend.list_folders().await?;
                    Ok(serde_json::to_value(folders)?)
                })
            }),
        )
        .await?;

    let backend = Arc::clone(&ctx.backend);
    registry
        .register(
            definition(
                "folder_create",
                "Create a folder in a project",
                json!({
                    "type": "object",
                    "properties": {
                        "project_id": { "type": "string" },
                        "name": { "type": "string" },
                        "parent_id": { "type": "string" }
                    },
                    "required": ["project_id", "name"]
                }),
            ),
            Box::new(move |args| {
                let backend = Arc::clone(&backend);
                Box::pin(async move {
                    let draft: FolderDraft = serde_json::from_value(args)?;
                    let folder = backend.create_folder(&draft).await?;
                    Ok(serde_json::to_value(folder)?)
                })
            }),
        )
        .await?;

    let backend = Arc::clone(&ctx.backend);
    registry
        .register(
            definition(
                "folder_update",
                "Replace a folder's fields",
                json!({
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "project_id": { "type": "string" },
                        "name": { "type": "string" },
                        "parent_id": { "type": "string" }
                    },
                    "required": ["id", "project_id", "name"]
                }),
            ),
            Box::new(move |args| {
                let backend = Arc::clone(&backend);
                Box::pin(async move {
                    let id = require_id(&args)?;
                    let draft: FolderDraft = serde_json::from_value(args)?;
                    let folder = backend.update_folder(&id, &draft).await?;
                    Ok(serde_json::to_value(folder)?)
                })
            }),
        )
        .await?;

    let backend = Arc::clone(&ctx.backend);
    registry
        .register(
            definition("folder_delete", "Delete a folder", id_schema()),
            Box::new(move |args| {
                let backend = Arc::clone(&backend);
                Box::pin(async move {
                    let id = require_id(&args)?;
                    backend.delete_folder(&id).await?;
                    Ok(json!({ "deleted": id }))
                })
            }),
        )
        .await?;

    Ok(())
}

async fn register_endpoint_tools(
    registry: &ToolRegistry,
    ctx: &ToolContext,
) -> Result<(), ToolError> {
    let backend = Arc::clone(&ctx.backend);
    registry
        .register(
            definition(
                "endpoint_list",
                "List all registered endpoints",
                json!({ "type": "object", "properties": {} }),
            ),
            Box::new(move |_args| {
                let backend = Arc::clone(&backend);
                Box::pin(async move {
                    let endpoints = backend.list_endpoints().await?;
                    Ok(serde_json::to_value(endpoints)?)
                })
            }),
        )
        .await?;

    let backend = Arc::clone(&ctx.backend);
    registry
        .register(
            definition(
                "endpoint_create",
                "Create a reusable endpoint definition",
                json!({
                    "type": "object",
                    "properties": {
                        "project_id": { "type": "string" },
                        "folder_id": { "type": "string" },
                        "name": { "type": "string" },
                        "method": { "type": "string" },
                        "url": { "type": "string" },
                        "headers": { "type": "object" },
                        "body": {},
                        "timeout_ms": { "type": "integer" }
                    },
                    "required": ["project_id", "name", "method", "url"]
                }),
            ),
            Box::new(move |args| {
                let backend = Arc::clone(&backend);
                Box::pin(async move {
                    let draft: EndpointDraft = serde_json::from_value(args)?;
                    let endpoint = backend.create_endpoint(&draft).await?;
                    Ok(serde_json::to_value(endpoint)?)
                })
            }),
        )
        .await?;

    let backend = Arc::clone(&ctx.backend);
    registry
        .register(
            definition(
                "endpoint_update",
                "Replace an endpoint definition",
                json!({
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "project_id": { "type": "string" },
                        "name": { "type": "string" },
                        "method": { "type": "string" },
                        "url": { "type": "string" },
                        "headers": { "type": "object" },
                        "body": {},
                        "timeout_ms": { "type": "integer" }
                    },
                    "required": ["id", "project_id", "name", "method", "url"]
                }),
            ),
            Box::new(move |args| {
                let backend = Arc::clone(&backend);
                Box::pin(async move {
                    let id = require_id(&args)?;
                    let draft: EndpointDraft = serde_json::from_value(args)?;
                    let endpoint = backend.update_endpoint(&id, &draft).await?;
                    Ok(serde_json::to_value(endpoint)?)
                })
            }),
        )
        .await?;

    let backend = Arc::clone(&ctx.backend);
    registry
        .register(
            definition("endpoint_delete", "Delete an endpoint", id_schema()),
            Box::new(move |args| {
                let backend = Arc::clone(&backend);
                Box::pin(async move {
                    let id = require_id(&args)?;
                    backend.delete_endpoint(&id).await?;
                    Ok(json!({ "deleted": id }))
                })
            }),
        )
        .await?;

    Ok(())
}

async fn register_environment_tools(
    registry: &ToolRegistry,
    ctx: &ToolContext,
) -> Result<(), ToolError> {
    let backend = Arc::clone(&ctx.backend);
    registry
        .register(
            definition(
                "environment_list",
                "List all environments",
                json!({ "type": "object", "properties": {} }),
            ),
            Box::new(move |_args| {
                let backend = Arc::clone(&backend);
                Box::pin(async move {
                    let environments = backend.list_environments().await?;
                    Ok(serde_json::to_value(environments)?)
                })
            }),
        )
        .await?;

    let backend = Arc::clone(&ctx.backend);
    registry
        .register(
            definition(
                "environment_create",
                "Create a named environment",
                json!({
                    "type": "object",
                    "properties": {
                        "project_id": { "type": "string" },
                        "name": { "type": "string" },
                        "variables": { "type": "object" }
                    },
                    "required": ["name"]
                }),
            ),
            Box::new(move |args| {
                let backend = Arc::clone(&backend);
                Box::pin(async move {
                    let draft: EnvironmentDraft = serde_json::from_value(args)?;
                    let environment = backend.create_environment(&draft).await?;
                    Ok(serde_json::to_value(environment)?)
                })
            }),
        )
        .await?;

    let backend = Arc::clone(&ctx.backend);
    registry
        .register(
            definition(
                "environment_update",
                "Replace an environment's variables",
                json!({
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "project_id": { "type": "string" },
                        "name": { "type": "string" },
                        "variables": { "type": "object" }
                    },
                    "required": ["id", "name"]
                }),
            ),
            Box::new(move |args| {
                let backend = Arc::clone(&backend);
                Box::pin(async move {
                    let id = require_id(&args)?;
                    let draft: EnvironmentDraft = serde_json::from_value(args)?;
                    let environment = backend.update_environment(&id, &draft).await?;
                    Ok(serde_json::to_value(environment)?)
                })
            }),
        )
        .await?;

    let backend = Arc::clone(&ctx.backend);
    registry
        .register(
            definition("environment_delete", "Delete an environment", id_schema()),
            Box::new(move |args| {
                let backend = Arc::clone(&backend);
                Box::pin(async move {
                    let id = require_id(&args)?;
                    backend.delete_environment(&id).await?;
                    Ok(json!({ "deleted": id }))
                })
            }),
        )
        .await?;

    // Fetches an environment and installs its variables into the session's
    // `env` scope, where `{{env.*}}` references resolve from.
    let backend = Arc::clone(&ctx.backend);
    let session = ctx.executor.session();
    registry
        .register(
            definition(
                "environment_use",
                "Activate an environment for variable interpolation",
                id_schema(),
            ),
            Box::new(move |args| {
                let backend = Arc::clone(&backend);
                let session = session.clone();
                Box::pin(async move {
                    let id = require_id(&args)?;
                    let environment = backend.get_environment(&id).await?;
                    let count = environment.variables.len();
                    session.write().await.seed_environment(environment.variables);
                    Ok(json!({ "environment": environment.name, "variables": count }))
                })
            }),
        )
        .await?;

    Ok(())
}

async fn register_flow_tools(registry: &ToolRegistry, ctx: &ToolContext) -> Result<(), ToolError> {
    let flows = Arc::clone(&ctx.flows);
    registry
        .register(
            definition(
                "flow_define",
                "Register a named flow: ordered HTTP steps plus execution policy",
                json!({
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "name": { "type": "string" },
                        "steps": { "type": "array" },
                        "config": { "type": "object" }
                    },
                    "required": ["id", "name", "steps"]
                }),
            ),
            Box::new(move |args| {
                let flows = Arc::clone(&flows);
                Box::pin(async move {
                    let flow: FlowDefinition = serde_json::from_value(args)?;
                    let validation = FlowStateManager::validate_flow(&flow.steps, &flow.config);
                    if !validation.valid {
                        return Ok(serde_json::to_value(validation)?);
                    }
                    let id = flow.id.clone();
                    flows.write().await.insert(id.clone(), flow);
                    Ok(json!({ "defined": id, "warnings": validation.warnings }))
                })
            }),
        )
        .await?;

    let flows = Arc::clone(&ctx.flows);
    registry
        .register(
            definition(
                "flow_list",
                "List registered flow definitions",
                json!({ "type": "object", "properties": {} }),
            ),
            Box::new(move |_args| {
                let flows = Arc::clone(&flows);
                Box::pin(async move {
                    let flows = flows.read().await;
                    let summaries: Vec<Value> = flows
                        .values()
                        .map(|f| {
                            json!({
                                "id": f.id,
                                "name": f.name,
                                "steps": f.steps.len(),
                                "parallel": f.config.parallel
                            })
                        })
                        .collect();
                    Ok(Value::Array(summaries))
                })
            }),
        )
        .await?;

    let flows = Arc::clone(&ctx.flows);
    registry
        .register(
            definition(
                "flow_validate",
                "Validate a registered flow without executing it",
                id_schema(),
            ),
            Box::new(move |args| {
                let flows = Arc::clone(&flows);
                Box::pin(async move {
                    let id = require_id(&args)?;
                    let flows = flows.read().await;
                    let flow = flows.get(&id).ok_or_else(|| anyhow!("unknown flow '{}'", id))?;
                    let validation = FlowStateManager::validate_flow(&flow.steps, &flow.config);
                    Ok(serde_json::to_value(validation)?)
                })
            }),
        )
        .await?;

    let flows = Arc::clone(&ctx.flows);
    let backend = Arc::clone(&ctx.backend);
    let executor = ctx.executor.clone();
    registry
        .register(
            definition(
                "flow_run",
                "Execute a registered flow and return the execution report",
                json!({
                    "type": "object",
                    "properties": {
                        "id": { "type": "string" },
                        "run_id": { "type": "string" },
                        "inputs": { "type": "object" }
                    },
                    "required": ["id"]
                }),
            ),
            Box::new(move |args| {
                let flows = Arc::clone(&flows);
                let backend = Arc::clone(&backend);
                let executor = executor.clone();
                Box::pin(async move {
                    let id = require_id(&args)?;
                    let run_id = args
                        .get("run_id")
                        .and_then(Value::as_str)
                        .unwrap_or(&id)
                        .to_string();
                    let inputs: HashMap<String, Value> = args
                        .get("inputs")
                        .and_then(Value::as_object)
                        .map(|m| m.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
                        .unwrap_or_default();

                    let flow = {
                        let flows = flows.read().await;
                        flows
                            .get(&id)
                            .cloned()
                            .ok_or_else(|| anyhow!("unknown flow '{}'", id))?
                    };

                    // Steps naming an endpoint need its definition available
                    // to the executor before materialization.
                    for step in &flow.steps {
                        if let Some(endpoint_id) = &step.endpoint_id {
                            let endpoint = backend.get_endpoint(endpoint_id).await?;
                            executor.register_endpoint(endpoint).await;
                        }
                    }

                    let report = executor
                        .run(&run_id, flow.steps, flow.config, inputs)
                        .await?;
                    Ok(serde_json::to_value(report)?)
                })
            }),
        )
        .await?;

    let executor = ctx.executor.clone();
    registry
        .register(
            definition(
                "flow_status",
                "Current state of a flow, live or most recently finished",
                id_schema(),
            ),
            Box::new(move |args| {
                let executor = executor.clone();
                Box::pin(async move {
                    let id = require_id(&args)?;
                    let state = executor
                        .state_manager()
                        .read()
                        .await
                        .get_flow_state(&id)
                        .ok_or_else(|| anyhow!("unknown flow '{}'", id))?;
                    Ok(serde_json::to_value(state)?)
                })
            }),
        )
        .await?;

    let executor = ctx.executor.clone();
    registry
        .register(
            definition(
                "flow_stop",
                "Request cooperative cancellation of a running flow",
                id_schema(),
            ),
            Box::new(move |args| {
                let executor = executor.clone();
                Box::pin(async move {
                    let id = require_id(&args)?;
                    let stopping = executor.request_stop(&id).await;
                    Ok(json!({ "flow_id": id, "stopping": stopping }))
                })
            }),
        )
        .await?;

    let executor = ctx.executor.clone();
    registry
        .register(
            definition(
                "flow_active",
                "List all live (non-terminal) flows",
                json!({ "type": "object", "properties": {} }),
            ),
            Box::new(move |_args| {
                let executor = executor.clone();
                Box::pin(async move {
                    let active = executor.state_manager().read().await.get_active_flows();
                    Ok(serde_json::to_value(active)?)
                })
            }),
        )
        .await?;

    let executor = ctx.executor.clone();
    registry
        .register(
            definition(
                "flow_stats",
                "Aggregated flow lifecycle counters",
                json!({ "type": "object", "properties": {} }),
            ),
            Box::new(move |_args| {
                let executor = executor.clone();
                Box::pin(async move {
                    let stats = executor.state_manager().read().await.get_flow_stats();
                    Ok(serde_json::to_value(stats)?)
                })
            }),
        )
        .await?;

    let executor = ctx.executor.clone();
    registry
        .register(
            definition(
                "flow_cleanup",
                "Evict finished flows older than the given age from history",
                json!({
                    "type": "object",
                    "properties": {
                        "max_age_minutes": { "type": "integer", "minimum": 0 }
                    },
                    "required": ["max_age_minutes"]
                }),
            ),
            Box::new(move |args| {
                let executor = executor.clone();
                Box::pin(async move {
                    let minutes = args
                        .get("max_age_minutes")
                        .and_then(Value::as_i64)
                        .ok_or_else(|| anyhow!("missing 'max_age_minutes'"))?;
                    let evicted = executor
                        .state_manager()
                        .write()
                        .await
                        .cleanup(chrono::Duration::minutes(minutes));
                    Ok(json!({ "evicted": evicted }))
                })
            }),
        )
        .await?;

    let executor = ctx.executor.clone();
    registry
        .register(
            definition(
                "flow_export",
                "Serialize a flow's state for external tooling",
                id_schema(),
            ),
            Box::new(move |args| {
                let executor = executor.clone();
                Box::pin(async move {
                    let id = require_id(&args)?;
                    executor
                        .state_manager()
                        .read()
                        .await
                        .export_flow_state(&id)
                        .ok_or_else(|| anyhow!("unknown flow '{}'", id))
                })
            }),
        )
        .await?;

    let executor = ctx.executor.clone();
    registry
        .register(
            definition(
                "flow_import",
                "Import a previously exported terminal flow state",
                json!({
                    "type": "object",
                    "properties": { "state": { "type": "object" } },
                    "required": ["state"]
                }),
            ),
            Box::new(move |args| {
                let executor = executor.clone();
                Box::pin(async move {
                    let state = args
                        .get("state")
                        .cloned()
                        .ok_or_else(|| anyhow!("missing 'state'"))?;
                    let id = executor
                        .state_manager()
                        .write()
                        .await
                        .import_flow_state(state)?;
                    Ok(json!({ "imported": id }))
                })
            }),
        )
        .await?;

    Ok(())
}

async fn register_session_tools(
    registry: &ToolRegistry,
    ctx: &ToolContext,
) -> Result<(), ToolError> {
    let session = ctx.executor.session();
    registry
        .register(
            definition(
                "session_summary",
                "Per-scope key counts and names for interpolation debugging",
                json!({ "type": "object", "properties": {} }),
            ),
            Box::new(move |_args| {
                let session = session.clone();
                Box::pin(async move {
                    let guard = session.read().await;
                    let interp_ctx = InterpolationContext::new(&guard);
                    Ok(build_variable_summary(&interp_ctx))
                })
            }),
        )
        .await?;

    let session = ctx.executor.session();
    registry
        .register(
            definition(
                "session_set",
                "Set a variable in one of the writable session scopes",
                json!({
                    "type": "object",
                    "properties": {
                        "scope": { "type": "string", "enum": ["input", "env", "runtime", "config"] },
                        "key": { "type": "string" },
                        "value": {}
                    },
                    "required": ["scope", "key", "value"]
                }),
            ),
            Box::new(move |args| {
                let session = session.clone();
                Box::pin(async move {
                    let scope: Scope = args
                        .get("scope")
                        .and_then(Value::as_str)
                        .and_then(|s| s.parse().ok())
                        .ok_or_else(|| anyhow!("missing or unknown 'scope'"))?;
                    let key = args
                        .get("key")
                        .and_then(Value::as_str)
                        .ok_or_else(|| anyhow!("missing 'key'"))?
                        .to_string();
                    let value = args.get("value").cloned().unwrap_or(Value::Null);
                    session.set(scope, key.clone(), value).await;
                    Ok(json!({ "scope": scope.as_str(), "key": key }))
                })
            }),
        )
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use apiflow_backend::{BackendConfig, StepRunner};
    use apiflow_protocol::models::{MaterializedRequest, StepResponse};
    use async_trait::async_trait;
    use secrecy::SecretString;
    use std::time::Duration;

    struct NullRunner;

    #[async_trait]
    impl StepRunner for NullRunner {
        async fn execute(
            &self,
            _request: &MaterializedRequest,
            _timeout: Option<Duration>,
        ) -> Result<StepResponse, apiflow_backend::BackendError> {
            Ok(StepResponse {
                status: 200,
                headers: HashMap::new(),
                body: json!({"ok": true}),
                elapsed_ms: 1,
            })
        }
    }

    async fn registry_with_tools() -> (ToolRegistry, ToolContext) {
        let backend = Arc::new(
            BackendClient::new(BackendConfig {
                base_url: "http://localhost:9".to_string(),
                api_token: SecretString::from("t"),
                timeout_seconds: 1,
            })
            .expect("client"),
        );
        let executor = FlowExecutor::new(apiflow_flow::SessionStore::new(), Arc::new(NullRunner));
        let ctx = ToolContext::new(backend, executor);
        let registry = ToolRegistry::new();
        register_all(&registry, &ctx).await.expect("register tools");
        (registry, ctx)
    }

    #[tokio::test]
    async fn registers_full_tool_surface() {
        let (registry, _ctx) = registry_with_tools().await;
        let names: Vec<String> = registry
            .list_tools()
            .await
            .into_iter()
            .map(|t| t.name)
            .collect();

        for expected in [
            "project_list",
            "project_create",
            "folder_delete",
            "endpoint_update",
            "environment_use",
            "flow_define",
            "flow_run",
            "flow_status",
            "flow_stop",
            "flow_stats",
            "session_summary",
        ] {
            assert!(names.iter().any(|n| n == expected), "missing {expected}");
        }
    }

    #[tokio::test]
    async fn define_then_run_flow_end_to_end() {
        let (registry, _ctx) = registry_with_tools().await;

        let defined = registry
            .call(
                "flow_define",
                json!({
                    "id": "smoke",
                    "name": "Smoke",
                    "steps": [
                        { "id": "s1", "name": "ping", "method": "GET", "url": "https://api.test/ping" }
                    ]
                }),
            )
            .await
            .expect("define flow");
        assert_eq!(defined["defined"], json!("smoke"));

        let report = registry
            .call("flow_run", json!({ "id": "smoke" }))
            .await
            .expect("run flow");
        assert_eq!(report["status"], json!("completed"));
        assert_eq!(report["completed_steps"], json!(1));

        let status = registry
            .call("flow_status", json!({ "id": "smoke" }))
            .await
            .expect("flow status");
        assert_eq!(status["status"], json!("completed"));

        let stats = registry
            .call("flow_stats", json!({}))
            .await
            .expect("flow stats");
        assert_eq!(stats["completed"], json!(1));
    }

    #[tokio::test]
    async fn invalid_flow_definition_reports_errors() {
        let (registry, _ctx) = registry_with_tools().await;

        let result = registry
            .call(
                "flow_define",
                json!({ "id": "empty", "name": "Empty", "steps": [] }),
            )
            .await
            .expect("call flow_define");
        assert_eq!(result["valid"], json!(false));
    }

    #[tokio::test]
    async fn session_set_feeds_interpolation_summary() {
        let (registry, _ctx) = registry_with_tools().await;

        registry
            .call(
                "session_set",
                json!({ "scope": "runtime", "key": "token", "value": "abc" }),
            )
            .await
            .expect("session_set");

        let summary = registry
            .call("session_summary", json!({}))
            .await
            .expect("session_summary");
        assert_eq!(summary["runtime"]["count"], json!(1));
    }
}
