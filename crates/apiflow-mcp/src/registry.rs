use anyhow::Result;
use apiflow_protocol::models::ToolDefinition;
use jsonschema::Validator;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// A handler function for a tool.
/// Async so handlers can reach the backend without blocking the runtime.
pub type ToolHandler =
    Box<dyn Fn(Value) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// Registry for all tools exposed by this workbench session.
///
/// The namespace is flat: one server, unique tool names.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Arc<RwLock<HashMap<String, RegisteredTool>>>,
}

/// A registered tool with its schema validator
pub struct RegisteredTool {
    /// Tool definition including input schema
    pub definition: ToolDefinition,
    /// Async handler function
    pub handler: ToolHandler,
    /// Compiled JSON schema for argument validation
    validator: Option<Validator>,
}

/// Errors that can occur during tool operations
#[derive(Debug, Error)]
pub enum ToolError {
    /// Tool not found
    #[error("Tool not found: {0}")]
    NotFound(String),
    /// A tool with the same name is already registered
    #[error("Tool already registered: {0}")]
    Duplicate(String),
    /// Invalid arguments provided
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),
    /// Schema compilation failed
    #[error("Schema error: {0}")]
    SchemaError(String),
    /// Handler execution failed
    #[error("Execution error: {0}")]
    ExecutionError(String),
}

impl ToolRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile a JSON schema for validation
    fn compile_schema(schema: &Value) -> Result<Validator, ToolError> {
        jsonschema::validator_for(schema).map_err(|e| ToolError::SchemaError(e.to_string()))
    }

    /// Register a new tool.
    /// Compiles the input schema; registration fails if it does not compile
    /// or the name is taken.
    pub async fn register(
        &self,
        definition: ToolDefinition,
        handler: ToolHandler,
    ) -> Result<(), ToolError> {
        let mut tools = self.tools.write().await;
        if tools.contains_key(&definition.name) {
            return Err(ToolError::Duplicate(definition.name.clone()));
        }

        let validator = match Self::compile_schema(&definition.input_schema) {
            Ok(validator) => {
                debug!("Compiled schema for tool: {}", definition.name);
                Some(validator)
            }
            Err(e) => {
                warn!(
                    "Failed to compile schema for tool {}: {}. Tool cannot be registered.",
                    definition.name, e
                );
                return Err(e);
            }
        };

        tools.insert(
            definition.name.clone(),
            RegisteredTool {
                definition,
                handler,
                validator,
            },
        );

        Ok(())
    }

    /// List all registered tool definitions, sorted by name
    pub async fn list_tools(&self) -> Vec<ToolDefinition> {
        let tools = self.tools.read().await;
        let mut definitions: Vec<ToolDefinition> =
            tools.values().map(|t| t.definition.clone()).collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    /// Validate arguments against the tool's input schema
    fn validate_args(tool: &RegisteredTool, args: &Value) -> Result<(), ToolError> {
        let Some(validator) = &tool.validator else {
            debug!(
                "No schema validator for tool {}, skipping validation",
                tool.definition.name
            );
            return Ok(());
        };

        let errors: Vec<String> = validator
            .iter_errors(args)
            .map(|e| format!("{}: {}", e.instance_path(), e))
            .collect();

        if errors.is_empty() {
            debug!(
                "Arguments validated successfully for tool: {}",
                tool.definition.name
            );
            Ok(())
        } else {
            let message = errors.join("; ");
            warn!(
                "Validation failed for tool {}: {}",
                tool.definition.name, message
            );
            Err(ToolError::InvalidArguments(message))
        }
    }

    /// Call a tool by name.
    /// Validates arguments against the tool's input schema before calling.
    pub async fn call(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        let tools = self.tools.read().await;

        let Some(tool) = tools.get(name) else {
            return Err(ToolError::NotFound(name.to_string()));
        };

        Self::validate_args(tool, &args)?;

        (tool.handler)(args)
            .await
            .map_err(|e| ToolError::ExecutionError(e.to_string()))
    }

    /// Get a tool's definition by name
    pub async fn get_tool(&self, name: &str) -> Option<ToolDefinition> {
        let tools = self.tools.read().await;
        tools.get(name).map(|t| t.definition.clone())
    }

    /// Unregister a tool by name
    pub async fn unregister(&self, name: &str) -> bool {
        let mut tools = self.tools.write().await;
        tools.remove(name).is_some()
    }

    /// Clear all registered tools
    pub async fn clear(&self) {
        let mut tools = self.tools.write().await;
        tools.clear();
    }
}
