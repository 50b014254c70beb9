//! ApiFlow Workbench CLI

use apiflow_backend::{
    BackendClient, BackendConfig, DefaultProfileStore, HttpStepRunner, ProfileStore,
    WorkbenchProfile,
};
use apiflow_flow::{FlowExecutor, FlowStateManager, SessionStore};
use apiflow_mcp::{parse_flow_file, register_all, FlowLoader, ToolContext, ToolRegistry};
use apiflow_protocol::models::{ExecutionReport, FlowDefinition, FlowStatus};
use clap::{Parser, Subcommand};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::SecretString;
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::Level;

#[derive(Parser)]
#[command(name = "apiflow")]
#[command(about = "ApiFlow Workbench - HTTP flow runner and backend proxy")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a flow definition file
    Run {
        /// Path to the flow definition (.json, .yaml, .toml)
        #[arg(value_name = "FLOW_FILE")]
        flow: PathBuf,

        /// Flow inputs as key=value pairs (values parsed as JSON when possible)
        #[arg(short, long)]
        input: Vec<String>,

        /// Execution id override (defaults to the definition id)
        #[arg(long)]
        run_id: Option<String>,
    },

    /// Validate a flow definition file without executing it
    Validate {
        /// Path to the flow definition
        #[arg(value_name = "FLOW_FILE")]
        flow: PathBuf,
    },

    /// List flow definitions discovered in a directory
    Flows {
        /// Directory to scan (defaults to the profile's flow_dir, then ./flows)
        #[arg(value_name = "DIR")]
        dir: Option<PathBuf>,
    },

    /// List the tools exposed to AI assistants
    Tools,

    /// Inspect or change the workbench profile
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the current profile
    Show,

    /// Update profile fields
    Set {
        /// Backend base URL
        #[arg(long)]
        backend_url: Option<String>,

        /// Environment variable holding the API token
        #[arg(long)]
        token_env: Option<String>,

        /// Directory scanned for flow definitions
        #[arg(long)]
        flow_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_max_level(Level::WARN).init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { flow, input, run_id } => run_flow(flow, input, run_id).await,
        Commands::Validate { flow } => validate_flow(flow),
        Commands::Flows { dir } => list_flows(dir),
        Commands::Tools => list_tools().await,
        Commands::Config { command } => handle_config(command),
    }
}

fn load_profile() -> anyhow::Result<WorkbenchProfile> {
    Ok(DefaultProfileStore.load_profile()?)
}

/// Build the flow engine from the profile: session seeded with the profile's
/// env/config values, HTTP step runner with the profile timeout.
async fn build_executor(profile: &WorkbenchProfile) -> anyhow::Result<FlowExecutor> {
    let session = SessionStore::new();
    {
        let mut state = session.write().await;
        state.seed_environment(profile.environment.clone());
        state.seed_config(profile.config.clone());
    }
    let runner = HttpStepRunner::new(Duration::from_secs(profile.timeout_s))?;
    Ok(FlowExecutor::new(session, Arc::new(runner)))
}

/// Backend client from the profile; falls back to an unauthenticated client
/// when the token variable is unset (read-only use still fails server-side).
fn build_backend(profile: &WorkbenchProfile) -> anyhow::Result<BackendClient> {
    let config = match profile.backend_config() {
        Ok(config) => config,
        Err(_) => BackendConfig {
            base_url: profile.backend_url.clone(),
            api_token: SecretString::from(""),
            timeout_seconds: profile.timeout_s,
        },
    };
    Ok(BackendClient::new(config)?)
}

fn parse_inputs(pairs: &[String]) -> anyhow::Result<HashMap<String, Value>> {
    let mut inputs = HashMap::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| anyhow::anyhow!("input '{}' is not key=value", pair))?;
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        inputs.insert(key.to_string(), value);
    }
    Ok(inputs)
}

async fn run_flow(
    path: PathBuf,
    input_pairs: Vec<String>,
    run_id: Option<String>,
) -> anyhow::Result<()> {
    let definition = parse_flow_file(&path)?;
    let inputs = parse_inputs(&input_pairs)?;
    let profile = load_profile()?;
    let executor = build_executor(&profile).await?;

    // Steps referencing registered endpoints need their definitions fetched
    // from the backend before the run.
    if definition.steps.iter().any(|s| s.endpoint_id.is_some()) {
        let backend = build_backend(&profile)?;
        for step in &definition.steps {
            if let Some(endpoint_id) = &step.endpoint_id {
                let endpoint = backend.get_endpoint(endpoint_id).await?;
                executor.register_endpoint(endpoint).await;
            }
        }
    }

    println!(
        "{}",
        style(format!(
            "▶ Running flow '{}' ({} steps)",
            definition.name,
            definition.steps.len()
        ))
        .bold()
        .cyan()
    );

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(ProgressStyle::with_template("{spinner} {msg}")?);
    spinner.set_message("executing steps...");
    spinner.enable_steady_tick(Duration::from_millis(100));

    let run_id = run_id.unwrap_or_else(|| definition.id.clone());
    let report = executor
        .run(&run_id, definition.steps, definition.config, inputs)
        .await;
    spinner.finish_and_clear();

    let report = report?;
    print_report(&report);

    if report.status != FlowStatus::Completed {
        std::process::exit(1);
    }
    Ok(())
}

fn print_report(report: &ExecutionReport) {
    let status = match report.status {
        FlowStatus::Completed => style(report.status.to_string()).green().bold(),
        FlowStatus::Stopped => style(report.status.to_string()).yellow().bold(),
        _ => style(report.status.to_string()).red().bold(),
    };
    println!(
        "\n{} {} ({} ms, {}/{} steps succeeded)",
        style("Flow").bold(),
        status,
        report.execution_time_ms,
        report.completed_steps,
        report.total_steps,
    );

    for result in &report.results {
        let mark = if result.success {
            style("✓").green()
        } else {
            style("✗").red()
        };
        println!(
            "  {} {} {} {} ({} ms)",
            mark,
            style(&result.step_id).bold(),
            result.request.method,
            result.request.url,
            result.execution_time_ms,
        );
        if let Some(error) = &result.error {
            println!("      {}", style(error).red());
        }
    }

    if !report.errors.is_empty() {
        println!("\n{}", style("Errors:").red().bold());
        for error in &report.errors {
            println!("  - {}", error);
        }
    }
}

fn validate_flow(path: PathBuf) -> anyhow::Result<()> {
    let definition = parse_flow_file(&path)?;
    let validation = FlowStateManager::validate_flow(&definition.steps, &definition.config);

    if validation.valid {
        println!(
            "{} {}",
            style("✓").green().bold(),
            style(format!("'{}' is valid", definition.id)).bold()
        );
    } else {
        println!(
            "{} {}",
            style("✗").red().bold(),
            style(format!("'{}' is invalid", definition.id)).bold()
        );
        for error in &validation.errors {
            println!("  {} {}", style("error:").red(), error);
        }
    }
    for warning in &validation.warnings {
        println!("  {} {}", style("warning:").yellow(), warning);
    }

    if !validation.valid {
        std::process::exit(1);
    }
    Ok(())
}

fn list_flows(dir: Option<PathBuf>) -> anyhow::Result<()> {
    let profile = load_profile()?;
    let dir = dir
        .or(profile.flow_dir)
        .unwrap_or_else(|| PathBuf::from("./flows"));

    if !dir.exists() {
        anyhow::bail!("flow directory '{}' does not exist", dir.display());
    }

    let loader = FlowLoader::new(&dir);
    let mut flows: Vec<FlowDefinition> = loader.load()?;
    flows.sort_by(|a, b| a.id.cmp(&b.id));

    println!(
        "{}",
        style(format!("{} flow definition(s) in {}", flows.len(), dir.display())).bold()
    );
    for flow in flows {
        let mode = if flow.config.parallel {
            format!("parallel x{}", flow.config.max_concurrency)
        } else {
            "sequential".to_string()
        };
        println!(
            "  {} {} ({} steps, {})",
            style(&flow.id).bold().cyan(),
            flow.name,
            flow.steps.len(),
            mode,
        );
    }
    Ok(())
}

async fn list_tools() -> anyhow::Result<()> {
    let profile = load_profile()?;
    let backend = Arc::new(build_backend(&profile)?);
    let executor = build_executor(&profile).await?;

    let registry = ToolRegistry::new();
    let ctx = ToolContext::new(backend, executor);
    register_all(&registry, &ctx).await?;

    let tools = registry.list_tools().await;
    println!("{}", style(format!("{} tool(s)", tools.len())).bold());
    for tool in tools {
        println!("  {} - {}", style(&tool.name).bold().cyan(), tool.description);
    }
    Ok(())
}

fn handle_config(command: ConfigCommands) -> anyhow::Result<()> {
    let store = DefaultProfileStore;
    match command {
        ConfigCommands::Show => {
            let profile = store.load_profile()?;
            println!("{}", serde_json::to_string_pretty(&profile)?);
        }
        ConfigCommands::Set {
            backend_url,
            token_env,
            flow_dir,
        } => {
            let mut profile = store.load_profile()?;
            if let Some(url) = backend_url {
                profile.backend_url = url;
            }
            if let Some(env) = token_env {
                profile.api_token_env = env;
            }
            if let Some(dir) = flow_dir {
                profile.flow_dir = Some(dir);
            }
            store.save_profile(&profile)?;
            println!("{}", style("✓ profile saved").green());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_inputs_as_json_with_string_fallback() {
        let inputs = parse_inputs(&[
            "name=Ada".to_string(),
            "count=3".to_string(),
            "flag=true".to_string(),
        ])
        .expect("parse inputs");

        assert_eq!(inputs["name"], Value::String("Ada".to_string()));
        assert_eq!(inputs["count"], serde_json::json!(3));
        assert_eq!(inputs["flag"], serde_json::json!(true));
    }

    #[test]
    fn rejects_malformed_input_pair() {
        assert!(parse_inputs(&["no-equals".to_string()]).is_err());
    }
}
