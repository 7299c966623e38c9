//! Handlers behind each CLI subcommand.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use super::{AskArgs, CallArgs, ConfigCommands, RunArgs};
use crate::agent_loop::{Agent, AgentRunner, RunEvent, RunEventPayload, RunStatus};
use crate::config::AppConfig;
use crate::error::AgentError;
use crate::mcp::ClientManager;
use crate::model::{ChatModel, ModelRequest, OpenAiChatModel};
use crate::tools::{Tool, ToolArguments, ToolExecutionContext, ToolRegistry};
use crate::types::Message;
use crate::util::text::truncate_chars;

const PREVIEW_CHARS: usize = 200;

fn build_model(config: &AppConfig) -> Result<Arc<dyn ChatModel>, AgentError> {
    let api_key = config.llm.api_key.clone().ok_or_else(|| {
        AgentError::Configuration(
            "no API key: set llm.api_key, MCP_AGENT_API_KEY or OPENAI_API_KEY".into(),
        )
    })?;
    Ok(Arc::new(OpenAiChatModel::new(
        config.llm.model.clone(),
        api_key,
        config.llm.base_url.clone(),
    )?))
}

async fn connect_declared(config: &AppConfig, cancel: &CancellationToken) -> Result<Arc<ClientManager>, AgentError> {
    let manager = Arc::new(ClientManager::new(config.session_options()));
    let servers = config.declared_servers();
    if !servers.is_empty() {
        let connected = manager.initialize_or_close(&servers, cancel).await?;
        tracing::info!(connected = connected.len(), declared = servers.len(), "servers ready");
    }
    Ok(manager)
}

/// Cancel `token` on Ctrl-C.
fn cancel_on_interrupt(token: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\nInterrupted, stopping...");
            token.cancel();
        }
    });
}

fn preview(text: &str) -> String {
    let (mut shown, cut) = truncate_chars(text, PREVIEW_CHARS);
    if cut {
        shown.push_str("...");
    }
    shown.replace('\n', " ")
}

fn print_event(event: RunEvent) {
    match &event.payload {
        RunEventPayload::StepStarted { step } => eprintln!("-- step {step}"),
        RunEventPayload::AssistantMessage { text, .. } if !text.is_empty() => {
            eprintln!("assistant: {}", preview(text));
        }
        RunEventPayload::ToolCallStarted { call } => {
            eprintln!("  -> {} {}", call.name, preview(&call.arguments));
        }
        RunEventPayload::ToolResult { observation } => {
            let mark = if observation.success { "ok" } else { "failed" };
            eprintln!("  <- [{mark}] {}", preview(&observation.content));
        }
        _ => {}
    }
}

pub async fn run(config: AppConfig, args: RunArgs) -> Result<(), AgentError> {
    let mut config = config;
    if let Some(steps) = args.max_steps {
        config.agent.max_steps = steps;
    }
    config.validate()?;

    let model = build_model(&config)?;
    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let mut agent = Agent::new(model, ToolRegistry::with_builtin())
        .with_limits(config.limits())
        .with_settings(config.generation_settings())
        .with_completion_markers(config.agent.completion_markers.clone())
        .with_event_sink(Arc::new(print_event));
    if let Some(prompt) = &config.agent.system_prompt {
        agent = agent.with_system_prompt(prompt.clone());
    }
    if let Some(prompt) = &config.agent.next_step_prompt {
        agent = agent.with_next_step_prompt(prompt.clone());
    }
    if !args.no_servers {
        let manager = connect_declared(&config, &cancel).await?;
        agent = agent.with_owned_manager(manager);
    }

    let handle = AgentRunner::start(agent, args.prompt);
    let watcher = {
        let cancel = cancel.clone();
        let run_cancel = handle.cancel_token();
        tokio::spawn(async move {
            cancel.cancelled().await;
            run_cancel.cancel();
        })
    };
    let result = handle.wait().await;
    watcher.abort();

    if let Some(output) = &result.output {
        println!("{output}");
    }
    match result.status {
        RunStatus::Completed => Ok(()),
        RunStatus::BudgetExhausted => {
            eprintln!(
                "Warning: step budget of {} exhausted before the task completed",
                config.agent.max_steps
            );
            Ok(())
        }
        RunStatus::Cancelled => Err(AgentError::Cancelled),
        RunStatus::StuckLoop | RunStatus::Failed => Err(AgentError::InvalidState(format!(
            "run {} ended with status {}: {}",
            result.run_id,
            result.status,
            result.error.unwrap_or_default()
        ))),
    }
}

pub async fn ask(config: AppConfig, args: AskArgs) -> Result<(), AgentError> {
    let model = build_model(&config)?;
    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());

    let mut messages = Vec::new();
    if let Some(prompt) = &config.agent.system_prompt {
        messages.push(Message::system(prompt.clone()));
    }
    messages.push(Message::user(args.prompt));
    let request = ModelRequest::new(messages).with_settings(config.generation_settings());

    let mut stream = model.stream(&request, &cancel).await?;
    let mut stdout = std::io::stdout();
    while let Some(chunk) = stream.next().await {
        let text = chunk?;
        print!("{text}");
        stdout.flush()?;
    }
    println!();
    Ok(())
}

pub async fn tools(config: AppConfig) -> Result<(), AgentError> {
    let cancel = CancellationToken::new();
    let manager = connect_declared(&config, &cancel).await?;
    let registry = ToolRegistry::with_builtin().with_manager(Arc::clone(&manager));

    for tool in registry.tools().await {
        let required = tool.required_parameters();
        if required.is_empty() {
            println!("{:<40} {}", tool.name(), preview(tool.description()));
        } else {
            println!(
                "{:<40} {} (requires: {})",
                tool.name(),
                preview(tool.description()),
                required.join(", ")
            );
        }
    }
    manager.close().await
}

pub async fn call(config: AppConfig, args: CallArgs) -> Result<(), AgentError> {
    let cancel = CancellationToken::new();
    cancel_on_interrupt(cancel.clone());
    let manager = connect_declared(&config, &cancel).await?;
    let registry = ToolRegistry::with_builtin().with_manager(Arc::clone(&manager));

    let outcome = async {
        let tool = registry
            .lookup(&args.tool)
            .await
            .ok_or_else(|| AgentError::InvalidArgument(format!("Tool '{}' not found", args.tool)))?;
        let arguments = ToolArguments::from_serialized(&args.args)?;
        let ctx = ToolExecutionContext {
            cancel: cancel.clone(),
            tool_call_id: None,
            tool_name: Some(args.tool.clone()),
        };
        tool.execute(&arguments, &ctx).await
    }
    .await;

    let closed = manager.close().await;
    match outcome? {
        serde_json::Value::String(text) => println!("{text}"),
        other => println!("{}", serde_json::to_string_pretty(&other)?),
    }
    closed
}

pub async fn servers(config: AppConfig) -> Result<(), AgentError> {
    let declared = config.declared_servers();
    if declared.is_empty() {
        println!("No servers declared.");
        return Ok(());
    }
    let manager = ClientManager::new(config.session_options());
    let cancel = CancellationToken::new();
    for server in &declared {
        let status = match manager.connect(&server.id, &server.transport, &cancel).await {
            Ok(tools) => format!("connected, {} tool(s)", tools.len()),
            Err(e) => format!("failed: {e}"),
        };
        println!(
            "{:<16} {:<8} {:<40} {status}",
            server.id,
            server.transport.kind(),
            server.transport.target()
        );
    }
    manager.close().await
}

pub fn config(path: Option<&Path>, command: ConfigCommands) -> Result<(), AgentError> {
    match command {
        ConfigCommands::Init { force } => {
            let target = path.map(Path::to_path_buf).unwrap_or_else(AppConfig::default_path);
            if target.exists() && !force {
                return Err(AgentError::Configuration(format!(
                    "{} already exists (use --force to overwrite)",
                    target.display()
                )));
            }
            if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&target, AppConfig::template())?;
            println!("Wrote {}", target.display());
            Ok(())
        }
        ConfigCommands::Validate => {
            let (config, source) = AppConfig::load(path)?;
            config.validate()?;
            match source {
                Some(source) => println!("{} is valid", source.display()),
                None => println!("No config file found; defaults are valid"),
            }
            println!("{} server(s) declared", config.mcp.servers.len());
            Ok(())
        }
    }
}
