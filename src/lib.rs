//! mcp-agent: a step-bounded, tool-using agent over MCP tool servers.
//!
//! Remote tool hosts are reached through [`mcp::Session`]s (a child process
//! speaking JSON-RPC on stdio, or an HTTP host), collected by a
//! [`mcp::ClientManager`] under namespaced names (`mcp_<server>_<tool>`),
//! and exposed next to native tools through [`tools::ToolRegistry`]. An
//! [`agent_loop::Agent`] drives a [`model::ChatModel`] step by step until the
//! model calls `terminate`, the step budget runs out, or the model starts
//! repeating itself.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use mcp_agent::agent_loop::{Agent, AgentLimits};
//! use mcp_agent::mcp::{ClientManager, DeclaredServer, TransportConfig};
//! use mcp_agent::model::OpenAiChatModel;
//! use mcp_agent::tools::ToolRegistry;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> mcp_agent::error::Result<()> {
//! let cancel = CancellationToken::new();
//! let manager = Arc::new(ClientManager::default());
//! manager
//!     .initialize_from_declared(
//!         &[DeclaredServer::new(
//!             "files",
//!             TransportConfig::stdio("npx", vec!["-y".into(), "@modelcontextprotocol/server-filesystem".into()]),
//!         )],
//!         &cancel,
//!     )
//!     .await?;
//!
//! let model = Arc::new(OpenAiChatModel::new("gpt-4o-mini", "sk-...", None)?);
//! let mut agent = Agent::new(model, ToolRegistry::with_builtin())
//!     .with_limits(AgentLimits::default().with_max_steps(10))
//!     .with_system_prompt("Use the tools, then call terminate.")
//!     .with_owned_manager(manager);
//!
//! let result = agent.run(&cancel, "List the files in the current directory").await;
//! println!("{:?}: {}", result.status, result.output.unwrap_or_default());
//! # Ok(())
//! # }
//! ```

pub mod agent_loop;
pub mod config;
pub mod error;
pub mod history;
pub mod mcp;
pub mod model;
pub mod tools;
pub mod types;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
