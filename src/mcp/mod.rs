//! Model Context Protocol (MCP) client: sessions, the session manager and
//! the bridge that exposes remote tools as local ones.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod adapter;
pub mod http;
pub mod manager;
pub mod protocol;
pub mod rpc;
pub mod session;
pub mod stdio;

pub use adapter::{flatten_result, McpToolAdapter, NO_OUTPUT};
pub use http::HttpSession;
pub use manager::ClientManager;
pub use session::{
    DefaultSessionFactory, Session, SessionFactory, SessionOptions, SessionStatus,
};
pub use stdio::StdioSession;

/// How to reach one tool host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportConfig {
    /// Spawn a child process and talk over its standard streams.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        env: BTreeMap<String, String>,
    },
    /// Connect to an HTTP host exposing an event-stream endpoint.
    #[serde(alias = "sse", alias = "http")]
    Network { url: String },
}

impl TransportConfig {
    pub fn stdio(command: impl Into<String>, args: Vec<String>) -> Self {
        Self::Stdio {
            command: command.into(),
            args,
            env: BTreeMap::new(),
        }
    }

    pub fn network(url: impl Into<String>) -> Self {
        Self::Network { url: url.into() }
    }

    /// Short label used in logs and listings.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Stdio { .. } => "stdio",
            Self::Network { .. } => "network",
        }
    }

    /// Command line or URL, for display.
    pub fn target(&self) -> String {
        match self {
            Self::Stdio { command, args, .. } if args.is_empty() => command.clone(),
            Self::Stdio { command, args, .. } => format!("{command} {}", args.join(" ")),
            Self::Network { url } => url.clone(),
        }
    }
}

/// A server named in configuration, connected at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredServer {
    pub id: String,
    pub transport: TransportConfig,
}

impl DeclaredServer {
    pub fn new(id: impl Into<String>, transport: TransportConfig) -> Self {
        Self {
            id: id.into(),
            transport,
        }
    }
}
