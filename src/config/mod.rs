//! Configuration (layered: TOML file < `.env` < environment).
//!
//! Every component receives the pieces it needs at construction; nothing
//! here is process-global.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent_loop::limits::{self, parse_positive_usize, AgentLimits};
use crate::error::AgentError;
use crate::mcp::{DeclaredServer, SessionOptions, TransportConfig};
use crate::types::GenerationSettings;

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
const CONFIG_FILE: &str = "config.toml";
const HOME_DIR: &str = ".mcp-agent";

const API_KEY_ENV: [&str; 2] = ["MCP_AGENT_API_KEY", "OPENAI_API_KEY"];
const BASE_URL_ENV: [&str; 2] = ["MCP_AGENT_BASE_URL", "OPENAI_BASE_URL"];
const MODEL_ENV: &str = "MCP_AGENT_MODEL";
const MAX_STEPS_ENV: &str = "MCP_AGENT_MAX_STEPS";

/// Root configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub llm: LlmSettings,
    pub agent: AgentSettings,
    pub mcp: McpSettings,
}

/// Chat model connection.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LlmSettings {
    pub model: String,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            base_url: None,
            api_key: None,
            max_tokens: None,
            temperature: None,
        }
    }
}

impl fmt::Debug for LlmSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LlmSettings")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AgentSettings {
    pub max_steps: usize,
    pub memory_capacity: usize,
    pub history_window: usize,
    pub max_observe: usize,
    pub duplicate_threshold: usize,
    pub duplicate_window: usize,
    /// Free-text completion markers. Empty disables the text heuristic.
    pub completion_markers: Vec<String>,
    pub system_prompt: Option<String>,
    pub next_step_prompt: Option<String>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: limits::DEFAULT_MAX_STEPS,
            memory_capacity: limits::DEFAULT_MEMORY_CAPACITY,
            history_window: limits::DEFAULT_HISTORY_WINDOW,
            max_observe: limits::DEFAULT_MAX_OBSERVE,
            duplicate_threshold: limits::DEFAULT_DUPLICATE_THRESHOLD,
            duplicate_window: limits::DEFAULT_DUPLICATE_WINDOW,
            completion_markers: Vec::new(),
            system_prompt: None,
            next_step_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct McpSettings {
    pub connect_timeout_secs: u64,
    pub shutdown_grace_secs: u64,
    pub servers: BTreeMap<String, TransportConfig>,
}

impl Default for McpSettings {
    fn default() -> Self {
        let options = SessionOptions::default();
        Self {
            connect_timeout_secs: options.connect_timeout.as_secs(),
            shutdown_grace_secs: options.shutdown_grace.as_secs(),
            servers: BTreeMap::new(),
        }
    }
}

impl AppConfig {
    /// Load `.env`, the first config file found, then environment overrides.
    ///
    /// Returns the config and the file it came from, if any.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, Option<PathBuf>), AgentError> {
        let _ = dotenvy::dotenv();
        let path = Self::discover(explicit)?;
        let mut config = match &path {
            Some(path) => Self::from_path(path)?,
            None => Self::default(),
        };
        config.apply_env_with(|key| std::env::var(key).ok());
        tracing::debug!(path = ?path, servers = config.mcp.servers.len(), "configuration loaded");
        Ok((config, path))
    }

    pub fn from_path(path: &Path) -> Result<Self, AgentError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AgentError::Configuration(format!("failed to read {}: {e}", path.display()))
        })?;
        toml::from_str(&contents).map_err(|e| {
            AgentError::Configuration(format!("failed to parse {}: {e}", path.display()))
        })
    }

    /// Pick the config file: an explicit path must exist; otherwise the first
    /// existing entry of [`AppConfig::candidate_paths`].
    pub fn discover(explicit: Option<&Path>) -> Result<Option<PathBuf>, AgentError> {
        if let Some(path) = explicit {
            if !path.is_file() {
                return Err(AgentError::Configuration(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            return Ok(Some(path.to_path_buf()));
        }
        Ok(Self::candidate_paths().into_iter().find(|p| p.is_file()))
    }

    pub fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = vec![
            PathBuf::from("config").join(CONFIG_FILE),
            PathBuf::from(CONFIG_FILE),
        ];
        if let Some(dirs) = directories::UserDirs::new() {
            paths.push(dirs.home_dir().join(HOME_DIR).join(CONFIG_FILE));
        }
        paths
    }

    /// Where `config init` writes by default.
    pub fn default_path() -> PathBuf {
        directories::UserDirs::new()
            .map(|dirs| dirs.home_dir().join(HOME_DIR).join(CONFIG_FILE))
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE))
    }

    /// Overlay environment variables read through `lookup`.
    pub fn apply_env_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let first = |keys: &[&str]| {
            keys.iter()
                .filter_map(|k| lookup(k))
                .map(|v| v.trim().to_string())
                .find(|v| !v.is_empty())
        };
        if let Some(key) = first(&API_KEY_ENV) {
            self.llm.api_key = Some(key);
        }
        if let Some(url) = first(&BASE_URL_ENV) {
            self.llm.base_url = Some(url);
        }
        if let Some(model) = first(&[MODEL_ENV]) {
            self.llm.model = model;
        }
        if let Some(raw) = lookup(MAX_STEPS_ENV) {
            match parse_positive_usize(&raw) {
                Some(steps) => self.agent.max_steps = steps,
                None => tracing::warn!(value = %raw, "ignoring invalid {MAX_STEPS_ENV}"),
            }
        }
    }

    pub fn validate(&self) -> Result<(), AgentError> {
        self.limits().validate()?;
        if self.llm.model.trim().is_empty() {
            return Err(AgentError::Configuration("llm.model must not be empty".into()));
        }
        if self.mcp.connect_timeout_secs == 0 {
            return Err(AgentError::Configuration(
                "mcp.connect_timeout_secs must be greater than zero".into(),
            ));
        }
        for (id, transport) in &self.mcp.servers {
            validate_server_id(id)?;
            match transport {
                TransportConfig::Stdio { command, .. } if command.trim().is_empty() => {
                    return Err(AgentError::Configuration(format!(
                        "server '{id}': command must not be empty"
                    )));
                }
                TransportConfig::Network { url }
                    if !(url.starts_with("http://") || url.starts_with("https://")) =>
                {
                    return Err(AgentError::Configuration(format!(
                        "server '{id}': url must start with http:// or https://"
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }

    pub fn limits(&self) -> AgentLimits {
        AgentLimits {
            max_steps: self.agent.max_steps,
            memory_capacity: self.agent.memory_capacity,
            history_window: self.agent.history_window,
            max_observe: self.agent.max_observe,
            duplicate_threshold: self.agent.duplicate_threshold,
            duplicate_window: self.agent.duplicate_window,
        }
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            connect_timeout: Duration::from_secs(self.mcp.connect_timeout_secs),
            shutdown_grace: Duration::from_secs(self.mcp.shutdown_grace_secs),
        }
    }

    pub fn generation_settings(&self) -> GenerationSettings {
        GenerationSettings {
            max_tokens: self.llm.max_tokens,
            temperature: self.llm.temperature,
        }
    }

    /// Declared servers, ordered by id.
    pub fn declared_servers(&self) -> Vec<DeclaredServer> {
        self.mcp
            .servers
            .iter()
            .map(|(id, transport)| DeclaredServer::new(id.clone(), transport.clone()))
            .collect()
    }

    /// A commented starter file.
    pub fn template() -> &'static str {
        TEMPLATE
    }
}

fn validate_server_id(id: &str) -> Result<(), AgentError> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(AgentError::Configuration(format!(
            "invalid server id '{id}': use letters, digits, '_' or '-'"
        )))
    }
}

const TEMPLATE: &str = r#"# mcp-agent configuration

[llm]
model = "gpt-4o-mini"
# base_url = "https://api.openai.com/v1"
# api_key is usually supplied through MCP_AGENT_API_KEY or OPENAI_API_KEY
# max_tokens = 4096
# temperature = 0.0

[agent]
max_steps = 20
memory_capacity = 100
history_window = 20
max_observe = 10000
duplicate_threshold = 2
duplicate_window = 5
# Free-text completion is off unless markers are listed.
completion_markers = []
system_prompt = "You are an agent that solves tasks with the tools available. Call `terminate` with a final message when the task is done."
# next_step_prompt = "Decide the next action, or call terminate."

[mcp]
connect_timeout_secs = 30
shutdown_grace_secs = 5

# [mcp.servers.files]
# type = "stdio"
# command = "npx"
# args = ["-y", "@modelcontextprotocol/server-filesystem", "."]

# [mcp.servers.search]
# type = "sse"
# url = "http://127.0.0.1:8000/sse"
"#;
