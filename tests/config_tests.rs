//! Tests for configuration loading.

use std::sync::{Mutex, OnceLock};

use pretty_assertions::assert_eq;
use tempfile::TempDir;

use mcp_agent::config::AppConfig;
use mcp_agent::error::AgentError;
use mcp_agent::mcp::TransportConfig;

static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

const CONFIG_ENV_VARS: [&str; 6] = [
    "MCP_AGENT_API_KEY",
    "OPENAI_API_KEY",
    "MCP_AGENT_BASE_URL",
    "OPENAI_BASE_URL",
    "MCP_AGENT_MODEL",
    "MCP_AGENT_MAX_STEPS",
];

struct EnvGuard {
    saved: Vec<(String, Option<String>)>,
}

impl EnvGuard {
    fn capture(keys: &[&str]) -> Self {
        let saved = keys
            .iter()
            .map(|key| ((*key).to_string(), std::env::var(key).ok()))
            .collect();
        Self { saved }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, value) in &self.saved {
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
        }
    }
}

fn env_lock_guard() -> std::sync::MutexGuard<'static, ()> {
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

const SAMPLE: &str = r#"
[llm]
model = "gpt-4.1-mini"
temperature = 0.2

[agent]
max_steps = 12
max_observe = 4000
completion_markers = ["TASK COMPLETE"]
system_prompt = "You are a careful assistant."

[mcp]
connect_timeout_secs = 15

[mcp.servers.files]
type = "stdio"
command = "npx"
args = ["-y", "@modelcontextprotocol/server-filesystem", "."]

[mcp.servers.search]
type = "sse"
url = "http://127.0.0.1:8931/sse"
"#;

fn write_config(dir: &TempDir, contents: &str) -> std::path::PathBuf {
    let path = dir.path().join("config.toml");
    std::fs::write(&path, contents).unwrap();
    path
}

#[test]
fn from_path_reads_every_section() {
    let dir = TempDir::new().unwrap();
    let config = AppConfig::from_path(&write_config(&dir, SAMPLE)).unwrap();
    config.validate().unwrap();

    assert_eq!(config.llm.model, "gpt-4.1-mini");
    assert_eq!(config.llm.temperature, Some(0.2));
    assert_eq!(config.agent.max_steps, 12);
    assert_eq!(config.agent.completion_markers, vec!["TASK COMPLETE"]);
    // Unset fields keep their defaults.
    assert_eq!(config.agent.duplicate_threshold, 2);
    assert_eq!(config.mcp.connect_timeout_secs, 15);

    let servers = config.declared_servers();
    let ids: Vec<&str> = servers.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["files", "search"]);
    assert_eq!(servers[1].transport, TransportConfig::network("http://127.0.0.1:8931/sse"));

    let limits = config.limits();
    assert_eq!(limits.max_steps, 12);
    assert_eq!(limits.max_observe, 4000);
    assert_eq!(config.session_options().connect_timeout.as_secs(), 15);
}

#[test]
fn malformed_file_is_a_configuration_error() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[agent\nmax_steps = ");

    let err = AppConfig::from_path(&path).unwrap_err();

    assert!(matches!(err, AgentError::Configuration(ref m) if m.contains("config.toml")));
}

#[test]
fn unknown_transport_type_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[mcp.servers.x]\ntype = \"carrier-pigeon\"\n");

    assert!(AppConfig::from_path(&path).is_err());
}

#[test]
fn zero_limits_fail_validation() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, "[agent]\nmax_steps = 0\n");
    let config = AppConfig::from_path(&path).unwrap();

    let err = config.validate().unwrap_err();

    assert!(matches!(err, AgentError::Configuration(_)));
}

#[test]
fn discover_prefers_the_explicit_path() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, SAMPLE);

    assert_eq!(AppConfig::discover(Some(&path)).unwrap(), Some(path.clone()));

    let missing = dir.path().join("missing.toml");
    assert!(AppConfig::discover(Some(&missing)).is_err());
}

#[test]
fn load_applies_environment_over_the_file() {
    let _env_lock = env_lock_guard();
    let _env_guard = EnvGuard::capture(&CONFIG_ENV_VARS);
    for key in CONFIG_ENV_VARS {
        std::env::remove_var(key);
    }
    std::env::set_var("OPENAI_API_KEY", "sk-from-env");
    std::env::set_var("MCP_AGENT_MAX_STEPS", "5");

    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, SAMPLE);
    let (config, source) = AppConfig::load(Some(&path)).unwrap();

    assert_eq!(source, Some(path));
    assert_eq!(config.llm.api_key.as_deref(), Some("sk-from-env"));
    assert_eq!(config.llm.model, "gpt-4.1-mini");
    assert_eq!(config.agent.max_steps, 5);
}

#[test]
fn template_round_trips_through_a_file() {
    let dir = TempDir::new().unwrap();
    let path = write_config(&dir, AppConfig::template());

    let config = AppConfig::from_path(&path).unwrap();

    config.validate().unwrap();
    let defaults = AppConfig::default();
    assert_eq!(config.llm, defaults.llm);
    assert_eq!(config.mcp, defaults.mcp);
    assert_eq!(config.limits(), defaults.limits());
    assert!(config.agent.system_prompt.is_some());
}
