//! Error types for the agent runtime.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use thiserror::Error;

/// Primary error type for all operations in this crate.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Connect error: {server}: {message}")]
    Connect { server: String, message: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Tool execution error: {tool_name}: {message}")]
    ToolExecution { tool_name: String, message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Stuck loop: assistant repeated the same reply {repeats} times")]
    StuckLoop { repeats: usize, text: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Model error (status {status}): {message}")]
    Model { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl AgentError {
    /// Build a connect error for one server.
    pub fn connect(server: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connect {
            server: server.into(),
            message: message.into(),
        }
    }

    /// Build a tool execution error.
    pub fn tool(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Connect { .. } => ErrorCategory::Connect,
            Self::Protocol(_) | Self::Serialization(_) => ErrorCategory::Protocol,
            Self::Transport(_) | Self::Io(_) => ErrorCategory::Transport,
            Self::ToolExecution { .. } => ErrorCategory::ToolExecution,
            Self::Cancelled => ErrorCategory::Cancelled,
            Self::StuckLoop { .. } => ErrorCategory::StuckLoop,
            Self::Configuration(_) | Self::Toml(_) => ErrorCategory::Configuration,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Network(_) => ErrorCategory::Network,
            Self::Model { status, .. } => match status {
                429 | 500..=599 => ErrorCategory::Network,
                _ => ErrorCategory::Model,
            },
            Self::InvalidArgument(_) | Self::InvalidState(_) => ErrorCategory::Unknown,
        }
    }

    /// Whether this error is potentially retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::Connect
        )
    }

    /// Whether this error must end the current run instead of becoming a
    /// tool-result message.
    pub fn terminates_run(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::Cancelled)
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Connect => RecoverySuggestion::CheckServerCommand,
            ErrorCategory::Transport => RecoverySuggestion::ReconnectServer,
            ErrorCategory::Network | ErrorCategory::Timeout => RecoverySuggestion::RetryWithBackoff,
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::ToolExecution => RecoverySuggestion::CheckToolArguments,
            ErrorCategory::StuckLoop => RecoverySuggestion::RephraseTask,
            _ => RecoverySuggestion::None,
        }
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, AgentError>;
