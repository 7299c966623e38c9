//! Error classification and recovery hints.

/// Broad error category for routing recovery logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Connect,
    Protocol,
    Transport,
    ToolExecution,
    Cancelled,
    StuckLoop,
    Configuration,
    Timeout,
    Network,
    Model,
    Unknown,
}

/// Suggested recovery action, surfaced by the CLI next to the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum RecoverySuggestion {
    #[strum(to_string = "retry later")]
    RetryWithBackoff,
    #[strum(to_string = "check the server command and arguments")]
    CheckServerCommand,
    #[strum(to_string = "reconnect the server")]
    ReconnectServer,
    #[strum(to_string = "check the configuration file")]
    CheckConfiguration,
    #[strum(to_string = "check the tool arguments")]
    CheckToolArguments,
    #[strum(to_string = "rephrase the task or raise the duplicate threshold")]
    RephraseTask,
    #[strum(to_string = "")]
    None,
}
