//! Command-line interface for mcp-agent.

pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Tool-using agent over MCP servers
#[derive(Parser, Debug)]
#[command(name = "mcp-agent", version, about = "Run a tool-using agent over MCP servers")]
pub struct Cli {
    /// Config file (default: ./config/config.toml, ./config.toml, ~/.mcp-agent/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the agent on a task
    Run(RunArgs),
    /// Ask the model directly, streaming the answer (no tools)
    Ask(AskArgs),
    /// List every tool the agent can call
    Tools,
    /// Invoke a single tool
    Call(CallArgs),
    /// Connect declared servers and report the result
    Servers,
    /// Manage the configuration file
    Config(ConfigArgs),
}

#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Task for the agent
    pub prompt: String,

    /// Override the step budget
    #[arg(long)]
    pub max_steps: Option<usize>,

    /// Skip connecting declared servers
    #[arg(long)]
    pub no_servers: bool,
}

#[derive(Parser, Debug)]
pub struct AskArgs {
    pub prompt: String,
}

#[derive(Parser, Debug)]
pub struct CallArgs {
    /// Local tool name (e.g. `shell` or `mcp_files_read_file`)
    pub tool: String,

    /// Arguments as a JSON object
    #[arg(short, long, default_value = "{}")]
    pub args: String,
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Write a starter config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Load and validate the config
    Validate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_run_with_options() {
        let cli = Cli::try_parse_from([
            "mcp-agent",
            "--config",
            "agent.toml",
            "run",
            "summarize the repo",
            "--max-steps",
            "5",
            "--no-servers",
        ])
        .unwrap();
        assert_eq!(cli.config.as_deref(), Some(std::path::Path::new("agent.toml")));
        match cli.command {
            Commands::Run(args) => {
                assert_eq!(args.prompt, "summarize the repo");
                assert_eq!(args.max_steps, Some(5));
                assert!(args.no_servers);
            }
            other => panic!("expected Run, got {other:?}"),
        }
    }

    #[test]
    fn parse_call_defaults_to_empty_args() {
        let cli = Cli::try_parse_from(["mcp-agent", "call", "shell"]).unwrap();
        match cli.command {
            Commands::Call(args) => {
                assert_eq!(args.tool, "shell");
                assert_eq!(args.args, "{}");
            }
            other => panic!("expected Call, got {other:?}"),
        }
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["mcp-agent", "tools", "-v"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Commands::Tools));
    }

    #[test]
    fn parse_config_init_force() {
        let cli = Cli::try_parse_from(["mcp-agent", "config", "init", "--force"]).unwrap();
        match cli.command {
            Commands::Config(args) => {
                assert!(matches!(args.command, ConfigCommands::Init { force: true }))
            }
            other => panic!("expected Config, got {other:?}"),
        }
    }

    #[test]
    fn parse_missing_subcommand_is_error() {
        assert!(Cli::try_parse_from(["mcp-agent"]).is_err());
    }

    #[test]
    fn parse_run_missing_prompt_is_error() {
        assert!(Cli::try_parse_from(["mcp-agent", "run"]).is_err());
    }
}
