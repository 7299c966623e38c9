//! mcp-agent binary entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use mcp_agent::cli::{commands, Cli, Commands};
use mcp_agent::config::AppConfig;
use mcp_agent::error::{AgentError, RecoverySuggestion};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = dispatch(cli).await;

    if let Err(e) = result {
        eprintln!("Error: {e}");
        let hint = e.recovery_suggestion();
        if hint != RecoverySuggestion::None {
            eprintln!("Hint: {hint}");
        }
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "mcp_agent=debug,info" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .init();
}

async fn dispatch(cli: Cli) -> Result<(), AgentError> {
    if let Commands::Config(args) = cli.command {
        return commands::config(cli.config.as_deref(), args.command);
    }

    let (config, _source) = AppConfig::load(cli.config.as_deref())?;
    match cli.command {
        Commands::Run(args) => commands::run(config, args).await,
        Commands::Ask(args) => commands::ask(config, args).await,
        Commands::Tools => commands::tools(config).await,
        Commands::Call(args) => commands::call(config, args).await,
        Commands::Servers => commands::servers(config).await,
        Commands::Config(_) => Ok(()),
    }
}
