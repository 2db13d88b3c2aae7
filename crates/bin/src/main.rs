use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod output;

use cli::{Cli, Commands};
use output::OutputFormat;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // The server logs its activity; the one-shot tools only warnings.
    let default_directive = match cli.command {
        Commands::Serve(_) => "trellis=info",
        _ => "trellis=warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_directive.parse()?))
        .init();

    match &cli.command {
        Commands::Serve(args) => commands::serve::run(args).await,
        Commands::Repair(args) => commands::repair::run(args).await,
        Commands::Inspect(args) => {
            let format = if args.json {
                OutputFormat::Json
            } else {
                OutputFormat::Human
            };
            commands::inspect::run(args, format).await
        }
        Commands::Health(args) => commands::health::run(args).await,
    }
}
