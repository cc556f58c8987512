//! Clinical Orchestrator CLI entry point.

use clap::Parser;

use clinical_orchestrator::cli::{commands, Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Analyze(args) => commands::analyze::execute(args, &cli.root, cli.json).await,
        Commands::Stream(args) => commands::stream::execute(args, &cli.root, cli.json).await,
        Commands::Config(args) => commands::config::execute(&args, &cli.root, cli.json),
    };

    if let Err(err) = result {
        clinical_orchestrator::cli::handle_error(err, cli.json);
    }
}
