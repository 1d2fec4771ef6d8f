use std::process::ExitCode;

use clap::Parser;

mod cli;
mod commands;
mod config;
mod delegate;
mod error;

use cli::{Cli, Commands};
use config::{load_config, merge_config};
use error::{CliResult, to_exit_code};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing based on verbosity
    let filter = if cli.verbose {
        "tether=debug,tether_cli=debug"
    } else {
        "tether=warn,tether_cli=info"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    // Run the async main
    let result = smol::block_on(async_main(cli));
    to_exit_code(result)
}

async fn async_main(cli: Cli) -> CliResult<()> {
    let file_config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Launch(args) => {
            let config = merge_config(file_config, &args.common)?;
            commands::launch::execute(args, config).await
        }
        Commands::ChildPath(args) => {
            let config = merge_config(file_config, &args.common)?;
            commands::child_path::execute(args, config)
        }
    }
}
