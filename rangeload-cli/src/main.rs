//! rangeload - resumable parallel downloads from the command line.

mod commands;
mod error;
mod progress;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::get::GetArgs;
use error::CliError;

#[derive(Debug, Parser)]
#[command(name = "rangeload", version, about = "Resumable, verified, parallel downloads")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Download a URL into a local directory
    Get(GetArgs),

    /// View or edit the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Get(args) => commands::get::run(args),
        Commands::Config { action } => commands::config::run(action),
    }
}

fn main() {
    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_config_set() {
        let cli = Cli::parse_from(["rangeload", "config", "set", "download.workers", "8"]);
        assert!(matches!(
            cli.command,
            Commands::Config {
                action: ConfigCommands::Set { .. }
            }
        ));
    }
}
