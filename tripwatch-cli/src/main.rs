//! Tripwatch CLI - Command-line interface
//!
//! Runs live ETA tracking sessions against a configured travel-time service.

mod commands;
mod error;

use clap::{Parser, Subcommand};

use commands::share::ShareArgs;
use commands::track::TrackArgs;
use error::CliError;

#[derive(Parser)]
#[command(name = "tripwatch")]
#[command(version = tripwatch::VERSION)]
#[command(about = "Live arrival times for everyone heading to the same place", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file to ~/.tripwatch/config.ini
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the effective configuration
    Config {
        /// Only print the config file path
        #[arg(long)]
        path: bool,
    },

    /// Track entities heading to a destination
    Track(TrackArgs),

    /// Publish your current position once
    Share(ShareArgs),
}

fn main() {
    let cli = Cli::parse();

    let result: Result<(), CliError> = match cli.command {
        Commands::Init { force } => commands::init::run(force),
        Commands::Config { path } => commands::config::run(path),
        Commands::Track(args) => commands::track::run(args),
        Commands::Share(args) => commands::share::run(args),
    };

    if let Err(e) = result {
        e.exit();
    }
}
