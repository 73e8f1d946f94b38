//! ankisync CLI
//!
//! Runs the collection sync server and inspects stored collections.
//!
//! # Commands
//!
//! - `serve` - Run the sync server over HTTP
//! - `inspect` - Display a stored collection's watermarks and counts
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ankisync collection sync server.
#[derive(Parser)]
#[command(name = "ankisync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sync server
    Serve(commands::serve::ServeArgs),

    /// Display a stored collection's watermarks and counts
    Inspect {
        /// Directory holding one sub-directory per user
        #[arg(short, long, env = "ANKISYNC_DATA_DIR")]
        data_dir: PathBuf,

        /// User whose collection to inspect
        #[arg(short, long)]
        user: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Serve(args) => commands::serve::run(args)?,
        Commands::Inspect {
            data_dir,
            user,
            format,
        } => {
            commands::inspect::run(&data_dir, &user, &format)?;
        }
        Commands::Version => {
            println!("ankisync v{}", env!("CARGO_PKG_VERSION"));
            println!("sync protocol v{}", ankisync_protocol::SYNC_VERSION);
        }
    }

    Ok(())
}
