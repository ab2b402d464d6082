//! segstore CLI
//!
//! Command-line tools for driving and inspecting segstore stores.
//!
//! # Commands
//!
//! - `append` - Append text to the write stream
//! - `consume` - Print bytes from the read stream
//! - `save` - Bookmark the write position and print the token
//! - `resume` - Return to a bookmark
//! - `inspect` - Display the segment chain and statistics

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// segstore command-line tools.
#[derive(Parser)]
#[command(name = "segstore")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the store (a directory, or a `.zip` file for an archive store)
    #[arg(global = true, short, long)]
    store: Option<PathBuf>,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for `inspect`.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Append text to the write stream
    Append {
        /// Text to append
        text: String,
    },

    /// Print bytes from the read stream
    Consume {
        /// Maximum number of bytes to consume (default: all)
        #[arg(short, long)]
        max: Option<usize>,
    },

    /// Bookmark the write position and print the token as hex
    Save,

    /// Return to a bookmark printed by `save`
    Resume {
        /// Token bytes in hex
        token: String,
    },

    /// Display the segment chain and statistics
    Inspect {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: Format,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    if let Commands::Version = cli.command {
        println!("segstore CLI v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let path = cli.store.ok_or("Store path required (--store)")?;
    let mut store = commands::open_store(&path)?;

    match cli.command {
        Commands::Append { text } => commands::append::run(&mut store, &text)?,
        Commands::Consume { max } => commands::consume::run(&mut store, max)?,
        Commands::Save => commands::bookmark::save(&mut store)?,
        Commands::Resume { token } => commands::bookmark::resume(&mut store, &token)?,
        Commands::Inspect { format } => {
            commands::inspect::run(&store, &path, matches!(format, Format::Json))?;
        }
        Commands::Version => {}
    }

    store.close()?;
    Ok(())
}
