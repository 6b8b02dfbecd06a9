//! PartShare CLI
//!
//! Command-line driver for the PartShare sharing handshake.
//!
//! # Commands
//!
//! - `demo` - Run the two-user share handshake against an in-process store
//! - `version` - Show version information

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// PartShare partition-sharing demo.
#[derive(Parser)]
#[command(name = "partshare")]
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
    /// Share user1's partition with user2
    Demo {
        /// Number of handshake runs
        #[arg(short, long, default_value = "1")]
        runs: u32,

        /// Directory for the local user file (in memory if omitted)
        #[arg(short, long)]
        state_dir: Option<PathBuf>,

        /// Register both users on every run
        #[arg(short, long)]
        always_register: bool,

        /// Offer read access only
        #[arg(long)]
        read_only: bool,

        /// Store processing delay in milliseconds
        #[arg(long, default_value = "50")]
        processing_delay_ms: u64,

        /// Simulated network latency per request in milliseconds
        #[arg(long, default_value = "0")]
        latency_ms: u64,

        /// Seconds until an unredeemed offer expires
        #[arg(long)]
        offer_ttl_secs: Option<i64>,

        /// Seconds to wait for the store to process a record
        #[arg(long, default_value = "30")]
        watch_timeout_secs: u64,

        /// Authentication attempts before giving up
        #[arg(long, default_value = "3")]
        attempts: u32,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text", value_parser = ["text", "json"])]
        format: String,
    },

    /// Show version information
    Version,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Demo {
            runs,
            state_dir,
            always_register,
            read_only,
            processing_delay_ms,
            latency_ms,
            offer_ttl_secs,
            watch_timeout_secs,
            attempts,
            format,
        } => {
            let options = commands::demo::DemoOptions {
                runs,
                state_dir,
                always_register,
                read_only,
                processing_delay_ms,
                latency_ms,
                offer_ttl_secs,
                watch_timeout_secs,
                attempts,
            };
            commands::demo::run(&options, &format)?;
        }
        Commands::Version => {
            println!("PartShare CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_format_is_rejected() {
        let result = Cli::try_parse_from(["partshare", "demo", "--format", "yaml"]);
        assert!(result.is_err());
    }

    #[test]
    fn demo_defaults() {
        let cli = Cli::try_parse_from(["partshare", "demo", "--format", "json"]).unwrap();
        match cli.command {
            Commands::Demo {
                runs,
                attempts,
                watch_timeout_secs,
                offer_ttl_secs,
                format,
                ..
            } => {
                assert_eq!(runs, 1);
                assert_eq!(attempts, 3);
                assert_eq!(watch_timeout_secs, 30);
                assert_eq!(offer_ttl_secs, None);
                assert_eq!(format, "json");
            }
            Commands::Version => panic!("parsed the wrong command"),
        }
    }
}
