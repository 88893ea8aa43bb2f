//! Command-line interface for the chat server.
//!
//! Every option overrides the matching value from the configuration file.

use clap::Parser;
use std::path::PathBuf;

/// Command line arguments parsed from user input.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Multi-client line-based chat server", long_about = None)]
pub struct CliArgs {
    /// Configuration file path
    ///
    /// If the file doesn't exist, a default configuration will be created.
    #[arg(short = 'c', long = "config", value_name = "FILE", default_value = "config.toml")]
    pub config_path: PathBuf,

    /// Bind address (e.g., 127.0.0.1:12345)
    #[arg(short = 'b', long = "bind", value_name = "ADDRESS")]
    pub bind_address: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Output logs in JSON format
    #[arg(long)]
    pub json_logs: bool,
}
