//! Command-line interface definition
//!
//! A single long-running server process, so the CLI is flat: config file,
//! the two operational knobs, and verbosity.

use clap::Parser;
use std::path::PathBuf;

/// MCPHub - registry and gateway for Model Context Protocol servers
#[derive(Parser, Debug, Clone)]
#[command(name = "mcphub")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Registry database path
    #[arg(long, env = "MCPHUB_DB")]
    pub db_path: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:8000
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Idle session timeout in seconds
    #[arg(long, env = "MCPHUB_IDLE_TIMEOUT")]
    pub idle_timeout: Option<u64>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}
