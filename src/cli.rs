use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// pylsp-bridge: runs python-lsp-server for a workspace and keeps it configured
#[derive(Parser, Debug, Clone)]
#[command(name = "pylsp-bridge")]
#[command(version)]
#[command(about = "Headless host for python-lsp-server with layered settings", long_about = None)]
pub struct Cli {
    /// Workspace directory
    #[arg(short = 'C', long = "workspace", value_name = "DIR", global = true)]
    pub workspace: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). Overrides config.toml.
    #[arg(long, env = "PYLSP_BRIDGE_LOG", global = true)]
    pub log_level: Option<String>,

    /// Directory holding config.toml and the global settings.toml
    #[arg(long, value_name = "DIR", global = true)]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start the server and accept commands on stdin (default)
    Run,
    /// Resolve settings, probe the environment, print the tree and exit
    Status,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }

    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}
