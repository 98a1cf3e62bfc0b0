use std::path::PathBuf;

use clap::{Parser, Subcommand};
use ssh_mcp_runtime::Config;

/// Run allowlisted commands on configured SSH hosts
#[derive(Parser, Debug)]
#[command(name = "ssh-mcp-run", version)]
pub struct Args {
    /// Path to the configuration file (default: ~/.ssh-mcp-config.yaml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
    /// Run a command on a remote server
    Run {
        /// Name of the connection to use
        connection: String,

        /// Command to execute, passed to the remote shell as one line
        #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,

        /// Command timeout in seconds (default: from config)
        #[arg(long)]
        timeout: Option<u64>,

        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },

    /// List available connections
    ListConnections,

    /// List allowed commands, for one connection or the defaults
    ListCommands { connection: Option<String> },

    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the configuration with credentials masked
    ShowConfig,
}

impl Args {
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Config::default_path)
    }
}
