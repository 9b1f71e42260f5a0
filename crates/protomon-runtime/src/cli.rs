//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "protomon", about = "industrial protocol connection health monitor")]
pub struct Cli {
    /// UDS socket path (default: /tmp/protomon-$USER/protomond.sock)
    #[arg(long, short = 's', global = true)]
    pub socket_path: Option<String>,

    /// Engine configuration file (TOML). Defaults apply when omitted.
    #[arg(long, short = 'c', global = true, env = "PROTOMON_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the status registry behind the UDS endpoint
    Serve,
    /// Print the status of one source, or of every source
    Status(StatusOpts),
    /// Print the fleet-wide summary
    Summary,
    /// Administratively reset a source
    Reset(ResetOpts),
    /// Replay a JSON-lines event log offline and print the final statuses
    Replay(ReplayOpts),
    /// Validate the configuration and print the effective values
    CheckConfig,
}

#[derive(clap::Args)]
pub struct StatusOpts {
    /// Source id; all sources when omitted
    pub source_id: Option<String>,
}

#[derive(clap::Args)]
pub struct ResetOpts {
    pub source_id: String,
}

#[derive(clap::Args)]
pub struct ReplayOpts {
    /// Event log, one JSON object per line
    pub file: PathBuf,
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/protomon/protomond.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/protomon-{user}/protomond.sock")
}
