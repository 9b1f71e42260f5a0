//! protomon: protocol connection health monitor runtime binary.
//! Hosts the status registry behind a UDS JSON-RPC endpoint, plus client
//! subcommands and an offline replay tool.

use std::path::Path;

use clap::Parser;

use protomon_core::config::EngineConfig;

mod cli;
mod client;
mod daemon;
mod replay;
mod server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    match args.command {
        cli::Command::Serve => {
            init_tracing();
            tracing::info!("protomon daemon starting");

            let config = load_config(args.config.as_deref())?;
            let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);
            daemon::run_daemon(config, &socket_path).await?;
        }
        cli::Command::Status(opts) => {
            let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);
            client::cmd_status(&socket_path, opts.source_id.as_deref()).await?;
        }
        cli::Command::Summary => {
            let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);
            client::cmd_summary(&socket_path).await?;
        }
        cli::Command::Reset(opts) => {
            let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);
            client::cmd_reset(&socket_path, &opts.source_id).await?;
        }
        cli::Command::Replay(opts) => {
            init_tracing();
            let config = load_config(args.config.as_deref())?;
            let snapshots = replay::replay_file(config, &opts.file)?;
            println!("{}", serde_json::to_string_pretty(&snapshots)?);
        }
        cli::Command::CheckConfig => {
            let config = load_config(args.config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = std::env::var("PROTOMON_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    match path {
        Some(path) => {
            let config = EngineConfig::load(path)?;
            tracing::info!("loaded config from {}", path.display());
            Ok(config)
        }
        None => Ok(EngineConfig::default()),
    }
}
