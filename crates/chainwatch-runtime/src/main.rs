//! chainwatch: chain subscription hub binary.
//! One process hosts the hub; window processes attach over a Unix socket.

use clap::Parser;

mod bridge;
mod cli;
mod client;
mod collaborators;
mod daemon;
mod file_store;
mod hub;
mod transport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();
    let socket_path = args.socket_path.unwrap_or_else(cli::default_socket_path);

    match args.command {
        cli::Command::Hub(opts) => {
            let filter = std::env::var("CHAINWATCH_LOG")
                .or_else(|_| std::env::var("RUST_LOG"))
                .unwrap_or_else(|_| "info".to_string());
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                .init();

            tracing::info!("chainwatch hub starting");
            daemon::run_hub(opts, &socket_path).await?;
        }
        cli::Command::Send(opts) => {
            client::cmd_send(&socket_path, opts).await?;
        }
    }

    Ok(())
}
