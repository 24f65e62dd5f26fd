//! CLI definition using clap derive.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use chainwatch_core::types::WindowKind;

#[derive(Parser)]
#[command(name = "chainwatch", about = "chain subscription hub")]
pub struct Cli {
    /// UDS socket path (default: $XDG_RUNTIME_DIR/chainwatch/hub.sock)
    #[arg(long, short = 's', global = true, env = "CHAINWATCH_SOCKET")]
    pub socket_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the hub (bootstrap + window bridge)
    Hub(HubOpts),
    /// Connect as a window, send one envelope, print what comes back
    Send(SendOpts),
}

#[derive(clap::Args)]
pub struct HubOpts {
    /// Directory holding accounts.json, tasks.json and intervals.json
    #[arg(long, env = "CHAINWATCH_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Keep everything in memory; nothing is read from or written to disk
    #[arg(long, conflicts_with = "data_dir")]
    pub ephemeral: bool,

    /// Interval subscription tick period in seconds
    #[arg(long, default_value = "60")]
    pub tick_secs: u64,

    /// TCP reachability probe timeout in milliseconds
    #[arg(long, default_value = "3000")]
    pub probe_timeout_ms: u64,

    /// RPC endpoint per chain, e.g. `Polkadot=rpc.polkadot.io:443` (repeatable)
    #[arg(long = "endpoint", value_parser = parse_endpoint)]
    pub endpoints: Vec<(String, String)>,

    /// Start without connecting to any chain
    #[arg(long)]
    pub offline: bool,
}

#[derive(clap::Args)]
pub struct SendOpts {
    /// Window kind to connect as
    #[arg(long = "as", default_value = "settings")]
    pub kind: WindowKind,

    /// Tab id (tab-host children only)
    #[arg(long)]
    pub tab: Option<String>,

    /// Channel task name, e.g. `main:connection:set`
    #[arg(long)]
    pub task: String,

    /// JSON payload
    #[arg(long, default_value = "null")]
    pub data: String,

    /// Keep the connection open this long and print incoming envelopes
    #[arg(long, default_value = "500")]
    pub listen_ms: u64,
}

/// Parse `chain=endpoint`. The chain part may not be empty.
pub fn parse_endpoint(raw: &str) -> Result<(String, String), String> {
    let (chain, endpoint) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected CHAIN=ENDPOINT, got {raw:?}"))?;
    let chain = chain.trim();
    let endpoint = endpoint.trim();
    if chain.is_empty() || endpoint.is_empty() {
        return Err(format!("expected CHAIN=ENDPOINT, got {raw:?}"));
    }
    Ok((chain.to_owned(), endpoint.to_owned()))
}

/// Default socket path using $USER for per-user isolation.
pub fn default_socket_path() -> String {
    if let Ok(dir) = std::env::var("XDG_RUNTIME_DIR") {
        return format!("{dir}/chainwatch/hub.sock");
    }
    let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
    format!("/tmp/chainwatch-{user}/hub.sock")
}

/// Default data directory: $XDG_DATA_HOME/chainwatch, else ~/.local/share/chainwatch.
pub fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(dir).join("chainwatch");
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".local/share/chainwatch")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_pairs_split_on_first_equals() {
        assert_eq!(
            parse_endpoint("Polkadot=wss://rpc.example/ws?x=1"),
            Ok(("Polkadot".to_owned(), "wss://rpc.example/ws?x=1".to_owned()))
        );
        assert_eq!(
            parse_endpoint(" Kusama = 127.0.0.1:9944 "),
            Ok(("Kusama".to_owned(), "127.0.0.1:9944".to_owned()))
        );
    }

    #[test]
    fn endpoint_pairs_need_both_halves() {
        assert!(parse_endpoint("Polkadot").is_err());
        assert!(parse_endpoint("=host:1").is_err());
        assert!(parse_endpoint("Polkadot=").is_err());
    }

    #[test]
    fn hub_flags_parse() {
        let cli = Cli::try_parse_from([
            "chainwatch",
            "-s",
            "/tmp/x.sock",
            "hub",
            "--endpoint",
            "Polkadot=127.0.0.1:9944",
            "--endpoint",
            "Kusama=127.0.0.1:9955",
            "--offline",
            "--tick-secs",
            "5",
        ])
        .expect("parse");
        assert_eq!(cli.socket_path.as_deref(), Some("/tmp/x.sock"));
        let Command::Hub(opts) = cli.command else {
            panic!("expected hub");
        };
        assert_eq!(opts.endpoints.len(), 2);
        assert!(opts.offline);
        assert_eq!(opts.tick_secs, 5);
    }

    #[test]
    fn send_kind_parses_window_names() {
        let cli = Cli::try_parse_from([
            "chainwatch",
            "send",
            "--as",
            "open-gov",
            "--task",
            "main:connection:set",
            "--data",
            r#"{"online":false}"#,
        ])
        .expect("parse");
        let Command::Send(opts) = cli.command else {
            panic!("expected send");
        };
        assert_eq!(opts.kind, WindowKind::OpenGov);
        assert_eq!(opts.listen_ms, 500);
    }

    #[test]
    fn ephemeral_conflicts_with_data_dir() {
        assert!(
            Cli::try_parse_from(["chainwatch", "hub", "--ephemeral", "--data-dir", "/tmp/d"]).is_err()
        );
    }
}
