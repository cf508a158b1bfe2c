//! Command line interface for the `muxframe` demo binary.
//!
//! The binary runs either a chat server that verifies login codes or a
//! client that logs in and says a few lines. This file is also compiled by
//! the build script to render the man page, so it depends on `clap` alone.

use std::net::SocketAddr;

use clap::{Args, Parser, Subcommand};

/// Command line arguments for the `muxframe` binary.
#[derive(Debug, Parser)]
#[command(name = "muxframe", version, about = "Multiplexed WebSocket chat demo")]
pub struct Cli {
    /// Log filter directive, e.g. `info` or `muxframe=debug`.
    #[arg(long, global = true, default_value = "info")]
    pub log: String,
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Demo roles.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Accept clients, verify their codes and relay chat.
    Serve(ServeArgs),
    /// Log in to a server and say a few lines.
    Connect(ConnectArgs),
}

/// Arguments for `serve`.
#[derive(Debug, Args)]
pub struct ServeArgs {
    /// TCP port to listen on.
    #[arg(short, long, default_value_t = 9000)]
    pub port: u16,
    /// Password every client must present.
    #[arg(long)]
    pub password: Option<String>,
    /// Project every client must join.
    #[arg(long)]
    pub project: Option<String>,
    /// Verification codes to accept, as `CODE=USERNAME`.
    #[arg(long = "issue", value_name = "CODE=USERNAME")]
    pub issued: Vec<String>,
    /// Serve Prometheus metrics on this address.
    #[arg(long)]
    pub metrics_addr: Option<SocketAddr>,
}

/// Arguments for `connect`.
#[derive(Debug, Args)]
pub struct ConnectArgs {
    /// Server host.
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    /// Server port.
    #[arg(short, long, default_value_t = 9000)]
    pub port: u16,
    /// Display name.
    #[arg(short, long, default_value = "player")]
    pub username: String,
    /// Role to claim.
    #[arg(long, default_value = "Player")]
    pub role: String,
    /// Session password.
    #[arg(long)]
    pub password: Option<String>,
    /// Project to join.
    #[arg(long)]
    pub project: Option<String>,
    /// Verification code issued by the account backend.
    #[arg(long)]
    pub code: Option<String>,
    /// Keep-alive interval in seconds; 0 disables pings.
    #[arg(long, default_value_t = 10)]
    pub keep_alive: u32,
    /// Lines to say once logged in.
    #[arg(long = "say", value_name = "TEXT")]
    pub lines: Vec<String>,
    /// Stay connected after saying every line.
    #[arg(long)]
    pub stay: bool,
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use rstest::rstest;

    use super::{Cli, Command};

    #[test]
    fn parses_serve_with_issued_codes() {
        let cli = Cli::parse_from([
            "muxframe", "serve", "--port", "9100", "--issue", "abc=ada", "--issue", "def=bob",
        ]);
        let Command::Serve(args) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(args.port, 9100);
        assert_eq!(args.issued, ["abc=ada", "def=bob"]);
        assert_eq!(cli.log, "info");
    }

    #[rstest]
    #[case(&["muxframe", "connect"], 10, 0)]
    #[case(&["muxframe", "--log", "debug", "connect", "--keep-alive", "0", "--say", "hi"], 0, 1)]
    fn parses_connect(#[case] argv: &[&str], #[case] keep_alive: u32, #[case] lines: usize) {
        let cli = Cli::parse_from(argv);
        let Command::Connect(args) = cli.command else {
            panic!("expected connect");
        };
        assert_eq!(args.keep_alive, keep_alive);
        assert_eq!(args.lines.len(), lines);
        assert_eq!(args.host, "127.0.0.1");
    }

    #[test]
    fn subcommand_is_required() {
        assert!(Cli::try_parse_from(["muxframe"]).is_err());
    }
}
