//! tandemd: the tandem daemon.
//!
//! One binary for both halves of the project:
//! - `member`: run an embedded cluster member until Ctrl-C
//! - `hello serve|call|demo`: the mutually authenticated hello service
//! - `certs`: write throwaway development credentials
//!
//! # Usage
//!
//! ```text
//! tandemd member --name infra1 --data-dir /var/lib/tandem \
//!     --initial-cluster infra1=10.0.0.1:2380 --root-password s3cret
//! tandemd certs --out ./certs --server-name localhost
//! tandemd hello serve --addr 0.0.0.0:7890 --cert certs/server.pem --key certs/server.key --ca certs/ca.pem
//! tandemd hello call --addr 127.0.0.1:7890 --cert certs/client.pem --key certs/client.key --ca certs/ca.pem
//! ```

mod hello_mode;
mod member_mode;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hello_mode::HelloCommand;
use member_mode::MemberArgs;

const DEFAULT_LOG_FILTER: &str = "info,tandemd=debug,tandem=debug";

#[derive(Parser, Debug)]
#[command(name = "tandemd", about = "Tandem daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "TANDEM_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an embedded cluster member.
    Member(MemberArgs),

    /// Serve or call the hello service.
    Hello {
        #[command(subcommand)]
        command: HelloCommand,
    },

    /// Generate a development CA with server and client certificates.
    Certs {
        /// Directory to write ca.pem, server.pem/.key and client.pem/.key.
        #[arg(long)]
        out: PathBuf,

        /// DNS name or IP for the server certificate (repeatable).
        #[arg(long = "server-name", default_value = "localhost")]
        server_names: Vec<String>,
    },
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    // stdout carries command output; logs go to stderr.
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Member(args) => member_mode::run(args).await,
        Command::Hello { command } => hello_mode::run(command).await,
        Command::Certs { out, server_names } => hello_mode::write_certs(&out, &server_names),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn certs_defaults_to_localhost() {
        let cli = Cli::try_parse_from(["tandemd", "certs", "--out", "/tmp/c"]).unwrap();
        match cli.command {
            Command::Certs { out, server_names } => {
                assert_eq!(out, PathBuf::from("/tmp/c"));
                assert_eq!(server_names, vec!["localhost".to_string()]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn certs_accepts_several_server_names() {
        let cli = Cli::try_parse_from([
            "tandemd",
            "certs",
            "--out",
            "c",
            "--server-name",
            "localhost",
            "--server-name",
            "127.0.0.1",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Command::Certs { server_names, .. } if server_names.len() == 2
        ));
    }

    #[test]
    fn member_flags_parse() {
        let cli = Cli::try_parse_from([
            "tandemd",
            "member",
            "--name",
            "infra1",
            "--cluster-state",
            "existing",
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Member(_)));
    }

    #[test]
    fn unknown_cluster_state_is_rejected() {
        let err = Cli::try_parse_from(["tandemd", "member", "--cluster-state", "sideways"]);
        assert!(err.is_err());
    }
}
