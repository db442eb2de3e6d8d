//! `tandemd hello` and `tandemd certs`: the mutually authenticated hello
//! service from the command line.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Subcommand};
use tandem_rpc::{ClientTarget, HelloClient, RpcServer};
use tandem_tls::{CredentialBundle, CredentialSource, DevCredentials, PemEnv, PemFiles};
use tokio::sync::oneshot;
use tracing::info;

/// Where to load this side's certificate, key and trusted CA from.
#[derive(Args, Debug, Clone, Default)]
pub struct CredentialArgs {
    /// PEM certificate chain.
    #[arg(long, requires_all = ["key", "ca"], conflicts_with = "creds_env")]
    pub cert: Option<PathBuf>,

    /// PEM private key.
    #[arg(long, requires_all = ["cert", "ca"])]
    pub key: Option<PathBuf>,

    /// PEM bundle of CAs trusted to issue the peer's certificate.
    #[arg(long, requires_all = ["cert", "key"])]
    pub ca: Option<PathBuf>,

    /// Read PEM text from PREFIX_CERT, PREFIX_KEY and PREFIX_CA.
    #[arg(long, value_name = "PREFIX")]
    pub creds_env: Option<String>,
}

impl CredentialArgs {
    pub fn source(&self) -> anyhow::Result<Box<dyn CredentialSource>> {
        match (&self.cert, &self.key, &self.ca, &self.creds_env) {
            (Some(cert), Some(key), Some(ca), None) => Ok(Box::new(PemFiles::new(
                cert.clone(),
                key.clone(),
                ca.clone(),
            ))),
            (None, None, None, Some(prefix)) => Ok(Box::new(PemEnv::new(prefix.clone()))),
            _ => anyhow::bail!(
                "credentials required: pass --cert, --key and --ca, or --creds-env PREFIX"
            ),
        }
    }

    pub fn load(&self) -> anyhow::Result<CredentialBundle> {
        let source = self.source()?;
        let bundle = source
            .load()
            .with_context(|| format!("failed to load credentials from {}", source.describe()))?;
        Ok(bundle)
    }
}

#[derive(Subcommand, Debug)]
pub enum HelloCommand {
    /// Serve the hello service, requiring client certificates.
    Serve {
        #[arg(long, default_value = "0.0.0.0:7890")]
        addr: SocketAddr,

        #[command(flatten)]
        creds: CredentialArgs,
    },

    /// Call the hello service repeatedly and print each reply.
    Call {
        #[arg(long, default_value = "127.0.0.1:7890")]
        addr: String,

        /// Name the server certificate must carry.
        #[arg(long, default_value = "localhost")]
        server_name: String,

        #[arg(long, default_value = "hello")]
        value: String,

        #[arg(long, default_value = "10")]
        count: usize,

        /// Seconds to wait for the TCP connect.
        #[arg(long, default_value = "5")]
        connect_timeout: u64,

        #[command(flatten)]
        creds: CredentialArgs,
    },

    /// Serve and call in one process with throwaway credentials.
    Demo {
        #[arg(long, default_value = "hello")]
        value: String,

        #[arg(long, default_value = "10")]
        count: usize,
    },
}

pub async fn run(command: HelloCommand) -> anyhow::Result<()> {
    match command {
        HelloCommand::Serve { addr, creds } => serve(addr, &creds.load()?).await,
        HelloCommand::Call {
            addr,
            server_name,
            value,
            count,
            connect_timeout,
            creds,
        } => {
            let target = ClientTarget::mutual(addr, &creds.load()?, &server_name)
                .with_connect_timeout(Duration::from_secs(connect_timeout));
            print_replies(&call(target, &value, count).await?);
            Ok(())
        }
        HelloCommand::Demo { value, count } => {
            print_replies(&demo(&value, count).await?);
            Ok(())
        }
    }
}

fn print_replies(replies: &[String]) {
    for reply in replies {
        println!("{reply}");
    }
}

async fn serve(addr: SocketAddr, credentials: &CredentialBundle) -> anyhow::Result<()> {
    let bound = RpcServer::builder().addr(addr).tls(credentials).bind().await?;
    info!(addr = %bound.local_addr(), "hello server listening, Ctrl-C to stop");

    bound
        .serve(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("shutdown signal received");
            }
        })
        .await?;
    Ok(())
}

pub async fn call(target: ClientTarget, value: &str, count: usize) -> anyhow::Result<Vec<String>> {
    let mut client = HelloClient::connect(target).await?;
    let replies = client
        .hello_repeatedly(value, count)
        .await
        .with_context(|| format!("hello call to {} failed", client.addr()))?;
    Ok(replies)
}

/// Mint credentials, serve on an ephemeral loopback port and call it from a
/// separate task.
pub async fn demo(value: &str, count: usize) -> anyhow::Result<Vec<String>> {
    let dev = DevCredentials::generate(&["localhost".to_string()])?;
    let bound = RpcServer::builder()
        .addr(SocketAddr::from(([127, 0, 0, 1], 0)))
        .tls(&dev.server_bundle()?)
        .bind()
        .await?;
    let addr = bound.local_addr();

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(bound.serve(async {
        let _ = stop_rx.await;
    }));

    let target = ClientTarget::mutual(addr.to_string(), &dev.client_bundle()?, "localhost");
    let value = value.to_string();
    let replies = tokio::spawn(async move { call(target, &value, count).await }).await?;

    let _ = stop_tx.send(());
    server.await??;
    replies
}

pub fn write_certs(out: &Path, server_names: &[String]) -> anyhow::Result<()> {
    let dev = DevCredentials::generate(server_names)?;
    dev.write_to(out)
        .with_context(|| format!("failed to write credentials to {}", out.display()))?;
    println!("wrote ca.pem, server.pem, server.key, client.pem, client.key to {}", out.display());
    Ok(())
}
