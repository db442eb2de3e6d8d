//! `tandemd member`: run an embedded cluster member in the foreground.

use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use tandem_embed::*;
use tracing::info;

#[derive(Args, Debug, Clone, Default)]
pub struct MemberArgs {
    /// TOML member configuration; flags below override its values.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Member name, unique within the cluster.
    #[arg(long)]
    pub name: Option<String>,

    /// Directory for the member's persistent state.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,

    /// host:port for the client service.
    #[arg(long)]
    pub client_addr: Option<String>,

    /// host:port for the peer service.
    #[arg(long)]
    pub peer_addr: Option<String>,

    /// Initial membership as name=host:port,name=host:port.
    #[arg(long)]
    pub initial_cluster: Option<String>,

    /// `new` to bootstrap a cluster, `existing` to join one.
    #[arg(long)]
    pub cluster_state: Option<ClusterState>,

    /// User created with the root role once the member is ready.
    #[arg(long, default_value = "root")]
    pub root_user: String,

    /// Enable authentication with this root password once ready.
    #[arg(long, env = "TANDEM_ROOT_PASSWORD")]
    pub root_password: Option<String>,
}

impl MemberArgs {
    /// Resolve the member configuration: file (or defaults), then flags.
    ///
    /// Without a file or `--initial-cluster`, the member forms a cluster of
    /// one under its own name.
    pub fn to_config(&self) -> anyhow::Result<EmbedConfig> {
        let mut config = match &self.config {
            Some(path) => EmbedConfig::from_file(path)?,
            None => EmbedConfig::default(),
        };

        if let Some(name) = &self.name {
            config.apply(with_name(name.clone()));
        }
        if let Some(dir) = &self.data_dir {
            config.apply(with_dir(dir.clone()));
        }
        if let Some(addr) = &self.client_addr {
            config.apply(with_client_addr(addr.clone()));
        }
        if let Some(addr) = &self.peer_addr {
            config.apply(with_peer_addr(addr.clone()));
        }
        if let Some(state) = self.cluster_state {
            config.apply(with_cluster_state(state));
        }

        match &self.initial_cluster {
            Some(spec) => config.apply(with_cluster(parse_initial_cluster(spec)?)),
            None if self.config.is_none() => config.apply(with_cluster([(
                config.name.clone(),
                config.peer_addr.clone(),
            )])),
            None => {}
        }

        config.validate()?;
        Ok(config)
    }
}

pub async fn run(args: MemberArgs) -> anyhow::Result<()> {
    let config = args.to_config()?;
    info!(
        name = %config.name,
        data_dir = %config.data_dir.display(),
        cluster_state = %config.cluster_state,
        "tandem member starting"
    );

    let embed = Embed::new();
    embed
        .init_with(config)
        .await
        .context("failed to initialize member")?;

    let (mut handle, ready) = embed.start();
    if ready.await.is_err() {
        // The ready sender is only dropped unsent when run fails early.
        handle.await??;
        anyhow::bail!("member stopped before becoming ready");
    }
    info!(
        member_id = embed.member_id().unwrap_or_default(),
        cluster_id = embed.cluster_id().unwrap_or_default(),
        "member is ready"
    );

    if let Some(password) = &args.root_password {
        if let Err(e) = enable_root(&embed, &args.root_user, password).await {
            embed.stop();
            let _ = handle.await;
            return Err(e);
        }
    }

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            info!("shutdown signal received");
            embed.stop();
            handle.await??;
        }
        result = &mut handle => result??,
    }

    info!("tandem member stopped");
    Ok(())
}

async fn enable_root(embed: &Embed, user: &str, password: &str) -> anyhow::Result<()> {
    if embed.auth_enabled()? {
        info!("authentication already enabled, keeping existing root user");
        return Ok(());
    }
    embed
        .set_auth(user, password)
        .await
        .context("failed to enable root authentication")
}
