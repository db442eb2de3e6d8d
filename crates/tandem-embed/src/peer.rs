//! Joining an existing cluster.
//!
//! A member started with `cluster_state = existing` has no identity of its
//! own yet. It asks the other members listed in its initial cluster, one at
//! a time, to record it; the first member that accepts supplies the cluster
//! ID and the current membership.

use std::time::Duration;

use tonic::transport::Endpoint;
use tracing::{info, warn};

use crate::config::EmbedConfig;
use crate::error::{EmbedError, EmbedResult};
use crate::proto;
use crate::proto::peer_service_client::PeerServiceClient;

/// How long to wait for each peer's TCP connect.
pub const JOIN_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Send a join request to a single peer.
pub async fn join_via(
    peer_addr: &str,
    name: &str,
    own_peer_addr: &str,
) -> EmbedResult<proto::ClusterView> {
    let uri = format!("http://{peer_addr}");
    let endpoint = Endpoint::from_shared(uri)
        .map_err(|e| EmbedError::InvalidConfig(format!("peer address {peer_addr}: {e}")))?
        .connect_timeout(JOIN_CONNECT_TIMEOUT);

    let channel = endpoint.connect().await?;
    let mut client = PeerServiceClient::new(channel);
    let view = client
        .join(proto::JoinRequest {
            name: name.to_string(),
            peer_addr: own_peer_addr.to_string(),
        })
        .await
        .map_err(|status| {
            EmbedError::Bootstrap(format!("{peer_addr} refused join: {}", status.message()))
        })?
        .into_inner();

    Ok(view)
}

/// Try every other initial member once, in name order.
pub async fn join_existing(config: &EmbedConfig) -> EmbedResult<proto::ClusterView> {
    let peers: Vec<(&String, &String)> = config
        .initial_cluster
        .iter()
        .filter(|(name, _)| **name != config.name)
        .collect();

    if peers.is_empty() {
        return Err(EmbedError::Bootstrap(
            "initial cluster lists no other member to join through".into(),
        ));
    }

    for (name, addr) in peers {
        match join_via(addr, &config.name, &config.peer_addr).await {
            Ok(view) => {
                info!(peer = %name, %addr, cluster_id = %view.cluster_id, "joined through peer");
                return Ok(view);
            }
            Err(e) => warn!(peer = %name, %addr, error = %e, "join attempt failed"),
        }
    }

    Err(EmbedError::Bootstrap(format!(
        "no reachable peer in initial cluster for {}",
        config.name
    )))
}
