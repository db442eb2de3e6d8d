//! Membership manager: cluster identity and the member list.
//!
//! Identifiers are derived, not random: every member of a new cluster
//! computes the same cluster ID from the same initial membership, and a
//! member's ID depends only on the cluster, its name and its peer address.

use std::time::{SystemTime, UNIX_EPOCH};

use sha2::{Digest, Sha256};
use tandem_state::*;
use tracing::info;

use crate::config::EmbedConfig;
use crate::error::{EmbedError, EmbedResult};
use crate::proto;

/// First 8 bytes of SHA-256 over `input`, hex encoded.
fn short_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    hex::encode(&digest[..8])
}

/// Cluster ID for a brand-new cluster with the given initial membership.
pub fn cluster_id<'a>(members: impl IntoIterator<Item = (&'a String, &'a String)>) -> ClusterId {
    let mut pairs: Vec<String> = members
        .into_iter()
        .map(|(name, addr)| format!("{name}={addr}"))
        .collect();
    pairs.sort();
    short_hash(&pairs.join(","))
}

pub fn member_id(cluster_id: &str, name: &str, peer_addr: &str) -> MemberId {
    short_hash(&format!("{cluster_id}/{name}/{peer_addr}"))
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn to_proto(member: &MemberRecord) -> proto::Member {
    proto::Member {
        id: member.id.clone(),
        name: member.name.clone(),
        peer_addr: member.peer_addr.clone(),
        client_addr: member.client_addr.clone().unwrap_or_default(),
    }
}

fn from_proto(member: proto::Member, added_at: u64) -> MemberRecord {
    MemberRecord {
        id: member.id,
        name: member.name,
        peer_addr: member.peer_addr,
        client_addr: Some(member.client_addr).filter(|a| !a.is_empty()),
        added_at,
    }
}

/// Manages the persisted cluster identity and membership.
#[derive(Clone)]
pub struct MembershipManager {
    state: StateStore,
}

impl MembershipManager {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Local identity, if this member has been bootstrapped.
    pub fn meta(&self) -> EmbedResult<Option<ClusterMeta>> {
        Ok(self.state.get_meta()?)
    }

    /// Bootstrap a new cluster from the configured initial membership.
    pub fn bootstrap_new(&self, config: &EmbedConfig) -> EmbedResult<ClusterMeta> {
        let cluster_id = cluster_id(&config.initial_cluster);
        let now = epoch_secs();

        let members: Vec<MemberRecord> = config
            .initial_cluster
            .iter()
            .map(|(name, peer_addr)| MemberRecord {
                id: member_id(&cluster_id, name, peer_addr),
                name: name.clone(),
                peer_addr: peer_addr.clone(),
                client_addr: (name == &config.name).then(|| config.client_addr.clone()),
                added_at: now,
            })
            .collect();

        let meta = ClusterMeta {
            member_id: member_id(&cluster_id, &config.name, &config.peer_addr),
            cluster_id,
            name: config.name.clone(),
            created_at: now,
        };
        self.state.bootstrap(&meta, &members)?;

        info!(
            cluster_id = %meta.cluster_id,
            member_id = %meta.member_id,
            members = members.len(),
            "bootstrapped new cluster"
        );
        Ok(meta)
    }

    /// Bootstrap from the view returned by an existing member after it
    /// accepted our join.
    pub fn bootstrap_from_view(
        &self,
        config: &EmbedConfig,
        view: proto::ClusterView,
    ) -> EmbedResult<ClusterMeta> {
        if view.cluster_id.is_empty() {
            return Err(EmbedError::Bootstrap("peer returned an empty cluster id".into()));
        }

        let now = epoch_secs();
        let local_id = member_id(&view.cluster_id, &config.name, &config.peer_addr);
        let mut members: Vec<MemberRecord> = view
            .members
            .into_iter()
            .map(|m| from_proto(m, now))
            .collect();

        match members.iter_mut().find(|m| m.id == local_id) {
            Some(local) => local.client_addr = Some(config.client_addr.clone()),
            None => {
                return Err(EmbedError::Bootstrap(format!(
                    "peer view of cluster {} does not include {}",
                    view.cluster_id, config.name
                )));
            }
        }

        let meta = ClusterMeta {
            cluster_id: view.cluster_id,
            member_id: local_id,
            name: config.name.clone(),
            created_at: now,
        };
        self.state.bootstrap(&meta, &members)?;

        info!(
            cluster_id = %meta.cluster_id,
            member_id = %meta.member_id,
            members = members.len(),
            "joined existing cluster"
        );
        Ok(meta)
    }

    /// Record a member that asked to join.
    ///
    /// Joining again with the same name and address is a no-op; reusing a
    /// name with a different address is rejected.
    pub fn join(&self, name: &str, peer_addr: &str) -> EmbedResult<MemberRecord> {
        let meta = self.state.get_meta()?.ok_or(EmbedError::NotInitialized)?;

        let candidate = MemberRecord {
            id: member_id(&meta.cluster_id, name, peer_addr),
            name: name.to_string(),
            peer_addr: peer_addr.to_string(),
            client_addr: None,
            added_at: epoch_secs(),
        };
        let member = self.state.insert_member_unique(&candidate)?;
        info!(%name, %peer_addr, member_id = %member.id, "member joined");
        Ok(member)
    }

    pub fn list_members(&self) -> EmbedResult<Vec<MemberRecord>> {
        Ok(self.state.list_members()?)
    }

    /// Cluster ID plus members, as served to peers.
    pub fn view(&self) -> EmbedResult<proto::ClusterView> {
        let meta = self.state.get_meta()?.ok_or(EmbedError::NotInitialized)?;
        Ok(proto::ClusterView {
            cluster_id: meta.cluster_id,
            members: self.list_members()?.iter().map(to_proto).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;
    use std::collections::BTreeMap;

    fn three_node_config(name: &str, peer: &str) -> EmbedConfig {
        EmbedConfig::from_options([
            with_name(name),
            with_client_addr("127.0.0.1:2379"),
            with_peer_addr(peer),
            with_cluster([
                ("infra0", "10.0.0.1:2380"),
                ("infra1", "10.0.0.2:2380"),
                ("infra2", "10.0.0.3:2380"),
            ]),
        ])
    }

    fn manager() -> MembershipManager {
        MembershipManager::new(StateStore::open_in_memory().unwrap())
    }

    #[test]
    fn cluster_id_is_order_independent() {
        let a = BTreeMap::from([
            ("x".to_string(), "1.1.1.1:1".to_string()),
            ("y".to_string(), "2.2.2.2:2".to_string()),
        ]);
        let reversed: Vec<(&String, &String)> = a.iter().rev().collect();
        assert_eq!(cluster_id(&a), cluster_id(reversed));
        assert_eq!(cluster_id(&a).len(), 16);
    }

    #[test]
    fn cluster_id_depends_on_membership() {
        let a = BTreeMap::from([("x".to_string(), "1.1.1.1:1".to_string())]);
        let b = BTreeMap::from([("x".to_string(), "1.1.1.1:2".to_string())]);
        assert_ne!(cluster_id(&a), cluster_id(&b));
    }

    #[test]
    fn all_initial_members_agree_on_cluster_id() {
        let m0 = manager()
            .bootstrap_new(&three_node_config("infra0", "10.0.0.1:2380"))
            .unwrap();
        let m1 = manager()
            .bootstrap_new(&three_node_config("infra1", "10.0.0.2:2380"))
            .unwrap();

        assert_eq!(m0.cluster_id, m1.cluster_id);
        assert_ne!(m0.member_id, m1.member_id);
    }

    #[test]
    fn bootstrap_new_persists_members() {
        let mgr = manager();
        let meta = mgr
            .bootstrap_new(&three_node_config("infra1", "10.0.0.2:2380"))
            .unwrap();

        let members = mgr.list_members().unwrap();
        assert_eq!(members.len(), 3);
        let local = members.iter().find(|m| m.id == meta.member_id).unwrap();
        assert_eq!(local.name, "infra1");
        assert_eq!(local.client_addr.as_deref(), Some("127.0.0.1:2379"));
        assert!(members.iter().filter(|m| m.id != meta.member_id).all(|m| m.client_addr.is_none()));
    }

    #[test]
    fn join_is_idempotent_per_address() {
        let mgr = manager();
        mgr.bootstrap_new(&EmbedConfig::default()).unwrap();

        let first = mgr.join("infra9", "10.0.0.9:2380").unwrap();
        let again = mgr.join("infra9", "10.0.0.9:2380").unwrap();
        assert_eq!(first, again);
        assert_eq!(mgr.list_members().unwrap().len(), 2);

        let err = mgr.join("infra9", "10.0.0.10:2380").unwrap_err();
        assert!(matches!(err, EmbedError::State(StateError::AlreadyExists(_))));
    }

    #[test]
    fn concurrent_joins_with_one_name_admit_one_address() {
        use std::sync::{Arc, Barrier};

        for _ in 0..50 {
            let mgr = manager();
            mgr.bootstrap_new(&EmbedConfig::default()).unwrap();
            let barrier = Arc::new(Barrier::new(4));

            let joins: Vec<_> = (0..4)
                .map(|i| {
                    let mgr = mgr.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        barrier.wait();
                        mgr.join("infra9", &format!("10.0.0.{i}:2380")).is_ok()
                    })
                })
                .collect();
            let admitted = joins
                .into_iter()
                .map(|j| j.join().unwrap())
                .filter(|ok| *ok)
                .count();

            assert_eq!(admitted, 1);
            let named: Vec<_> = mgr
                .list_members()
                .unwrap()
                .into_iter()
                .filter(|m| m.name == "infra9")
                .collect();
            assert_eq!(named.len(), 1);
        }
    }

    #[test]
    fn join_before_bootstrap_fails() {
        let err = manager().join("infra9", "10.0.0.9:2380").unwrap_err();
        assert!(matches!(err, EmbedError::NotInitialized));
    }

    #[test]
    fn bootstrap_from_view_adopts_cluster_id() {
        let seed = manager();
        seed.bootstrap_new(&three_node_config("infra0", "10.0.0.1:2380"))
            .unwrap();
        seed.join("infra3", "10.0.0.4:2380").unwrap();
        let view = seed.view().unwrap();

        let mut config = three_node_config("infra0", "10.0.0.1:2380");
        config.name = "infra3".into();
        config.peer_addr = "10.0.0.4:2380".into();
        config.initial_cluster.insert("infra3".into(), "10.0.0.4:2380".into());

        let joiner = manager();
        let meta = joiner.bootstrap_from_view(&config, view.clone()).unwrap();
        assert_eq!(meta.cluster_id, view.cluster_id);
        assert_eq!(joiner.list_members().unwrap().len(), 4);
    }

    #[test]
    fn bootstrap_from_view_requires_self() {
        let seed = manager();
        seed.bootstrap_new(&EmbedConfig::default()).unwrap();
        let view = seed.view().unwrap();

        let config = three_node_config("infra1", "10.0.0.2:2380");
        let err = manager().bootstrap_from_view(&config, view).unwrap_err();
        assert!(matches!(err, EmbedError::Bootstrap(_)));
    }
}
