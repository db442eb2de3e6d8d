//! Domain types for the tandem state store.
//!
//! These types represent the persisted membership, identity and user records
//! of an embedded cluster member. All types are serializable to/from JSON
//! for storage in redb tables.

use serde::{Deserialize, Serialize};

/// Unique identifier for a member of the cluster (16 hex chars).
pub type MemberId = String;

/// Unique identifier for a cluster (16 hex chars).
pub type ClusterId = String;

// ── Membership ────────────────────────────────────────────────────

/// One member of the cluster as known to the local member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberRecord {
    pub id: MemberId,
    pub name: String,
    /// Peer address (host:port) other members use to reach this one.
    pub peer_addr: String,
    /// Client address, only known for the local member.
    pub client_addr: Option<String>,
    /// Unix timestamp (seconds) when this member was recorded.
    pub added_at: u64,
}

/// Identity of the local member, written once at bootstrap.
///
/// Its presence is what marks a data directory as already bootstrapped.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClusterMeta {
    pub cluster_id: ClusterId,
    pub member_id: MemberId,
    pub name: String,
    pub created_at: u64,
}

// ── Auth ──────────────────────────────────────────────────────────

/// A user allowed to authenticate against the member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserRecord {
    pub name: String,
    /// bcrypt hash of the password.
    pub password_hash: String,
    pub roles: Vec<String>,
    pub created_at: u64,
}

impl UserRecord {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}
