//! tandem-embed: a cluster member that runs inside the host process.
//!
//! The host builds an [`EmbedConfig`] (defaults plus [`EmbedOption`]s, or a
//! TOML file), calls [`Embed::init`], then [`Embed::run`] with a oneshot
//! sender that fires once both listeners are bound. Administrative calls
//! such as [`Embed::set_auth`] are only accepted after that point.
//!
//! - [`config`]: member configuration and validation.
//! - [`membership`]: cluster and member identity, join handling.
//! - [`peer`]: joining an existing cluster through one of its peers.
//! - [`server`]: gRPC client and peer services.
//! - [`auth`]: bcrypt password hashing for member users.

pub mod auth;
pub mod config;
pub mod embed;
pub mod error;
pub mod membership;
pub mod peer;
pub mod server;

/// Generated protobuf types and gRPC service stubs.
pub mod proto {
    tonic::include_proto!("tandem.member.v1");
}

pub use auth::ROOT_ROLE;
pub use config::{
    ClusterState, EmbedConfig, EmbedOption, parse_initial_cluster, with_client_addr, with_cluster,
    with_cluster_state, with_dir, with_name, with_peer_addr,
};
pub use embed::Embed;
pub use error::{EmbedError, EmbedResult};
pub use membership::MembershipManager;
