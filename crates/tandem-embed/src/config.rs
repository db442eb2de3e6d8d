//! Member configuration.
//!
//! An [`EmbedConfig`] is built once, validated, and then treated as
//! immutable for the life of the member. It can come from defaults plus
//! [`EmbedOption`]s, from a TOML file, or be filled in directly.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EmbedError, EmbedResult};

/// Whether the member is part of a brand-new cluster or joins one that
/// already runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterState {
    #[default]
    New,
    Existing,
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterState::New => f.write_str("new"),
            ClusterState::Existing => f.write_str("existing"),
        }
    }
}

impl FromStr for ClusterState {
    type Err = EmbedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(ClusterState::New),
            "existing" => Ok(ClusterState::Existing),
            other => Err(EmbedError::InvalidConfig(format!(
                "cluster state must be \"new\" or \"existing\", got {other:?}"
            ))),
        }
    }
}

/// Everything a member needs to start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbedConfig {
    /// Human-readable member name, unique within the cluster.
    pub name: String,
    /// Directory holding the member's persistent state.
    pub data_dir: PathBuf,
    /// `host:port` serving the client service.
    pub client_addr: String,
    /// `host:port` serving the peer service.
    pub peer_addr: String,
    pub cluster_state: ClusterState,
    /// Member name to peer address for every initial member, this one
    /// included.
    pub initial_cluster: BTreeMap<String, String>,
}

pub const DEFAULT_NAME: &str = "default";
pub const DEFAULT_DATA_DIR: &str = "default.tandem";
pub const DEFAULT_CLIENT_ADDR: &str = "127.0.0.1:2379";
pub const DEFAULT_PEER_ADDR: &str = "127.0.0.1:2380";

impl Default for EmbedConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            client_addr: DEFAULT_CLIENT_ADDR.to_string(),
            peer_addr: DEFAULT_PEER_ADDR.to_string(),
            cluster_state: ClusterState::New,
            initial_cluster: BTreeMap::from([(
                DEFAULT_NAME.to_string(),
                DEFAULT_PEER_ADDR.to_string(),
            )]),
        }
    }
}

/// One configuration override, applied on top of the defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EmbedOption {
    Name(String),
    Dir(PathBuf),
    ClientAddr(String),
    PeerAddr(String),
    Cluster(BTreeMap<String, String>),
    ClusterState(ClusterState),
}

pub fn with_name(name: impl Into<String>) -> EmbedOption {
    EmbedOption::Name(name.into())
}

pub fn with_dir(dir: impl Into<PathBuf>) -> EmbedOption {
    EmbedOption::Dir(dir.into())
}

pub fn with_client_addr(addr: impl Into<String>) -> EmbedOption {
    EmbedOption::ClientAddr(addr.into())
}

pub fn with_peer_addr(addr: impl Into<String>) -> EmbedOption {
    EmbedOption::PeerAddr(addr.into())
}

/// Replace the initial membership map.
pub fn with_cluster<K, V>(members: impl IntoIterator<Item = (K, V)>) -> EmbedOption
where
    K: Into<String>,
    V: Into<String>,
{
    EmbedOption::Cluster(
        members
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect(),
    )
}

pub fn with_cluster_state(state: ClusterState) -> EmbedOption {
    EmbedOption::ClusterState(state)
}

impl EmbedConfig {
    /// Defaults with `options` applied in order; later options win.
    pub fn from_options(options: impl IntoIterator<Item = EmbedOption>) -> Self {
        let mut config = Self::default();
        for option in options {
            config.apply(option);
        }
        config
    }

    pub fn apply(&mut self, option: EmbedOption) {
        match option {
            EmbedOption::Name(name) => self.name = name,
            EmbedOption::Dir(dir) => self.data_dir = dir,
            EmbedOption::ClientAddr(addr) => self.client_addr = addr,
            EmbedOption::PeerAddr(addr) => self.peer_addr = addr,
            EmbedOption::Cluster(members) => self.initial_cluster = members,
            EmbedOption::ClusterState(state) => self.cluster_state = state,
        }
    }

    /// Load from a TOML file. Keys missing from the file keep their
    /// defaults.
    pub fn from_file(path: &Path) -> EmbedResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| EmbedError::ConfigFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| EmbedError::ConfigFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    pub fn to_toml_string(&self) -> EmbedResult<String> {
        toml::to_string_pretty(self).map_err(|e| EmbedError::InvalidConfig(e.to_string()))
    }

    /// Check that the configuration is fully populated and self-consistent.
    pub fn validate(&self) -> EmbedResult<()> {
        check_member_name(&self.name)?;
        if self.data_dir.as_os_str().is_empty() {
            return Err(EmbedError::InvalidConfig("data dir must not be empty".into()));
        }
        check_host_port("client address", &self.client_addr)?;
        check_host_port("peer address", &self.peer_addr)?;
        // Port 0 asks the OS for a fresh port on each bind.
        if self.client_addr == self.peer_addr && !self.client_addr.ends_with(":0") {
            return Err(EmbedError::InvalidConfig(format!(
                "client and peer address must differ, both are {}",
                self.client_addr
            )));
        }

        if self.initial_cluster.is_empty() {
            return Err(EmbedError::InvalidConfig(
                "initial cluster must not be empty".into(),
            ));
        }
        for (name, addr) in &self.initial_cluster {
            check_member_name(name)?;
            check_host_port(&format!("initial cluster entry {name}"), addr)?;
        }
        match self.initial_cluster.get(&self.name) {
            None => Err(EmbedError::InvalidConfig(format!(
                "initial cluster has no entry for this member ({})",
                self.name
            ))),
            Some(addr) if addr != &self.peer_addr => Err(EmbedError::InvalidConfig(format!(
                "initial cluster maps {} to {addr}, but the peer address is {}",
                self.name, self.peer_addr
            ))),
            Some(_) => Ok(()),
        }
    }

    /// Path of the member's state database.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("member.redb")
    }
}

/// Characters that separate fields when member and cluster IDs are derived.
const RESERVED_CHARS: [char; 3] = [',', '=', '/'];

fn has_reserved(value: &str) -> bool {
    value.contains(RESERVED_CHARS) || value.chars().any(char::is_whitespace)
}

/// Member names must be non-empty and free of `,`, `=`, `/` and whitespace.
pub fn check_member_name(name: &str) -> EmbedResult<()> {
    if name.is_empty() {
        return Err(EmbedError::InvalidConfig("name must not be empty".into()));
    }
    if has_reserved(name) {
        return Err(EmbedError::InvalidConfig(format!(
            "name {name:?} must not contain ',', '=', '/' or whitespace"
        )));
    }
    Ok(())
}

/// `host:port` with a non-empty host free of `,`, `=`, `/` and whitespace.
pub fn check_host_port(what: &str, addr: &str) -> EmbedResult<()> {
    let valid = match addr.rsplit_once(':') {
        Some((host, port)) => {
            !host.is_empty() && !has_reserved(host) && port.parse::<u16>().is_ok()
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(EmbedError::InvalidConfig(format!(
            "{what} must be host:port, got {addr:?}"
        )))
    }
}

/// Parse `name=host:port,name=host:port` into a membership map.
pub fn parse_initial_cluster(spec: &str) -> EmbedResult<BTreeMap<String, String>> {
    let mut members = BTreeMap::new();
    for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let (name, addr) = entry.split_once('=').ok_or_else(|| {
            EmbedError::InvalidConfig(format!("initial cluster entry {entry:?} is not name=addr"))
        })?;
        if members
            .insert(name.trim().to_string(), addr.trim().to_string())
            .is_some()
        {
            return Err(EmbedError::InvalidConfig(format!(
                "initial cluster lists {name} twice"
            )));
        }
    }
    Ok(members)
}
