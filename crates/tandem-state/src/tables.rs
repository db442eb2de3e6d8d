//! redb table definitions for the tandem state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Shape shared by every table in the store.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Cluster members keyed by `{member_id}`.
pub const MEMBERS: JsonTable = TableDefinition::new("members");

/// Local member identity under the single key [`LOCAL_META_KEY`].
pub const META: JsonTable = TableDefinition::new("meta");

/// Users keyed by `{name}`.
pub const USERS: JsonTable = TableDefinition::new("users");

/// Member-wide settings keyed by setting name.
pub const SETTINGS: JsonTable = TableDefinition::new("settings");

pub const LOCAL_META_KEY: &str = "local";

pub const AUTH_ENABLED_KEY: &str = "auth_enabled";
