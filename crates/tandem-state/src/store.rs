//! StateStore: redb-backed state persistence for a tandem member.
//!
//! Provides typed CRUD operations over members, the local identity, users
//! and settings. All values are JSON-serialized into redb's `&[u8]` value
//! columns. The store supports both on-disk and in-memory backends (the
//! latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(MEMBERS).map_err(map_err!(Table))?;
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.open_table(USERS).map_err(map_err!(Table))?;
        txn.open_table(SETTINGS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn put<T: Serialize>(
        &self,
        def: JsonTable,
        key: &str,
        value: &T,
    ) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(
        &self,
        def: JsonTable,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list<T: DeserializeOwned>(
        &self,
        def: JsonTable,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            results.push(serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?);
        }
        Ok(results)
    }

    // ── Members ────────────────────────────────────────────────────

    /// Insert or update a member record.
    pub fn put_member(&self, member: &MemberRecord) -> StateResult<()> {
        self.put(MEMBERS, &member.id, member)?;
        debug!(member_id = %member.id, name = %member.name, "member stored");
        Ok(())
    }

    /// Get a member by ID.
    pub fn get_member(&self, member_id: &str) -> StateResult<Option<MemberRecord>> {
        self.get(MEMBERS, member_id)
    }

    /// List all members, ordered by member ID.
    pub fn list_members(&self) -> StateResult<Vec<MemberRecord>> {
        self.list(MEMBERS)
    }

    /// Find a member by its human-readable name.
    pub fn find_member_by_name(&self, name: &str) -> StateResult<Option<MemberRecord>> {
        Ok(self.list_members()?.into_iter().find(|m| m.name == name))
    }

    /// Insert `member` unless another member already uses its name, with the
    /// name check and the insert in one write transaction.
    ///
    /// A member with the same name and peer address counts as already
    /// present and is returned unchanged. The same name at a different peer
    /// address fails with [`StateError::AlreadyExists`].
    pub fn insert_member_unique(&self, member: &MemberRecord) -> StateResult<MemberRecord> {
        let value = serde_json::to_vec(member).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(MEMBERS).map_err(map_err!(Table))?;
            let mut existing: Option<MemberRecord> = None;
            for entry in table.iter().map_err(map_err!(Read))? {
                let (_, stored) = entry.map_err(map_err!(Read))?;
                let record: MemberRecord =
                    serde_json::from_slice(stored.value()).map_err(map_err!(Deserialize))?;
                if record.name == member.name {
                    existing = Some(record);
                    break;
                }
            }

            match existing {
                Some(record) if record.peer_addr == member.peer_addr => return Ok(record),
                Some(record) => {
                    return Err(StateError::AlreadyExists(format!(
                        "member {} at {}",
                        record.name, record.peer_addr
                    )));
                }
                None => {
                    table
                        .insert(member.id.as_str(), value.as_slice())
                        .map_err(map_err!(Write))?;
                }
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(member_id = %member.id, name = %member.name, "member inserted");
        Ok(member.clone())
    }

    /// Delete a member by ID. Returns true if it existed.
    pub fn remove_member(&self, member_id: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(MEMBERS).map_err(map_err!(Table))?;
            existed = table.remove(member_id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%member_id, existed, "member removed");
        Ok(existed)
    }

    // ── Local identity ─────────────────────────────────────────────

    /// Persist the local member identity.
    pub fn put_meta(&self, meta: &ClusterMeta) -> StateResult<()> {
        self.put(META, LOCAL_META_KEY, meta)
    }

    /// The local member identity, `None` if this store was never bootstrapped.
    pub fn get_meta(&self) -> StateResult<Option<ClusterMeta>> {
        self.get(META, LOCAL_META_KEY)
    }

    /// Write the local identity together with the full membership in one
    /// transaction, so a crash never leaves a half-bootstrapped store.
    pub fn bootstrap(&self, meta: &ClusterMeta, members: &[MemberRecord]) -> StateResult<()> {
        let meta_value = serde_json::to_vec(meta).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut meta_table = txn.open_table(META).map_err(map_err!(Table))?;
            if meta_table
                .get(LOCAL_META_KEY)
                .map_err(map_err!(Read))?
                .is_some()
            {
                return Err(StateError::AlreadyExists("cluster metadata".to_string()));
            }
            meta_table
                .insert(LOCAL_META_KEY, meta_value.as_slice())
                .map_err(map_err!(Write))?;

            let mut members_table = txn.open_table(MEMBERS).map_err(map_err!(Table))?;
            for member in members {
                let value = serde_json::to_vec(member).map_err(map_err!(Serialize))?;
                members_table
                    .insert(member.id.as_str(), value.as_slice())
                    .map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            cluster_id = %meta.cluster_id,
            member_id = %meta.member_id,
            members = members.len(),
            "store bootstrapped"
        );
        Ok(())
    }

    // ── Users ──────────────────────────────────────────────────────

    /// Insert or update a user.
    pub fn put_user(&self, user: &UserRecord) -> StateResult<()> {
        self.put(USERS, &user.name, user)
    }

    /// Get a user by name.
    pub fn get_user(&self, name: &str) -> StateResult<Option<UserRecord>> {
        self.get(USERS, name)
    }

    /// List all users.
    pub fn list_users(&self) -> StateResult<Vec<UserRecord>> {
        self.list(USERS)
    }

    // ── Settings ───────────────────────────────────────────────────

    /// Turn authentication on or off.
    pub fn set_auth_enabled(&self, enabled: bool) -> StateResult<()> {
        self.put(SETTINGS, AUTH_ENABLED_KEY, &enabled)
    }

    /// Whether authentication is enabled. Defaults to false.
    pub fn auth_enabled(&self) -> StateResult<bool> {
        Ok(self.get(SETTINGS, AUTH_ENABLED_KEY)?.unwrap_or(false))
    }

    /// Create `user` and enable authentication in a single write
    /// transaction.
    ///
    /// Fails with [`StateError::AlreadyExists`] if authentication is already
    /// enabled or a user with the same name exists. redb serializes write
    /// transactions, so concurrent callers cannot both succeed.
    pub fn enable_root_auth(&self, user: &UserRecord) -> StateResult<()> {
        let user_value = serde_json::to_vec(user).map_err(map_err!(Serialize))?;
        let enabled_value = serde_json::to_vec(&true).map_err(map_err!(Serialize))?;

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut settings = txn.open_table(SETTINGS).map_err(map_err!(Table))?;
            let already_enabled = match settings.get(AUTH_ENABLED_KEY).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice::<bool>(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => false,
            };
            if already_enabled {
                return Err(StateError::AlreadyExists("authentication".to_string()));
            }

            let mut users = txn.open_table(USERS).map_err(map_err!(Table))?;
            if users.get(user.name.as_str()).map_err(map_err!(Read))?.is_some() {
                return Err(StateError::AlreadyExists(format!("user {}", user.name)));
            }
            users
                .insert(user.name.as_str(), user_value.as_slice())
                .map_err(map_err!(Write))?;
            settings
                .insert(AUTH_ENABLED_KEY, enabled_value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(user = %user.name, "authentication enabled");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_member(id: &str, name: &str) -> MemberRecord {
        MemberRecord {
            id: id.to_string(),
            name: name.to_string(),
            peer_addr: "127.0.0.1:2380".to_string(),
            client_addr: None,
            added_at: 1000,
        }
    }

    fn test_meta() -> ClusterMeta {
        ClusterMeta {
            cluster_id: "c0ffee0000000001".to_string(),
            member_id: "a1".to_string(),
            name: "infra0".to_string(),
            created_at: 1000,
        }
    }

    fn test_user(name: &str) -> UserRecord {
        UserRecord {
            name: name.to_string(),
            password_hash: "$2b$10$placeholderplaceholderplaceholderplaceholde".to_string(),
            roles: vec!["root".to_string()],
            created_at: 1000,
        }
    }

    // ── Members ────────────────────────────────────────────────────

    #[test]
    fn member_put_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_member(&test_member("a1", "infra0")).unwrap();

        let got = store.get_member("a1").unwrap().unwrap();
        assert_eq!(got.name, "infra0");
        assert!(store.get_member("missing").unwrap().is_none());
    }

    #[test]
    fn member_list_and_find_by_name() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_member(&test_member("a1", "infra0")).unwrap();
        store.put_member(&test_member("b2", "infra1")).unwrap();

        assert_eq!(store.list_members().unwrap().len(), 2);
        let found = store.find_member_by_name("infra1").unwrap().unwrap();
        assert_eq!(found.id, "b2");
        assert!(store.find_member_by_name("infra9").unwrap().is_none());
    }

    #[test]
    fn insert_member_unique_rejects_taken_name() {
        let store = StateStore::open_in_memory().unwrap();
        let first = test_member("a1", "infra0");
        assert_eq!(store.insert_member_unique(&first).unwrap(), first);

        // Same name and address: the stored record comes back.
        let again = MemberRecord {
            id: "other".to_string(),
            ..first.clone()
        };
        assert_eq!(store.insert_member_unique(&again).unwrap(), first);

        let moved = MemberRecord {
            id: "b2".to_string(),
            peer_addr: "127.0.0.2:2380".to_string(),
            ..first.clone()
        };
        let err = store.insert_member_unique(&moved).unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists(_)));
        assert_eq!(store.list_members().unwrap(), vec![first]);
    }

    #[test]
    fn concurrent_unique_inserts_keep_one_record_per_name() {
        use std::sync::Barrier;

        for _ in 0..50 {
            let store = StateStore::open_in_memory().unwrap();
            let barrier = Arc::new(Barrier::new(4));
            let workers: Vec<_> = (0..4)
                .map(|i| {
                    let store = store.clone();
                    let barrier = barrier.clone();
                    std::thread::spawn(move || {
                        let member = MemberRecord {
                            id: format!("id{i}"),
                            name: "infra9".to_string(),
                            peer_addr: format!("10.0.0.{i}:2380"),
                            client_addr: None,
                            added_at: 1000,
                        };
                        barrier.wait();
                        store.insert_member_unique(&member).is_ok()
                    })
                })
                .collect();

            let wins = workers
                .into_iter()
                .map(|w| w.join().unwrap())
                .filter(|ok| *ok)
                .count();
            assert_eq!(wins, 1);
            assert_eq!(store.list_members().unwrap().len(), 1);
        }
    }

    #[test]
    fn member_remove() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_member(&test_member("a1", "infra0")).unwrap();

        assert!(store.remove_member("a1").unwrap());
        assert!(!store.remove_member("a1").unwrap());
        assert!(store.list_members().unwrap().is_empty());
    }

    // ── Bootstrap ──────────────────────────────────────────────────

    #[test]
    fn fresh_store_has_no_meta() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(store.get_meta().unwrap().is_none());
    }

    #[test]
    fn bootstrap_writes_meta_and_members() {
        let store = StateStore::open_in_memory().unwrap();
        let members = vec![test_member("a1", "infra0"), test_member("b2", "infra1")];
        store.bootstrap(&test_meta(), &members).unwrap();

        assert_eq!(store.get_meta().unwrap().unwrap(), test_meta());
        assert_eq!(store.list_members().unwrap().len(), 2);
    }

    #[test]
    fn bootstrap_twice_is_rejected() {
        let store = StateStore::open_in_memory().unwrap();
        store.bootstrap(&test_meta(), &[]).unwrap();

        let err = store.bootstrap(&test_meta(), &[]).unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists(_)));
    }

    // ── Auth ───────────────────────────────────────────────────────

    #[test]
    fn auth_disabled_by_default() {
        let store = StateStore::open_in_memory().unwrap();
        assert!(!store.auth_enabled().unwrap());
        store.set_auth_enabled(true).unwrap();
        assert!(store.auth_enabled().unwrap());
    }

    #[test]
    fn enable_root_auth_creates_user_and_flag() {
        let store = StateStore::open_in_memory().unwrap();
        store.enable_root_auth(&test_user("root")).unwrap();

        assert!(store.auth_enabled().unwrap());
        let user = store.get_user("root").unwrap().unwrap();
        assert!(user.has_role("root"));
        assert_eq!(store.list_users().unwrap().len(), 1);
    }

    #[test]
    fn enable_root_auth_only_once() {
        let store = StateStore::open_in_memory().unwrap();
        store.enable_root_auth(&test_user("root")).unwrap();

        let err = store.enable_root_auth(&test_user("admin")).unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists(_)));
        assert!(store.get_user("admin").unwrap().is_none());
    }

    #[test]
    fn enable_root_auth_rejects_existing_user() {
        let store = StateStore::open_in_memory().unwrap();
        store.put_user(&test_user("root")).unwrap();

        let err = store.enable_root_auth(&test_user("root")).unwrap_err();
        assert!(matches!(err, StateError::AlreadyExists(_)));
        assert!(!store.auth_enabled().unwrap());
    }

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("member.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store
                .bootstrap(&test_meta(), &[test_member("a1", "infra0")])
                .unwrap();
            store.enable_root_auth(&test_user("root")).unwrap();
        }

        // Reopen the same database file.
        let store = StateStore::open(&db_path).unwrap();
        assert_eq!(store.get_meta().unwrap().unwrap().name, "infra0");
        assert_eq!(store.list_members().unwrap().len(), 1);
        assert!(store.auth_enabled().unwrap());
    }
}
