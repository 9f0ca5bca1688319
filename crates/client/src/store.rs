//! The in-memory entity cache.
//!
//! Two top-level maps (accounts, servers) plus the member and role maps
//! nested inside each server aggregate. The gateway read loop is the only
//! writer; everyone else reads cloned values, so readers never observe an
//! entity mid-mutation.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use chatwire_shared::{
    Account, Member, MemberPayload, OwnAccount, Role, Server, ServerCreate, Snowflake,
};

use crate::snapshot::{AccountSnapshot, MemberSnapshot, RoleSnapshot, ServerSnapshot};

#[derive(Default)]
struct StoreInner {
    own_account: Option<OwnAccount>,
    accounts: HashMap<Snowflake, Account>,
    servers: HashMap<Snowflake, Server>,
}

/// Result of writing a member through the store: the shared account, the
/// cached member, and a snapshot of whatever it replaced.
pub(crate) struct MemberWrite {
    pub account: Account,
    pub member: Member,
    pub previous: Option<MemberSnapshot>,
}

pub struct EntityStore {
    inner: RwLock<StoreInner>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
        }
    }

    // lookups

    pub async fn own_account(&self) -> Option<OwnAccount> {
        self.inner.read().await.own_account.clone()
    }

    pub async fn account(&self, id: Snowflake) -> Option<Account> {
        self.inner.read().await.accounts.get(&id).cloned()
    }

    pub async fn accounts(&self) -> Vec<Account> {
        self.inner.read().await.accounts.values().cloned().collect()
    }

    pub async fn server(&self, id: Snowflake) -> Option<Server> {
        self.inner.read().await.servers.get(&id).cloned()
    }

    pub async fn servers(&self) -> Vec<Server> {
        self.inner.read().await.servers.values().cloned().collect()
    }

    pub async fn member(&self, server_id: Snowflake, account_id: Snowflake) -> Option<Member> {
        self.inner
            .read()
            .await
            .servers
            .get(&server_id)
            .and_then(|server| server.members.get(&account_id))
            .cloned()
    }

    pub async fn role(&self, server_id: Snowflake, role_id: Snowflake) -> Option<Role> {
        self.inner
            .read()
            .await
            .servers
            .get(&server_id)
            .and_then(|server| server.roles.get(&role_id))
            .cloned()
    }

    /// Roles of a server in display order: ascending position, with the
    /// default role forced to the end regardless of its position value.
    pub async fn roles(&self, server_id: Snowflake) -> Option<Vec<Role>> {
        let inner = self.inner.read().await;
        let server = inner.servers.get(&server_id)?;
        let mut roles: Vec<Role> = server.roles.values().cloned().collect();
        roles.sort_by_key(|role| role.position);
        if let Some(index) = roles.iter().position(|role| role.id == server_id) {
            let default_role = roles.remove(index);
            roles.push(default_role);
        }
        Some(roles)
    }

    // mutations (gateway read loop only)

    /// Drops every cached entity. Used on full session invalidation, where
    /// the server guarantees no continuity of state.
    pub(crate) async fn clear(&self) {
        let mut inner = self.inner.write().await;
        let dropped = inner.servers.len();
        *inner = StoreInner::default();
        debug!(servers = dropped, "entity cache cleared");
    }

    pub(crate) async fn set_own_account(&self, own: OwnAccount) {
        let mut inner = self.inner.write().await;
        inner.accounts.insert(own.account.id, own.account.clone());
        inner.own_account = Some(own);
    }

    /// Applies an account update, returning before/after snapshots. Unknown
    /// accounts are ignored.
    pub(crate) async fn update_account(
        &self,
        fresh: Account,
    ) -> Option<(AccountSnapshot, AccountSnapshot)> {
        let mut inner = self.inner.write().await;
        let existing = inner.accounts.get_mut(&fresh.id)?;
        let before = AccountSnapshot::from(&*existing);
        *existing = fresh;
        let after = AccountSnapshot::from(&*existing);
        Some((before, after))
    }

    /// Inserts (or wholly replaces) a server aggregate from a create
    /// payload. Replaying the same payload is idempotent. Every member's
    /// account lands in the top-level map, and the default role is
    /// guaranteed to exist afterwards.
    pub(crate) async fn insert_server(&self, create: ServerCreate) -> Server {
        let ServerCreate {
            mut server,
            members,
            roles,
        } = create;

        let mut inner = self.inner.write().await;
        for role in roles {
            server.roles.insert(role.id, role);
        }
        if server.default_role().is_none() {
            warn!(server = %server.id, "server payload missing its default role, synthesizing");
            server
                .roles
                .insert(server.id, Role::default_for(server.id));
        }
        for payload in members {
            let (account, member) = payload.into_parts();
            server.members.insert(member.account_id, member);
            inner.accounts.entry(account.id).or_insert(account);
        }
        inner.servers.insert(server.id, server.clone());
        server
    }

    /// Applies a server update in place, returning before/after snapshots.
    /// Unknown servers are ignored.
    pub(crate) async fn update_server(
        &self,
        update: Server,
    ) -> Option<(ServerSnapshot, ServerSnapshot)> {
        let mut inner = self.inner.write().await;
        let existing = inner.servers.get_mut(&update.id)?;
        let before = ServerSnapshot::from(&*existing);
        existing.apply_update(update);
        let after = ServerSnapshot::from(&*existing);
        Some((before, after))
    }

    pub(crate) async fn remove_server(&self, id: Snowflake) -> Option<Server> {
        self.inner.write().await.servers.remove(&id)
    }

    /// Inserts or replaces a member, ensuring the embedded account exists in
    /// the top-level map. Returns `None` when the owning server is unknown.
    pub(crate) async fn upsert_member(
        &self,
        server_id: Snowflake,
        payload: MemberPayload,
    ) -> Option<MemberWrite> {
        let mut inner = self.inner.write().await;
        if !inner.servers.contains_key(&server_id) {
            return None;
        }
        let (account, member) = payload.into_parts();
        inner.accounts.entry(account.id).or_insert_with(|| account.clone());
        let server = inner.servers.get_mut(&server_id)?;
        let previous = server
            .members
            .insert(member.account_id, member.clone())
            .map(|old| MemberSnapshot::from(&old));
        Some(MemberWrite {
            account,
            member,
            previous,
        })
    }

    /// Removes a member. Returns whether it was actually present.
    pub(crate) async fn remove_member(&self, server_id: Snowflake, account_id: Snowflake) -> bool {
        let mut inner = self.inner.write().await;
        match inner.servers.get_mut(&server_id) {
            Some(server) => server.members.remove(&account_id).is_some(),
            None => false,
        }
    }

    /// Inserts a role into a server. Returns `None` when the server is
    /// unknown.
    pub(crate) async fn insert_role(&self, server_id: Snowflake, role: Role) -> Option<Role> {
        let mut inner = self.inner.write().await;
        let server = inner.servers.get_mut(&server_id)?;
        server.roles.insert(role.id, role.clone());
        Some(role)
    }

    /// Removes a role, returning it if it was present. The default role is
    /// never individually removable.
    pub(crate) async fn remove_role(&self, server_id: Snowflake, role_id: Snowflake) -> Option<Role> {
        if role_id == server_id {
            warn!(server = %server_id, "refusing to remove the default role");
            return None;
        }
        let mut inner = self.inner.write().await;
        inner.servers.get_mut(&server_id)?.roles.remove(&role_id)
    }

    /// Applies a role update, implicitly creating the role when the cache
    /// has desynced and doesn't know it yet. Returns `None` only when the
    /// owning server is unknown.
    pub(crate) async fn upsert_role(
        &self,
        server_id: Snowflake,
        role: Role,
    ) -> Option<(Option<RoleSnapshot>, RoleSnapshot)> {
        let mut inner = self.inner.write().await;
        let server = inner.servers.get_mut(&server_id)?;
        let before = server.roles.get(&role.id).map(RoleSnapshot::from);
        let after = RoleSnapshot::from(&role);
        server.roles.insert(role.id, role);
        Some((before, after))
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn server_create(id: u64) -> ServerCreate {
        serde_json::from_value(json!({
            "id": id,
            "name": format!("server-{id}"),
            "members": [
                {"user": {"id": 99, "username": "sable", "discriminator": "0420"}, "nick": "sbl"}
            ],
            "roles": [
                {"id": id, "name": "everyone", "position": 0},
                {"id": id + 1, "name": "mods", "position": 1}
            ]
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn server_insert_is_idempotent() {
        let store = EntityStore::new();
        store.insert_server(server_create(10)).await;
        let first = store.server(Snowflake::new(10)).await.unwrap();

        store.insert_server(server_create(10)).await;
        let second = store.server(Snowflake::new(10)).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.servers().await.len(), 1);
    }

    #[tokio::test]
    async fn member_accounts_are_shared_into_the_account_map() {
        let store = EntityStore::new();
        store.insert_server(server_create(10)).await;

        let account = store.account(Snowflake::new(99)).await.unwrap();
        assert_eq!(account.username, "sable");

        let member = store
            .member(Snowflake::new(10), Snowflake::new(99))
            .await
            .unwrap();
        assert_eq!(member.account_id, Snowflake::new(99));
        assert_eq!(member.nick.as_deref(), Some("sbl"));
    }

    #[tokio::test]
    async fn default_role_is_synthesized_when_missing() {
        let store = EntityStore::new();
        let create: ServerCreate = serde_json::from_value(json!({
            "id": 10,
            "name": "bare",
            "roles": [{"id": 11, "name": "mods", "position": 3}]
        }))
        .unwrap();
        store.insert_server(create).await;

        let server = store.server(Snowflake::new(10)).await.unwrap();
        assert!(server.default_role().is_some());
    }

    #[tokio::test]
    async fn role_listing_ends_with_the_default_role() {
        let store = EntityStore::new();
        let create: ServerCreate = serde_json::from_value(json!({
            "id": 10,
            "name": "den",
            "roles": [
                // The default role's position would put it first; display
                // order must still end with it.
                {"id": 10, "name": "everyone", "position": 0},
                {"id": 12, "name": "admins", "position": 5},
                {"id": 11, "name": "mods", "position": 2}
            ]
        }))
        .unwrap();
        store.insert_server(create).await;

        let roles = store.roles(Snowflake::new(10)).await.unwrap();
        let names: Vec<&str> = roles.iter().map(|role| role.name.as_str()).collect();
        assert_eq!(names, vec!["mods", "admins", "everyone"]);
    }

    #[tokio::test]
    async fn member_remove_for_unknown_member_is_a_no_op() {
        let store = EntityStore::new();
        store.insert_server(server_create(10)).await;

        assert!(store.remove_member(Snowflake::new(10), Snowflake::new(99)).await);
        assert!(!store.remove_member(Snowflake::new(10), Snowflake::new(99)).await);
        assert!(!store.remove_member(Snowflake::new(404), Snowflake::new(99)).await);
    }

    #[tokio::test]
    async fn default_role_is_not_removable() {
        let store = EntityStore::new();
        store.insert_server(server_create(10)).await;

        assert!(store.remove_role(Snowflake::new(10), Snowflake::new(10)).await.is_none());
        assert!(store.remove_role(Snowflake::new(10), Snowflake::new(11)).await.is_some());
    }

    #[tokio::test]
    async fn updates_return_before_and_after_snapshots() {
        let store = EntityStore::new();
        store.insert_server(server_create(10)).await;

        let update: Server = serde_json::from_value(json!({
            "id": 10,
            "name": "renamed"
        }))
        .unwrap();
        let (before, after) = store.update_server(update).await.unwrap();
        assert_eq!(before.name, "server-10");
        assert_eq!(after.name, "renamed");

        // The nested maps survive a scalar update.
        let server = store.server(Snowflake::new(10)).await.unwrap();
        assert!(!server.members.is_empty());
        assert!(!server.roles.is_empty());

        let unknown: Server = serde_json::from_value(json!({"id": 404, "name": "x"})).unwrap();
        assert!(store.update_server(unknown).await.is_none());
    }

    #[tokio::test]
    async fn role_update_implicitly_creates_missing_roles() {
        let store = EntityStore::new();
        store.insert_server(server_create(10)).await;

        let role: Role = serde_json::from_value(json!({"id": 77, "name": "new", "position": 4})).unwrap();
        let (before, after) = store.upsert_role(Snowflake::new(10), role).await.unwrap();
        assert!(before.is_none());
        assert_eq!(after.name, "new");

        let renamed: Role =
            serde_json::from_value(json!({"id": 77, "name": "renamed", "position": 4})).unwrap();
        let (before, after) = store.upsert_role(Snowflake::new(10), renamed).await.unwrap();
        assert_eq!(before.unwrap().name, "new");
        assert_eq!(after.name, "renamed");
    }

    #[tokio::test]
    async fn clear_empties_every_map() {
        let store = EntityStore::new();
        store.insert_server(server_create(10)).await;
        store
            .set_own_account(
                serde_json::from_value(json!({"id": 1, "username": "me", "discriminator": "0001"}))
                    .unwrap(),
            )
            .await;

        store.clear().await;
        assert!(store.servers().await.is_empty());
        assert!(store.accounts().await.is_empty());
        assert!(store.own_account().await.is_none());
    }
}
