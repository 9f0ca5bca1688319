//! Routing of dispatch-class frames into cache mutations and notifications.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, trace};

use chatwire_shared::{
    Account, Member, MemberEvent, MemberRemove, OwnAccount, Ready, Role, RoleDelete, RoleEvent,
    Server, ServerCreate, ServerDelete, Snowflake,
};

use crate::dispatcher::Dispatcher;
use crate::gateway::session::SessionState;
use crate::snapshot::{AccountSnapshot, MemberSnapshot, RoleSnapshot, ServerSnapshot};
use crate::store::EntityStore;

/// Notifications delivered to listeners. Update variants carry typed
/// before/after snapshots rather than live cache entries.
#[derive(Debug, Clone)]
pub enum Event {
    /// The session is established and the initial server list has finished
    /// loading.
    Ready {
        account: OwnAccount,
        session_id: String,
    },
    /// A prior session was resumed; missed events replay after this.
    Resumed,
    AccountUpdated {
        before: AccountSnapshot,
        after: AccountSnapshot,
    },
    ServerJoined {
        server: Server,
    },
    /// A known server recovered from an outage.
    ServerAvailable {
        server: Server,
    },
    ServerUpdated {
        before: ServerSnapshot,
        after: ServerSnapshot,
    },
    /// The session left a server. `server` is `None` when the removal
    /// referenced a server that was never cached.
    ServerLeft {
        server: Option<Server>,
    },
    MemberJoined {
        server_id: Snowflake,
        member: Member,
        account: Account,
    },
    MemberUpdated {
        server_id: Snowflake,
        before: Option<MemberSnapshot>,
        after: MemberSnapshot,
    },
    /// A member left. The account is rebuilt from the event payload; the
    /// cached member is already gone.
    MemberLeft {
        server_id: Snowflake,
        account: Account,
    },
    RoleCreated {
        server_id: Snowflake,
        role: Role,
    },
    RoleUpdated {
        server_id: Snowflake,
        before: Option<RoleSnapshot>,
        after: RoleSnapshot,
    },
    RoleDeleted {
        server_id: Snowflake,
        role: Role,
    },
}

struct PendingReady {
    account: OwnAccount,
    session_id: String,
    awaiting: HashSet<Snowflake>,
}

/// Maps inbound event names to handlers. Unknown names are ignored so that
/// protocol additions never break existing clients; malformed payloads are
/// dropped with a log line.
pub(crate) struct EventRouter {
    store: Arc<EntityStore>,
    dispatcher: Arc<Dispatcher>,
    pending_ready: Mutex<Option<PendingReady>>,
}

impl EventRouter {
    pub(crate) fn new(store: Arc<EntityStore>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            pending_ready: Mutex::new(None),
        }
    }

    /// Forgets any half-finished ready gating. Called alongside a full
    /// cache clear.
    pub(crate) fn reset(&self) {
        *self.lock_pending() = None;
    }

    pub(crate) async fn process(&self, session: &SessionState, name: &str, data: Value) {
        match name {
            "READY" => self.handle_ready(session, data).await,
            "RESUMED" => self.dispatcher.dispatch(Event::Resumed),
            "USER_UPDATE" => self.handle_account_update(data).await,
            "GUILD_CREATE" => self.handle_server_create(data).await,
            "GUILD_UPDATE" => self.handle_server_update(data).await,
            "GUILD_DELETE" => self.handle_server_delete(data).await,
            "GUILD_MEMBER_ADD" => self.handle_member_add(data).await,
            "GUILD_MEMBER_UPDATE" => self.handle_member_update(data).await,
            "GUILD_MEMBER_REMOVE" => self.handle_member_remove(data).await,
            "GUILD_ROLE_CREATE" => self.handle_role_create(data).await,
            "GUILD_ROLE_UPDATE" => self.handle_role_update(data).await,
            "GUILD_ROLE_DELETE" => self.handle_role_delete(data).await,
            other => trace!(event = other, "ignoring unknown gateway event"),
        }
    }

    async fn handle_ready(&self, session: &SessionState, data: Value) {
        let Some(ready) = parse::<Ready>("READY", data) else {
            return;
        };
        session.set_session_id(ready.session_id.clone());
        self.store.set_own_account(ready.user.clone()).await;

        let awaiting: HashSet<Snowflake> = ready.guilds.iter().map(|guild| guild.id).collect();
        if awaiting.is_empty() {
            self.dispatcher.dispatch(Event::Ready {
                account: ready.user,
                session_id: ready.session_id,
            });
        } else {
            debug!(servers = awaiting.len(), "deferring ready until the server list loads");
            *self.lock_pending() = Some(PendingReady {
                account: ready.user,
                session_id: ready.session_id,
                awaiting,
            });
        }
    }

    async fn handle_account_update(&self, data: Value) {
        let Some(fresh) = parse::<Account>("USER_UPDATE", data) else {
            return;
        };
        if let Some((before, after)) = self.store.update_account(fresh).await {
            self.dispatcher.dispatch(Event::AccountUpdated { before, after });
        }
    }

    async fn handle_server_create(&self, data: Value) {
        let Some(create) = parse::<ServerCreate>("GUILD_CREATE", data) else {
            return;
        };
        if create.server.unavailable == Some(true) {
            debug!(server = %create.server.id, "ignoring create for unavailable server");
            return;
        }
        let recovered = create.server.unavailable == Some(false);
        let server = self.store.insert_server(create).await;
        let server_id = server.id;

        if recovered {
            self.dispatcher.dispatch(Event::ServerAvailable {
                server: server.clone(),
            });
        }
        self.dispatcher.dispatch(Event::ServerJoined { server });
        self.note_server_loaded(server_id);
    }

    fn note_server_loaded(&self, server_id: Snowflake) {
        let mut pending = self.lock_pending();
        let finished = match pending.as_mut() {
            Some(state) => {
                state.awaiting.remove(&server_id);
                state.awaiting.is_empty()
            }
            None => false,
        };
        if finished {
            if let Some(state) = pending.take() {
                self.dispatcher.dispatch(Event::Ready {
                    account: state.account,
                    session_id: state.session_id,
                });
            }
        }
    }

    async fn handle_server_update(&self, data: Value) {
        let Some(update) = parse::<Server>("GUILD_UPDATE", data) else {
            return;
        };
        if let Some((before, after)) = self.store.update_server(update).await {
            self.dispatcher.dispatch(Event::ServerUpdated { before, after });
        }
    }

    async fn handle_server_delete(&self, data: Value) {
        let Some(delete) = parse::<ServerDelete>("GUILD_DELETE", data) else {
            return;
        };
        let removed = self.store.remove_server(delete.id).await;
        if !delete.unavailable {
            self.dispatcher.dispatch(Event::ServerLeft { server: removed });
        }
    }

    async fn handle_member_add(&self, data: Value) {
        let Some(event) = parse::<MemberEvent>("GUILD_MEMBER_ADD", data) else {
            return;
        };
        match self.store.upsert_member(event.guild_id, event.member).await {
            Some(write) => self.dispatcher.dispatch(Event::MemberJoined {
                server_id: event.guild_id,
                member: write.member,
                account: write.account,
            }),
            None => debug!(server = %event.guild_id, "dropping member add for unknown server"),
        }
    }

    async fn handle_member_update(&self, data: Value) {
        let Some(event) = parse::<MemberEvent>("GUILD_MEMBER_UPDATE", data) else {
            return;
        };
        match self.store.upsert_member(event.guild_id, event.member).await {
            Some(write) => self.dispatcher.dispatch(Event::MemberUpdated {
                server_id: event.guild_id,
                before: write.previous,
                after: MemberSnapshot::from(&write.member),
            }),
            None => debug!(server = %event.guild_id, "dropping member update for unknown server"),
        }
    }

    async fn handle_member_remove(&self, data: Value) {
        let Some(event) = parse::<MemberRemove>("GUILD_MEMBER_REMOVE", data) else {
            return;
        };
        if self.store.remove_member(event.guild_id, event.user.id).await {
            self.dispatcher.dispatch(Event::MemberLeft {
                server_id: event.guild_id,
                account: event.user,
            });
        }
    }

    async fn handle_role_create(&self, data: Value) {
        let Some(event) = parse::<RoleEvent>("GUILD_ROLE_CREATE", data) else {
            return;
        };
        match self.store.insert_role(event.guild_id, event.role).await {
            Some(role) => self.dispatcher.dispatch(Event::RoleCreated {
                server_id: event.guild_id,
                role,
            }),
            None => debug!(server = %event.guild_id, "dropping role create for unknown server"),
        }
    }

    async fn handle_role_update(&self, data: Value) {
        let Some(event) = parse::<RoleEvent>("GUILD_ROLE_UPDATE", data) else {
            return;
        };
        match self.store.upsert_role(event.guild_id, event.role).await {
            Some((before, after)) => self.dispatcher.dispatch(Event::RoleUpdated {
                server_id: event.guild_id,
                before,
                after,
            }),
            None => debug!(server = %event.guild_id, "dropping role update for unknown server"),
        }
    }

    async fn handle_role_delete(&self, data: Value) {
        let Some(event) = parse::<RoleDelete>("GUILD_ROLE_DELETE", data) else {
            return;
        };
        if let Some(role) = self.store.remove_role(event.guild_id, event.role_id).await {
            self.dispatcher.dispatch(Event::RoleDeleted {
                server_id: event.guild_id,
                role,
            });
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Option<PendingReady>> {
        match self.pending_ready.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn parse<T: DeserializeOwned>(event: &str, data: Value) -> Option<T> {
    match serde_json::from_value(data) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(event, %err, "dropping malformed event payload");
            None
        }
    }
}
