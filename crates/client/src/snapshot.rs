//! Typed before/after snapshots for update notifications.
//!
//! A snapshot copies only the fields change notifications care about, taken
//! under the store's write lock before the mutation lands. Handing listeners
//! a snapshot instead of the live entity means nothing they hold can alias
//! the cache.

use chrono::{DateTime, Utc};

use chatwire_shared::{Account, AccountFlags, Member, Role, Server, Snowflake};

#[derive(Debug, Clone, PartialEq)]
pub struct AccountSnapshot {
    pub id: Snowflake,
    pub username: String,
    pub discriminator: String,
    pub avatar: Option<String>,
    pub banner: Option<String>,
    pub accent_color: Option<u32>,
    pub public_flags: AccountFlags,
}

impl From<&Account> for AccountSnapshot {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            username: account.username.clone(),
            discriminator: account.discriminator.clone(),
            avatar: account.avatar.clone(),
            banner: account.banner.clone(),
            accent_color: account.accent_color,
            public_flags: account.public_flags,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerSnapshot {
    pub id: Snowflake,
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub owner_id: Option<Snowflake>,
    pub features: Vec<String>,
    pub member_count: Option<u64>,
}

impl From<&Server> for ServerSnapshot {
    fn from(server: &Server) -> Self {
        Self {
            id: server.id,
            name: server.name.clone(),
            description: server.description.clone(),
            icon: server.icon.clone(),
            owner_id: server.owner_id,
            features: server.features.clone(),
            member_count: server.member_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemberSnapshot {
    pub account_id: Snowflake,
    pub nick: Option<String>,
    pub roles: Vec<Snowflake>,
    pub joined_at: Option<DateTime<Utc>>,
    pub pending: bool,
}

impl From<&Member> for MemberSnapshot {
    fn from(member: &Member) -> Self {
        Self {
            account_id: member.account_id,
            nick: member.nick.clone(),
            roles: member.roles.clone(),
            joined_at: member.joined_at,
            pending: member.pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoleSnapshot {
    pub id: Snowflake,
    pub name: String,
    pub color: u32,
    pub hoist: bool,
    pub position: i64,
    pub mentionable: bool,
}

impl From<&Role> for RoleSnapshot {
    fn from(role: &Role) -> Self {
        Self {
            id: role.id,
            name: role.name.clone(),
            color: role.color,
            hoist: role.hoist,
            position: role.position,
            mentionable: role.mentionable,
        }
    }
}
