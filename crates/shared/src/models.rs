//! Entity models cached by the client: accounts, servers, members, roles.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::flags::AccountFlags;
use crate::snowflake::{Entity, Snowflake};

/// An account as it appears on the wire and in the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Snowflake,
    pub username: String,
    pub discriminator: String,
    #[serde(default)]
    pub bot: bool,
    #[serde(default)]
    pub system: bool,
    #[serde(default)]
    pub avatar: Option<String>,
    #[serde(default)]
    pub banner: Option<String>,
    #[serde(default)]
    pub accent_color: Option<u32>,
    #[serde(default)]
    pub public_flags: AccountFlags,
}

impl Entity for Account {
    fn id(&self) -> Snowflake {
        self.id
    }
}

/// The account the session authenticated as. Carries private fields the
/// gateway only sends for yourself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnAccount {
    #[serde(flatten)]
    pub account: Account,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub mfa_enabled: bool,
}

impl Entity for OwnAccount {
    fn id(&self) -> Snowflake {
        self.account.id
    }
}

/// A server aggregate. Scalar fields come off the wire; the nested member
/// and role maps are populated by the entity store, never by serde.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: Snowflake,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub owner_id: Option<Snowflake>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub member_count: Option<u64>,
    #[serde(default)]
    pub large: bool,
    #[serde(default)]
    pub afk_timeout: u64,
    #[serde(default)]
    pub preferred_locale: Option<String>,
    #[serde(default)]
    pub vanity_url_code: Option<String>,
    /// Tri-state outage marker: absent on a first join, `false` when the
    /// create recovers from an outage, `true` while the server is down.
    #[serde(default)]
    pub unavailable: Option<bool>,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub members: HashMap<Snowflake, Member>,
    #[serde(skip)]
    pub roles: HashMap<Snowflake, Role>,
}

impl Server {
    /// Overwrites scalar fields from an update payload, keeping the nested
    /// member and role maps intact.
    pub fn apply_update(&mut self, update: Server) {
        self.name = update.name;
        self.description = update.description;
        self.icon = update.icon;
        self.owner_id = update.owner_id;
        self.features = update.features;
        if update.member_count.is_some() {
            self.member_count = update.member_count;
        }
        self.large = update.large;
        self.afk_timeout = update.afk_timeout;
        self.preferred_locale = update.preferred_locale;
        self.vanity_url_code = update.vanity_url_code;
        self.unavailable = update.unavailable;
        if update.joined_at.is_some() {
            self.joined_at = update.joined_at;
        }
    }

    /// The role implicitly granted to every member. Its ID equals the
    /// server's ID and it exists for every loaded server.
    pub fn default_role(&self) -> Option<&Role> {
        self.roles.get(&self.id)
    }
}

impl Entity for Server {
    fn id(&self) -> Snowflake {
        self.id
    }
}

/// A cached membership. The account itself lives in the top-level account
/// map; members reference it by ID.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub account_id: Snowflake,
    pub nick: Option<String>,
    pub roles: Vec<Snowflake>,
    pub joined_at: Option<DateTime<Utc>>,
    pub deaf: bool,
    pub mute: bool,
    pub pending: bool,
}

/// The wire shape of a membership, with the account embedded.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MemberPayload {
    pub user: Account,
    #[serde(default)]
    pub nick: Option<String>,
    #[serde(default)]
    pub roles: Vec<Snowflake>,
    #[serde(default)]
    pub joined_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deaf: bool,
    #[serde(default)]
    pub mute: bool,
    #[serde(default)]
    pub pending: bool,
}

impl MemberPayload {
    /// Splits the payload into the shared account and the cached member.
    pub fn into_parts(self) -> (Account, Member) {
        let member = Member {
            account_id: self.user.id,
            nick: self.nick,
            roles: self.roles,
            joined_at: self.joined_at,
            deaf: self.deaf,
            mute: self.mute,
            pending: self.pending,
        };
        (self.user, member)
    }
}

/// A role within a server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Role {
    pub id: Snowflake,
    pub name: String,
    #[serde(default)]
    pub color: u32,
    #[serde(default)]
    pub hoist: bool,
    #[serde(default)]
    pub position: i64,
    #[serde(default)]
    pub managed: bool,
    #[serde(default)]
    pub mentionable: bool,
    #[serde(default)]
    pub unicode_emoji: Option<String>,
}

impl Role {
    /// The synthetic default role used when a server payload omits its own.
    pub fn default_for(server_id: Snowflake) -> Self {
        Self {
            id: server_id,
            name: "everyone".to_string(),
            color: 0,
            hoist: false,
            position: 0,
            managed: false,
            mentionable: false,
            unicode_emoji: None,
        }
    }
}

impl Entity for Role {
    fn id(&self) -> Snowflake {
        self.id
    }
}
