//! Bitmask flag types: session capability flags and account badges.

use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// The event categories a session opts into when identifying.
///
/// Each flag independently toggles one category of dispatch events. The
/// `members` and `presences` categories are privileged and excluded from
/// [`CapabilityFlags::standard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CapabilityFlags(u64);

impl CapabilityFlags {
    pub const NONE: Self = Self(0);
    pub const SERVERS: Self = Self(1 << 0);
    /// Privileged.
    pub const MEMBERS: Self = Self(1 << 1);
    pub const BANS: Self = Self(1 << 2);
    pub const EMOJIS: Self = Self(1 << 3);
    pub const INTEGRATIONS: Self = Self(1 << 4);
    pub const WEBHOOKS: Self = Self(1 << 5);
    pub const INVITES: Self = Self(1 << 6);
    pub const VOICE_STATES: Self = Self(1 << 7);
    /// Privileged.
    pub const PRESENCES: Self = Self(1 << 8);
    pub const SERVER_MESSAGES: Self = Self(1 << 9);
    pub const SERVER_MESSAGE_REACTIONS: Self = Self(1 << 10);
    pub const SERVER_MESSAGE_TYPING: Self = Self(1 << 11);
    pub const DIRECT_MESSAGES: Self = Self(1 << 12);
    pub const DIRECT_MESSAGE_REACTIONS: Self = Self(1 << 13);
    pub const DIRECT_MESSAGE_TYPING: Self = Self(1 << 14);

    const ALL_BITS: u64 = (1 << 15) - 1;

    /// Every category, privileged ones included.
    pub const fn all() -> Self {
        Self(Self::ALL_BITS)
    }

    /// Every category except the privileged `members` and `presences`.
    pub const fn standard() -> Self {
        Self(Self::ALL_BITS & !Self::MEMBERS.0 & !Self::PRESENCES.0)
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub const fn servers(self) -> bool {
        self.contains(Self::SERVERS)
    }

    pub const fn members(self) -> bool {
        self.contains(Self::MEMBERS)
    }

    pub const fn bans(self) -> bool {
        self.contains(Self::BANS)
    }

    pub const fn emojis(self) -> bool {
        self.contains(Self::EMOJIS)
    }

    pub const fn integrations(self) -> bool {
        self.contains(Self::INTEGRATIONS)
    }

    pub const fn webhooks(self) -> bool {
        self.contains(Self::WEBHOOKS)
    }

    pub const fn invites(self) -> bool {
        self.contains(Self::INVITES)
    }

    pub const fn voice_states(self) -> bool {
        self.contains(Self::VOICE_STATES)
    }

    pub const fn presences(self) -> bool {
        self.contains(Self::PRESENCES)
    }

    pub const fn server_messages(self) -> bool {
        self.contains(Self::SERVER_MESSAGES)
    }

    pub const fn server_message_reactions(self) -> bool {
        self.contains(Self::SERVER_MESSAGE_REACTIONS)
    }

    pub const fn server_message_typing(self) -> bool {
        self.contains(Self::SERVER_MESSAGE_TYPING)
    }

    pub const fn direct_messages(self) -> bool {
        self.contains(Self::DIRECT_MESSAGES)
    }

    pub const fn direct_message_reactions(self) -> bool {
        self.contains(Self::DIRECT_MESSAGE_REACTIONS)
    }

    pub const fn direct_message_typing(self) -> bool {
        self.contains(Self::DIRECT_MESSAGE_TYPING)
    }
}

impl BitOr for CapabilityFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for CapabilityFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Public account badges, exposed on account payloads as a raw bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountFlags(u64);

impl AccountFlags {
    pub const STAFF: Self = Self(1 << 0);
    pub const PARTNER: Self = Self(1 << 1);
    pub const EVENTS: Self = Self(1 << 2);
    pub const BUG_HUNTER: Self = Self(1 << 3);
    pub const EARLY_SUPPORTER: Self = Self(1 << 9);
    pub const TEAM_ACCOUNT: Self = Self(1 << 10);
    pub const BUG_HUNTER_TIER_TWO: Self = Self(1 << 14);
    pub const VERIFIED_BOT: Self = Self(1 << 16);
    pub const EARLY_VERIFIED_DEVELOPER: Self = Self(1 << 17);
    pub const CERTIFIED_MODERATOR: Self = Self(1 << 18);

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn staff(self) -> bool {
        self.contains(Self::STAFF)
    }

    pub const fn partner(self) -> bool {
        self.contains(Self::PARTNER)
    }

    pub const fn events(self) -> bool {
        self.contains(Self::EVENTS)
    }

    pub const fn bug_hunter(self) -> bool {
        self.contains(Self::BUG_HUNTER)
    }

    pub const fn early_supporter(self) -> bool {
        self.contains(Self::EARLY_SUPPORTER)
    }

    pub const fn team_account(self) -> bool {
        self.contains(Self::TEAM_ACCOUNT)
    }

    pub const fn bug_hunter_tier_two(self) -> bool {
        self.contains(Self::BUG_HUNTER_TIER_TWO)
    }

    pub const fn verified_bot(self) -> bool {
        self.contains(Self::VERIFIED_BOT)
    }

    pub const fn early_verified_developer(self) -> bool {
        self.contains(Self::EARLY_VERIFIED_DEVELOPER)
    }

    pub const fn certified_moderator(self) -> bool {
        self.contains(Self::CERTIFIED_MODERATOR)
    }
}
